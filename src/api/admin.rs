use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use super::require_admin;
use crate::{
    curriculum::{
        chapter::{self, Chapter, ChapterForm},
        question::{self, Question, QuestionFilter, QuestionForm},
        slide::{self, Slide, SlideForm},
    },
    error::{Error, ErrorBody, Result},
    learning::progress::{CompletionEntry, recent_completions},
    server::Server,
    user::{self, Role, UserActivity, UserProfile},
};

const RECENT_SIGNUPS: i64 = 5;
const RECENT_COMPLETIONS: i64 = 10;

#[derive(Debug, Serialize, ToSchema)]
pub struct AdminDashboard {
    pub user_count: i64,
    pub chapter_count: i64,
    pub slide_count: i64,
    pub question_count: i64,
    pub recent_signups: Vec<UserProfile>,
    pub recent_completions: Vec<CompletionEntry>,
}

#[utoipa::path(
    get,
    path = "/api/admin/dashboard",
    tag = "admin",
    responses(
        (status = 200, description = "Site totals and recent activity", body = AdminDashboard),
        (status = 303, description = "Not an administrator, redirect to /unauthorized")
    )
)]
pub async fn dashboard(
    State(server): State<Arc<Server>>,
    session: Session,
) -> Result<Json<AdminDashboard>> {
    require_admin(&server, &session).await?;
    let db = &server.database;
    Ok(Json(AdminDashboard {
        user_count: user::count_users(db).await?,
        chapter_count: chapter::count_chapters(db).await?,
        slide_count: slide::count_slides(db).await?,
        question_count: question::count_questions(db).await?,
        recent_signups: user::recent_signups(db, RECENT_SIGNUPS).await?,
        recent_completions: recent_completions(db, RECENT_COMPLETIONS).await?,
    }))
}

#[utoipa::path(
    get,
    path = "/api/admin/users",
    tag = "admin",
    responses((status = 200, description = "Every user with activity totals", body = Vec<UserActivity>))
)]
pub async fn list_users(
    State(server): State<Arc<Server>>,
    session: Session,
) -> Result<Json<Vec<UserActivity>>> {
    require_admin(&server, &session).await?;
    Ok(Json(user::list_user_activity(&server.database).await?))
}

#[derive(Deserialize, ToSchema)]
pub struct RoleRequest {
    pub role: Role,
}

#[utoipa::path(
    put,
    path = "/api/admin/users/{id}/role",
    tag = "admin",
    params(("id" = i64, Path, description = "User id")),
    request_body = RoleRequest,
    responses(
        (status = 200, description = "Role changed", body = UserProfile),
        (status = 400, description = "Administrators cannot change their own role", body = ErrorBody),
        (status = 404, description = "No such user", body = ErrorBody)
    )
)]
pub async fn set_user_role(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
    Json(req): Json<RoleRequest>,
) -> Result<Json<UserProfile>> {
    let admin = require_admin(&server, &session).await?;
    if admin.id == id {
        return Err(Error::bad_request("you cannot change your own role"));
    }
    let profile = user::set_role(&server.database, id, req.role).await?;
    info!("admin {} set role of user {} to {:?}", admin.id, id, req.role);
    Ok(Json(profile))
}

#[utoipa::path(
    get,
    path = "/api/admin/chapters",
    tag = "admin",
    responses((status = 200, description = "All chapters, drafts included", body = Vec<Chapter>))
)]
pub async fn list_chapters(
    State(server): State<Arc<Server>>,
    session: Session,
) -> Result<Json<Vec<Chapter>>> {
    require_admin(&server, &session).await?;
    Ok(Json(chapter::list_chapters(&server.database, false).await?))
}

#[utoipa::path(
    post,
    path = "/api/admin/chapters",
    tag = "admin",
    request_body = ChapterForm,
    responses(
        (status = 201, description = "Chapter created", body = Chapter),
        (status = 400, description = "Invalid form", body = ErrorBody)
    )
)]
pub async fn create_chapter(
    State(server): State<Arc<Server>>,
    session: Session,
    Json(form): Json<ChapterForm>,
) -> Result<(StatusCode, Json<Chapter>)> {
    require_admin(&server, &session).await?;
    let chapter = chapter::create_chapter(&server.database, form).await?;
    Ok((StatusCode::CREATED, Json(chapter)))
}

#[utoipa::path(
    get,
    path = "/api/admin/chapters/{id}",
    tag = "admin",
    params(("id" = i64, Path, description = "Chapter id")),
    responses(
        (status = 200, description = "The chapter", body = Chapter),
        (status = 404, description = "No such chapter", body = ErrorBody)
    )
)]
pub async fn get_chapter(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<Chapter>> {
    require_admin(&server, &session).await?;
    Ok(Json(chapter::get_chapter(&server.database, id).await?))
}

#[utoipa::path(
    put,
    path = "/api/admin/chapters/{id}",
    tag = "admin",
    params(("id" = i64, Path, description = "Chapter id")),
    request_body = ChapterForm,
    responses(
        (status = 200, description = "Chapter updated", body = Chapter),
        (status = 404, description = "No such chapter", body = ErrorBody)
    )
)]
pub async fn update_chapter(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
    Json(form): Json<ChapterForm>,
) -> Result<Json<Chapter>> {
    require_admin(&server, &session).await?;
    Ok(Json(chapter::update_chapter(&server.database, id, form).await?))
}

#[utoipa::path(
    delete,
    path = "/api/admin/chapters/{id}",
    tag = "admin",
    params(("id" = i64, Path, description = "Chapter id")),
    responses(
        (status = 204, description = "Chapter deleted with its slides and questions"),
        (status = 404, description = "No such chapter", body = ErrorBody)
    )
)]
pub async fn delete_chapter(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    require_admin(&server, &session).await?;
    chapter::delete_chapter(&server.database, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SlideFilter {
    pub chapter_id: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/api/admin/slides",
    tag = "admin",
    params(SlideFilter),
    responses((status = 200, description = "Slides in chapter order", body = Vec<Slide>))
)]
pub async fn list_slides(
    State(server): State<Arc<Server>>,
    session: Session,
    Query(filter): Query<SlideFilter>,
) -> Result<Json<Vec<Slide>>> {
    require_admin(&server, &session).await?;
    Ok(Json(slide::list_slides(&server.database, filter.chapter_id).await?))
}

#[utoipa::path(
    post,
    path = "/api/admin/slides",
    tag = "admin",
    request_body = SlideForm,
    responses(
        (status = 201, description = "Slide created", body = Slide),
        (status = 404, description = "No such chapter", body = ErrorBody)
    )
)]
pub async fn create_slide(
    State(server): State<Arc<Server>>,
    session: Session,
    Json(form): Json<SlideForm>,
) -> Result<(StatusCode, Json<Slide>)> {
    require_admin(&server, &session).await?;
    let slide = slide::create_slide(&server.database, form).await?;
    Ok((StatusCode::CREATED, Json(slide)))
}

#[utoipa::path(
    get,
    path = "/api/admin/slides/{id}",
    tag = "admin",
    params(("id" = i64, Path, description = "Slide id")),
    responses(
        (status = 200, description = "The slide", body = Slide),
        (status = 404, description = "No such slide", body = ErrorBody)
    )
)]
pub async fn get_slide(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<Slide>> {
    require_admin(&server, &session).await?;
    Ok(Json(slide::get_slide(&server.database, id).await?))
}

#[utoipa::path(
    put,
    path = "/api/admin/slides/{id}",
    tag = "admin",
    params(("id" = i64, Path, description = "Slide id")),
    request_body = SlideForm,
    responses(
        (status = 200, description = "Slide updated", body = Slide),
        (status = 404, description = "No such slide", body = ErrorBody)
    )
)]
pub async fn update_slide(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
    Json(form): Json<SlideForm>,
) -> Result<Json<Slide>> {
    require_admin(&server, &session).await?;
    Ok(Json(slide::update_slide(&server.database, id, form).await?))
}

#[utoipa::path(
    delete,
    path = "/api/admin/slides/{id}",
    tag = "admin",
    params(("id" = i64, Path, description = "Slide id")),
    responses(
        (status = 204, description = "Slide deleted with its practice questions"),
        (status = 404, description = "No such slide", body = ErrorBody)
    )
)]
pub async fn delete_slide(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    require_admin(&server, &session).await?;
    slide::delete_slide(&server.database, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/admin/questions",
    tag = "admin",
    params(QuestionFilter),
    responses((status = 200, description = "Questions in chapter order", body = Vec<Question>))
)]
pub async fn list_questions(
    State(server): State<Arc<Server>>,
    session: Session,
    Query(filter): Query<QuestionFilter>,
) -> Result<Json<Vec<Question>>> {
    require_admin(&server, &session).await?;
    Ok(Json(question::list_questions(&server.database, &filter).await?))
}

#[utoipa::path(
    post,
    path = "/api/admin/questions",
    tag = "admin",
    request_body = QuestionForm,
    responses(
        (status = 201, description = "Question created", body = Question),
        (status = 400, description = "Invalid options, answer or slide", body = ErrorBody)
    )
)]
pub async fn create_question(
    State(server): State<Arc<Server>>,
    session: Session,
    Json(form): Json<QuestionForm>,
) -> Result<(StatusCode, Json<Question>)> {
    require_admin(&server, &session).await?;
    let question = question::create_question(&server.database, form).await?;
    Ok((StatusCode::CREATED, Json(question)))
}

#[utoipa::path(
    get,
    path = "/api/admin/questions/{id}",
    tag = "admin",
    params(("id" = i64, Path, description = "Question id")),
    responses(
        (status = 200, description = "The question with its answer key", body = Question),
        (status = 404, description = "No such question", body = ErrorBody)
    )
)]
pub async fn get_question(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<Question>> {
    require_admin(&server, &session).await?;
    Ok(Json(question::get_question(&server.database, id).await?))
}

#[utoipa::path(
    put,
    path = "/api/admin/questions/{id}",
    tag = "admin",
    params(("id" = i64, Path, description = "Question id")),
    request_body = QuestionForm,
    responses(
        (status = 200, description = "Question updated", body = Question),
        (status = 400, description = "Invalid options, answer or slide", body = ErrorBody),
        (status = 404, description = "No such question", body = ErrorBody)
    )
)]
pub async fn update_question(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
    Json(form): Json<QuestionForm>,
) -> Result<Json<Question>> {
    require_admin(&server, &session).await?;
    Ok(Json(question::update_question(&server.database, id, form).await?))
}

#[utoipa::path(
    delete,
    path = "/api/admin/questions/{id}",
    tag = "admin",
    params(("id" = i64, Path, description = "Question id")),
    responses(
        (status = 204, description = "Question deleted"),
        (status = 404, description = "No such question", body = ErrorBody)
    )
)]
pub async fn delete_question(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<StatusCode> {
    require_admin(&server, &session).await?;
    question::delete_question(&server.database, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<Arc<Server>> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route("/users", get(list_users))
        .route("/users/{id}/role", put(set_user_role))
        .route("/chapters", get(list_chapters).post(create_chapter))
        .route(
            "/chapters/{id}",
            get(get_chapter).put(update_chapter).delete(delete_chapter),
        )
        .route("/slides", get(list_slides).post(create_slide))
        .route(
            "/slides/{id}",
            get(get_slide).put(update_slide).delete(delete_slide),
        )
        .route("/questions", get(list_questions).post(create_question))
        .route(
            "/questions/{id}",
            get(get_question).put(update_question).delete(delete_question),
        )
}
