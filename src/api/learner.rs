use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Deserialize;
use tower_sessions::Session;
use utoipa::ToSchema;

use super::current_user;
use crate::{
    curriculum::Curriculum,
    error::{Error, ErrorBody, Result},
    learning::{
        answer::list_answer_records,
        progress::ProgressIndex,
        report::{self, ChapterOverview, ChapterReport, Dashboard, ProgressReport},
        test_runner::{self, TestPaper, TestResult, TestRun, TestStart, TestView, ensure_test_unlocked},
        viewer::{ChapterDeck, SlideViewer, ViewerEffect, ViewerView, persist_effects},
    },
    server::Server,
    user::UserProfile,
};

#[derive(Deserialize, ToSchema)]
pub struct GoToRequest {
    pub index: usize,
}

#[derive(Deserialize, ToSchema)]
pub struct AnswerRequest {
    pub option_id: String,
}

#[utoipa::path(
    get,
    path = "/api/learner/me",
    tag = "learner",
    responses(
        (status = 200, description = "Signed-in profile", body = UserProfile),
        (status = 303, description = "Not signed in, redirect to /login")
    )
)]
pub async fn me(State(server): State<Arc<Server>>, session: Session) -> Result<Json<UserProfile>> {
    Ok(Json(current_user(&server, &session).await?))
}

#[utoipa::path(
    get,
    path = "/api/learner/dashboard",
    tag = "learner",
    responses((status = 200, description = "Learner home", body = Dashboard))
)]
pub async fn dashboard(
    State(server): State<Arc<Server>>,
    session: Session,
) -> Result<Json<Dashboard>> {
    let user = current_user(&server, &session).await?;
    let db = &server.database;
    let curriculum = Curriculum::load_published(db).await?;
    let progress = ProgressIndex::load(db, user.id).await?;
    let answers = list_answer_records(db, user.id, None).await?;
    Ok(Json(report::dashboard(
        user.display_name,
        &curriculum,
        &progress,
        &answers,
    )))
}

#[utoipa::path(
    get,
    path = "/api/learner/progress",
    tag = "learner",
    responses((status = 200, description = "Progress, performance and study history", body = ProgressReport))
)]
pub async fn progress(
    State(server): State<Arc<Server>>,
    session: Session,
) -> Result<Json<ProgressReport>> {
    let user = current_user(&server, &session).await?;
    let db = &server.database;
    let curriculum = Curriculum::load_published(db).await?;
    let progress = ProgressIndex::load(db, user.id).await?;
    let answers = list_answer_records(db, user.id, None).await?;
    let offset = server.config.utc_offset()?;
    Ok(Json(report::progress_report(
        &curriculum,
        &progress,
        &answers,
        offset,
    )))
}

#[utoipa::path(
    get,
    path = "/api/learner/chapters",
    tag = "learner",
    responses((status = 200, description = "Published chapters with progress", body = Vec<ChapterReport>))
)]
pub async fn list_chapters(
    State(server): State<Arc<Server>>,
    session: Session,
) -> Result<Json<Vec<ChapterReport>>> {
    let user = current_user(&server, &session).await?;
    let db = &server.database;
    let curriculum = Curriculum::load_published(db).await?;
    let progress = ProgressIndex::load(db, user.id).await?;
    let answers = list_answer_records(db, user.id, None).await?;
    let chapters = curriculum
        .chapters
        .iter()
        .map(|c| report::chapter_report(c, &progress, &answers))
        .collect();
    Ok(Json(chapters))
}

#[utoipa::path(
    get,
    path = "/api/learner/chapters/{id}",
    tag = "learner",
    params(("id" = i64, Path, description = "Chapter id")),
    responses(
        (status = 200, description = "Chapter overview", body = ChapterOverview),
        (status = 404, description = "No such published chapter", body = ErrorBody)
    )
)]
pub async fn chapter_overview(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<ChapterOverview>> {
    let user = current_user(&server, &session).await?;
    let db = &server.database;
    let curriculum = Curriculum::load_published(db).await?;
    let content = curriculum
        .chapters
        .iter()
        .find(|c| c.chapter.id == id)
        .ok_or(Error::NotFound("Chapter"))?;
    let progress = ProgressIndex::load(db, user.id).await?;
    let answers = list_answer_records(db, user.id, None).await?;
    Ok(Json(report::chapter_overview(content, &progress, &answers)))
}

/// Run one viewer transition: restore the state from the session, apply
/// `step`, persist its effects and store the new state.
async fn step_viewer<F>(
    server: &Server,
    session: &Session,
    chapter_id: i64,
    step: F,
) -> Result<Json<ViewerView>>
where
    F: FnOnce(&mut SlideViewer, &ChapterDeck) -> Result<Vec<ViewerEffect>>,
{
    let user = current_user(server, session).await?;
    let mut deck = ChapterDeck::load(&server.database, user.id, chapter_id).await?;
    let key = SlideViewer::session_key(chapter_id);
    let mut viewer = session
        .get::<SlideViewer>(&key)
        .await?
        .unwrap_or_else(|| SlideViewer::new(chapter_id));
    viewer.sync(&deck);
    let effects = step(&mut viewer, &deck)?;
    let return_to_overview = persist_effects(&server.database, user.id, &mut deck, &effects).await?;
    session.insert(&key, &viewer).await?;
    let mut view = viewer.view(&deck);
    view.return_to_overview = return_to_overview;
    Ok(Json(view))
}

#[utoipa::path(
    get,
    path = "/api/learner/chapters/{id}/viewer",
    tag = "learner",
    params(("id" = i64, Path, description = "Chapter id")),
    responses(
        (status = 200, description = "Current viewer state", body = ViewerView),
        (status = 303, description = "Chapter has no slides, redirect to the overview")
    )
)]
pub async fn viewer_state(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<ViewerView>> {
    step_viewer(&server, &session, id, |_, _| Ok(vec![])).await
}

#[utoipa::path(
    post,
    path = "/api/learner/chapters/{id}/viewer/next",
    tag = "learner",
    params(("id" = i64, Path, description = "Chapter id")),
    responses((status = 200, description = "Slide completed, moved to the next one", body = ViewerView))
)]
pub async fn viewer_next(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<ViewerView>> {
    step_viewer(&server, &session, id, |viewer, deck| Ok(viewer.next_slide(deck))).await
}

#[utoipa::path(
    post,
    path = "/api/learner/chapters/{id}/viewer/previous",
    tag = "learner",
    params(("id" = i64, Path, description = "Chapter id")),
    responses((status = 200, description = "Moved to the previous slide", body = ViewerView))
)]
pub async fn viewer_previous(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<ViewerView>> {
    step_viewer(&server, &session, id, |viewer, _| Ok(viewer.previous_slide())).await
}

#[utoipa::path(
    post,
    path = "/api/learner/chapters/{id}/viewer/goto",
    tag = "learner",
    params(("id" = i64, Path, description = "Chapter id")),
    request_body = GoToRequest,
    responses(
        (status = 200, description = "Jumped to the slide", body = ViewerView),
        (status = 400, description = "Index out of range", body = ErrorBody)
    )
)]
pub async fn viewer_goto(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
    Json(req): Json<GoToRequest>,
) -> Result<Json<ViewerView>> {
    step_viewer(&server, &session, id, |viewer, deck| {
        viewer.go_to_slide(deck, req.index)
    })
    .await
}

#[utoipa::path(
    post,
    path = "/api/learner/chapters/{id}/viewer/finish",
    tag = "learner",
    params(("id" = i64, Path, description = "Chapter id")),
    responses(
        (status = 200, description = "Last slide completed, return to the overview", body = ViewerView),
        (status = 400, description = "Not on the last slide", body = ErrorBody)
    )
)]
pub async fn viewer_finish(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<ViewerView>> {
    step_viewer(&server, &session, id, |viewer, deck| viewer.finish_chapter(deck)).await
}

#[utoipa::path(
    post,
    path = "/api/learner/chapters/{id}/viewer/questions/start",
    tag = "learner",
    params(("id" = i64, Path, description = "Chapter id")),
    responses(
        (status = 200, description = "Showing the first practice question", body = ViewerView),
        (status = 400, description = "Slide has no practice questions", body = ErrorBody)
    )
)]
pub async fn viewer_start_questions(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<ViewerView>> {
    step_viewer(&server, &session, id, |viewer, deck| viewer.start_questions(deck)).await
}

#[utoipa::path(
    post,
    path = "/api/learner/chapters/{id}/viewer/questions/answer",
    tag = "learner",
    params(("id" = i64, Path, description = "Chapter id")),
    request_body = AnswerRequest,
    responses(
        (status = 200, description = "Answer recorded with feedback", body = ViewerView),
        (status = 400, description = "No question shown or unknown option", body = ErrorBody)
    )
)]
pub async fn viewer_answer(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
    Json(req): Json<AnswerRequest>,
) -> Result<Json<ViewerView>> {
    step_viewer(&server, &session, id, |viewer, deck| {
        viewer.select_answer(deck, &req.option_id)
    })
    .await
}

#[utoipa::path(
    post,
    path = "/api/learner/chapters/{id}/viewer/questions/next",
    tag = "learner",
    params(("id" = i64, Path, description = "Chapter id")),
    responses(
        (status = 200, description = "Next question, or the summary after the last one", body = ViewerView),
        (status = 400, description = "Question not answered yet", body = ErrorBody)
    )
)]
pub async fn viewer_next_question(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<ViewerView>> {
    step_viewer(&server, &session, id, |viewer, deck| viewer.next_question(deck)).await
}

#[utoipa::path(
    post,
    path = "/api/learner/chapters/{id}/viewer/questions/back",
    tag = "learner",
    params(("id" = i64, Path, description = "Chapter id")),
    responses((status = 200, description = "Back on the slide", body = ViewerView))
)]
pub async fn viewer_back_to_slide(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<ViewerView>> {
    step_viewer(&server, &session, id, |viewer, _| Ok(viewer.back_to_slide())).await
}

#[utoipa::path(
    post,
    path = "/api/learner/chapters/{id}/viewer/questions/retry",
    tag = "learner",
    params(("id" = i64, Path, description = "Chapter id")),
    responses(
        (status = 200, description = "Practice questions restarted", body = ViewerView),
        (status = 400, description = "Not on the summary", body = ErrorBody)
    )
)]
pub async fn viewer_retry(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<ViewerView>> {
    step_viewer(&server, &session, id, |viewer, deck| viewer.retry(deck)).await
}

#[utoipa::path(
    get,
    path = "/api/learner/chapters/{id}/test",
    tag = "learner",
    params(("id" = i64, Path, description = "Chapter id")),
    responses(
        (status = 200, description = "Question count and previous result", body = TestStart),
        (status = 303, description = "Test locked, redirect to the chapter overview")
    )
)]
pub async fn test_start(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<TestStart>> {
    let user = current_user(&server, &session).await?;
    let paper = ensure_test_unlocked(&server.database, user.id, id).await?;
    let start =
        test_runner::test_start(&server.database, user.id, &paper, server.config.pass_threshold)
            .await?;
    Ok(Json(start))
}

#[utoipa::path(
    post,
    path = "/api/learner/chapters/{id}/test/start",
    tag = "learner",
    params(("id" = i64, Path, description = "Chapter id")),
    responses(
        (status = 200, description = "A fresh attempt on the first question", body = TestView),
        (status = 303, description = "Test locked, redirect to the chapter overview")
    )
)]
pub async fn test_begin(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<TestView>> {
    let user = current_user(&server, &session).await?;
    let paper = ensure_test_unlocked(&server.database, user.id, id).await?;
    let run = TestRun::start(&paper)?;
    session.insert(&TestRun::session_key(id), &run).await?;
    Ok(Json(run.view(&paper)?))
}

async fn load_run(session: &Session, paper: &TestPaper) -> Result<TestRun> {
    let run = session
        .get::<TestRun>(&TestRun::session_key(paper.chapter.id))
        .await?;
    match run {
        Some(run) if run.matches(paper) => Ok(run),
        _ => Err(Error::bad_request("no test in progress, start the test first")),
    }
}

/// Apply `step` to the stored attempt and store it again.
async fn step_test<F>(
    server: &Server,
    session: &Session,
    chapter_id: i64,
    step: F,
) -> Result<Json<TestView>>
where
    F: FnOnce(&mut TestRun, &TestPaper) -> Result<()>,
{
    let user = current_user(server, session).await?;
    let paper = ensure_test_unlocked(&server.database, user.id, chapter_id).await?;
    let mut run = load_run(session, &paper).await?;
    step(&mut run, &paper)?;
    session.insert(&TestRun::session_key(chapter_id), &run).await?;
    Ok(Json(run.view(&paper)?))
}

#[utoipa::path(
    get,
    path = "/api/learner/chapters/{id}/test/current",
    tag = "learner",
    params(("id" = i64, Path, description = "Chapter id")),
    responses(
        (status = 200, description = "The attempt in progress, or its result", body = TestView),
        (status = 400, description = "No attempt started", body = ErrorBody)
    )
)]
pub async fn test_current(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<TestView>> {
    step_test(&server, &session, id, |_, _| Ok(())).await
}

#[utoipa::path(
    post,
    path = "/api/learner/chapters/{id}/test/goto",
    tag = "learner",
    params(("id" = i64, Path, description = "Chapter id")),
    request_body = GoToRequest,
    responses(
        (status = 200, description = "Moved to the question", body = TestView),
        (status = 400, description = "Index out of range or test submitted", body = ErrorBody)
    )
)]
pub async fn test_goto(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
    Json(req): Json<GoToRequest>,
) -> Result<Json<TestView>> {
    step_test(&server, &session, id, |run, _| run.go_to(req.index)).await
}

#[utoipa::path(
    post,
    path = "/api/learner/chapters/{id}/test/answer",
    tag = "learner",
    params(("id" = i64, Path, description = "Chapter id")),
    request_body = AnswerRequest,
    responses(
        (status = 200, description = "Selection stored for the current question", body = TestView),
        (status = 400, description = "Unknown option or test submitted", body = ErrorBody)
    )
)]
pub async fn test_answer(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
    Json(req): Json<AnswerRequest>,
) -> Result<Json<TestView>> {
    step_test(&server, &session, id, |run, paper| run.select(paper, &req.option_id)).await
}

#[utoipa::path(
    post,
    path = "/api/learner/chapters/{id}/test/flag",
    tag = "learner",
    params(("id" = i64, Path, description = "Chapter id")),
    responses(
        (status = 200, description = "Review flag toggled on the current question", body = TestView),
        (status = 400, description = "Test submitted", body = ErrorBody)
    )
)]
pub async fn test_flag(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<TestView>> {
    step_test(&server, &session, id, |run, _| run.toggle_flag().map(|_| ())).await
}

#[utoipa::path(
    post,
    path = "/api/learner/chapters/{id}/test/submit",
    tag = "learner",
    params(("id" = i64, Path, description = "Chapter id")),
    responses(
        (status = 200, description = "Scored result", body = TestResult),
        (status = 400, description = "Already submitted or not started", body = ErrorBody)
    )
)]
pub async fn test_submit(
    State(server): State<Arc<Server>>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<TestResult>> {
    let user = current_user(&server, &session).await?;
    let paper = ensure_test_unlocked(&server.database, user.id, id).await?;
    let mut run = load_run(&session, &paper).await?;
    let result = test_runner::submit_test(
        &server.database,
        user.id,
        &paper,
        &mut run,
        server.config.pass_threshold,
    )
    .await?;
    session.insert(&TestRun::session_key(id), &run).await?;
    Ok(Json(result))
}

pub fn router() -> Router<Arc<Server>> {
    Router::new()
        .route("/me", get(me))
        .route("/dashboard", get(dashboard))
        .route("/progress", get(progress))
        .route("/chapters", get(list_chapters))
        .route("/chapters/{id}", get(chapter_overview))
        .route("/chapters/{id}/viewer", get(viewer_state))
        .route("/chapters/{id}/viewer/next", post(viewer_next))
        .route("/chapters/{id}/viewer/previous", post(viewer_previous))
        .route("/chapters/{id}/viewer/goto", post(viewer_goto))
        .route("/chapters/{id}/viewer/finish", post(viewer_finish))
        .route(
            "/chapters/{id}/viewer/questions/start",
            post(viewer_start_questions),
        )
        .route("/chapters/{id}/viewer/questions/answer", post(viewer_answer))
        .route(
            "/chapters/{id}/viewer/questions/next",
            post(viewer_next_question),
        )
        .route(
            "/chapters/{id}/viewer/questions/back",
            post(viewer_back_to_slide),
        )
        .route("/chapters/{id}/viewer/questions/retry", post(viewer_retry))
        .route("/chapters/{id}/test", get(test_start))
        .route("/chapters/{id}/test/start", post(test_begin))
        .route("/chapters/{id}/test/current", get(test_current))
        .route("/chapters/{id}/test/goto", post(test_goto))
        .route("/chapters/{id}/test/answer", post(test_answer))
        .route("/chapters/{id}/test/flag", post(test_flag))
        .route("/chapters/{id}/test/submit", post(test_submit))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use tower::ServiceExt;
    use tower_sessions::MemoryStore;

    use super::*;
    use crate::{
        config::Config,
        server::build_app,
        testing::{Fixture, test_database},
    };

    struct Client {
        app: Router,
        cookie: String,
    }

    impl Client {
        async fn send(&self, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
            let mut req = Request::builder()
                .method(method)
                .uri(uri)
                .header(header::COOKIE, &self.cookie);
            let body = match body {
                Some(json) => {
                    req = req.header(header::CONTENT_TYPE, "application/json");
                    Body::from(json.to_string())
                }
                None => Body::empty(),
            };
            let resp = self.app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
            let status = resp.status();
            let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
            (status, json)
        }
    }

    async fn signed_in(slides: usize, practice: usize, tests: usize) -> (Client, Fixture) {
        let db = test_database().await;
        let fx = Fixture::new(&db, slides, practice, tests).await;
        let server = Arc::new(Server::from_pool(db, Config::default()));
        let app = build_app(server, MemoryStore::default());
        let login = serde_json::json!({ "email": "learner@example.com", "password": "secret-pass" });
        let resp = app
            .clone()
            .oneshot(
                Request::post("/api/auth/login")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(login.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let cookie = resp.headers()[header::SET_COOKIE]
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string();
        (Client { app, cookie }, fx)
    }

    #[tokio::test]
    async fn study_a_chapter_then_take_its_test() {
        let (client, fx) = signed_in(2, 1, 2).await;
        let base = format!("/api/learner/chapters/{}", fx.chapter.id);

        let (status, view) = client.send("GET", &format!("{base}/viewer"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["slide_index"], 0);
        assert_eq!(view["slide"]["practice_count"], 1);

        client.send("POST", &format!("{base}/viewer/questions/start"), None).await;
        let (_, view) = client
            .send(
                "POST",
                &format!("{base}/viewer/questions/answer"),
                Some(serde_json::json!({ "option_id": "a" })),
            )
            .await;
        assert_eq!(view["mode"]["feedback"]["is_correct"], true);
        let (_, view) = client.send("POST", &format!("{base}/viewer/questions/next"), None).await;
        assert_eq!(view["mode"]["mode"], "summary");
        assert_eq!(view["slide"]["is_completed"], true);

        let (_, view) = client.send("POST", &format!("{base}/viewer/next"), None).await;
        assert_eq!(view["slide_index"], 1);
        let (_, view) = client.send("POST", &format!("{base}/viewer/finish"), None).await;
        assert_eq!(view["return_to_overview"], true);

        let (status, overview) = client.send("GET", &base, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(overview["percentage"], 100);
        assert_eq!(overview["test_unlocked"], true);

        let (status, start) = client.send("GET", &format!("{base}/test"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(start["question_count"], 2);
        assert!(start["previous"].is_null());

        client.send("POST", &format!("{base}/test/start"), None).await;
        client
            .send("POST", &format!("{base}/test/answer"), Some(serde_json::json!({ "option_id": "a" })))
            .await;
        let (_, view) = client.send("POST", &format!("{base}/test/flag"), None).await;
        assert_eq!(view["flagged"], true);
        assert_eq!(view["unanswered_count"], 1);

        let (status, result) = client.send("POST", &format!("{base}/test/submit"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["score"], 50);
        assert_eq!(result["correct_count"], 1);
        assert_eq!(result["unanswered_count"], 1);
        assert_eq!(result["passed"], false);

        let (status, _) = client
            .send("POST", &format!("{base}/test/answer"), Some(serde_json::json!({ "option_id": "b" })))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, progress) = client.send("GET", "/api/learner/progress", None).await;
        assert_eq!(progress["overall"]["percentage"], 100);
        assert_eq!(progress["chapters"][0]["test_score"], 50);
    }

    #[tokio::test]
    async fn unknown_chapter_is_not_found() {
        let (client, _fx) = signed_in(1, 0, 0).await;
        let (status, body) = client.send("GET", "/api/learner/chapters/999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Chapter not found");
    }

    #[tokio::test]
    async fn dashboard_greets_by_display_name() {
        let (client, _fx) = signed_in(1, 0, 0).await;
        let (status, board) = client.send("GET", "/api/learner/dashboard", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(board["greeting_name"], "learner");
        assert_eq!(board["overall"]["percentage"], 0);
        assert!(board["recent_accuracy"].is_null());
    }
}
