use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::info;
use utoipa::ToSchema;

use super::sign_in;
use crate::{
    error::{ErrorBody, LOGIN_PATH, Result, UNAUTHORIZED_PATH},
    server::Server,
    user::{self, Role, SignupRequest, UserProfile},
};

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[utoipa::path(
    post,
    path = "/api/auth/signup",
    tag = "auth",
    request_body = SignupRequest,
    responses(
        (status = 200, description = "Account created and signed in", body = UserProfile),
        (status = 400, description = "Invalid form or email/username taken", body = ErrorBody)
    )
)]
pub async fn signup(
    State(server): State<Arc<Server>>,
    session: Session,
    Json(req): Json<SignupRequest>,
) -> Result<Json<UserProfile>> {
    let profile = user::create_user(&server.database, req, Role::User).await?;
    sign_in(&session, &profile).await?;
    Ok(Json(profile))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = UserProfile),
        (status = 401, description = "Invalid credentials", body = ErrorBody)
    )
)]
pub async fn login(
    State(server): State<Arc<Server>>,
    session: Session,
    Json(req): Json<LoginRequest>,
) -> Result<Json<UserProfile>> {
    let profile = user::login(&server.database, &req.email, &req.password).await?;
    sign_in(&session, &profile).await?;
    info!("user {} signed in", profile.id);
    Ok(Json(profile))
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    tag = "auth",
    responses((status = 204, description = "Signed out"))
)]
pub async fn logout(session: Session) -> Result<StatusCode> {
    session.flush().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/login",
    tag = "auth",
    responses((status = 401, description = "Sign-in required", body = ErrorBody))
)]
pub async fn login_page() -> impl IntoResponse {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody {
            error: "Sign in with POST /api/auth/login".to_string(),
        }),
    )
}

#[utoipa::path(
    get,
    path = "/unauthorized",
    tag = "auth",
    responses((status = 403, description = "Administrator role required", body = ErrorBody))
)]
pub async fn unauthorized_page() -> impl IntoResponse {
    (
        StatusCode::FORBIDDEN,
        Json(ErrorBody {
            error: "This page is for administrators only".to_string(),
        }),
    )
}

#[derive(Serialize, ToSchema)]
pub struct Health {
    pub status: String,
    pub database: bool,
}

#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, description = "Server is up", body = Health))
)]
pub async fn health(State(server): State<Arc<Server>>) -> Json<Health> {
    let database = sqlx::query("select 1")
        .execute(&server.database)
        .await
        .is_ok();
    Json(Health {
        status: "ok".to_string(),
        database,
    })
}

pub fn router() -> Router<Arc<Server>> {
    Router::new()
        .route(LOGIN_PATH, get(login_page))
        .route(UNAUTHORIZED_PATH, get(unauthorized_page))
        .route("/api/health", get(health))
        .nest(
            "/api/auth",
            Router::new()
                .route("/signup", post(signup))
                .route("/login", post(login))
                .route("/logout", post(logout)),
        )
}
