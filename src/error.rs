use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde::Serialize;
use tracing::{error, warn};
use utoipa::ToSchema;

pub const LOGIN_PATH: &str = "/login";
pub const UNAUTHORIZED_PATH: &str = "/unauthorized";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Login required")]
    Unauthenticated,
    #[error("Administrator role required")]
    Forbidden,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    BadRequest(String),
    /// The learner may not be here yet; send them back to `redirect`.
    #[error("{reason}")]
    Precondition { reason: String, redirect: String },
    #[error("Score is undefined for a test without questions")]
    EmptyTest,
    #[error("Session error: {0}")]
    Session(#[from] tower_sessions::session::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Fatal error: {0}")]
    Fatal(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Error::BadRequest(msg.into())
    }

    pub fn precondition(reason: impl Into<String>, redirect: impl Into<String>) -> Self {
        Error::Precondition {
            reason: reason.into(),
            redirect: redirect.into(),
        }
    }

    /// Turn a missing row into `NotFound`, keep every other database error.
    pub fn or_not_found(e: sqlx::Error, what: &'static str) -> Self {
        match e {
            sqlx::Error::RowNotFound => Error::NotFound(what),
            e => Error::Database(e),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
}

fn json_error(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorBody { error })).into_response()
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::Unauthenticated => Redirect::to(LOGIN_PATH).into_response(),
            Error::Forbidden => Redirect::to(UNAUTHORIZED_PATH).into_response(),
            Error::Precondition { reason, redirect } => {
                warn!("precondition unmet, redirect to {}: {}", redirect, reason);
                Redirect::to(&redirect).into_response()
            }
            Error::InvalidCredentials => json_error(StatusCode::UNAUTHORIZED, self.to_string()),
            Error::NotFound(_) => json_error(StatusCode::NOT_FOUND, self.to_string()),
            Error::BadRequest(msg) => json_error(StatusCode::BAD_REQUEST, msg),
            Error::EmptyTest => {
                error!("{}", self);
                json_error(StatusCode::UNPROCESSABLE_ENTITY, self.to_string())
            }
            Error::Session(_) | Error::Database(_) | Error::Fatal(_) => {
                error!("{}", self);
                json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::LOCATION;

    #[test]
    fn auth_errors_redirect() {
        let resp = Error::Unauthenticated.into_response();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()[LOCATION], LOGIN_PATH);

        let resp = Error::Forbidden.into_response();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()[LOCATION], UNAUTHORIZED_PATH);
    }

    #[test]
    fn precondition_redirects_to_fallback() {
        let resp = Error::precondition("slides incomplete", "/api/learner/chapters/3").into_response();
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(resp.headers()[LOCATION], "/api/learner/chapters/3");
    }

    #[test]
    fn row_not_found_maps_to_404() {
        let resp = Error::or_not_found(sqlx::Error::RowNotFound, "Chapter").into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
