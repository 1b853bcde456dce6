pub mod admin;
pub mod learner;
pub mod public;

use tower_sessions::Session;
use utoipa::OpenApi;

use crate::{
    error::{Error, Result},
    server::Server,
    user::{UserProfile, get_profile},
};

const USER_ID_KEY: &str = "user_id";

/// The signed-in user, or `Unauthenticated` (redirect to the login page).
pub async fn current_user(server: &Server, session: &Session) -> Result<UserProfile> {
    let Some(user_id) = session.get::<i64>(USER_ID_KEY).await? else {
        return Err(Error::Unauthenticated);
    };
    match get_profile(&server.database, user_id).await {
        Ok(profile) => Ok(profile),
        // account removed while the session was alive
        Err(Error::NotFound(_)) => {
            session.flush().await?;
            Err(Error::Unauthenticated)
        }
        Err(e) => Err(e),
    }
}

/// Like [`current_user`], but only for administrators.
pub async fn require_admin(server: &Server, session: &Session) -> Result<UserProfile> {
    let profile = current_user(server, session).await?;
    if !profile.is_admin() {
        return Err(Error::Forbidden);
    }
    Ok(profile)
}

async fn sign_in(session: &Session, profile: &UserProfile) -> Result<()> {
    // new id on privilege change
    session.cycle_id().await?;
    session.insert(USER_ID_KEY, profile.id).await?;
    Ok(())
}

#[derive(OpenApi)]
#[openapi(
    info(title = "Bookkeeping study server"),
    paths(
        public::signup,
        public::login,
        public::logout,
        public::login_page,
        public::unauthorized_page,
        public::health,
        learner::me,
        learner::dashboard,
        learner::progress,
        learner::list_chapters,
        learner::chapter_overview,
        learner::viewer_state,
        learner::viewer_next,
        learner::viewer_previous,
        learner::viewer_goto,
        learner::viewer_finish,
        learner::viewer_start_questions,
        learner::viewer_answer,
        learner::viewer_next_question,
        learner::viewer_back_to_slide,
        learner::viewer_retry,
        learner::test_start,
        learner::test_begin,
        learner::test_current,
        learner::test_goto,
        learner::test_answer,
        learner::test_flag,
        learner::test_submit,
        admin::dashboard,
        admin::list_users,
        admin::set_user_role,
        admin::list_chapters,
        admin::create_chapter,
        admin::get_chapter,
        admin::update_chapter,
        admin::delete_chapter,
        admin::list_slides,
        admin::create_slide,
        admin::get_slide,
        admin::update_slide,
        admin::delete_slide,
        admin::list_questions,
        admin::create_question,
        admin::get_question,
        admin::update_question,
        admin::delete_question,
    ),
    tags(
        (name = "auth", description = "Sign-up, sign-in and sign-out"),
        (name = "learner", description = "Study, practice and chapter tests"),
        (name = "admin", description = "Content and user management")
    )
)]
pub struct ApiDoc;

pub fn openapi_json() -> anyhow::Result<String> {
    Ok(ApiDoc::openapi().to_pretty_json()?)
}
