use std::sync::LazyLock;

use argon2::{
    Argon2, PasswordVerifier,
    password_hash::{PasswordHash, PasswordHasher, SaltString, rand_core::OsRng},
};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use time::OffsetDateTime;
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::{
    error::{Error, Result},
    utils::{now, percentage},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UserProfile {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

const PROFILE_COLUMNS: &str = "id, email, username, display_name, role, created_at, updated_at";

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub username: String,
    /// falls back to the username when empty
    pub display_name: Option<String>,
}

impl SignupRequest {
    fn validate(&self) -> Result<()> {
        if !self.email.contains('@') {
            return Err(Error::bad_request("invalid email address"));
        }
        if self.password.len() < 6 {
            return Err(Error::bad_request("password must be at least 6 characters"));
        }
        if self.username.trim().is_empty() {
            return Err(Error::bad_request("username must not be empty"));
        }
        Ok(())
    }
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
        .to_string();
    Ok(hash)
}

/// Create the identity and its profile in one row.
pub async fn create_user(database: &SqlitePool, req: SignupRequest, role: Role) -> Result<UserProfile> {
    req.validate()?;
    let password_hash = hash_password(&req.password)?;
    let username = req.username.trim().to_string();
    let display_name = match req.display_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => username.clone(),
    };
    let now = now();
    let profile = sqlx::query_as::<_, UserProfile>(&format!(
        "insert into user_profile (email, password, username, display_name, role, created_at, updated_at) \
         values (?, ?, ?, ?, ?, ?, ?) returning {PROFILE_COLUMNS}"
    ))
    .bind(req.email.trim())
    .bind(password_hash)
    .bind(&username)
    .bind(&display_name)
    .bind(role)
    .bind(now)
    .bind(now)
    .fetch_one(database)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Error::bad_request("email or username is already registered")
        }
        e => Error::Database(e),
    })?;
    info!("create user {}-{}", profile.id, profile.username);
    Ok(profile)
}

/// Checked when no account matches, so unknown emails cost one argon2
/// verification like a wrong password does.
static DUMMY_HASH: LazyLock<Option<String>> = LazyLock::new(|| {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(b"no such account", &salt)
        .ok()
        .map(|hash| hash.to_string())
});

fn verify_password(hash: &str, password: &str) -> bool {
    PasswordHash::new(hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

pub async fn login(database: &SqlitePool, email: &str, password: &str) -> Result<UserProfile> {
    let row = sqlx::query_as::<_, (i64, String)>("select id, password from user_profile where email = ?")
        .bind(email.trim())
        .fetch_optional(database)
        .await?;
    let Some((id, hash)) = row else {
        if let Some(dummy) = DUMMY_HASH.as_deref() {
            verify_password(dummy, password);
        }
        return Err(Error::InvalidCredentials);
    };
    let parsed_hash = PasswordHash::new(&hash)
        .map_err(|e| anyhow::anyhow!("Failed to parse password hash: {}", e))?;
    if Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_err()
    {
        warn!("failed login for user {}", id);
        return Err(Error::InvalidCredentials);
    }
    get_profile(database, id).await
}

pub async fn get_profile(database: &SqlitePool, id: i64) -> Result<UserProfile> {
    sqlx::query_as::<_, UserProfile>(&format!(
        "select {PROFILE_COLUMNS} from user_profile where id = ?"
    ))
    .bind(id)
    .fetch_one(database)
    .await
    .map_err(|e| Error::or_not_found(e, "User"))
}

pub async fn find_by_email(database: &SqlitePool, email: &str) -> Result<Option<UserProfile>> {
    let profile = sqlx::query_as::<_, UserProfile>(&format!(
        "select {PROFILE_COLUMNS} from user_profile where email = ?"
    ))
    .bind(email.trim())
    .fetch_optional(database)
    .await?;
    Ok(profile)
}

pub async fn set_role(database: &SqlitePool, id: i64, role: Role) -> Result<UserProfile> {
    let profile = sqlx::query_as::<_, UserProfile>(&format!(
        "update user_profile set role = ?, updated_at = ? where id = ? returning {PROFILE_COLUMNS}"
    ))
    .bind(role)
    .bind(now())
    .bind(id)
    .fetch_one(database)
    .await
    .map_err(|e| Error::or_not_found(e, "User"))?;
    info!("set role of user {} to {:?}", id, role);
    Ok(profile)
}

pub async fn count_users(database: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("select count(*) from user_profile")
        .fetch_one(database)
        .await?;
    Ok(count)
}

pub async fn recent_signups(database: &SqlitePool, limit: i64) -> Result<Vec<UserProfile>> {
    let profiles = sqlx::query_as::<_, UserProfile>(&format!(
        "select {PROFILE_COLUMNS} from user_profile order by created_at desc, id desc limit ?"
    ))
    .bind(limit)
    .fetch_all(database)
    .await?;
    Ok(profiles)
}

/// A profile with the learner's activity totals, for the admin user list.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct UserActivity {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub profile: UserProfile,
    pub completed_slides: i64,
    pub answered_questions: i64,
    pub correct_answers: i64,
    #[sqlx(skip)]
    pub accuracy: Option<u8>,
}

pub async fn list_user_activity(database: &SqlitePool) -> Result<Vec<UserActivity>> {
    let mut users = sqlx::query_as::<_, UserActivity>(
        "select p.id, p.email, p.username, p.display_name, p.role, p.created_at, p.updated_at, \
         (select count(*) from user_progress up where up.user_id = p.id and up.is_completed = 1) as completed_slides, \
         (select count(*) from user_answer ua where ua.user_id = p.id) as answered_questions, \
         (select count(*) from user_answer ua where ua.user_id = p.id and ua.is_correct = 1) as correct_answers \
         from user_profile p order by p.created_at desc, p.id desc",
    )
    .fetch_all(database)
    .await?;
    for user in &mut users {
        user.accuracy = percentage(user.correct_answers as usize, user.answered_questions as usize);
    }
    Ok(users)
}
