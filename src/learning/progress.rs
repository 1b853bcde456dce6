use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use time::OffsetDateTime;
use tracing::info;
use utoipa::ToSchema;

use crate::{error::Result, utils::now};

/// Completion record, one per (user, slide).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct UserProgress {
    pub id: i64,
    pub user_id: i64,
    pub slide_id: i64,
    pub is_completed: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Mark a slide completed for a user.
///
/// Upsert on (user_id, slide_id): the first completion inserts the row, later
/// ones update it in place.
pub async fn mark_slide_completed(
    database: &SqlitePool,
    user_id: i64,
    slide_id: i64,
) -> Result<UserProgress> {
    let now = now();
    let progress = sqlx::query_as::<_, UserProgress>(
        "insert into user_progress (user_id, slide_id, is_completed, completed_at, created_at, updated_at) \
         values (?, ?, 1, ?, ?, ?) \
         on conflict (user_id, slide_id) do update set \
         is_completed = 1, completed_at = excluded.completed_at, updated_at = excluded.updated_at \
         returning *",
    )
    .bind(user_id)
    .bind(slide_id)
    .bind(now)
    .bind(now)
    .bind(now)
    .fetch_one(database)
    .await?;
    info!("user {} completed slide {}", user_id, slide_id);
    Ok(progress)
}

pub async fn list_user_progress(database: &SqlitePool, user_id: i64) -> Result<Vec<UserProgress>> {
    let rows = sqlx::query_as::<_, UserProgress>(
        "select * from user_progress where user_id = ? order by completed_at desc, id desc",
    )
    .bind(user_id)
    .fetch_all(database)
    .await?;
    Ok(rows)
}

/// A user's progress rows keyed by slide id.
#[derive(Debug, Clone, Default)]
pub struct ProgressIndex {
    by_slide: HashMap<i64, UserProgress>,
}

impl ProgressIndex {
    pub async fn load(database: &SqlitePool, user_id: i64) -> Result<Self> {
        Ok(list_user_progress(database, user_id).await?.into_iter().collect())
    }

    pub fn is_completed(&self, slide_id: i64) -> bool {
        self.by_slide
            .get(&slide_id)
            .is_some_and(|p| p.is_completed)
    }

    /// Completed slides among `slide_ids`.
    pub fn completed_count(&self, slide_ids: impl IntoIterator<Item = i64>) -> usize {
        slide_ids
            .into_iter()
            .filter(|id| self.is_completed(*id))
            .count()
    }

    pub fn completed(&self) -> impl Iterator<Item = &UserProgress> {
        self.by_slide.values().filter(|p| p.is_completed)
    }

    /// The most recent completion, if any.
    pub fn latest_completion(&self) -> Option<&UserProgress> {
        self.completed()
            .filter(|p| p.completed_at.is_some())
            .max_by_key(|p| (p.completed_at, p.id))
    }

    pub fn len(&self) -> usize {
        self.by_slide.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_slide.is_empty()
    }
}

impl FromIterator<UserProgress> for ProgressIndex {
    fn from_iter<T: IntoIterator<Item = UserProgress>>(iter: T) -> Self {
        let mut by_slide = HashMap::new();
        for row in iter {
            by_slide.insert(row.slide_id, row);
        }
        Self { by_slide }
    }
}

/// A completion joined with who and what, for the admin dashboard.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct CompletionEntry {
    pub username: String,
    pub display_name: String,
    pub slide_title: String,
    pub chapter_title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

pub async fn recent_completions(database: &SqlitePool, limit: i64) -> Result<Vec<CompletionEntry>> {
    let rows = sqlx::query_as::<_, CompletionEntry>(
        "select p.username, p.display_name, s.title as slide_title, c.title as chapter_title, up.completed_at \
         from user_progress up \
         inner join user_profile p on p.id = up.user_id \
         inner join slide s on s.id = up.slide_id \
         inner join chapter c on c.id = s.chapter_id \
         where up.is_completed = 1 and up.completed_at is not null \
         order by up.completed_at desc, up.id desc limit ?",
    )
    .bind(limit)
    .fetch_all(database)
    .await?;
    Ok(rows)
}
