use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use time::OffsetDateTime;
use tracing::info;
use utoipa::ToSchema;

use crate::{
    error::{Error, Result},
    utils::now,
};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Chapter {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub order_index: i64,
    pub is_published: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ChapterForm {
    pub title: String,
    pub description: Option<String>,
    pub order_index: i64,
    #[serde(default)]
    pub is_published: bool,
}

impl ChapterForm {
    fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::bad_request("chapter title must not be empty"));
        }
        Ok(())
    }
}

pub async fn list_chapters(database: &SqlitePool, published_only: bool) -> Result<Vec<Chapter>> {
    let chapters = sqlx::query_as::<_, Chapter>(
        "select * from chapter where (? = 0 or is_published = 1) order by order_index, id",
    )
    .bind(published_only)
    .fetch_all(database)
    .await?;
    Ok(chapters)
}

pub async fn get_chapter(database: &SqlitePool, id: i64) -> Result<Chapter> {
    sqlx::query_as::<_, Chapter>("select * from chapter where id = ?")
        .bind(id)
        .fetch_one(database)
        .await
        .map_err(|e| Error::or_not_found(e, "Chapter"))
}

/// Learners only ever see published chapters; a draft looks missing.
pub async fn get_published_chapter(database: &SqlitePool, id: i64) -> Result<Chapter> {
    let chapter = get_chapter(database, id).await?;
    if !chapter.is_published {
        return Err(Error::NotFound("Chapter"));
    }
    Ok(chapter)
}

pub async fn create_chapter(database: &SqlitePool, form: ChapterForm) -> Result<Chapter> {
    form.validate()?;
    let now = now();
    let chapter = sqlx::query_as::<_, Chapter>(
        "insert into chapter (title, description, order_index, is_published, created_at, updated_at) \
         values (?, ?, ?, ?, ?, ?) returning *",
    )
    .bind(form.title.trim())
    .bind(form.description)
    .bind(form.order_index)
    .bind(form.is_published)
    .bind(now)
    .bind(now)
    .fetch_one(database)
    .await?;
    info!("create chapter {}-{}", chapter.id, chapter.title);
    Ok(chapter)
}

pub async fn update_chapter(database: &SqlitePool, id: i64, form: ChapterForm) -> Result<Chapter> {
    form.validate()?;
    sqlx::query_as::<_, Chapter>(
        "update chapter set title = ?, description = ?, order_index = ?, is_published = ?, updated_at = ? \
         where id = ? returning *",
    )
    .bind(form.title.trim())
    .bind(form.description)
    .bind(form.order_index)
    .bind(form.is_published)
    .bind(now())
    .bind(id)
    .fetch_one(database)
    .await
    .map_err(|e| Error::or_not_found(e, "Chapter"))
}

/// Slides and questions of the chapter go with it.
pub async fn delete_chapter(database: &SqlitePool, id: i64) -> Result<()> {
    let result = sqlx::query("delete from chapter where id = ?")
        .bind(id)
        .execute(database)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound("Chapter"));
    }
    info!("delete chapter {}", id);
    Ok(())
}

pub async fn count_chapters(database: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("select count(*) from chapter")
        .fetch_one(database)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{chapter_form, test_database};

    #[tokio::test]
    async fn lists_in_order_and_filters_drafts() {
        let db = test_database().await;
        create_chapter(&db, chapter_form("Journal entries", 2, true)).await.unwrap();
        create_chapter(&db, chapter_form("Basics", 1, true)).await.unwrap();
        create_chapter(&db, chapter_form("Draft", 3, false)).await.unwrap();

        let all = list_chapters(&db, false).await.unwrap();
        let titles: Vec<_> = all.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, ["Basics", "Journal entries", "Draft"]);

        let published = list_chapters(&db, true).await.unwrap();
        assert_eq!(published.len(), 2);
    }

    #[tokio::test]
    async fn draft_is_hidden_from_learners() {
        let db = test_database().await;
        let draft = create_chapter(&db, chapter_form("Draft", 1, false)).await.unwrap();
        assert!(matches!(
            get_published_chapter(&db, draft.id).await,
            Err(Error::NotFound(_))
        ));
        assert!(get_chapter(&db, draft.id).await.is_ok());
    }

    #[tokio::test]
    async fn update_and_delete() {
        let db = test_database().await;
        let chapter = create_chapter(&db, chapter_form("Basics", 1, false)).await.unwrap();
        let updated = update_chapter(&db, chapter.id, chapter_form("Basics of accounts", 1, true))
            .await
            .unwrap();
        assert_eq!(updated.title, "Basics of accounts");
        assert!(updated.is_published);

        delete_chapter(&db, chapter.id).await.unwrap();
        assert!(matches!(delete_chapter(&db, chapter.id).await, Err(Error::NotFound(_))));
        assert!(matches!(
            update_chapter(&db, chapter.id, chapter_form("x", 1, true)).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn rejects_blank_title() {
        let db = test_database().await;
        let result = create_chapter(&db, chapter_form("  ", 1, true)).await;
        assert!(matches!(result, Err(Error::BadRequest(_))));
    }
}
