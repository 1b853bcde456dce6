use pulldown_cmark::{Options, Parser, html};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use time::OffsetDateTime;
use tracing::info;
use utoipa::ToSchema;

use super::chapter::get_chapter;
use crate::{
    error::{Error, Result},
    utils::now,
};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Slide {
    pub id: i64,
    pub chapter_id: i64,
    pub title: String,
    /// markdown source
    pub content: String,
    pub order_index: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Slide {
    pub fn content_html(&self) -> String {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        let parser = Parser::new_ext(&self.content, options);
        let mut out = String::with_capacity(self.content.len() * 3 / 2);
        html::push_html(&mut out, parser);
        out
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SlideForm {
    pub chapter_id: i64,
    pub title: String,
    pub content: String,
    pub order_index: i64,
}

impl SlideForm {
    async fn validate(&self, database: &SqlitePool) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::bad_request("slide title must not be empty"));
        }
        get_chapter(database, self.chapter_id).await?;
        Ok(())
    }
}

/// All slides, optionally restricted to one chapter, in reading order.
pub async fn list_slides(database: &SqlitePool, chapter_id: Option<i64>) -> Result<Vec<Slide>> {
    let slides = sqlx::query_as::<_, Slide>(
        "select slide.* from slide inner join chapter on chapter.id = slide.chapter_id \
         where (? is null or slide.chapter_id = ?) \
         order by chapter.order_index, chapter.id, slide.order_index, slide.id",
    )
    .bind(chapter_id)
    .bind(chapter_id)
    .fetch_all(database)
    .await?;
    Ok(slides)
}

pub async fn list_chapter_slides(database: &SqlitePool, chapter_id: i64) -> Result<Vec<Slide>> {
    list_slides(database, Some(chapter_id)).await
}

pub async fn get_slide(database: &SqlitePool, id: i64) -> Result<Slide> {
    sqlx::query_as::<_, Slide>("select * from slide where id = ?")
        .bind(id)
        .fetch_one(database)
        .await
        .map_err(|e| Error::or_not_found(e, "Slide"))
}

pub async fn create_slide(database: &SqlitePool, form: SlideForm) -> Result<Slide> {
    form.validate(database).await?;
    let now = now();
    let slide = sqlx::query_as::<_, Slide>(
        "insert into slide (chapter_id, title, content, order_index, created_at, updated_at) \
         values (?, ?, ?, ?, ?, ?) returning *",
    )
    .bind(form.chapter_id)
    .bind(form.title.trim())
    .bind(&form.content)
    .bind(form.order_index)
    .bind(now)
    .bind(now)
    .fetch_one(database)
    .await?;
    info!("create slide {}-{} in chapter {}", slide.id, slide.title, slide.chapter_id);
    Ok(slide)
}

/// Moving a slide to another chapter moves the questions attached to it too.
pub async fn update_slide(database: &SqlitePool, id: i64, form: SlideForm) -> Result<Slide> {
    form.validate(database).await?;
    let mut tx = database.begin().await?;
    let slide = sqlx::query_as::<_, Slide>(
        "update slide set chapter_id = ?, title = ?, content = ?, order_index = ?, updated_at = ? \
         where id = ? returning *",
    )
    .bind(form.chapter_id)
    .bind(form.title.trim())
    .bind(&form.content)
    .bind(form.order_index)
    .bind(now())
    .bind(id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| Error::or_not_found(e, "Slide"))?;
    let moved = sqlx::query("update question set chapter_id = ? where slide_id = ? and chapter_id <> ?")
        .bind(slide.chapter_id)
        .bind(slide.id)
        .bind(slide.chapter_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    tx.commit().await?;
    if moved > 0 {
        info!(
            "moved {} questions with slide {} to chapter {}",
            moved, slide.id, slide.chapter_id
        );
    }
    Ok(slide)
}

pub async fn delete_slide(database: &SqlitePool, id: i64) -> Result<()> {
    let result = sqlx::query("delete from slide where id = ?")
        .bind(id)
        .execute(database)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound("Slide"));
    }
    info!("delete slide {}", id);
    Ok(())
}

pub async fn count_slides(database: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("select count(*) from slide")
        .fetch_one(database)
        .await?;
    Ok(count)
}
