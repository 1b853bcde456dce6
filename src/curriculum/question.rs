use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, types::Json};
use time::OffsetDateTime;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use super::{chapter::get_chapter, slide::get_slide};
use crate::{
    error::{Error, Result},
    utils::now,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum QuestionType {
    /// attached to one slide, answered inside the slide viewer
    SlidePractice,
    /// graded set covering the whole chapter
    ChapterTest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AnswerOption {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Question {
    pub id: i64,
    pub chapter_id: i64,
    pub slide_id: Option<i64>,
    pub question_type: QuestionType,
    pub question_text: String,
    #[schema(value_type = Vec<AnswerOption>)]
    pub options: Json<Vec<AnswerOption>>,
    pub correct_answer: String,
    pub explanation: Option<String>,
    pub order_index: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Question {
    pub fn has_option(&self, option_id: &str) -> bool {
        self.options.iter().any(|o| o.id == option_id)
    }

    pub fn is_correct(&self, option_id: &str) -> bool {
        self.correct_answer == option_id
    }

    /// The question as a learner sees it before answering.
    pub fn to_prompt(&self) -> QuestionPrompt {
        QuestionPrompt {
            id: self.id,
            question_text: self.question_text.clone(),
            options: self.options.0.clone(),
            order_index: self.order_index,
        }
    }
}

/// A question without its answer key.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QuestionPrompt {
    pub id: i64,
    pub question_text: String,
    pub options: Vec<AnswerOption>,
    pub order_index: i64,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct QuestionForm {
    pub chapter_id: i64,
    pub slide_id: Option<i64>,
    pub question_type: QuestionType,
    pub question_text: String,
    pub options: Vec<AnswerOption>,
    pub correct_answer: String,
    pub explanation: Option<String>,
    pub order_index: i64,
}

impl QuestionForm {
    fn check_shape(&self) -> Result<()> {
        if self.question_text.trim().is_empty() {
            return Err(Error::bad_request("question text must not be empty"));
        }
        if self.options.is_empty() {
            return Err(Error::bad_request("question needs at least one option"));
        }
        let mut ids = HashSet::new();
        for option in &self.options {
            if option.id.is_empty() {
                return Err(Error::bad_request("option id must not be empty"));
            }
            if !ids.insert(option.id.as_str()) {
                return Err(Error::bad_request(format!("duplicate option id {}", option.id)));
            }
        }
        if !ids.contains(self.correct_answer.as_str()) {
            return Err(Error::bad_request(format!(
                "correct answer {} is not one of the options",
                self.correct_answer
            )));
        }
        if self.question_type == QuestionType::SlidePractice && self.slide_id.is_none() {
            return Err(Error::bad_request("practice question must belong to a slide"));
        }
        Ok(())
    }

    async fn validate(&self, database: &SqlitePool) -> Result<()> {
        self.check_shape()?;
        get_chapter(database, self.chapter_id).await?;
        if let Some(slide_id) = self.slide_id {
            let slide = get_slide(database, slide_id).await?;
            if slide.chapter_id != self.chapter_id {
                return Err(Error::bad_request(format!(
                    "slide {} is not in chapter {}",
                    slide_id, self.chapter_id
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct QuestionFilter {
    pub chapter_id: Option<i64>,
    pub question_type: Option<QuestionType>,
}

pub async fn list_questions(database: &SqlitePool, filter: &QuestionFilter) -> Result<Vec<Question>> {
    let questions = sqlx::query_as::<_, Question>(
        "select question.* from question inner join chapter on chapter.id = question.chapter_id \
         where (? is null or question.chapter_id = ?) and (? is null or question.question_type = ?) \
         order by chapter.order_index, chapter.id, question.question_type, question.order_index, question.id",
    )
    .bind(filter.chapter_id)
    .bind(filter.chapter_id)
    .bind(filter.question_type)
    .bind(filter.question_type)
    .fetch_all(database)
    .await?;
    Ok(questions)
}

pub async fn list_chapter_questions(
    database: &SqlitePool,
    chapter_id: i64,
    question_type: QuestionType,
) -> Result<Vec<Question>> {
    list_questions(
        database,
        &QuestionFilter {
            chapter_id: Some(chapter_id),
            question_type: Some(question_type),
        },
    )
    .await
}

pub async fn get_question(database: &SqlitePool, id: i64) -> Result<Question> {
    sqlx::query_as::<_, Question>("select * from question where id = ?")
        .bind(id)
        .fetch_one(database)
        .await
        .map_err(|e| Error::or_not_found(e, "Question"))
}

pub async fn create_question(database: &SqlitePool, form: QuestionForm) -> Result<Question> {
    form.validate(database).await?;
    let now = now();
    let question = sqlx::query_as::<_, Question>(
        "insert into question (chapter_id, slide_id, question_type, question_text, options, correct_answer, \
         explanation, order_index, created_at, updated_at) values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) returning *",
    )
    .bind(form.chapter_id)
    .bind(form.slide_id)
    .bind(form.question_type)
    .bind(form.question_text.trim())
    .bind(Json(&form.options))
    .bind(&form.correct_answer)
    .bind(&form.explanation)
    .bind(form.order_index)
    .bind(now)
    .bind(now)
    .fetch_one(database)
    .await?;
    info!(
        "create {:?} question {} in chapter {}",
        question.question_type, question.id, question.chapter_id
    );
    Ok(question)
}

pub async fn update_question(database: &SqlitePool, id: i64, form: QuestionForm) -> Result<Question> {
    form.validate(database).await?;
    sqlx::query_as::<_, Question>(
        "update question set chapter_id = ?, slide_id = ?, question_type = ?, question_text = ?, options = ?, \
         correct_answer = ?, explanation = ?, order_index = ?, updated_at = ? where id = ? returning *",
    )
    .bind(form.chapter_id)
    .bind(form.slide_id)
    .bind(form.question_type)
    .bind(form.question_text.trim())
    .bind(Json(&form.options))
    .bind(&form.correct_answer)
    .bind(&form.explanation)
    .bind(form.order_index)
    .bind(now())
    .bind(id)
    .fetch_one(database)
    .await
    .map_err(|e| Error::or_not_found(e, "Question"))
}

pub async fn delete_question(database: &SqlitePool, id: i64) -> Result<()> {
    let result = sqlx::query("delete from question where id = ?")
        .bind(id)
        .execute(database)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound("Question"));
    }
    info!("delete question {}", id);
    Ok(())
}

pub async fn count_questions(database: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>("select count(*) from question")
        .fetch_one(database)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curriculum::{chapter::create_chapter, slide::create_slide},
        testing::{chapter_form, options, question_form, slide_form, test_database},
    };

    #[tokio::test]
    async fn filters_by_chapter_and_type() {
        let db = test_database().await;
        let chapter = create_chapter(&db, chapter_form("Basics", 1, true)).await.unwrap();
        let slide = create_slide(&db, slide_form(chapter.id, "s1", 1)).await.unwrap();
        create_question(
            &db,
            question_form(chapter.id, Some(slide.id), QuestionType::SlidePractice, "a", 1),
        )
        .await
        .unwrap();
        create_question(&db, question_form(chapter.id, None, QuestionType::ChapterTest, "b", 2))
            .await
            .unwrap();
        create_question(&db, question_form(chapter.id, None, QuestionType::ChapterTest, "a", 1))
            .await
            .unwrap();

        let tests = list_chapter_questions(&db, chapter.id, QuestionType::ChapterTest)
            .await
            .unwrap();
        assert_eq!(tests.len(), 2);
        assert!(tests[0].order_index < tests[1].order_index);

        let all = list_questions(&db, &QuestionFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].options.0, options());
    }

    #[tokio::test]
    async fn correct_answer_must_be_an_option() {
        let db = test_database().await;
        let chapter = create_chapter(&db, chapter_form("Basics", 1, true)).await.unwrap();
        let mut form = question_form(chapter.id, None, QuestionType::ChapterTest, "a", 1);
        form.correct_answer = "z".into();
        assert!(matches!(create_question(&db, form).await, Err(Error::BadRequest(_))));
    }

    #[tokio::test]
    async fn practice_question_slide_must_match_chapter() {
        let db = test_database().await;
        let first = create_chapter(&db, chapter_form("First", 1, true)).await.unwrap();
        let second = create_chapter(&db, chapter_form("Second", 2, true)).await.unwrap();
        let slide = create_slide(&db, slide_form(second.id, "s", 1)).await.unwrap();

        let form = question_form(first.id, Some(slide.id), QuestionType::SlidePractice, "a", 1);
        assert!(matches!(create_question(&db, form).await, Err(Error::BadRequest(_))));

        let form = question_form(first.id, None, QuestionType::SlidePractice, "a", 1);
        assert!(matches!(create_question(&db, form).await, Err(Error::BadRequest(_))));
    }

    #[test]
    fn duplicate_option_ids_rejected() {
        let mut form = question_form(1, None, QuestionType::ChapterTest, "a", 1);
        form.options.push(AnswerOption {
            id: "a".into(),
            text: "again".into(),
        });
        assert!(form.check_shape().is_err());
    }
}
