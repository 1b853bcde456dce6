use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool};
use time::OffsetDateTime;
use tracing::info;
use utoipa::ToSchema;

use crate::{
    curriculum::question::{Question, QuestionType},
    error::Result,
    utils::now,
};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct UserAnswer {
    pub id: i64,
    pub user_id: i64,
    pub question_id: i64,
    /// `None` for a test question left unanswered
    pub selected_answer: Option<String>,
    pub is_correct: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub answered_at: OffsetDateTime,
}

/// Final state of one question in a submitted test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GradedAnswer {
    pub question_id: i64,
    pub selected_answer: Option<String>,
    pub is_correct: bool,
}

/// Append one answer to the user's history.
pub async fn record_answer(
    database: &SqlitePool,
    user_id: i64,
    question: &Question,
    selected: &str,
) -> Result<UserAnswer> {
    let answer = sqlx::query_as::<_, UserAnswer>(
        "insert into user_answer (user_id, question_id, selected_answer, is_correct, answered_at) \
         values (?, ?, ?, ?, ?) returning *",
    )
    .bind(user_id)
    .bind(question.id)
    .bind(selected)
    .bind(question.is_correct(selected))
    .bind(now())
    .fetch_one(database)
    .await?;
    Ok(answer)
}

/// Replace the user's answers for the graded question set.
///
/// Prior rows for exactly these questions are deleted and one row per question
/// is inserted, all in one transaction, so a retake never leaves two answer
/// sets behind for scoring.
pub async fn replace_answers(
    database: &SqlitePool,
    user_id: i64,
    answers: &[GradedAnswer],
    answered_at: OffsetDateTime,
) -> Result<()> {
    if answers.is_empty() {
        return Ok(());
    }
    let mut tx = database.begin().await?;

    let mut delete = QueryBuilder::<Sqlite>::new("delete from user_answer where user_id = ");
    delete.push_bind(user_id).push(" and question_id in (");
    let mut ids = delete.separated(", ");
    for answer in answers {
        ids.push_bind(answer.question_id);
    }
    ids.push_unseparated(")");
    let deleted = delete.build().execute(&mut *tx).await?.rows_affected();

    let mut insert = QueryBuilder::<Sqlite>::new(
        "insert into user_answer (user_id, question_id, selected_answer, is_correct, answered_at) ",
    );
    insert.push_values(answers, |mut row, answer| {
        row.push_bind(user_id)
            .push_bind(answer.question_id)
            .push_bind(answer.selected_answer.clone())
            .push_bind(answer.is_correct)
            .push_bind(answered_at);
    });
    insert.build().execute(&mut *tx).await?;

    tx.commit().await?;
    info!(
        "user {} replaced {} answers with {}",
        user_id,
        deleted,
        answers.len()
    );
    Ok(())
}

/// An answer joined with the question it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct AnswerRecord {
    pub id: i64,
    pub question_id: i64,
    pub selected_answer: Option<String>,
    pub is_correct: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub answered_at: OffsetDateTime,
    pub question_text: String,
    pub question_type: QuestionType,
    pub chapter_id: i64,
    pub slide_id: Option<i64>,
}

/// The user's answer history, newest first.
pub async fn list_answer_records(
    database: &SqlitePool,
    user_id: i64,
    limit: Option<i64>,
) -> Result<Vec<AnswerRecord>> {
    let rows = sqlx::query_as::<_, AnswerRecord>(
        "select a.id, a.question_id, a.selected_answer, a.is_correct, a.answered_at, \
         q.question_text, q.question_type, q.chapter_id, q.slide_id \
         from user_answer a inner join question q on q.id = a.question_id \
         where a.user_id = ? order by a.answered_at desc, a.id desc limit ?",
    )
    .bind(user_id)
    .bind(limit.unwrap_or(-1))
    .fetch_all(database)
    .await?;
    Ok(rows)
}

/// The user's answers to one chapter's questions of one type.
pub async fn list_chapter_answers(
    database: &SqlitePool,
    user_id: i64,
    chapter_id: i64,
    question_type: QuestionType,
) -> Result<Vec<AnswerRecord>> {
    let rows = sqlx::query_as::<_, AnswerRecord>(
        "select a.id, a.question_id, a.selected_answer, a.is_correct, a.answered_at, \
         q.question_text, q.question_type, q.chapter_id, q.slide_id \
         from user_answer a inner join question q on q.id = a.question_id \
         where a.user_id = ? and q.chapter_id = ? and q.question_type = ? \
         order by a.answered_at desc, a.id desc",
    )
    .bind(user_id)
    .bind(chapter_id)
    .bind(question_type)
    .fetch_all(database)
    .await?;
    Ok(rows)
}

/// Keep only the most recent answer for each question.
pub fn latest_per_question<'a>(
    answers: impl IntoIterator<Item = &'a AnswerRecord>,
) -> Vec<&'a AnswerRecord> {
    let mut latest: HashMap<i64, &AnswerRecord> = HashMap::new();
    for answer in answers {
        latest
            .entry(answer.question_id)
            .and_modify(|current| {
                if (answer.answered_at, answer.id) > (current.answered_at, current.id) {
                    *current = answer;
                }
            })
            .or_insert(answer);
    }
    let mut latest: Vec<_> = latest.into_values().collect();
    latest.sort_by_key(|a| a.question_id);
    latest
}

pub async fn count_answers(database: &SqlitePool, user_id: i64, question_id: i64) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        "select count(*) from user_answer where user_id = ? and question_id = ?",
    )
    .bind(user_id)
    .bind(question_id)
    .fetch_one(database)
    .await?;
    Ok(count)
}
