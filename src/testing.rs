//! Fixtures shared by the unit tests.

use std::collections::HashSet;

use sqlx::{SqlitePool, sqlite::SqlitePoolOptions, types::Json};
use time::{OffsetDateTime, macros::datetime};

use crate::{
    curriculum::{
        ChapterContent,
        chapter::{Chapter, ChapterForm, create_chapter},
        question::{AnswerOption, Question, QuestionForm, QuestionType, create_question},
        slide::{Slide, SlideForm, create_slide},
    },
    learning::{
        answer::AnswerRecord,
        progress::UserProgress,
        test_runner::TestPaper,
        viewer::ChapterDeck,
    },
    server::MIGRATOR,
    user::{Role, SignupRequest, UserProfile, create_user},
};

const EPOCH: OffsetDateTime = datetime!(2025-01-01 00:00 UTC);

/// In-memory database with the schema applied. A single connection that never
/// expires, otherwise every new connection would see an empty database.
pub async fn test_database() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    MIGRATOR.run(&pool).await.unwrap();
    pool
}

pub fn chapter_form(title: &str, order_index: i64, is_published: bool) -> ChapterForm {
    ChapterForm {
        title: title.to_string(),
        description: Some(format!("About {}", title)),
        order_index,
        is_published,
    }
}

pub fn slide_form(chapter_id: i64, title: &str, order_index: i64) -> SlideForm {
    SlideForm {
        chapter_id,
        title: title.to_string(),
        content: format!("# {}\n\nDebit on the left, credit on the right.", title),
        order_index,
    }
}

/// Options `a` to `d`.
pub fn options() -> Vec<AnswerOption> {
    ["a", "b", "c", "d"]
        .into_iter()
        .map(|id| AnswerOption {
            id: id.to_string(),
            text: format!("option {}", id),
        })
        .collect()
}

pub fn question_form(
    chapter_id: i64,
    slide_id: Option<i64>,
    question_type: QuestionType,
    correct_answer: &str,
    order_index: i64,
) -> QuestionForm {
    QuestionForm {
        chapter_id,
        slide_id,
        question_type,
        question_text: format!("Question {}", order_index),
        options: options(),
        correct_answer: correct_answer.to_string(),
        explanation: Some("Assets increase on the debit side.".into()),
        order_index,
    }
}

pub fn signup_request(name: &str) -> SignupRequest {
    SignupRequest {
        email: format!("{}@example.com", name),
        password: "secret-pass".into(),
        username: name.to_string(),
        display_name: None,
    }
}

/// A published chapter with slides, practice and test questions (all with
/// correct answer `a`) and a learner.
pub struct Fixture {
    pub chapter: Chapter,
    pub slides: Vec<Slide>,
    /// ordered by slide, then question
    pub practice: Vec<Question>,
    pub tests: Vec<Question>,
    pub learner: UserProfile,
}

impl Fixture {
    pub async fn new(
        database: &SqlitePool,
        slides: usize,
        practice_per_slide: usize,
        tests: usize,
    ) -> Self {
        let chapter = create_chapter(database, chapter_form("Journal entries", 1, true))
            .await
            .unwrap();
        let mut fixture = Self {
            learner: create_user(database, signup_request("learner"), Role::User)
                .await
                .unwrap(),
            chapter,
            slides: vec![],
            practice: vec![],
            tests: vec![],
        };
        for i in 0..slides {
            let order = i as i64 + 1;
            let slide = create_slide(
                database,
                slide_form(fixture.chapter.id, &format!("Slide {}", order), order),
            )
            .await
            .unwrap();
            for j in 0..practice_per_slide {
                let form = question_form(
                    fixture.chapter.id,
                    Some(slide.id),
                    QuestionType::SlidePractice,
                    "a",
                    j as i64 + 1,
                );
                fixture
                    .practice
                    .push(create_question(database, form).await.unwrap());
            }
            fixture.slides.push(slide);
        }
        for i in 0..tests {
            let form = question_form(
                fixture.chapter.id,
                None,
                QuestionType::ChapterTest,
                "a",
                i as i64 + 1,
            );
            fixture
                .tests
                .push(create_question(database, form).await.unwrap());
        }
        fixture
    }
}

pub fn chapter(id: i64) -> Chapter {
    Chapter {
        id,
        title: format!("Chapter {}", id),
        description: None,
        order_index: id,
        is_published: true,
        created_at: EPOCH,
        updated_at: EPOCH,
    }
}

pub fn slide(id: i64, chapter_id: i64) -> Slide {
    Slide {
        id,
        chapter_id,
        title: format!("Slide {}", id),
        content: format!("Slide **{}**", id),
        order_index: id,
        created_at: EPOCH,
        updated_at: EPOCH,
    }
}

/// Question with options `a` to `d`, correct answer `a`.
pub fn question(id: i64, chapter_id: i64, slide_id: Option<i64>, question_type: QuestionType) -> Question {
    Question {
        id,
        chapter_id,
        slide_id,
        question_type,
        question_text: format!("Question {}", id),
        options: Json(options()),
        correct_answer: "a".into(),
        explanation: None,
        order_index: id,
        created_at: EPOCH,
        updated_at: EPOCH,
    }
}

pub fn content_with_slides(chapter_id: i64, slide_ids: &[i64]) -> ChapterContent {
    ChapterContent {
        chapter: chapter(chapter_id),
        slides: slide_ids.iter().map(|id| slide(*id, chapter_id)).collect(),
        questions: vec![],
    }
}

/// Deck of chapter 1 with `practice_counts[i]` practice questions on slide
/// `i`; the slides at `completed` indices count as completed.
pub fn deck_with(practice_counts: &[usize], completed: &[usize]) -> ChapterDeck {
    let slides: Vec<Slide> = (0..practice_counts.len())
        .map(|i| slide(i as i64 + 1, 1))
        .collect();
    let mut next_id = 100;
    let mut questions = vec![];
    for (slide, count) in slides.iter().zip(practice_counts) {
        for _ in 0..*count {
            questions.push(question(next_id, 1, Some(slide.id), QuestionType::SlidePractice));
            next_id += 1;
        }
    }
    let completed: HashSet<i64> = completed.iter().map(|i| slides[*i].id).collect();
    ChapterDeck::new(chapter(1), slides, questions, completed)
}

pub fn paper_with(questions: usize) -> TestPaper {
    TestPaper {
        chapter: chapter(1),
        questions: (0..questions as i64)
            .map(|i| question(200 + i, 1, None, QuestionType::ChapterTest))
            .collect(),
    }
}

pub fn completed_progress(slide_id: i64, completed_at: OffsetDateTime) -> UserProgress {
    UserProgress {
        id: slide_id,
        user_id: 1,
        slide_id,
        is_completed: true,
        completed_at: Some(completed_at),
        created_at: completed_at,
        updated_at: completed_at,
    }
}

/// A practice answer in chapter 1: `a` when correct, `b` otherwise.
pub fn answer_record(
    id: i64,
    question_id: i64,
    is_correct: bool,
    answered_at: OffsetDateTime,
) -> AnswerRecord {
    AnswerRecord {
        id,
        question_id,
        selected_answer: Some(if is_correct { "a" } else { "b" }.to_string()),
        is_correct,
        answered_at,
        question_text: format!("Question {}", question_id),
        question_type: QuestionType::SlidePractice,
        chapter_id: 1,
        slide_id: Some(1),
    }
}
