//! Chapter test: free navigation among the chapter's test questions, answers
//! that can be changed and flagged for review until submission, then a scored
//! result that no longer changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tracing::info;
use utoipa::ToSchema;

use super::{
    answer::{GradedAnswer, latest_per_question, list_chapter_answers, replace_answers},
    progress::ProgressIndex,
    report::{ChapterLink, Tally},
    viewer::chapter_overview_path,
};
use crate::{
    curriculum::{
        chapter::{Chapter, get_published_chapter},
        question::{AnswerOption, Question, QuestionPrompt, QuestionType, list_chapter_questions},
        slide::list_chapter_slides,
    },
    error::{Error, Result},
    utils::{now, percentage},
};

/// Score in percent, rounded half up. Undefined for an empty test.
pub fn score(correct: usize, total: usize) -> Result<u8> {
    percentage(correct, total).ok_or(Error::EmptyTest)
}

/// A chapter and its test questions in order.
#[derive(Debug, Clone)]
pub struct TestPaper {
    pub chapter: Chapter,
    pub questions: Vec<Question>,
}

impl TestPaper {
    fn question(&self, question_id: i64) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    fn question_ids(&self) -> Vec<i64> {
        self.questions.iter().map(|q| q.id).collect()
    }
}

/// Load the chapter's test, redirecting to the chapter overview unless the
/// chapter has slides, all of them are completed, and test questions exist.
pub async fn ensure_test_unlocked(
    database: &SqlitePool,
    user_id: i64,
    chapter_id: i64,
) -> Result<TestPaper> {
    let chapter = get_published_chapter(database, chapter_id).await?;
    let overview = chapter_overview_path(chapter_id);
    let slides = list_chapter_slides(database, chapter_id).await?;
    if slides.is_empty() {
        return Err(Error::precondition("chapter has no slides", overview));
    }
    let progress = ProgressIndex::load(database, user_id).await?;
    let completed = progress.completed_count(slides.iter().map(|s| s.id));
    if completed < slides.len() {
        return Err(Error::precondition(
            format!("{} of {} slides completed", completed, slides.len()),
            overview,
        ));
    }
    let questions = list_chapter_questions(database, chapter_id, QuestionType::ChapterTest).await?;
    if questions.is_empty() {
        return Err(Error::precondition("chapter has no test questions", overview));
    }
    Ok(TestPaper { chapter, questions })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSlot {
    pub selected: Option<String>,
    pub flagged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TestResult {
    pub score: u8,
    pub correct_count: usize,
    pub total_count: usize,
    pub unanswered_count: usize,
    pub passed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
}

/// Compare every question's final selection with its correct answer.
/// Questions without a selection are incorrect.
pub fn grade(
    questions: &[Question],
    answers: &BTreeMap<i64, AnswerSlot>,
    pass_threshold: u8,
    submitted_at: OffsetDateTime,
) -> Result<(TestResult, Vec<GradedAnswer>)> {
    let graded: Vec<GradedAnswer> = questions
        .iter()
        .map(|q| {
            let selected_answer = answers.get(&q.id).and_then(|slot| slot.selected.clone());
            let is_correct = selected_answer
                .as_deref()
                .is_some_and(|selected| q.is_correct(selected));
            GradedAnswer {
                question_id: q.id,
                selected_answer,
                is_correct,
            }
        })
        .collect();
    let correct_count = graded.iter().filter(|a| a.is_correct).count();
    let unanswered_count = graded.iter().filter(|a| a.selected_answer.is_none()).count();
    let score = score(correct_count, graded.len())?;
    let result = TestResult {
        score,
        correct_count,
        total_count: graded.len(),
        unanswered_count,
        passed: score >= pass_threshold,
        submitted_at,
    };
    Ok((result, graded))
}

/// One attempt at a chapter test, kept in the learner's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRun {
    pub chapter_id: i64,
    question_ids: Vec<i64>,
    pub current: usize,
    answers: BTreeMap<i64, AnswerSlot>,
    pub result: Option<TestResult>,
}

impl TestRun {
    pub fn start(paper: &TestPaper) -> Result<Self> {
        if paper.questions.is_empty() {
            return Err(Error::EmptyTest);
        }
        Ok(Self {
            chapter_id: paper.chapter.id,
            question_ids: paper.question_ids(),
            current: 0,
            answers: BTreeMap::new(),
            result: None,
        })
    }

    pub fn session_key(chapter_id: i64) -> String {
        format!("test.{}", chapter_id)
    }

    /// Whether the stored run still matches the chapter's test questions.
    pub fn matches(&self, paper: &TestPaper) -> bool {
        self.chapter_id == paper.chapter.id && self.question_ids == paper.question_ids()
    }

    pub fn is_submitted(&self) -> bool {
        self.result.is_some()
    }

    fn ensure_in_progress(&self) -> Result<()> {
        if self.is_submitted() {
            return Err(Error::bad_request("the test has already been submitted"));
        }
        Ok(())
    }

    fn current_question_id(&self) -> i64 {
        self.question_ids[self.current]
    }

    pub fn go_to(&mut self, index: usize) -> Result<()> {
        self.ensure_in_progress()?;
        if index >= self.question_ids.len() {
            return Err(Error::bad_request(format!(
                "question index {} out of range, test has {} questions",
                index,
                self.question_ids.len()
            )));
        }
        self.current = index;
        Ok(())
    }

    /// Select an option for the current question, replacing any earlier one.
    pub fn select(&mut self, paper: &TestPaper, option_id: &str) -> Result<()> {
        self.ensure_in_progress()?;
        let question_id = self.current_question_id();
        let question = paper.question(question_id).ok_or(Error::NotFound("Question"))?;
        if !question.has_option(option_id) {
            return Err(Error::bad_request(format!("unknown option {}", option_id)));
        }
        self.answers.entry(question_id).or_default().selected = Some(option_id.to_string());
        Ok(())
    }

    pub fn toggle_flag(&mut self) -> Result<bool> {
        self.ensure_in_progress()?;
        let question_id = self.current_question_id();
        let slot = self.answers.entry(question_id).or_default();
        slot.flagged = !slot.flagged;
        Ok(slot.flagged)
    }

    pub fn answered_count(&self) -> usize {
        self.answers.values().filter(|s| s.selected.is_some()).count()
    }

    pub fn unanswered_count(&self) -> usize {
        self.question_ids.len() - self.answered_count()
    }

    /// Grade the run and freeze it.
    pub fn submit(&mut self, paper: &TestPaper, pass_threshold: u8) -> Result<Vec<GradedAnswer>> {
        self.ensure_in_progress()?;
        let (result, graded) = grade(&paper.questions, &self.answers, pass_threshold, now())?;
        self.result = Some(result);
        Ok(graded)
    }

    pub fn view(&self, paper: &TestPaper) -> Result<TestView> {
        let question = paper
            .question(self.current_question_id())
            .ok_or(Error::NotFound("Question"))?;
        let slot = self.answers.get(&question.id).cloned().unwrap_or_default();
        let navigation = self
            .question_ids
            .iter()
            .enumerate()
            .map(|(index, id)| {
                let slot = self.answers.get(id);
                NavigationItem {
                    index,
                    question_id: *id,
                    answered: slot.is_some_and(|s| s.selected.is_some()),
                    flagged: slot.is_some_and(|s| s.flagged),
                }
            })
            .collect();
        let review = self.result.as_ref().map(|_| {
            paper
                .questions
                .iter()
                .map(|q| {
                    let selected = self.answers.get(&q.id).and_then(|s| s.selected.clone());
                    ReviewItem {
                        question_id: q.id,
                        question_text: q.question_text.clone(),
                        options: q.options.0.clone(),
                        is_correct: selected.as_deref().is_some_and(|s| q.is_correct(s)),
                        selected,
                        correct_answer: q.correct_answer.clone(),
                        explanation: q.explanation.clone(),
                    }
                })
                .collect()
        });
        Ok(TestView {
            chapter: ChapterLink::from(&paper.chapter),
            current: self.current,
            total: self.question_ids.len(),
            question: question.to_prompt(),
            selected: slot.selected,
            flagged: slot.flagged,
            answered_count: self.answered_count(),
            unanswered_count: self.unanswered_count(),
            navigation,
            result: self.result.clone(),
            review,
        })
    }
}

/// Submit the run and replace the learner's stored answers for its questions.
pub async fn submit_test(
    database: &SqlitePool,
    user_id: i64,
    paper: &TestPaper,
    run: &mut TestRun,
    pass_threshold: u8,
) -> Result<TestResult> {
    let graded = run.submit(paper, pass_threshold)?;
    let Some(result) = run.result.clone() else {
        return Err(anyhow::anyhow!("submitted test run has no result").into());
    };
    replace_answers(database, user_id, &graded, result.submitted_at).await?;
    info!(
        "user {} submitted test for chapter {}: {}% ({}/{})",
        user_id, paper.chapter.id, result.score, result.correct_count, result.total_count
    );
    Ok(result)
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NavigationItem {
    pub index: usize,
    pub question_id: i64,
    pub answered: bool,
    pub flagged: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReviewItem {
    pub question_id: i64,
    pub question_text: String,
    pub options: Vec<AnswerOption>,
    pub selected: Option<String>,
    pub is_correct: bool,
    pub correct_answer: String,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TestView {
    pub chapter: ChapterLink,
    pub current: usize,
    pub total: usize,
    pub question: QuestionPrompt,
    pub selected: Option<String>,
    pub flagged: bool,
    pub answered_count: usize,
    pub unanswered_count: usize,
    pub navigation: Vec<NavigationItem>,
    /// set once submitted
    pub result: Option<TestResult>,
    pub review: Option<Vec<ReviewItem>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PreviousResult {
    pub score: Option<u8>,
    pub correct_count: usize,
    pub total_count: usize,
    pub passed: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub taken_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TestStart {
    pub chapter: ChapterLink,
    pub question_count: usize,
    pub pass_threshold: u8,
    /// computed from the latest answer per question, none if never taken
    pub previous: Option<PreviousResult>,
}

pub async fn test_start(
    database: &SqlitePool,
    user_id: i64,
    paper: &TestPaper,
    pass_threshold: u8,
) -> Result<TestStart> {
    let answers =
        list_chapter_answers(database, user_id, paper.chapter.id, QuestionType::ChapterTest).await?;
    let latest = latest_per_question(&answers);
    let previous = (!latest.is_empty()).then(|| {
        let tally: Tally = latest.iter().copied().collect();
        let score = tally.accuracy();
        PreviousResult {
            score,
            correct_count: tally.correct,
            total_count: tally.total,
            passed: score.is_some_and(|s| s >= pass_threshold),
            taken_at: latest.iter().map(|a| a.answered_at).max(),
        }
    });
    Ok(TestStart {
        chapter: ChapterLink::from(&paper.chapter),
        question_count: paper.questions.len(),
        pass_threshold,
        previous,
    })
}
