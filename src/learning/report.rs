//! Read-side aggregation: percentages, accuracies and study history are
//! computed from the curriculum, the progress index and the answer history
//! every time they are asked for. Nothing here is persisted.

use std::collections::BTreeMap;

use serde::Serialize;
use time::{Date, UtcOffset};
use utoipa::ToSchema;

use super::{
    answer::{AnswerRecord, latest_per_question},
    progress::ProgressIndex,
};
use crate::{
    curriculum::{ChapterContent, Curriculum, chapter::Chapter, question::QuestionType},
    utils::{local_date, percentage},
};

const HISTORY_DAYS: usize = 30;

/// Correct answers out of a total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct Tally {
    pub correct: usize,
    pub total: usize,
}

impl Tally {
    pub fn add(&mut self, is_correct: bool) {
        self.total += 1;
        if is_correct {
            self.correct += 1;
        }
    }

    pub fn accuracy(&self) -> Option<u8> {
        percentage(self.correct, self.total)
    }
}

impl<'a> FromIterator<&'a AnswerRecord> for Tally {
    fn from_iter<T: IntoIterator<Item = &'a AnswerRecord>>(iter: T) -> Self {
        let mut tally = Tally::default();
        for answer in iter {
            tally.add(answer.is_correct);
        }
        tally
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyRating {
    Excellent,
    VeryGood,
    Good,
    Fair,
    NeedsReview,
}

impl AccuracyRating {
    pub fn from_accuracy(accuracy: u8) -> Self {
        match accuracy {
            90..=u8::MAX => AccuracyRating::Excellent,
            80..=89 => AccuracyRating::VeryGood,
            70..=79 => AccuracyRating::Good,
            60..=69 => AccuracyRating::Fair,
            _ => AccuracyRating::NeedsReview,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OverallProgress {
    pub completed_slides: usize,
    pub total_slides: usize,
    /// `null` when there are no slides at all
    pub percentage: Option<u8>,
    pub completed_chapters: usize,
    pub total_chapters: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SlideStatus {
    pub id: i64,
    pub title: String,
    pub is_completed: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChapterReport {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub total_slides: usize,
    pub completed_slides: usize,
    pub percentage: Option<u8>,
    pub practice: Tally,
    pub practice_accuracy: Option<u8>,
    /// score of the latest answer to each test question
    pub test_score: Option<u8>,
    pub slides: Vec<SlideStatus>,
}

impl ChapterReport {
    pub fn is_complete(&self) -> bool {
        self.total_slides > 0 && self.completed_slides == self.total_slides
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct StudyDay {
    /// local calendar day, `YYYY-MM-DD`
    pub date: String,
    pub slides_completed: usize,
    pub questions_answered: usize,
    pub correct_answers: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PerformanceStats {
    pub overall: Tally,
    pub overall_accuracy: Option<u8>,
    pub practice: Tally,
    pub practice_accuracy: Option<u8>,
    pub test: Tally,
    pub test_accuracy: Option<u8>,
    pub rating: Option<AccuracyRating>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProgressReport {
    pub overall: OverallProgress,
    pub performance: PerformanceStats,
    pub chapters: Vec<ChapterReport>,
    pub history: Vec<StudyDay>,
}

pub fn chapter_percentage(content: &ChapterContent, progress: &ProgressIndex) -> Option<u8> {
    let completed = progress.completed_count(content.slides.iter().map(|s| s.id));
    percentage(completed, content.slides.len())
}

/// Score over the latest answer of each test question answered so far.
pub fn latest_test_score<'a>(answers: impl IntoIterator<Item = &'a AnswerRecord>) -> Option<u8> {
    let tests = answers
        .into_iter()
        .filter(|a| a.question_type == QuestionType::ChapterTest);
    let tally: Tally = latest_per_question(tests).into_iter().collect();
    tally.accuracy()
}

pub fn chapter_report(
    content: &ChapterContent,
    progress: &ProgressIndex,
    answers: &[AnswerRecord],
) -> ChapterReport {
    let chapter_answers: Vec<&AnswerRecord> = answers
        .iter()
        .filter(|a| a.chapter_id == content.chapter.id)
        .collect();
    let practice: Tally = chapter_answers
        .iter()
        .copied()
        .filter(|a| a.question_type == QuestionType::SlidePractice)
        .collect();
    let slides: Vec<SlideStatus> = content
        .slides
        .iter()
        .map(|s| SlideStatus {
            id: s.id,
            title: s.title.clone(),
            is_completed: progress.is_completed(s.id),
        })
        .collect();
    let completed_slides = slides.iter().filter(|s| s.is_completed).count();
    ChapterReport {
        id: content.chapter.id,
        title: content.chapter.title.clone(),
        description: content.chapter.description.clone(),
        total_slides: slides.len(),
        completed_slides,
        percentage: percentage(completed_slides, slides.len()),
        practice,
        practice_accuracy: practice.accuracy(),
        test_score: latest_test_score(chapter_answers.iter().copied()),
        slides,
    }
}

/// A chapter report plus what the learner can do with the chapter test.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChapterOverview {
    #[serde(flatten)]
    pub report: ChapterReport,
    pub test_question_count: usize,
    /// every slide completed and a test exists
    pub test_unlocked: bool,
}

pub fn chapter_overview(
    content: &ChapterContent,
    progress: &ProgressIndex,
    answers: &[AnswerRecord],
) -> ChapterOverview {
    let report = chapter_report(content, progress, answers);
    let test_question_count = content
        .questions
        .iter()
        .filter(|q| q.question_type == QuestionType::ChapterTest)
        .count();
    ChapterOverview {
        test_unlocked: report.is_complete() && test_question_count > 0,
        test_question_count,
        report,
    }
}

pub fn overall_progress(
    curriculum: &Curriculum,
    progress: &ProgressIndex,
    chapters: &[ChapterReport],
) -> OverallProgress {
    let completed_slides = curriculum
        .chapters
        .iter()
        .map(|c| progress.completed_count(c.slides.iter().map(|s| s.id)))
        .sum();
    let total_slides = curriculum.total_slides();
    OverallProgress {
        completed_slides,
        total_slides,
        percentage: percentage(completed_slides, total_slides),
        completed_chapters: chapters.iter().filter(|c| c.is_complete()).count(),
        total_chapters: curriculum.chapters.len(),
    }
}

pub fn performance(answers: &[AnswerRecord]) -> PerformanceStats {
    let overall: Tally = answers.iter().collect();
    let practice: Tally = answers
        .iter()
        .filter(|a| a.question_type == QuestionType::SlidePractice)
        .collect();
    let test: Tally = answers
        .iter()
        .filter(|a| a.question_type == QuestionType::ChapterTest)
        .collect();
    let overall_accuracy = overall.accuracy();
    PerformanceStats {
        overall,
        overall_accuracy,
        practice,
        practice_accuracy: practice.accuracy(),
        test,
        test_accuracy: test.accuracy(),
        rating: overall_accuracy.map(AccuracyRating::from_accuracy),
    }
}

fn study_day(days: &mut BTreeMap<Date, StudyDay>, date: Date) -> &mut StudyDay {
    days.entry(date).or_insert_with(|| StudyDay {
        date: date.to_string(),
        slides_completed: 0,
        questions_answered: 0,
        correct_answers: 0,
    })
}

/// Activity grouped by local day, newest first, at most thirty days.
pub fn study_history(
    progress: &ProgressIndex,
    answers: &[AnswerRecord],
    offset: UtcOffset,
) -> Vec<StudyDay> {
    let mut days: BTreeMap<Date, StudyDay> = BTreeMap::new();
    for row in progress.completed() {
        if let Some(completed_at) = row.completed_at {
            study_day(&mut days, local_date(completed_at, offset)).slides_completed += 1;
        }
    }
    for answer in answers {
        let entry = study_day(&mut days, local_date(answer.answered_at, offset));
        entry.questions_answered += 1;
        if answer.is_correct {
            entry.correct_answers += 1;
        }
    }
    days.into_values().rev().take(HISTORY_DAYS).collect()
}

pub fn progress_report(
    curriculum: &Curriculum,
    progress: &ProgressIndex,
    answers: &[AnswerRecord],
    offset: UtcOffset,
) -> ProgressReport {
    let chapters: Vec<ChapterReport> = curriculum
        .chapters
        .iter()
        .map(|c| chapter_report(c, progress, answers))
        .collect();
    ProgressReport {
        overall: overall_progress(curriculum, progress, &chapters),
        performance: performance(answers),
        history: study_history(progress, answers, offset),
        chapters,
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChapterLink {
    pub id: i64,
    pub title: String,
}

impl From<&Chapter> for ChapterLink {
    fn from(chapter: &Chapter) -> Self {
        Self {
            id: chapter.id,
            title: chapter.title.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Dashboard {
    pub greeting_name: String,
    pub overall: OverallProgress,
    /// accuracy over the recent answers below
    pub recent_accuracy: Option<u8>,
    pub last_studied_chapter: Option<ChapterLink>,
    pub next_chapter: Option<ChapterLink>,
    pub chapters: Vec<ChapterReport>,
    pub recent_answers: Vec<AnswerRecord>,
}

const RECENT_ANSWERS: usize = 10;

/// `answers` is the user's whole answer history, newest first.
pub fn dashboard(
    greeting_name: String,
    curriculum: &Curriculum,
    progress: &ProgressIndex,
    answers: &[AnswerRecord],
) -> Dashboard {
    let chapters: Vec<ChapterReport> = curriculum
        .chapters
        .iter()
        .map(|c| chapter_report(c, progress, answers))
        .collect();
    let recent_answers: Vec<AnswerRecord> = answers.iter().take(RECENT_ANSWERS).cloned().collect();
    let recent: Tally = recent_answers.iter().collect();
    let last_studied_chapter = progress
        .latest_completion()
        .and_then(|p| curriculum.chapter_of_slide(p.slide_id))
        .map(|c| ChapterLink::from(&c.chapter));
    let next_chapter = curriculum
        .chapters
        .iter()
        .zip(&chapters)
        .find(|(_, report)| !report.is_complete())
        .map(|(c, _)| ChapterLink::from(&c.chapter));
    Dashboard {
        greeting_name,
        overall: overall_progress(curriculum, progress, &chapters),
        recent_accuracy: recent.accuracy(),
        last_studied_chapter,
        next_chapter,
        chapters,
        recent_answers,
    }
}
