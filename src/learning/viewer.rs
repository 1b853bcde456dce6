//! Slide viewer: walks a learner through a chapter's slides and the practice
//! questions attached to each slide.
//!
//! The machine itself is pure. Every transition returns the side effects it
//! wants persisted ([`ViewerEffect`]); [`persist_effects`] writes them. The
//! machine's state is serialized into the learner's session between requests.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;
use utoipa::ToSchema;

use super::{
    answer::record_answer,
    progress::{ProgressIndex, mark_slide_completed},
};
use crate::{
    curriculum::{
        chapter::{Chapter, get_published_chapter},
        question::{AnswerOption, Question, QuestionType, list_chapter_questions},
        slide::{Slide, list_chapter_slides},
    },
    error::{Error, Result},
};

/// Everything the viewer needs to know about one chapter for one learner.
#[derive(Debug, Clone)]
pub struct ChapterDeck {
    pub chapter: Chapter,
    pub slides: Vec<Slide>,
    practice: HashMap<i64, Vec<Question>>,
    completed: HashSet<i64>,
}

impl ChapterDeck {
    pub fn new(
        chapter: Chapter,
        slides: Vec<Slide>,
        practice_questions: Vec<Question>,
        completed: HashSet<i64>,
    ) -> Self {
        let mut practice: HashMap<i64, Vec<Question>> = HashMap::new();
        for question in practice_questions {
            if let Some(slide_id) = question.slide_id {
                practice.entry(slide_id).or_default().push(question);
            }
        }
        Self {
            chapter,
            slides,
            practice,
            completed,
        }
    }

    /// Load a published chapter with at least one slide.
    pub async fn load(database: &SqlitePool, user_id: i64, chapter_id: i64) -> Result<Self> {
        let chapter = get_published_chapter(database, chapter_id).await?;
        let slides = list_chapter_slides(database, chapter_id).await?;
        if slides.is_empty() {
            return Err(Error::precondition(
                format!("chapter {} has no slides", chapter_id),
                chapter_overview_path(chapter_id),
            ));
        }
        let questions = list_chapter_questions(database, chapter_id, QuestionType::SlidePractice).await?;
        let progress = ProgressIndex::load(database, user_id).await?;
        let completed = slides
            .iter()
            .map(|s| s.id)
            .filter(|id| progress.is_completed(*id))
            .collect();
        Ok(Self::new(chapter, slides, questions, completed))
    }

    pub fn questions_for(&self, slide_id: i64) -> &[Question] {
        self.practice.get(&slide_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_completed(&self, slide_id: i64) -> bool {
        self.completed.contains(&slide_id)
    }

    fn mark_completed(&mut self, slide_id: i64) {
        self.completed.insert(slide_id);
    }
}

pub fn chapter_overview_path(chapter_id: i64) -> String {
    format!("/api/learner/chapters/{}", chapter_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ViewerMode {
    Slide,
    /// `selected` locks the question once set
    Question {
        index: usize,
        #[serde(default)]
        question_id: i64,
        selected: Option<String>,
    },
    Summary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerEffect {
    CompleteSlide { slide_id: i64 },
    RecordAnswer { question_id: i64, selected: String },
    /// the chapter is finished; the caller should go back to the overview
    ReturnToOverview,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideViewer {
    pub chapter_id: i64,
    pub slide_index: usize,
    pub mode: ViewerMode,
    /// question id -> answered correctly, for the current slide only
    results: BTreeMap<i64, bool>,
}

impl SlideViewer {
    pub fn new(chapter_id: i64) -> Self {
        Self {
            chapter_id,
            slide_index: 0,
            mode: ViewerMode::Slide,
            results: BTreeMap::new(),
        }
    }

    pub fn session_key(chapter_id: i64) -> String {
        format!("viewer.{}", chapter_id)
    }

    /// Clamp a stored state to the deck as it is now; slides or questions may
    /// have been edited since the state was saved.
    pub fn sync(&mut self, deck: &ChapterDeck) {
        if self.slide_index >= deck.slides.len() {
            self.slide_index = 0;
            self.reset_questions();
            return;
        }
        let questions = self.current_questions(deck);
        let stale = match &self.mode {
            ViewerMode::Slide => false,
            ViewerMode::Question {
                index, question_id, ..
            } => questions.get(*index).is_none_or(|q| q.id != *question_id),
            ViewerMode::Summary => {
                questions.is_empty() || !questions.iter().all(|q| self.results.contains_key(&q.id))
            }
        };
        if stale {
            self.reset_questions();
        }
    }

    fn ask(&mut self, deck: &ChapterDeck, index: usize) {
        let question_id = self.current_questions(deck)[index].id;
        self.mode = ViewerMode::Question {
            index,
            question_id,
            selected: None,
        };
    }

    fn reset_questions(&mut self) {
        self.mode = ViewerMode::Slide;
        self.results.clear();
    }

    fn current_slide<'a>(&self, deck: &'a ChapterDeck) -> &'a Slide {
        &deck.slides[self.slide_index]
    }

    fn current_questions<'a>(&self, deck: &'a ChapterDeck) -> &'a [Question] {
        deck.questions_for(self.current_slide(deck).id)
    }

    fn complete_current(&self, deck: &ChapterDeck, effects: &mut Vec<ViewerEffect>) {
        let slide_id = self.current_slide(deck).id;
        if !deck.is_completed(slide_id) {
            effects.push(ViewerEffect::CompleteSlide { slide_id });
        }
    }

    fn is_last_slide(&self, deck: &ChapterDeck) -> bool {
        self.slide_index + 1 == deck.slides.len()
    }

    /// Complete the current slide and move on; stays put on the last slide.
    pub fn next_slide(&mut self, deck: &ChapterDeck) -> Vec<ViewerEffect> {
        let mut effects = vec![];
        self.complete_current(deck, &mut effects);
        if !self.is_last_slide(deck) {
            self.slide_index += 1;
        }
        self.reset_questions();
        effects
    }

    pub fn previous_slide(&mut self) -> Vec<ViewerEffect> {
        self.slide_index = self.slide_index.saturating_sub(1);
        self.reset_questions();
        vec![]
    }

    pub fn go_to_slide(&mut self, deck: &ChapterDeck, index: usize) -> Result<Vec<ViewerEffect>> {
        if index >= deck.slides.len() {
            return Err(Error::bad_request(format!(
                "slide index {} out of range, chapter has {} slides",
                index,
                deck.slides.len()
            )));
        }
        self.slide_index = index;
        self.reset_questions();
        Ok(vec![])
    }

    /// Only allowed on the last slide: complete it and leave the viewer.
    pub fn finish_chapter(&mut self, deck: &ChapterDeck) -> Result<Vec<ViewerEffect>> {
        if !self.is_last_slide(deck) {
            return Err(Error::bad_request("only the last slide can finish the chapter"));
        }
        let mut effects = vec![];
        self.complete_current(deck, &mut effects);
        self.reset_questions();
        effects.push(ViewerEffect::ReturnToOverview);
        Ok(effects)
    }

    pub fn start_questions(&mut self, deck: &ChapterDeck) -> Result<Vec<ViewerEffect>> {
        if self.current_questions(deck).is_empty() {
            return Err(Error::bad_request("this slide has no practice questions"));
        }
        self.results.clear();
        self.ask(deck, 0);
        Ok(vec![])
    }

    /// Answer the current question. A question that already has an answer
    /// keeps it: the second selection is ignored and nothing is recorded.
    pub fn select_answer(&mut self, deck: &ChapterDeck, option_id: &str) -> Result<Vec<ViewerEffect>> {
        let questions = self.current_questions(deck);
        let ViewerMode::Question { index, selected, .. } = &mut self.mode else {
            return Err(Error::bad_request("no question is being shown"));
        };
        if selected.is_some() {
            return Ok(vec![]);
        }
        let question = &questions[*index];
        if !question.has_option(option_id) {
            return Err(Error::bad_request(format!("unknown option {}", option_id)));
        }
        *selected = Some(option_id.to_string());
        self.results.insert(question.id, question.is_correct(option_id));
        Ok(vec![ViewerEffect::RecordAnswer {
            question_id: question.id,
            selected: option_id.to_string(),
        }])
    }

    /// Advance past an answered question; after the last one show the
    /// summary and complete the slide.
    pub fn next_question(&mut self, deck: &ChapterDeck) -> Result<Vec<ViewerEffect>> {
        let question_count = self.current_questions(deck).len();
        let index = match &self.mode {
            ViewerMode::Question {
                selected: Some(_),
                index,
                ..
            } => *index,
            ViewerMode::Question { selected: None, .. } => {
                return Err(Error::bad_request("answer the question before moving on"));
            }
            _ => return Err(Error::bad_request("no question is being shown")),
        };
        let mut effects = vec![];
        if index + 1 < question_count {
            self.ask(deck, index + 1);
        } else {
            self.mode = ViewerMode::Summary;
            self.complete_current(deck, &mut effects);
        }
        Ok(effects)
    }

    pub fn back_to_slide(&mut self) -> Vec<ViewerEffect> {
        self.reset_questions();
        vec![]
    }

    pub fn retry(&mut self, deck: &ChapterDeck) -> Result<Vec<ViewerEffect>> {
        if self.mode != ViewerMode::Summary {
            return Err(Error::bad_request("retry is only possible from the results summary"));
        }
        self.results.clear();
        self.ask(deck, 0);
        Ok(vec![])
    }

    pub fn view(&self, deck: &ChapterDeck) -> ViewerView {
        let slide = self.current_slide(deck);
        let questions = self.current_questions(deck);
        let mode = match &self.mode {
            ViewerMode::Slide => ModeView::Slide,
            ViewerMode::Question { index, selected, .. } => {
                let question = &questions[*index];
                ModeView::Question {
                    index: *index,
                    total: questions.len(),
                    question_id: question.id,
                    question_text: question.question_text.clone(),
                    options: question.options.0.clone(),
                    feedback: selected.as_ref().map(|selected| Feedback {
                        selected: selected.clone(),
                        is_correct: question.is_correct(selected),
                        correct_answer: question.correct_answer.clone(),
                        explanation: question.explanation.clone(),
                    }),
                }
            }
            ViewerMode::Summary => {
                let results: Vec<QuestionResult> = questions
                    .iter()
                    .map(|q| QuestionResult {
                        question_id: q.id,
                        question_text: q.question_text.clone(),
                        is_correct: self.results.get(&q.id).copied().unwrap_or(false),
                    })
                    .collect();
                ModeView::Summary {
                    correct: results.iter().filter(|r| r.is_correct).count(),
                    total: results.len(),
                    results,
                }
            }
        };
        ViewerView {
            chapter_id: deck.chapter.id,
            chapter_title: deck.chapter.title.clone(),
            slide_index: self.slide_index,
            slide_count: deck.slides.len(),
            is_last_slide: self.is_last_slide(deck),
            slide: SlideView {
                id: slide.id,
                title: slide.title.clone(),
                content_html: slide.content_html(),
                is_completed: deck.is_completed(slide.id),
                practice_count: questions.len(),
            },
            slides_completed: deck
                .slides
                .iter()
                .map(|s| deck.is_completed(s.id))
                .collect(),
            mode,
            return_to_overview: false,
        }
    }
}

/// Write the effects of one transition. The deck's completion set follows
/// along so the view built afterwards is current.
pub async fn persist_effects(
    database: &SqlitePool,
    user_id: i64,
    deck: &mut ChapterDeck,
    effects: &[ViewerEffect],
) -> Result<bool> {
    let mut return_to_overview = false;
    for effect in effects {
        match effect {
            ViewerEffect::CompleteSlide { slide_id } => {
                mark_slide_completed(database, user_id, *slide_id).await?;
                deck.mark_completed(*slide_id);
            }
            ViewerEffect::RecordAnswer {
                question_id,
                selected,
            } => {
                let question = deck
                    .practice
                    .values()
                    .flatten()
                    .find(|q| q.id == *question_id)
                    .ok_or(Error::NotFound("Question"))?;
                let answer = record_answer(database, user_id, question, selected).await?;
                info!(
                    "user {} answered practice question {}: {}",
                    user_id, question_id, answer.is_correct
                );
            }
            ViewerEffect::ReturnToOverview => return_to_overview = true,
        }
    }
    Ok(return_to_overview)
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SlideView {
    pub id: i64,
    pub title: String,
    pub content_html: String,
    pub is_completed: bool,
    pub practice_count: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Feedback {
    pub selected: String,
    pub is_correct: bool,
    pub correct_answer: String,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuestionResult {
    pub question_id: i64,
    pub question_text: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ModeView {
    Slide,
    Question {
        index: usize,
        total: usize,
        question_id: i64,
        question_text: String,
        options: Vec<AnswerOption>,
        /// present once the question is answered
        feedback: Option<Feedback>,
    },
    Summary {
        correct: usize,
        total: usize,
        results: Vec<QuestionResult>,
    },
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ViewerView {
    pub chapter_id: i64,
    pub chapter_title: String,
    pub slide_index: usize,
    pub slide_count: usize,
    pub is_last_slide: bool,
    pub slide: SlideView,
    /// completion of every slide, in order
    pub slides_completed: Vec<bool>,
    pub mode: ModeView,
    pub return_to_overview: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, deck_with, test_database};

    #[test]
    fn starts_on_first_slide() {
        let deck = deck_with(&[0, 0], &[]);
        let viewer = SlideViewer::new(deck.chapter.id);
        let view = viewer.view(&deck);
        assert_eq!(view.slide_index, 0);
        assert_eq!(view.slide_count, 2);
        assert!(matches!(view.mode, ModeView::Slide));
    }

    #[test]
    fn next_completes_and_advances() {
        let deck = deck_with(&[0, 0, 0], &[]);
        let mut viewer = SlideViewer::new(deck.chapter.id);
        let effects = viewer.next_slide(&deck);
        assert_eq!(
            effects,
            vec![ViewerEffect::CompleteSlide {
                slide_id: deck.slides[0].id
            }]
        );
        assert_eq!(viewer.slide_index, 1);

        viewer.previous_slide();
        assert_eq!(viewer.slide_index, 0);
        viewer.previous_slide();
        assert_eq!(viewer.slide_index, 0);
    }

    #[test]
    fn completed_slide_is_not_completed_again() {
        let deck = deck_with(&[0, 0], &[0]);
        let mut viewer = SlideViewer::new(deck.chapter.id);
        assert!(viewer.next_slide(&deck).is_empty());
    }

    #[test]
    fn next_on_last_slide_stays() {
        let deck = deck_with(&[0], &[]);
        let mut viewer = SlideViewer::new(deck.chapter.id);
        let effects = viewer.next_slide(&deck);
        assert_eq!(effects.len(), 1);
        assert_eq!(viewer.slide_index, 0);
    }

    #[test]
    fn finish_only_from_last_slide() {
        let deck = deck_with(&[0, 0], &[]);
        let mut viewer = SlideViewer::new(deck.chapter.id);
        assert!(viewer.finish_chapter(&deck).is_err());
        viewer.go_to_slide(&deck, 1).unwrap();
        let effects = viewer.finish_chapter(&deck).unwrap();
        assert_eq!(
            effects,
            vec![
                ViewerEffect::CompleteSlide {
                    slide_id: deck.slides[1].id
                },
                ViewerEffect::ReturnToOverview
            ]
        );
        assert!(viewer.go_to_slide(&deck, 2).is_err());
    }

    #[test]
    fn questions_need_practice_questions() {
        let deck = deck_with(&[0, 2], &[]);
        let mut viewer = SlideViewer::new(deck.chapter.id);
        assert!(viewer.start_questions(&deck).is_err());
        viewer.next_slide(&deck);
        viewer.start_questions(&deck).unwrap();
        assert_eq!(
            viewer.mode,
            ViewerMode::Question {
                index: 0,
                question_id: deck.questions_for(deck.slides[1].id)[0].id,
                selected: None
            }
        );
    }

    #[test]
    fn answer_is_one_shot() {
        let deck = deck_with(&[2], &[]);
        let mut viewer = SlideViewer::new(deck.chapter.id);
        viewer.start_questions(&deck).unwrap();
        assert!(viewer.next_question(&deck).is_err());
        assert!(viewer.select_answer(&deck, "z").is_err());

        let effects = viewer.select_answer(&deck, "b").unwrap();
        let question_id = deck.questions_for(deck.slides[0].id)[0].id;
        assert_eq!(
            effects,
            vec![ViewerEffect::RecordAnswer {
                question_id,
                selected: "b".into()
            }]
        );
        // locked until the next question
        assert!(viewer.select_answer(&deck, "a").unwrap().is_empty());
        let ModeView::Question { feedback, .. } = viewer.view(&deck).mode else {
            panic!("expected question view");
        };
        let feedback = feedback.unwrap();
        assert_eq!(feedback.selected, "b");
        assert!(!feedback.is_correct);
        assert_eq!(feedback.correct_answer, "a");
    }

    #[test]
    fn last_question_leads_to_summary_and_completion() {
        let deck = deck_with(&[2], &[]);
        let mut viewer = SlideViewer::new(deck.chapter.id);
        viewer.start_questions(&deck).unwrap();
        viewer.select_answer(&deck, "a").unwrap();
        assert!(viewer.next_question(&deck).unwrap().is_empty());
        viewer.select_answer(&deck, "c").unwrap();
        let effects = viewer.next_question(&deck).unwrap();
        assert_eq!(
            effects,
            vec![ViewerEffect::CompleteSlide {
                slide_id: deck.slides[0].id
            }]
        );
        assert_eq!(viewer.mode, ViewerMode::Summary);
        let ModeView::Summary { correct, total, .. } = viewer.view(&deck).mode else {
            panic!("expected summary view");
        };
        assert_eq!((correct, total), (1, 2));

        viewer.retry(&deck).unwrap();
        assert_eq!(
            viewer.mode,
            ViewerMode::Question {
                index: 0,
                question_id: deck.questions_for(deck.slides[0].id)[0].id,
                selected: None
            }
        );
        assert!(viewer.retry(&deck).is_err());
    }

    #[test]
    fn navigation_leaves_questions() {
        let deck = deck_with(&[1, 1], &[]);
        let mut viewer = SlideViewer::new(deck.chapter.id);
        viewer.start_questions(&deck).unwrap();
        viewer.next_slide(&deck);
        assert_eq!(viewer.mode, ViewerMode::Slide);
        assert_eq!(viewer.slide_index, 1);
        viewer.start_questions(&deck).unwrap();
        viewer.back_to_slide();
        assert_eq!(viewer.mode, ViewerMode::Slide);
    }

    #[test]
    fn sync_clamps_stale_state() {
        let deck = deck_with(&[1], &[]);
        let mut viewer = SlideViewer::new(deck.chapter.id);
        viewer.slide_index = 5;
        viewer.sync(&deck);
        assert_eq!(viewer.slide_index, 0);

        viewer.mode = ViewerMode::Question {
            index: 3,
            question_id: deck.questions_for(deck.slides[0].id)[0].id,
            selected: None,
        };
        viewer.sync(&deck);
        assert_eq!(viewer.mode, ViewerMode::Slide);
    }

    #[test]
    fn sync_drops_answer_when_questions_were_replaced() {
        let deck = deck_with(&[2], &[]);
        let mut viewer = SlideViewer::new(deck.chapter.id);
        viewer.start_questions(&deck).unwrap();
        viewer.select_answer(&deck, "b").unwrap();

        // same slide, same number of questions, different question at index 0
        let mut questions = deck.questions_for(deck.slides[0].id).to_vec();
        questions.reverse();
        let edited = ChapterDeck::new(deck.chapter.clone(), deck.slides.clone(), questions, HashSet::new());
        viewer.sync(&edited);
        assert_eq!(viewer.mode, ViewerMode::Slide);
        assert!(matches!(viewer.view(&edited).mode, ModeView::Slide));

        // unchanged questions keep the locked answer
        viewer.start_questions(&deck).unwrap();
        viewer.select_answer(&deck, "b").unwrap();
        let before = viewer.clone();
        viewer.sync(&deck);
        assert_eq!(viewer, before);
    }

    #[test]
    fn sync_drops_summary_for_other_questions() {
        let deck = deck_with(&[1], &[]);
        let mut viewer = SlideViewer::new(deck.chapter.id);
        viewer.start_questions(&deck).unwrap();
        viewer.select_answer(&deck, "a").unwrap();
        viewer.next_question(&deck).unwrap();
        assert_eq!(viewer.mode, ViewerMode::Summary);

        let mut question = deck.questions_for(deck.slides[0].id)[0].clone();
        question.id += 1000;
        let edited = ChapterDeck::new(deck.chapter.clone(), deck.slides.clone(), vec![question], HashSet::new());
        viewer.sync(&edited);
        assert_eq!(viewer.mode, ViewerMode::Slide);
    }

    #[test]
    fn state_survives_a_session_round_trip() {
        let deck = deck_with(&[1], &[]);
        let mut viewer = SlideViewer::new(deck.chapter.id);
        viewer.start_questions(&deck).unwrap();
        viewer.select_answer(&deck, "a").unwrap();
        let value = serde_json::to_value(&viewer).unwrap();
        let restored: SlideViewer = serde_json::from_value(value).unwrap();
        assert_eq!(restored, viewer);
    }

    #[tokio::test]
    async fn effects_are_persisted() {
        let db = test_database().await;
        let fx = Fixture::new(&db, 2, 1, 0).await;
        let mut deck = ChapterDeck::load(&db, fx.learner.id, fx.chapter.id).await.unwrap();
        let mut viewer = SlideViewer::new(fx.chapter.id);

        viewer.start_questions(&deck).unwrap();
        let effects = viewer.select_answer(&deck, "a").unwrap();
        persist_effects(&db, fx.learner.id, &mut deck, &effects).await.unwrap();
        let effects = viewer.next_question(&deck).unwrap();
        persist_effects(&db, fx.learner.id, &mut deck, &effects).await.unwrap();
        assert!(deck.is_completed(fx.slides[0].id));

        let progress = ProgressIndex::load(&db, fx.learner.id).await.unwrap();
        assert!(progress.is_completed(fx.slides[0].id));
        let answers = crate::learning::answer::count_answers(&db, fx.learner.id, fx.practice[0].id)
            .await
            .unwrap();
        assert_eq!(answers, 1);

        viewer.go_to_slide(&deck, 1).unwrap();
        let effects = viewer.finish_chapter(&deck).unwrap();
        let leave = persist_effects(&db, fx.learner.id, &mut deck, &effects).await.unwrap();
        assert!(leave);
        assert!(viewer.view(&deck).slides_completed.iter().all(|c| *c));
    }

    #[tokio::test]
    async fn chapter_without_slides_redirects() {
        let db = test_database().await;
        let fx = Fixture::new(&db, 0, 0, 0).await;
        let result = ChapterDeck::load(&db, fx.learner.id, fx.chapter.id).await;
        assert!(matches!(result, Err(Error::Precondition { .. })));
    }
}
