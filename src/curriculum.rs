pub mod chapter;
pub mod question;
pub mod slide;

use std::collections::HashMap;

use sqlx::SqlitePool;

use crate::error::Result;
use chapter::{Chapter, list_chapters};
use question::{Question, QuestionFilter, list_questions};
use slide::{Slide, list_slides};

/// A chapter together with its slides and questions, each in order.
#[derive(Debug, Clone)]
pub struct ChapterContent {
    pub chapter: Chapter,
    pub slides: Vec<Slide>,
    pub questions: Vec<Question>,
}

/// Snapshot of the published curriculum, used by the read-side reports.
#[derive(Debug, Clone, Default)]
pub struct Curriculum {
    pub chapters: Vec<ChapterContent>,
}

impl Curriculum {
    pub async fn load_published(database: &SqlitePool) -> Result<Self> {
        let chapters = list_chapters(database, true).await?;
        let mut slides_by_chapter: HashMap<i64, Vec<Slide>> = HashMap::new();
        for slide in list_slides(database, None).await? {
            slides_by_chapter.entry(slide.chapter_id).or_default().push(slide);
        }
        let mut questions_by_chapter: HashMap<i64, Vec<Question>> = HashMap::new();
        for question in list_questions(database, &QuestionFilter::default()).await? {
            questions_by_chapter
                .entry(question.chapter_id)
                .or_default()
                .push(question);
        }
        let chapters = chapters
            .into_iter()
            .map(|chapter| ChapterContent {
                slides: slides_by_chapter.remove(&chapter.id).unwrap_or_default(),
                questions: questions_by_chapter.remove(&chapter.id).unwrap_or_default(),
                chapter,
            })
            .collect();
        Ok(Self { chapters })
    }

    pub fn total_slides(&self) -> usize {
        self.chapters.iter().map(|c| c.slides.len()).sum()
    }

    pub fn chapter_of_slide(&self, slide_id: i64) -> Option<&ChapterContent> {
        self.chapters
            .iter()
            .find(|c| c.slides.iter().any(|s| s.id == slide_id))
    }

    pub fn find_question(&self, question_id: i64) -> Option<&Question> {
        self.chapters
            .iter()
            .flat_map(|c| c.questions.iter())
            .find(|q| q.id == question_id)
    }
}
