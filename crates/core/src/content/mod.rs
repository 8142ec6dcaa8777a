//! Imported novels and chapters.

mod sqlite;

pub use sqlite::SqliteContentStore;
pub(crate) use sqlite::initialize_schema;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fetcher::{FetchedChapter, NovelIndex};

/// Error type for content storage.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("novel not found: {0}")]
    NovelNotFound(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for ContentError {
    fn from(e: rusqlite::Error) -> Self {
        ContentError::Database(e.to_string())
    }
}

/// A novel created by an import.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Novel {
    pub id: String,
    /// Proposal the novel was imported for.
    pub proposal_id: String,
    pub title: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source_link: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored chapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chapter {
    pub id: String,
    pub novel_id: String,
    pub number: i64,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Storage for imported content.
pub trait ContentStore: Send + Sync {
    /// Get or create the novel imported for a proposal.
    fn ensure_novel(
        &self,
        proposal_id: &str,
        source_link: &str,
        index: &NovelIndex,
    ) -> Result<Novel, ContentError>;

    fn get_novel(&self, id: &str) -> Result<Option<Novel>, ContentError>;

    /// Insert or replace one chapter, keyed by `(novel, number)`, in its own transaction.
    fn save_chapter(&self, novel_id: &str, chapter: &FetchedChapter) -> Result<(), ContentError>;

    fn chapter_count(&self, novel_id: &str) -> Result<i64, ContentError>;

    /// Chapters of a novel in reading order.
    fn chapters(&self, novel_id: &str) -> Result<Vec<Chapter>, ContentError>;
}
