//! Content fetchers for external novel sources.
//!
//! A fetcher turns a proposal's link into a chapter index and chapter bodies.
//! Site-specific scraping lives behind the `ContentFetcher` trait so the import
//! pipeline only sees structured chapters.

mod json_feed;
mod types;

pub use json_feed::JsonFeedFetcher;
pub use types::{slugify, ChapterRef, FetchedChapter, NovelIndex};

use async_trait::async_trait;
use thiserror::Error;

/// Lowercase markers that identify an anti-bot block in error text.
const CLOUDFLARE_MARKERS: [&str; 6] = [
    "cloudflare",
    "cf_clearance",
    "403 blocked",
    "blocked by cloudflare",
    "cloudflare challenge",
    "turnstile",
];

/// Whether an error message indicates the source answered with an anti-bot challenge.
pub fn is_cloudflare_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    CLOUDFLARE_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Errors that can occur while fetching content.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// The source answered with an anti-bot challenge.
    #[error("blocked by cloudflare: {0}")]
    Blocked(String),

    /// The request did not complete in time.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The source answered with an error status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The response could not be understood.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// No fetcher handles this link.
    #[error("unsupported link: {0}")]
    Unsupported(String),

    /// Connection-level failure.
    #[error("request failed: {0}")]
    Request(String),
}

impl FetchError {
    /// Whether this error means the session needs a fresh cookie.
    pub fn is_cloudflare_block(&self) -> bool {
        match self {
            FetchError::Blocked(_) => true,
            other => is_cloudflare_message(&other.to_string()),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else if e.is_decode() {
            FetchError::Parse(e.to_string())
        } else {
            FetchError::Request(e.to_string())
        }
    }
}

/// Source of novel content.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Name recorded on import runs.
    fn name(&self) -> &str;

    /// Whether this fetcher understands the link.
    fn can_import(&self, link: &str) -> bool;

    /// Fetch the novel's metadata and ordered chapter list.
    async fn fetch_index(&self, link: &str, cookie: Option<&str>)
        -> Result<NovelIndex, FetchError>;

    /// Fetch one chapter body.
    async fn fetch_chapter(
        &self,
        chapter: &ChapterRef,
        cookie: Option<&str>,
    ) -> Result<FetchedChapter, FetchError>;
}
