//! Testing utilities and mock implementations for lifecycle tests.
//!
//! This module provides mock implementations of the external collaborators,
//! so imports and scheduled grants can be exercised without a network or a
//! user directory.
//!
//! # Example
//!
//! ```rust,ignore
//! use novels_core::testing::{MockFetcher, MockRecipients};
//! use novels_core::scheduler::Recipient;
//!
//! let fetcher = MockFetcher::new();
//! fetcher.add_novel("https://books.example.com/1", "Sword Saint", 10);
//! fetcher.block_from(4, Some("cf_clearance=abc"));
//!
//! let recipients = MockRecipients::with_recipients(vec![Recipient::new("u-1")]);
//! ```

mod mock_fetcher;
mod mock_recipients;

pub use mock_fetcher::{MockFetcher, RecordedFetch};
pub use mock_recipients::MockRecipients;

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::fetcher::{slugify, ChapterRef, FetchedChapter, NovelIndex};
    use crate::voting::{NewProposal, ProposalStatus};

    /// A novel index with `chapters` numbered chapters under `link`.
    pub fn novel_index(link: &str, title: &str, chapters: usize) -> NovelIndex {
        NovelIndex {
            title: title.to_string(),
            slug: slugify(title),
            author: Some("Test Author".to_string()),
            description: None,
            chapters: (1..=chapters as i64)
                .map(|number| ChapterRef {
                    number,
                    title: format!("Chapter {}", number),
                    url: format!("{}/chapters/{}", link.trim_end_matches('/'), number),
                })
                .collect(),
        }
    }

    /// The body the mock fetcher returns for a chapter.
    pub fn chapter(number: i64) -> FetchedChapter {
        FetchedChapter {
            number,
            title: format!("Chapter {}", number),
            content: format!("Content of chapter {}", number),
        }
    }

    /// A proposal open for voting.
    pub fn proposal(author: &str, title: &str, link: &str) -> NewProposal {
        NewProposal {
            user_id: author.to_string(),
            title: title.to_string(),
            original_link: link.to_string(),
            status: ProposalStatus::Voting,
        }
    }
}
