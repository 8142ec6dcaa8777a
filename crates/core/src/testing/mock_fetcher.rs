//! Mock content fetcher for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

use crate::fetcher::{ChapterRef, ContentFetcher, FetchError, FetchedChapter, NovelIndex};

use super::fixtures;

/// A recorded chapter fetch for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedFetch {
    pub number: i64,
    pub cookie: Option<String>,
}

/// Anti-bot block applied to chapter fetches.
#[derive(Debug, Clone)]
struct Block {
    from_chapter: i64,
    /// A request carrying this cookie passes.
    clearance: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    novels: HashMap<String, NovelIndex>,
    fetches: Vec<RecordedFetch>,
    index_fetches: usize,
    block: Option<Block>,
    /// Remaining timeouts per chapter number.
    timeouts: HashMap<i64, u32>,
    delay: Option<Duration>,
    hold_at: Option<i64>,
}

/// Mock implementation of the ContentFetcher trait.
///
/// Provides controllable behavior for testing:
/// - Serve generated novels for registered links
/// - Block chapters until a clearance cookie is supplied
/// - Time out a chapter a number of times
/// - Hold a chapter fetch until the test releases it
///
/// # Example
///
/// ```rust,ignore
/// use novels_core::testing::MockFetcher;
///
/// let fetcher = MockFetcher::new();
/// fetcher.add_novel("https://books.example.com/1", "Sword Saint", 5);
/// fetcher.hold_at(3);
///
/// // start an import, then
/// fetcher.wait_until_held().await;
/// orchestrator.pause_import(&run_id);
/// fetcher.release();
/// ```
pub struct MockFetcher {
    name: String,
    state: Arc<Mutex<State>>,
    held: Arc<Notify>,
    gate: Arc<Notify>,
}

impl std::fmt::Debug for MockFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockFetcher")
            .field("name", &self.name)
            .field("state", &"<state>")
            .finish()
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::with_name("mock")
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(State::default())),
            held: Arc::new(Notify::new()),
            gate: Arc::new(Notify::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Serve a generated novel with `chapters` chapters at `link`.
    pub fn add_novel(&self, link: &str, title: &str, chapters: usize) {
        self.state()
            .novels
            .insert(link.to_string(), fixtures::novel_index(link, title, chapters));
    }

    /// Answer every chapter from `from_chapter` on with a Cloudflare block,
    /// unless the request carries `clearance`.
    pub fn block_from(&self, from_chapter: i64, clearance: Option<&str>) {
        self.state().block = Some(Block {
            from_chapter,
            clearance: clearance.map(str::to_string),
        });
    }

    pub fn unblock(&self) {
        self.state().block = None;
    }

    /// Fail the next `times` fetches of a chapter with a timeout.
    pub fn timeout_chapter(&self, number: i64, times: u32) {
        self.state().timeouts.insert(number, times);
    }

    /// Sleep before answering every chapter.
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    /// Block the fetch of chapter `number` until [`release`](Self::release).
    pub fn hold_at(&self, number: i64) {
        self.state().hold_at = Some(number);
    }

    /// Wait until a fetch is parked at the held chapter.
    pub async fn wait_until_held(&self) {
        self.held.notified().await;
    }

    /// Let the held fetch continue and stop holding.
    pub fn release(&self) {
        self.state().hold_at = None;
        self.gate.notify_one();
    }

    /// Chapter fetches in the order they were made, including failed ones.
    pub fn recorded_fetches(&self) -> Vec<RecordedFetch> {
        self.state().fetches.clone()
    }

    /// Numbers of chapters requested, in order.
    pub fn fetched_numbers(&self) -> Vec<i64> {
        self.state().fetches.iter().map(|f| f.number).collect()
    }

    pub fn index_fetch_count(&self) -> usize {
        self.state().index_fetches
    }
}

#[async_trait]
impl ContentFetcher for MockFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_import(&self, link: &str) -> bool {
        self.state().novels.contains_key(link.trim())
    }

    async fn fetch_index(
        &self,
        link: &str,
        _cookie: Option<&str>,
    ) -> Result<NovelIndex, FetchError> {
        let mut state = self.state();
        state.index_fetches += 1;
        state
            .novels
            .get(link.trim())
            .cloned()
            .ok_or_else(|| FetchError::Http {
                status: 404,
                message: format!("no novel at {}", link),
            })
    }

    async fn fetch_chapter(
        &self,
        chapter: &ChapterRef,
        cookie: Option<&str>,
    ) -> Result<FetchedChapter, FetchError> {
        let (hold, delay) = {
            let mut state = self.state();
            state.fetches.push(RecordedFetch {
                number: chapter.number,
                cookie: cookie.map(str::to_string),
            });
            (state.hold_at == Some(chapter.number), state.delay)
        };

        if hold {
            self.held.notify_one();
            self.gate.notified().await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some(remaining) = state.timeouts.get_mut(&chapter.number) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(FetchError::Timeout(format!("chapter {}", chapter.number)));
            }
        }

        if let Some(ref block) = state.block {
            let cleared = block.clearance.is_some() && block.clearance.as_deref() == cookie;
            if chapter.number >= block.from_chapter && !cleared {
                return Err(FetchError::Blocked(format!(
                    "chapter {} answered 403",
                    chapter.number
                )));
            }
        }

        Ok(fixtures::chapter(chapter.number))
    }
}
