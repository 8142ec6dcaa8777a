//! Mock grant recipients for testing.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::scheduler::{GrantRecipients, Recipient, SchedulerError};

#[derive(Debug, Default)]
struct State {
    recipients: Vec<Recipient>,
    pages_served: usize,
    fail_at_offset: Option<usize>,
}

/// In-memory recipient list, paged by position.
#[derive(Debug, Clone, Default)]
pub struct MockRecipients {
    state: Arc<Mutex<State>>,
}

impl MockRecipients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recipients(recipients: Vec<Recipient>) -> Self {
        let mock = Self::new();
        mock.state().recipients = recipients;
        mock
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn add(&self, recipient: Recipient) {
        self.state().recipients.push(recipient);
    }

    /// Fail the page request starting at `offset`.
    pub fn fail_at_offset(&self, offset: usize) {
        self.state().fail_at_offset = Some(offset);
    }

    pub fn pages_served(&self) -> usize {
        self.state().pages_served
    }
}

impl GrantRecipients for MockRecipients {
    fn page(&self, offset: usize, limit: usize) -> Result<Vec<Recipient>, SchedulerError> {
        let mut state = self.state();
        if state.fail_at_offset == Some(offset) {
            return Err(SchedulerError::Database(format!(
                "simulated failure at offset {}",
                offset
            )));
        }
        state.pages_served += 1;
        Ok(state
            .recipients
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}
