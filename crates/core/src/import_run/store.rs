//! Import run storage trait and types.

use thiserror::Error;

use super::types::{ImportRun, ImportRunCookie, ImportRunStatus, NewImportRun, RunResult};

/// Error type for import run operations.
#[derive(Debug, Error)]
pub enum ImportRunError {
    #[error("import run not found: {0}")]
    NotFound(String),

    #[error("cannot move import run {run_id} from {from} to {to}")]
    InvalidTransition {
        run_id: String,
        from: ImportRunStatus,
        to: ImportRunStatus,
    },

    #[error("proposal {0} already has an open import run")]
    OpenRunExists(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for ImportRunError {
    fn from(e: rusqlite::Error) -> Self {
        ImportRunError::Database(e.to_string())
    }
}

/// Filter for listing runs.
#[derive(Debug, Clone, Default)]
pub struct ImportRunFilter {
    pub status: Option<ImportRunStatus>,
    pub proposal_id: Option<String>,
    /// Clamped to 1..=200 by the store.
    pub limit: i64,
}

impl ImportRunFilter {
    pub fn new() -> Self {
        Self {
            limit: 50,
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: ImportRunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_proposal(mut self, proposal_id: impl Into<String>) -> Self {
        self.proposal_id = Some(proposal_id.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }
}

/// Trait for import run storage backends.
pub trait ImportRunStore: Send + Sync {
    /// Insert a new run in `running` status. Fails with `OpenRunExists` while the
    /// proposal has another run that is not terminal.
    fn create(&self, request: NewImportRun) -> Result<ImportRun, ImportRunError>;

    fn get(&self, id: &str) -> Result<Option<ImportRun>, ImportRunError>;

    /// Runs, newest first.
    fn list(&self, filter: &ImportRunFilter) -> Result<Vec<ImportRun>, ImportRunError>;

    /// Move a run to a non-terminal status, rejecting transitions the lifecycle forbids.
    fn set_status(&self, id: &str, status: ImportRunStatus) -> Result<ImportRun, ImportRunError>;

    /// Persist progress and the resume position.
    fn update_progress(
        &self,
        id: &str,
        current: i64,
        total: i64,
        checkpoint: &serde_json::Value,
    ) -> Result<(), ImportRunError>;

    fn set_novel_id(&self, id: &str, novel_id: &str) -> Result<(), ImportRunError>;

    /// Write the exit state of a pipeline task and stamp `finished_at` for terminal statuses.
    fn set_result(&self, id: &str, result: &RunResult) -> Result<ImportRun, ImportRunError>;

    /// Newest run for a proposal that is not terminal.
    fn find_open_for_proposal(&self, proposal_id: &str)
        -> Result<Option<ImportRun>, ImportRunError>;

    /// Runs still marked `running` or `pause_requested`, oldest first.
    fn list_unfinished(&self) -> Result<Vec<ImportRun>, ImportRunError>;

    fn get_cookie(&self, run_id: &str) -> Result<Option<ImportRunCookie>, ImportRunError>;

    fn upsert_cookie(
        &self,
        run_id: &str,
        cookie_header: &str,
    ) -> Result<ImportRunCookie, ImportRunError>;

    fn delete_cookie(&self, run_id: &str) -> Result<bool, ImportRunError>;
}
