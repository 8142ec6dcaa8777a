//! Import run types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of one import attempt.
///
/// ```text
/// running --pause--> pause_requested --checkpoint--> paused --resume--> running
/// running | pause_requested --> succeeded | failed | cancelled
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ImportRunStatus {
    Running,
    /// An operator asked for a pause; the task has not reached a checkpoint yet.
    PauseRequested,
    /// Stopped at a checkpoint; can be resumed.
    Paused,
    Succeeded,
    Failed,
    Cancelled,
}

impl ImportRunStatus {
    pub const ALL: [ImportRunStatus; 6] = [
        ImportRunStatus::Running,
        ImportRunStatus::PauseRequested,
        ImportRunStatus::Paused,
        ImportRunStatus::Succeeded,
        ImportRunStatus::Failed,
        ImportRunStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportRunStatus::Running => "running",
            ImportRunStatus::PauseRequested => "pause_requested",
            ImportRunStatus::Paused => "paused",
            ImportRunStatus::Succeeded => "succeeded",
            ImportRunStatus::Failed => "failed",
            ImportRunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImportRunStatus::Succeeded | ImportRunStatus::Failed | ImportRunStatus::Cancelled
        )
    }

    pub fn is_resumable(&self) -> bool {
        matches!(self, ImportRunStatus::Paused | ImportRunStatus::PauseRequested)
    }

    /// Whether the run is still owned by a task or waiting to be resumed.
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: ImportRunStatus) -> bool {
        use ImportRunStatus::*;
        match (self, next) {
            (Running, PauseRequested) => true,
            (Running, Succeeded | Failed | Cancelled) => true,
            (PauseRequested, Paused | Running) => true,
            (PauseRequested, Succeeded | Failed | Cancelled) => true,
            (Paused, Running) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ImportRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ImportRunStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("invalid import run status: {}", s))
    }
}

/// One end-to-end import attempt for a proposal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportRun {
    pub id: String,
    pub proposal_id: String,
    /// Set once the novel row exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub novel_id: Option<String>,
    /// Name of the fetcher doing the work.
    pub importer: String,
    pub status: ImportRunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub progress_current: i64,
    pub progress_total: i64,
    /// Resume position. Its shape belongs to the pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<serde_json::Value>,
    pub cloudflare_blocked: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create a run.
#[derive(Debug, Clone, Default)]
pub struct NewImportRun {
    pub proposal_id: String,
    pub importer: String,
    /// Starting position, when continuing an earlier attempt.
    pub checkpoint: Option<serde_json::Value>,
    pub progress_current: i64,
    pub progress_total: i64,
}

/// Session cookie an operator supplied for a blocked run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportRunCookie {
    pub run_id: String,
    pub cookie_header: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Final state written when a run leaves the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub status: ImportRunStatus,
    /// Kept as-is when `None`.
    pub novel_id: Option<String>,
    pub error: Option<String>,
    /// Kept as-is when `None`.
    pub cloudflare_blocked: Option<bool>,
}

impl RunResult {
    pub fn succeeded(novel_id: impl Into<String>) -> Self {
        Self {
            status: ImportRunStatus::Succeeded,
            novel_id: Some(novel_id.into()),
            error: None,
            cloudflare_blocked: Some(false),
        }
    }

    pub fn failed(error: impl Into<String>, cloudflare_blocked: bool) -> Self {
        Self {
            status: ImportRunStatus::Failed,
            novel_id: None,
            error: Some(error.into()),
            cloudflare_blocked: Some(cloudflare_blocked),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: ImportRunStatus::Cancelled,
            novel_id: None,
            error: None,
            cloudflare_blocked: None,
        }
    }
}
