//! Types for the import orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::content::ContentError;
use crate::fetcher::{is_cloudflare_message, FetchError};
use crate::import_run::{ImportRunError, ImportRunStatus};
use crate::voting::VotingError;

/// Errors returned by orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("proposal not found: {0}")]
    ProposalNotFound(String),

    #[error("import run not found: {0}")]
    RunNotFound(String),

    #[error("no importer can handle {0}")]
    NoImporter(String),

    #[error("proposal {proposal_id} already has an open import run {run_id}")]
    AlreadyRunning { proposal_id: String, run_id: String },

    #[error("run is not paused")]
    NotPaused { run_id: String, status: ImportRunStatus },

    #[error("cancellation pending for run {0}")]
    CancelPending(String),

    #[error("{0}")]
    NotRetryable(String),

    #[error("importer is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    ImportRun(#[from] ImportRunError),

    #[error(transparent)]
    Voting(#[from] VotingError),

    #[error(transparent)]
    Content(#[from] ContentError),
}

impl OrchestratorError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ProposalNotFound(_)
                | Self::RunNotFound(_)
                | Self::ImportRun(ImportRunError::NotFound(_))
        )
    }

    /// Whether the request conflicts with the current state of the run or proposal.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::AlreadyRunning { .. }
                | Self::NotPaused { .. }
                | Self::CancelPending(_)
                | Self::NotRetryable(_)
                | Self::ShuttingDown
                | Self::ImportRun(ImportRunError::InvalidTransition { .. })
                | Self::ImportRun(ImportRunError::OpenRunExists(_))
        )
    }
}

/// Control signal a running import observes between chapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunSignal {
    Continue,
    Pause,
    Cancel,
}

/// Resume position stored on the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportCheckpoint {
    pub novel_id: String,
    pub slug: String,
    /// 0-based index of the next chapter to fetch.
    pub next_index: usize,
    pub total_chapters: usize,
}

impl ImportCheckpoint {
    /// Read a stored checkpoint; unknown shapes start from the beginning.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "novel_id": self.novel_id,
            "slug": self.slug,
            "next_index": self.next_index,
            "total_chapters": self.total_chapters,
        })
    }
}

/// Why a run task failed.
#[derive(Debug, Error)]
pub(crate) enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    ImportRun(#[from] ImportRunError),

    #[error(transparent)]
    Voting(#[from] VotingError),
}

impl PipelineError {
    pub(crate) fn is_cloudflare_block(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_cloudflare_block(),
            other => is_cloudflare_message(&other.to_string()),
        }
    }
}

/// How a run task ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RunExit {
    Succeeded {
        novel_id: String,
    },
    Paused,
    Cancelled,
    Failed {
        error: String,
        cloudflare_blocked: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_round_trip_through_json() {
        let checkpoint = ImportCheckpoint {
            novel_id: "n-1".to_string(),
            slug: "sword-saint".to_string(),
            next_index: 3,
            total_chapters: 10,
        };
        let value = checkpoint.to_value();
        assert_eq!(value["next_index"], 3);
        assert_eq!(ImportCheckpoint::from_value(&value), Some(checkpoint));
    }

    #[test]
    fn test_foreign_checkpoint_is_ignored() {
        let value = serde_json::json!({"page": 4});
        assert_eq!(ImportCheckpoint::from_value(&value), None);
    }

    #[test]
    fn test_error_classification() {
        assert!(OrchestratorError::RunNotFound("r".into()).is_not_found());
        assert!(OrchestratorError::NotRetryable("run is not failed".into()).is_conflict());
        let not_paused = OrchestratorError::NotPaused {
            run_id: "r".into(),
            status: ImportRunStatus::Running,
        };
        assert!(not_paused.is_conflict());
        assert_eq!(not_paused.to_string(), "run is not paused");
        assert!(OrchestratorError::CancelPending("r".into()).is_conflict());
    }

    #[test]
    fn test_pipeline_error_detects_cloudflare() {
        assert!(PipelineError::Fetch(FetchError::Blocked("challenge".into())).is_cloudflare_block());
        assert!(!PipelineError::Fetch(FetchError::Timeout("slow".into())).is_cloudflare_block());
        assert!(PipelineError::Content(ContentError::Database(
            "upstream said: turnstile".into()
        ))
        .is_cloudflare_block());
    }
}
