use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    // System events
    ServiceStarted {
        version: String,
        config_hash: String,
    },
    ServiceStopped {
        reason: String,
    },

    // Import runs
    ImportRunStarted {
        run_id: String,
        proposal_id: String,
        importer: String,
        /// "start", "resume", "retry" or "winner".
        origin: String,
        /// Run this one continues from, for retries.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_of: Option<String>,
    },
    ImportRunStatusChanged {
        run_id: String,
        from_status: String,
        to_status: String,
        requested_by: String,
    },
    ImportRunFinished {
        run_id: String,
        proposal_id: String,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        novel_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        cloudflare_blocked: bool,
        chapters_saved: i64,
    },
    ImportCookieUpdated {
        run_id: String,
        updated_by: String,
    },

    // Voting
    WinnerSelected {
        /// "proposal" or "translation"
        kind: String,
        subject_id: String,
        previous_status: String,
        next_status: String,
        forced: bool,
    },
    TargetStatusOverridden {
        target_id: String,
        from_status: String,
        to_status: String,
        changed_by: String,
    },

    // Ledger
    TicketsGranted {
        user_id: String,
        ticket_type: String,
        amount: i64,
        reason: String,
        granted_by: String,
    },
    GrantRunFinished {
        kind: String,
        period: String,
        status: String,
        users_processed: i64,
        total_granted: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    // Scheduler
    JobTriggered {
        job: String,
        forced: bool,
        triggered_by: String,
    },
}

impl AuditEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ServiceStarted { .. } => "service_started",
            Self::ServiceStopped { .. } => "service_stopped",
            Self::ImportRunStarted { .. } => "import_run_started",
            Self::ImportRunStatusChanged { .. } => "import_run_status_changed",
            Self::ImportRunFinished { .. } => "import_run_finished",
            Self::ImportCookieUpdated { .. } => "import_cookie_updated",
            Self::WinnerSelected { .. } => "winner_selected",
            Self::TargetStatusOverridden { .. } => "target_status_overridden",
            Self::TicketsGranted { .. } => "tickets_granted",
            Self::GrantRunFinished { .. } => "grant_run_finished",
            Self::JobTriggered { .. } => "job_triggered",
        }
    }

    /// The record the event is about: an import run, vote target, proposal or job.
    pub fn subject_id(&self) -> Option<&str> {
        match self {
            Self::ImportRunStarted { run_id, .. }
            | Self::ImportRunStatusChanged { run_id, .. }
            | Self::ImportRunFinished { run_id, .. }
            | Self::ImportCookieUpdated { run_id, .. } => Some(run_id),
            Self::WinnerSelected { subject_id, .. } => Some(subject_id),
            Self::TargetStatusOverridden { target_id, .. } => Some(target_id),
            Self::JobTriggered { job, .. } => Some(job),
            Self::GrantRunFinished { kind, .. } => Some(kind),
            Self::ServiceStarted { .. }
            | Self::ServiceStopped { .. }
            | Self::TicketsGranted { .. } => None,
        }
    }

    /// The user who acted, or whose wallet changed.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::ImportRunStatusChanged { requested_by, .. } => Some(requested_by),
            Self::ImportCookieUpdated { updated_by, .. } => Some(updated_by),
            Self::TargetStatusOverridden { changed_by, .. } => Some(changed_by),
            Self::TicketsGranted { user_id, .. } => Some(user_id),
            Self::JobTriggered { triggered_by, .. } => Some(triggered_by),
            _ => None,
        }
    }
}

/// A stored audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub subject_id: Option<String>,
    pub user_id: Option<String>,
    pub data: AuditEvent,
}
