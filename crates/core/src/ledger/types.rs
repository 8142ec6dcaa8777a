//! Core ledger data types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A typed unit of virtual currency.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TicketType {
    /// Reset to a fixed amount every day, spent on the proposal poll.
    DailyVote,
    /// Spent to submit a new proposal.
    NovelRequest,
    /// Spent on translation vote targets.
    TranslationTicket,
}

impl TicketType {
    pub const ALL: [TicketType; 3] = [
        TicketType::DailyVote,
        TicketType::NovelRequest,
        TicketType::TranslationTicket,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketType::DailyVote => "daily_vote",
            TicketType::NovelRequest => "novel_request",
            TicketType::TranslationTicket => "translation_ticket",
        }
    }
}

impl fmt::Display for TicketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily_vote" => Ok(TicketType::DailyVote),
            "novel_request" => Ok(TicketType::NovelRequest),
            "translation_ticket" => Ok(TicketType::TranslationTicket),
            other => Err(format!("unknown ticket type: {}", other)),
        }
    }
}

/// Reason codes recorded on ledger transactions.
pub mod reason {
    pub const DAILY_GRANT: &str = "daily_grant";
    pub const WEEKLY_GRANT: &str = "weekly_grant";
    pub const VOTE_CAST: &str = "vote_cast";
    pub const PROPOSAL_CREATED: &str = "proposal_created";
    pub const TRANSLATION_REQUEST: &str = "translation_request";
    pub const TRANSLATION_VOTE: &str = "translation_vote";
    pub const SUBSCRIPTION_GRANT: &str = "subscription_grant";
    pub const ADMIN_ADJUSTMENT: &str = "admin_adjustment";
    pub const LEVEL_REWARD: &str = "level_reward";
}

/// Provenance pointer attached to a transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TicketRef {
    pub ref_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,
}

impl TicketRef {
    pub fn new(ref_type: impl Into<String>, ref_id: impl Into<String>) -> Self {
        Self {
            ref_type: ref_type.into(),
            ref_id: Some(ref_id.into()),
        }
    }

    /// A reference with a type but no concrete entity (e.g. scheduled grants).
    pub fn kind(ref_type: impl Into<String>) -> Self {
        Self {
            ref_type: ref_type.into(),
            ref_id: None,
        }
    }
}

/// Immutable ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketTransaction {
    pub id: String,
    pub user_id: String,
    pub ticket_type: TicketType,
    /// Positive for grants, negative for spends.
    pub delta: i64,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<TicketRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of an idempotent grant.
#[derive(Debug, Clone, PartialEq)]
pub enum GrantOutcome {
    /// A new transaction was written.
    Granted(TicketTransaction),
    /// A transaction with the same idempotency key already exists.
    AlreadyApplied,
}

impl GrantOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, GrantOutcome::Granted(_))
    }

    /// Signed amount credited by this call (0 when already applied).
    pub fn delta(&self) -> i64 {
        match self {
            GrantOutcome::Granted(tx) => tx.delta,
            GrantOutcome::AlreadyApplied => 0,
        }
    }
}

/// Balances of every ticket type for one user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Wallet {
    pub user_id: String,
    pub daily_vote: i64,
    pub novel_request: i64,
    pub translation_ticket: i64,
}

impl Wallet {
    pub fn get(&self, ticket_type: TicketType) -> i64 {
        match ticket_type {
            TicketType::DailyVote => self.daily_vote,
            TicketType::NovelRequest => self.novel_request,
            TicketType::TranslationTicket => self.translation_ticket,
        }
    }

    pub(crate) fn set(&mut self, ticket_type: TicketType, balance: i64) {
        match ticket_type {
            TicketType::DailyVote => self.daily_vote = balance,
            TicketType::NovelRequest => self.novel_request = balance,
            TicketType::TranslationTicket => self.translation_ticket = balance,
        }
    }
}

/// Lifecycle of a scheduled grant execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GrantRunStatus {
    Running,
    Completed,
    Failed,
}

impl GrantRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantRunStatus::Running => "running",
            GrantRunStatus::Completed => "completed",
            GrantRunStatus::Failed => "failed",
        }
    }

    pub(crate) fn parse(s: &str) -> Self {
        match s {
            "completed" => GrantRunStatus::Completed,
            "failed" => GrantRunStatus::Failed,
            _ => GrantRunStatus::Running,
        }
    }
}

/// Log row for one execution of a recurring grant job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GrantRun {
    pub id: i64,
    /// Job kind, e.g. `daily_votes` or `weekly_tickets`.
    pub kind: String,
    /// Period stamp the run granted for (`YYYY-MM-DD`).
    pub period: String,
    pub status: GrantRunStatus,
    pub users_processed: i64,
    pub total_granted: i64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
