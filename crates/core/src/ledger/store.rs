//! Ledger storage trait and types.

use thiserror::Error;

use super::types::{GrantOutcome, GrantRun, TicketRef, TicketTransaction, TicketType, Wallet};

/// Error type for ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The balance does not cover the requested spend.
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: i64, need: i64 },

    /// Amount must be a positive integer.
    #[error("invalid amount: {0}")]
    InvalidAmount(i64),

    /// Grant run log entry not found.
    #[error("grant run not found: {0}")]
    GrantRunNotFound(i64),

    /// Database error.
    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::Database(e.to_string())
    }
}

/// Filter for querying transactions.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub user_id: Option<String>,
    pub ticket_type: Option<TicketType>,
    pub reason: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl TransactionFilter {
    pub fn new() -> Self {
        Self {
            limit: 100,
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_ticket_type(mut self, ticket_type: TicketType) -> Self {
        self.ticket_type = Some(ticket_type);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Final figures of a grant run.
#[derive(Debug, Clone, Default)]
pub struct GrantRunOutcome {
    pub users_processed: i64,
    pub total_granted: i64,
    /// Set when the run failed.
    pub error: Option<String>,
}

/// Trait for ledger storage backends.
///
/// Balances are never written directly: every mutation inserts a transaction and
/// adjusts the cached balance inside the same database transaction.
pub trait LedgerStore: Send + Sync {
    /// Current balance, 0 when the user never held this ticket type.
    fn balance(&self, user_id: &str, ticket_type: TicketType) -> Result<i64, LedgerError>;

    /// Balances of every ticket type.
    fn wallet(&self, user_id: &str) -> Result<Wallet, LedgerError>;

    /// Debit `amount`, failing with `InsufficientBalance` instead of going negative.
    fn spend(
        &self,
        user_id: &str,
        ticket_type: TicketType,
        amount: i64,
        reason: &str,
        reference: Option<TicketRef>,
    ) -> Result<TicketTransaction, LedgerError>;

    /// Credit `amount`. A reused idempotency key is a silent no-op.
    fn grant(
        &self,
        user_id: &str,
        ticket_type: TicketType,
        amount: i64,
        reason: &str,
        reference: Option<TicketRef>,
        idempotency_key: Option<&str>,
    ) -> Result<GrantOutcome, LedgerError>;

    /// Bring the balance to exactly `new_balance` with a single transaction.
    fn set_absolute(
        &self,
        user_id: &str,
        ticket_type: TicketType,
        new_balance: i64,
        reason: &str,
        idempotency_key: &str,
    ) -> Result<GrantOutcome, LedgerError>;

    /// Whether a transaction with this key exists.
    fn has_idempotency_key(&self, key: &str) -> Result<bool, LedgerError>;

    /// List transactions, newest first.
    fn transactions(&self, filter: &TransactionFilter)
        -> Result<Vec<TicketTransaction>, LedgerError>;

    /// Count transactions matching the filter.
    fn count_transactions(&self, filter: &TransactionFilter) -> Result<i64, LedgerError>;

    /// Sum of all deltas for a key, computed from the log rather than the cache.
    fn sum_deltas(&self, user_id: &str, ticket_type: TicketType) -> Result<i64, LedgerError>;

    /// Open a grant run log entry in `running` status.
    fn begin_grant_run(&self, kind: &str, period: &str) -> Result<GrantRun, LedgerError>;

    /// Close a grant run log entry as completed or failed.
    fn finish_grant_run(&self, id: i64, outcome: &GrantRunOutcome) -> Result<GrantRun, LedgerError>;

    /// Most recent grant run of a kind.
    fn last_grant_run(&self, kind: &str) -> Result<Option<GrantRun>, LedgerError>;
}
