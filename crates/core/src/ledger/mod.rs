//! Ticket ledger: an append-only transaction log with cached per-user balances.

mod sqlite;
mod store;
mod types;

pub use sqlite::SqliteLedger;
pub use store::{GrantRunOutcome, LedgerError, LedgerStore, TransactionFilter};
pub use types::{
    reason, GrantOutcome, GrantRun, GrantRunStatus, TicketRef, TicketTransaction, TicketType,
    Wallet,
};

pub(crate) use sqlite::{initialize_schema, spend_within};
