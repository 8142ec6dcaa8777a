//! Append-only audit log of operator and pipeline actions.

mod events;
mod handle;
mod sqlite;
mod store;
mod writer;

pub use events::{AuditEvent, AuditRecord};
pub use handle::{AuditEventEnvelope, AuditHandle};
pub use sqlite::SqliteAuditStore;
pub use store::{AuditError, AuditFilter, AuditStore};
pub use writer::{create_audit_system, AuditWriter};
