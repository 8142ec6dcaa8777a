//! Import run records and their state machine.

mod sqlite;
mod store;
mod types;

pub use sqlite::SqliteImportRunStore;
pub use store::{ImportRunError, ImportRunFilter, ImportRunStore};
pub use types::{ImportRun, ImportRunCookie, ImportRunStatus, NewImportRun, RunResult};
