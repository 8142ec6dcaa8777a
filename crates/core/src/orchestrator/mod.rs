//! Import orchestration.
//!
//! Runs are resumable: progress is checkpointed after every persisted chapter,
//! and pause/cancel requests take effect at the next checkpoint.

mod config;
mod registry;
mod runner;
mod types;

pub use config::ImporterConfig;
pub use registry::RunRegistry;
pub use runner::ImportOrchestrator;
pub use types::{ImportCheckpoint, OrchestratorError, RunSignal};
