pub mod audit;
pub mod auth;
pub mod config;
pub mod content;
pub mod db;
pub mod fetcher;
pub mod import_run;
pub mod ledger;
pub mod metrics;
pub mod orchestrator;
pub mod scheduler;
pub mod testing;
pub mod voting;

pub use audit::{
    create_audit_system, AuditError, AuditEvent, AuditFilter, AuditHandle, AuditRecord,
    AuditStore, SqliteAuditStore,
};
pub use auth::{
    create_authenticator, ApiKeyAuthenticator, AuthError, AuthRequest, Authenticator, Identity,
    NoneAuthenticator,
};
pub use config::{
    load_config, load_config_from_str, validate_config, AuthConfig, AuthMethod, Config,
    ConfigError, DatabaseConfig, FetcherConfig, SanitizedConfig, ServerConfig,
};
pub use content::{ContentError, ContentStore, SqliteContentStore};
pub use db::Database;
pub use fetcher::{ContentFetcher, FetchError, JsonFeedFetcher};
pub use import_run::{
    ImportRun, ImportRunError, ImportRunStatus, ImportRunStore, SqliteImportRunStore,
};
pub use ledger::{LedgerError, LedgerStore, SqliteLedger, TicketType, Wallet};
pub use orchestrator::{ImportOrchestrator, ImporterConfig, OrchestratorError};
pub use scheduler::{
    GrantRecipients, Job, JobScheduler, SchedulerConfig, SchedulerError, SqliteRecipients,
};
pub use voting::{SqliteVotingStore, TargetStatus, VotingError, VotingStore};
