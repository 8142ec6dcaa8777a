use std::sync::Arc;

use novels_core::{
    AuditHandle, AuditStore, Authenticator, Config, ImportOrchestrator, ImportRunStore,
    JobScheduler, LedgerStore, SanitizedConfig, VotingStore,
};

/// Shared application state
pub struct AppState {
    config: Config,
    authenticator: Arc<dyn Authenticator>,
    audit: AuditHandle,
    audit_store: Arc<dyn AuditStore>,
    ledger: Arc<dyn LedgerStore>,
    voting: Arc<dyn VotingStore>,
    runs: Arc<dyn ImportRunStore>,
    orchestrator: Arc<ImportOrchestrator>,
    scheduler: Arc<JobScheduler>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        authenticator: Arc<dyn Authenticator>,
        audit: AuditHandle,
        audit_store: Arc<dyn AuditStore>,
        ledger: Arc<dyn LedgerStore>,
        voting: Arc<dyn VotingStore>,
        runs: Arc<dyn ImportRunStore>,
        orchestrator: Arc<ImportOrchestrator>,
        scheduler: Arc<JobScheduler>,
    ) -> Self {
        Self {
            config,
            authenticator,
            audit,
            audit_store,
            ledger,
            voting,
            runs,
            orchestrator,
            scheduler,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    pub fn audit(&self) -> &AuditHandle {
        &self.audit
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }

    pub fn ledger(&self) -> &dyn LedgerStore {
        self.ledger.as_ref()
    }

    pub fn voting(&self) -> &dyn VotingStore {
        self.voting.as_ref()
    }

    pub fn runs(&self) -> &dyn ImportRunStore {
        self.runs.as_ref()
    }

    pub fn orchestrator(&self) -> &ImportOrchestrator {
        &self.orchestrator
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }
}
