//! Import orchestrator implementation.
//!
//! Every import run is driven by its own task. The task fetches the chapter
//! index, then loops `fetch -> persist -> checkpoint -> observe signal` until
//! the novel is complete or an operator pauses or cancels it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::content::ContentStore;
use crate::fetcher::{ContentFetcher, FetchError};
use crate::import_run::{
    ImportRun, ImportRunError, ImportRunStatus, ImportRunStore, NewImportRun, RunResult,
};
use crate::metrics::{
    CLOUDFLARE_BLOCKS_TOTAL, FETCH_DURATION, FETCH_RETRIES, IMPORT_RUNS_ACTIVE,
    IMPORT_RUNS_FINISHED, IMPORT_RUNS_STARTED,
};
use crate::voting::{Proposal, ProposalStatus, VotingStore};

use super::config::ImporterConfig;
use super::registry::{Registration, RunRegistry};
use super::types::{
    ImportCheckpoint, OrchestratorError, PipelineError, RunExit, RunSignal,
};

/// Length of the short proposal ids operators may type instead of a UUID.
const SHORT_ID_LEN: usize = 8;

/// How often shutdown checks whether every task has stopped.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Everything a run task needs, cloned into each spawned task.
#[derive(Clone)]
struct ImportContext {
    config: ImporterConfig,
    runs: Arc<dyn ImportRunStore>,
    voting: Arc<dyn VotingStore>,
    content: Arc<dyn ContentStore>,
    registry: Arc<RunRegistry>,
    audit: Option<AuditHandle>,
}

/// One task's assignment.
struct RunJob {
    run_id: String,
    generation: u64,
    proposal: Proposal,
    fetcher: Arc<dyn ContentFetcher>,
    checkpoint: Option<ImportCheckpoint>,
}

/// Starts, pauses, resumes, cancels and retries import runs.
pub struct ImportOrchestrator {
    ctx: ImportContext,
    fetchers: Vec<Arc<dyn ContentFetcher>>,
    shutting_down: AtomicBool,
}

impl ImportOrchestrator {
    pub fn new(
        config: ImporterConfig,
        runs: Arc<dyn ImportRunStore>,
        voting: Arc<dyn VotingStore>,
        content: Arc<dyn ContentStore>,
        fetchers: Vec<Arc<dyn ContentFetcher>>,
        audit: Option<AuditHandle>,
    ) -> Self {
        Self {
            ctx: ImportContext {
                config,
                runs,
                voting,
                content,
                registry: Arc::new(RunRegistry::new()),
                audit,
            },
            fetchers,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Ids of runs that currently have a task.
    pub fn active_runs(&self) -> Vec<String> {
        self.ctx.registry.active()
    }

    pub fn is_active(&self, run_id: &str) -> bool {
        self.ctx.registry.is_registered(run_id)
    }

    /// Look a proposal up by full id or by its 8-character prefix.
    pub fn resolve_proposal(&self, reference: &str) -> Result<Proposal, OrchestratorError> {
        let reference = reference.trim();
        let found = if reference.len() == SHORT_ID_LEN {
            self.ctx.voting.find_proposal_by_short_id(reference)?
        } else {
            self.ctx.voting.get_proposal(reference)?
        };
        found.ok_or_else(|| OrchestratorError::ProposalNotFound(reference.to_string()))
    }

    fn fetcher_for(&self, link: &str) -> Result<Arc<dyn ContentFetcher>, OrchestratorError> {
        self.fetchers
            .iter()
            .find(|f| f.can_import(link))
            .cloned()
            .ok_or_else(|| OrchestratorError::NoImporter(link.to_string()))
    }

    fn ensure_accepting(&self) -> Result<(), OrchestratorError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(OrchestratorError::ShuttingDown);
        }
        Ok(())
    }

    fn ensure_no_open_run(&self, proposal_id: &str) -> Result<(), OrchestratorError> {
        match self.ctx.runs.find_open_for_proposal(proposal_id)? {
            Some(run) => Err(OrchestratorError::AlreadyRunning {
                proposal_id: proposal_id.to_string(),
                run_id: run.id,
            }),
            None => Ok(()),
        }
    }

    /// Insert a run row. Two starts racing for one proposal are settled by the
    /// store's one-open-run constraint.
    fn create_run(&self, request: NewImportRun) -> Result<ImportRun, OrchestratorError> {
        let proposal_id = request.proposal_id.clone();
        match self.ctx.runs.create(request) {
            Err(e @ ImportRunError::OpenRunExists(_)) => {
                self.ensure_no_open_run(&proposal_id)?;
                Err(e.into())
            }
            other => Ok(other?),
        }
    }

    /// Park runs that are marked `running` or `pause_requested` but have no
    /// task, as left behind by a previous process. They become `paused` and
    /// keep their checkpoint, so an operator can resume or cancel them.
    ///
    /// Call before the orchestrator takes requests.
    pub async fn recover_orphaned_runs(&self) -> Result<Vec<String>, OrchestratorError> {
        let mut recovered = Vec::new();
        for run in self.ctx.runs.list_unfinished()? {
            if self.ctx.registry.is_registered(&run.id) {
                continue;
            }
            if run.status == ImportRunStatus::Running {
                self.ctx
                    .runs
                    .set_status(&run.id, ImportRunStatus::PauseRequested)?;
            }
            self.ctx.runs.set_status(&run.id, ImportRunStatus::Paused)?;
            warn!(
                run_id = %run.id,
                proposal_id = %run.proposal_id,
                previous = %run.status,
                progress = run.progress_current,
                "Orphaned import run parked as paused"
            );

            if let Some(ref audit) = self.ctx.audit {
                audit
                    .emit(AuditEvent::ImportRunStatusChanged {
                        run_id: run.id.clone(),
                        from_status: run.status.to_string(),
                        to_status: ImportRunStatus::Paused.to_string(),
                        requested_by: "recovery".to_string(),
                    })
                    .await;
            }
            recovered.push(run.id);
        }
        if !recovered.is_empty() {
            info!(count = recovered.len(), "Recovered orphaned import runs");
        }
        Ok(recovered)
    }

    /// Start a new run in the background and return its id.
    pub async fn start_import_async(&self, proposal: &str) -> Result<String, OrchestratorError> {
        self.start(proposal, None, "start").await
    }

    /// Start a new run that sends `cookie` to the source.
    pub async fn start_import_async_with_cookies(
        &self,
        proposal: &str,
        cookie: &str,
    ) -> Result<String, OrchestratorError> {
        self.start(proposal, Some(cookie), "start").await
    }

    /// Start importing a voting winner unless it already has an open run.
    pub async fn start_import_for_winner(
        &self,
        proposal_id: &str,
    ) -> Result<Option<String>, OrchestratorError> {
        if let Some(run) = self.ctx.runs.find_open_for_proposal(proposal_id)? {
            info!(
                proposal_id,
                run_id = %run.id,
                status = %run.status,
                "Winner already has an open import run, skipping"
            );
            return Ok(None);
        }
        self.start(proposal_id, None, "winner").await.map(Some)
    }

    async fn start(
        &self,
        reference: &str,
        cookie: Option<&str>,
        origin: &'static str,
    ) -> Result<String, OrchestratorError> {
        self.ensure_accepting()?;
        let proposal = self.resolve_proposal(reference)?;
        let fetcher = self.fetcher_for(&proposal.original_link)?;
        self.ensure_no_open_run(&proposal.id)?;

        let run = self.create_run(NewImportRun {
            proposal_id: proposal.id.clone(),
            importer: fetcher.name().to_string(),
            ..Default::default()
        })?;

        if let Some(cookie) = cookie.map(str::trim).filter(|c| !c.is_empty()) {
            self.ctx.runs.upsert_cookie(&run.id, cookie)?;
        }

        info!(
            run_id = %run.id,
            proposal_id = %proposal.id,
            importer = fetcher.name(),
            "Import run created"
        );
        let registration = self.ctx.registry.register(&run.id);
        self.spawn_run(&run, registration, proposal, fetcher, origin, None)
            .await;
        Ok(run.id)
    }

    /// Stop a running import at its next checkpoint. False when no task owns the run.
    pub fn cancel_import(&self, run_id: &str) -> bool {
        let signalled = self.ctx.registry.request_cancel(run_id);
        if signalled {
            info!(run_id, "Cancel requested");
        }
        signalled
    }

    /// Pause a running import at its next checkpoint. False when no task owns the run.
    pub fn pause_import(&self, run_id: &str) -> bool {
        if !self.ctx.registry.is_registered(run_id) {
            return false;
        }
        // Persisted before signalling so the task never writes `paused` over `running`.
        if let Err(e) = self
            .ctx
            .runs
            .set_status(run_id, ImportRunStatus::PauseRequested)
        {
            warn!(run_id, error = %e, "Failed to persist pause request");
            return false;
        }
        let signalled = self.ctx.registry.request_pause(run_id);
        if signalled {
            info!(run_id, "Pause requested");
        }
        signalled
    }

    /// Continue a paused run from its checkpoint, or withdraw a pause the task
    /// has not reached yet.
    ///
    /// A new task is only spawned once the previous one has let go of the run
    /// and recorded it as `paused`.
    pub async fn resume_import_async(&self, run_id: &str) -> Result<(), OrchestratorError> {
        let run = self
            .ctx
            .runs
            .get(run_id)?
            .ok_or_else(|| OrchestratorError::RunNotFound(run_id.to_string()))?;

        if !run.status.is_resumable() {
            return Err(OrchestratorError::NotPaused {
                run_id: run.id,
                status: run.status,
            });
        }

        match self.ctx.registry.withdraw_pause(run_id) {
            Some(RunSignal::Pause) => {
                self.ctx.runs.set_status(run_id, ImportRunStatus::Running)?;
                info!(run_id, "Pause withdrawn before checkpoint");
                return Ok(());
            }
            Some(RunSignal::Cancel) => {
                return Err(OrchestratorError::CancelPending(run_id.to_string()));
            }
            Some(RunSignal::Continue) => {
                return Err(OrchestratorError::NotPaused {
                    run_id: run.id,
                    status: ImportRunStatus::Running,
                });
            }
            None => {}
        }

        // The task may have stopped between the first read and the registry check.
        let run = self
            .ctx
            .runs
            .get(run_id)?
            .ok_or_else(|| OrchestratorError::RunNotFound(run_id.to_string()))?;
        if run.status != ImportRunStatus::Paused {
            return Err(OrchestratorError::NotPaused {
                run_id: run.id,
                status: run.status,
            });
        }

        self.ensure_accepting()?;
        let proposal = self.resolve_proposal(&run.proposal_id)?;
        let fetcher = self.fetcher_for(&proposal.original_link)?;

        // Claim the run before touching its status so a concurrent resume backs off.
        let Some(registration) = self.ctx.registry.try_register(run_id) else {
            return Err(OrchestratorError::NotPaused {
                run_id: run.id,
                status: ImportRunStatus::Running,
            });
        };
        let run = match self.ctx.runs.set_status(run_id, ImportRunStatus::Running) {
            Ok(run) => run,
            Err(e) => {
                self.ctx.registry.deregister(run_id, registration.generation);
                return Err(e.into());
            }
        };

        info!(
            run_id,
            progress = run.progress_current,
            total = run.progress_total,
            "Resuming import run"
        );
        self.spawn_run(&run, registration, proposal, fetcher, "resume", None)
            .await;
        Ok(())
    }

    /// Start a new run continuing a run that a Cloudflare challenge stopped,
    /// using the cookie an operator stored on it.
    pub async fn retry_import(&self, run_id: &str) -> Result<String, OrchestratorError> {
        let failed = self
            .ctx
            .runs
            .get(run_id)?
            .ok_or_else(|| OrchestratorError::RunNotFound(run_id.to_string()))?;

        if failed.status != ImportRunStatus::Failed {
            return Err(OrchestratorError::NotRetryable(
                "run is not failed".to_string(),
            ));
        }
        if !failed.cloudflare_blocked {
            return Err(OrchestratorError::NotRetryable(
                "run was not blocked by cloudflare".to_string(),
            ));
        }
        let cookie = self
            .ctx
            .runs
            .get_cookie(run_id)?
            .filter(|c| !c.cookie_header.trim().is_empty())
            .ok_or_else(|| OrchestratorError::NotRetryable("run has no cookie".to_string()))?;

        self.ensure_accepting()?;
        let proposal = self.resolve_proposal(&failed.proposal_id)?;
        let fetcher = self.fetcher_for(&proposal.original_link)?;
        self.ensure_no_open_run(&proposal.id)?;

        let run = self.create_run(NewImportRun {
            proposal_id: proposal.id.clone(),
            importer: fetcher.name().to_string(),
            checkpoint: failed.checkpoint.clone(),
            progress_current: failed.progress_current,
            progress_total: failed.progress_total,
        })?;
        self.ctx.runs.upsert_cookie(&run.id, &cookie.cookie_header)?;

        info!(
            run_id = %run.id,
            retry_of = run_id,
            proposal_id = %proposal.id,
            "Retrying blocked import run with operator cookie"
        );
        let registration = self.ctx.registry.register(&run.id);
        self.spawn_run(&run, registration, proposal, fetcher, "retry", Some(run_id))
            .await;
        Ok(run.id)
    }

    async fn spawn_run(
        &self,
        run: &ImportRun,
        registration: Registration,
        proposal: Proposal,
        fetcher: Arc<dyn ContentFetcher>,
        origin: &'static str,
        retry_of: Option<&str>,
    ) {
        IMPORT_RUNS_ACTIVE.inc();
        IMPORT_RUNS_STARTED.with_label_values(&[origin]).inc();

        if let Some(ref audit) = self.ctx.audit {
            audit
                .emit(AuditEvent::ImportRunStarted {
                    run_id: run.id.clone(),
                    proposal_id: proposal.id.clone(),
                    importer: fetcher.name().to_string(),
                    origin: origin.to_string(),
                    retry_of: retry_of.map(String::from),
                })
                .await;
        }

        let job = RunJob {
            run_id: run.id.clone(),
            generation: registration.generation,
            proposal,
            fetcher,
            checkpoint: run.checkpoint.as_ref().and_then(ImportCheckpoint::from_value),
        };
        let ctx = self.ctx.clone();
        tokio::spawn(async move { ctx.run_task(job, registration.signal).await });
    }

    /// Pause every running import at its next checkpoint and wait for the
    /// tasks to stop, up to the configured grace period.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        for run_id in self.ctx.registry.active() {
            if let Err(e) = self
                .ctx
                .runs
                .set_status(&run_id, ImportRunStatus::PauseRequested)
            {
                warn!(run_id = %run_id, error = %e, "Failed to persist pause request at shutdown");
            }
        }
        let paused = self.ctx.registry.pause_all();
        if !paused.is_empty() {
            info!(count = paused.len(), "Pausing import runs for shutdown");
        }

        let deadline = Instant::now() + Duration::from_secs(self.ctx.config.shutdown_grace_secs);
        while !self.ctx.registry.is_empty() {
            if Instant::now() >= deadline {
                warn!(
                    remaining = ?self.ctx.registry.active(),
                    "Import runs still active after shutdown grace period"
                );
                break;
            }
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }
        info!("Import orchestrator stopped");
    }
}

impl ImportContext {
    async fn run_task(self, job: RunJob, signal: watch::Receiver<RunSignal>) {
        let run_timeout = Duration::from_secs(self.config.run_timeout_secs);

        let exit = match tokio::time::timeout(run_timeout, self.import(&job, &signal)).await {
            Ok(Ok(exit)) => exit,
            Ok(Err(e)) => RunExit::Failed {
                cloudflare_blocked: e.is_cloudflare_block(),
                error: e.to_string(),
            },
            Err(_) => RunExit::Failed {
                error: format!(
                    "import exceeded run timeout of {}s",
                    self.config.run_timeout_secs
                ),
                cloudflare_blocked: false,
            },
        };

        // A confirmed pause already removed the entry.
        if exit != RunExit::Paused {
            self.registry.deregister(&job.run_id, job.generation);
        }
        IMPORT_RUNS_ACTIVE.dec();

        self.record_exit(&job, exit).await;
    }

    /// Checks the control signal. Only called between chapters.
    fn observe(&self, job: &RunJob, signal: &watch::Receiver<RunSignal>) -> Option<RunExit> {
        let current = *signal.borrow();
        match current {
            RunSignal::Continue => None,
            RunSignal::Cancel => Some(RunExit::Cancelled),
            RunSignal::Pause => self
                .registry
                .confirm_pause(&job.run_id, job.generation)
                .then_some(RunExit::Paused),
        }
    }

    async fn import(
        &self,
        job: &RunJob,
        signal: &watch::Receiver<RunSignal>,
    ) -> Result<RunExit, PipelineError> {
        let link = job.proposal.original_link.as_str();
        let cookie = self.runs.get_cookie(&job.run_id)?.map(|c| c.cookie_header);
        let cookie = cookie.as_deref();

        if let Some(exit) = self.observe(job, signal) {
            return Ok(exit);
        }

        let index = self
            .fetch_with_retry("index", || job.fetcher.fetch_index(link, cookie))
            .await?;
        let novel = self.content.ensure_novel(&job.proposal.id, link, &index)?;
        self.runs.set_novel_id(&job.run_id, &novel.id)?;

        let total = index.chapters.len();
        let start = job
            .checkpoint
            .as_ref()
            .map(|c| c.next_index.min(total))
            .unwrap_or(0);
        let mut checkpoint = ImportCheckpoint {
            novel_id: novel.id.clone(),
            slug: novel.slug.clone(),
            next_index: start,
            total_chapters: total,
        };
        self.runs.update_progress(
            &job.run_id,
            start as i64,
            total as i64,
            &checkpoint.to_value(),
        )?;
        info!(
            run_id = %job.run_id,
            novel_id = %novel.id,
            start,
            total,
            "Importing chapters"
        );

        for chapter_ref in &index.chapters[start..] {
            if let Some(exit) = self.observe(job, signal) {
                return Ok(exit);
            }

            let chapter = self
                .fetch_with_retry("chapter", || job.fetcher.fetch_chapter(chapter_ref, cookie))
                .await?;
            self.content.save_chapter(&novel.id, &chapter)?;

            checkpoint.next_index += 1;
            self.runs.update_progress(
                &job.run_id,
                checkpoint.next_index as i64,
                total as i64,
                &checkpoint.to_value(),
            )?;
            debug!(
                run_id = %job.run_id,
                number = chapter.number,
                progress = checkpoint.next_index,
                total,
                "Chapter saved"
            );
        }

        self.publish(&job.proposal.id, &novel.id)?;
        Ok(RunExit::Succeeded { novel_id: novel.id })
    }

    /// Run one fetch under the per-request timeout, retrying timeouts.
    async fn fetch_with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        mut fetch: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let timeout = Duration::from_secs(self.config.fetch_timeout_secs);
        let mut attempt = 0;

        loop {
            let started = Instant::now();
            let result = match tokio::time::timeout(timeout, fetch()).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(format!(
                    "{} fetch exceeded {}s",
                    operation, self.config.fetch_timeout_secs
                ))),
            };
            let label = match &result {
                Ok(_) => "ok",
                Err(e) if e.is_timeout() => "timeout",
                Err(e) if e.is_cloudflare_block() => "blocked",
                Err(_) => "error",
            };
            FETCH_DURATION
                .with_label_values(&[operation, label])
                .observe(started.elapsed().as_secs_f64());

            match result {
                Err(e) if e.is_timeout() && attempt < self.config.fetch_retries => {
                    attempt += 1;
                    FETCH_RETRIES.inc();
                    warn!(
                        operation,
                        attempt,
                        max = self.config.fetch_retries,
                        error = %e,
                        "Fetch timed out, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
                }
                other => return other,
            }
        }
    }

    /// Attach the imported novel to its proposal and vote target.
    fn publish(&self, proposal_id: &str, novel_id: &str) -> Result<(), PipelineError> {
        self.voting.set_proposal_novel_id(proposal_id, novel_id)?;
        self.voting
            .set_proposal_status(proposal_id, ProposalStatus::Published)?;
        self.voting.bind_proposal_to_novel(proposal_id, novel_id)?;
        Ok(())
    }

    async fn record_exit(&self, job: &RunJob, exit: RunExit) {
        let run_id = job.run_id.as_str();
        let result = match &exit {
            RunExit::Paused => {
                info!(run_id, "Import run paused at checkpoint");
                self.runs.set_status(run_id, ImportRunStatus::Paused)
            }
            RunExit::Cancelled => {
                info!(run_id, "Import run cancelled");
                self.runs.set_result(run_id, &RunResult::cancelled())
            }
            RunExit::Succeeded { novel_id } => {
                info!(run_id, novel_id = %novel_id, "Import run succeeded");
                self.runs.set_result(run_id, &RunResult::succeeded(novel_id))
            }
            RunExit::Failed {
                error,
                cloudflare_blocked,
            } => {
                if *cloudflare_blocked {
                    CLOUDFLARE_BLOCKS_TOTAL.inc();
                    warn!(run_id, error = %error, "Import run blocked by Cloudflare, waiting for cookie");
                } else {
                    error!(run_id, error = %error, "Import run failed");
                }
                self.runs
                    .set_result(run_id, &RunResult::failed(error, *cloudflare_blocked))
            }
        };

        let run = match result {
            Ok(run) => run,
            Err(e) => {
                // A resume can move a pause_requested run back to running
                // while this task is stopping; the new task owns it now.
                warn!(run_id, error = %e, "Failed to record import run exit");
                return;
            }
        };
        IMPORT_RUNS_FINISHED
            .with_label_values(&[run.status.as_str()])
            .inc();

        let Some(ref audit) = self.audit else {
            return;
        };
        let event = if run.status == ImportRunStatus::Paused {
            AuditEvent::ImportRunStatusChanged {
                run_id: run.id.clone(),
                from_status: ImportRunStatus::PauseRequested.to_string(),
                to_status: run.status.to_string(),
                requested_by: "importer".to_string(),
            }
        } else {
            AuditEvent::ImportRunFinished {
                run_id: run.id.clone(),
                proposal_id: run.proposal_id.clone(),
                status: run.status.to_string(),
                novel_id: run.novel_id.clone(),
                error: run.error.clone(),
                cloudflare_blocked: run.cloudflare_blocked,
                chapters_saved: run.progress_current,
            }
        };
        audit.emit(event).await;
    }
}
