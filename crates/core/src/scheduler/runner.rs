//! Job scheduler implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::audit::{AuditEvent, AuditHandle};
use crate::ledger::{GrantRun, GrantRunOutcome, LedgerStore};
use crate::metrics::{JOB_DURATION, JOB_RUNS_TOTAL};
use crate::orchestrator::ImportOrchestrator;
use crate::voting::{ProposalStatus, TargetRef, VotingStore};

use super::config::SchedulerConfig;
use super::grants::GrantPass;
use super::recipients::GrantRecipients;
use super::types::{
    grant_week_start, next_utc_midnight, next_wednesday_midnight, Job, JobOutcome, JobReport,
    JobStatus, SchedulerError,
};

/// What a job produced before it is stamped into a report.
#[derive(Default)]
struct JobResult {
    skipped: bool,
    grant: Option<GrantRun>,
    winner_id: Option<String>,
    import_run_id: Option<String>,
    error: Option<String>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    ledger: Arc<dyn LedgerStore>,
    voting: Arc<dyn VotingStore>,
    recipients: Arc<dyn GrantRecipients>,
    orchestrator: Arc<ImportOrchestrator>,
    audit: Option<AuditHandle>,
    statuses: Mutex<HashMap<Job, JobStatus>>,
    /// One execution per job at a time.
    guards: HashMap<Job, tokio::sync::Mutex<()>>,
}

/// Runs the periodic grant and winner jobs.
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl JobScheduler {
    pub fn new(
        config: SchedulerConfig,
        ledger: Arc<dyn LedgerStore>,
        voting: Arc<dyn VotingStore>,
        recipients: Arc<dyn GrantRecipients>,
        orchestrator: Arc<ImportOrchestrator>,
        audit: Option<AuditHandle>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let statuses = Job::ALL.into_iter().map(|j| (j, JobStatus::new(j))).collect();
        let guards = Job::ALL
            .into_iter()
            .map(|j| (j, tokio::sync::Mutex::new(())))
            .collect();

        Self {
            inner: Arc::new(SchedulerInner {
                config,
                ledger,
                voting,
                recipients,
                orchestrator,
                audit,
                statuses: Mutex::new(statuses),
                guards,
            }),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Spawn the periodic loops.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler already running");
            return;
        }

        info!("Starting job scheduler");
        let interval = Duration::from_secs(self.inner.config.voting_winner_interval_secs);

        self.spawn_loop(Job::DailyVotes, |now| until(next_utc_midnight(now), now));
        self.spawn_loop(Job::WeeklyTickets, |now| until(next_wednesday_midnight(now), now));
        self.spawn_loop(Job::VotingWinner, move |_| interval);
        self.spawn_loop(Job::TranslationWinner, move |_| interval);
    }

    /// Signal every loop to exit. A job already executing finishes first.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping job scheduler");
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Run a job immediately on behalf of an operator.
    ///
    /// `force` lets winner jobs promote a candidate below the score floor. Grant
    /// jobs ignore it: their idempotency keys still apply.
    pub async fn run_now(&self, job: Job, force: bool) -> Result<JobReport, SchedulerError> {
        self.run_now_by(job, force, "manual").await
    }

    pub async fn run_now_by(
        &self,
        job: Job,
        force: bool,
        triggered_by: &str,
    ) -> Result<JobReport, SchedulerError> {
        info!(job = %job, force, triggered_by, "Job triggered");
        if let Some(ref audit) = self.inner.audit {
            audit
                .emit(AuditEvent::JobTriggered {
                    job: job.to_string(),
                    forced: force,
                    triggered_by: triggered_by.to_string(),
                })
                .await;
        }
        self.inner.execute(job, force).await
    }

    /// Last known status of a job.
    pub fn status(&self, job: Job) -> Result<JobStatus, SchedulerError> {
        let mut status = self
            .inner
            .statuses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&job)
            .cloned()
            .unwrap_or_else(|| JobStatus::new(job));

        if job.is_grant() {
            status.last_grant = self.inner.ledger.last_grant_run(job.as_str())?;
        }
        Ok(status)
    }

    fn spawn_loop<F>(&self, job: Job, next_delay: F)
    where
        F: Fn(DateTime<Utc>) -> Duration + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let running = Arc::clone(&self.running);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                let delay = next_delay(Utc::now());
                info!(job = %job, next_run_in_secs = delay.as_secs(), "Job scheduled");

                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(job = %job, "Job loop received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(delay) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Err(e) = inner.execute(job, false).await {
                            error!(job = %job, error = %e, "Scheduled job failed");
                        }
                    }
                }
            }
            info!(job = %job, "Job loop stopped");
        });
    }
}

fn until(next: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

impl SchedulerInner {
    async fn execute(&self, job: Job, force: bool) -> Result<JobReport, SchedulerError> {
        let _guard = match self.guards.get(&job) {
            Some(guard) => Some(guard.lock().await),
            None => None,
        };

        let started_at = Utc::now();
        let timer = Instant::now();
        self.update_status(job, |s| {
            s.last_started_at = Some(started_at);
            s.runs += 1;
        });

        let result = match job {
            Job::DailyVotes => self.daily_votes(started_at).await,
            Job::WeeklyTickets => self.weekly_tickets(started_at).await,
            Job::VotingWinner => self.voting_winner(force).await,
            Job::TranslationWinner => self.translation_winner(force).await,
        };

        let finished_at = Utc::now();
        let outcome = match &result {
            Ok(r) if r.skipped => JobOutcome::Skipped,
            Ok(r) if r.grant.as_ref().is_some_and(|g| g.error.is_some()) => JobOutcome::Failed,
            Ok(_) => JobOutcome::Completed,
            Err(_) => JobOutcome::Failed,
        };
        let last_error = match &result {
            Ok(r) => r
                .grant
                .as_ref()
                .and_then(|g| g.error.clone())
                .or_else(|| r.error.clone()),
            Err(e) => Some(e.to_string()),
        };

        JOB_DURATION
            .with_label_values(&[job.as_str()])
            .observe(timer.elapsed().as_secs_f64());
        JOB_RUNS_TOTAL
            .with_label_values(&[job.as_str(), outcome.as_str()])
            .inc();
        self.update_status(job, |s| {
            s.last_finished_at = Some(finished_at);
            s.last_outcome = Some(outcome);
            s.last_error = last_error;
        });
        info!(job = %job, outcome = outcome.as_str(), "Job finished");

        let result = result?;
        Ok(JobReport {
            job,
            forced: force,
            outcome,
            started_at,
            finished_at,
            grant: result.grant,
            winner_id: result.winner_id,
            import_run_id: result.import_run_id,
            error: result.error,
        })
    }

    fn update_status(&self, job: Job, f: impl FnOnce(&mut JobStatus)) {
        let mut statuses = self.statuses.lock().unwrap_or_else(|p| p.into_inner());
        f(statuses.entry(job).or_insert_with(|| JobStatus::new(job)));
    }

    fn grant_pass(&self) -> GrantPass<'_> {
        GrantPass {
            config: &self.config,
            ledger: self.ledger.as_ref(),
            recipients: self.recipients.as_ref(),
        }
    }

    async fn daily_votes(&self, now: DateTime<Utc>) -> Result<JobResult, SchedulerError> {
        let period = now.date_naive();
        let run = self
            .ledger
            .begin_grant_run(Job::DailyVotes.as_str(), &period.to_string())?;
        let outcome = self.grant_pass().daily_votes(period).await;
        self.finish_grant(Job::DailyVotes, run, outcome).await
    }

    async fn weekly_tickets(&self, now: DateTime<Utc>) -> Result<JobResult, SchedulerError> {
        let period = grant_week_start(now);
        let run = self
            .ledger
            .begin_grant_run(Job::WeeklyTickets.as_str(), &period.to_string())?;
        let outcome = self.grant_pass().weekly_tickets(period).await;
        self.finish_grant(Job::WeeklyTickets, run, outcome).await
    }

    /// Close the grant-run log entry, recording a failed pass instead of propagating it.
    async fn finish_grant(
        &self,
        job: Job,
        run: GrantRun,
        outcome: Result<GrantRunOutcome, SchedulerError>,
    ) -> Result<JobResult, SchedulerError> {
        let outcome = outcome.unwrap_or_else(|e| {
            error!(job = %job, error = %e, "Grant pass failed");
            GrantRunOutcome {
                error: Some(e.to_string()),
                ..Default::default()
            }
        });
        let run = self.ledger.finish_grant_run(run.id, &outcome)?;

        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::GrantRunFinished {
                    kind: run.kind.clone(),
                    period: run.period.clone(),
                    status: run.status.as_str().to_string(),
                    users_processed: run.users_processed,
                    total_granted: run.total_granted,
                    error: run.error.clone(),
                })
                .await;
        }

        Ok(JobResult {
            grant: Some(run),
            ..Default::default()
        })
    }

    async fn voting_winner(&self, force: bool) -> Result<JobResult, SchedulerError> {
        let Some(proposal) = self.voting.select_proposal_winner(force)? else {
            info!(force, "No proposal qualified as voting winner");
            return Ok(JobResult {
                skipped: true,
                ..Default::default()
            });
        };

        info!(
            proposal_id = %proposal.id,
            vote_score = proposal.vote_score,
            "Proposal selected as voting winner"
        );
        self.emit_winner(
            "proposal",
            &proposal.id,
            ProposalStatus::Voting.as_str(),
            proposal.status.as_str(),
            force,
        )
        .await;

        let mut result = self.import_winner(&proposal.id).await;
        result.winner_id = Some(proposal.id);
        Ok(result)
    }

    async fn translation_winner(&self, force: bool) -> Result<JobResult, SchedulerError> {
        let Some(winner) = self.voting.select_translation_winner(force)? else {
            info!(force, "No target qualified as translation winner");
            return Ok(JobResult {
                skipped: true,
                ..Default::default()
            });
        };

        let target = winner.target;
        info!(
            target_id = %target.id,
            tickets_invested = target.tickets_invested,
            status = %target.status,
            "Translation target selected as winner"
        );
        self.emit_winner(
            "translation",
            &target.id,
            winner.previous_status.as_str(),
            target.status.as_str(),
            winner.forced,
        )
        .await;

        let mut result = match target.target {
            TargetRef::Proposal(ref proposal_id) => self.import_winner(proposal_id).await,
            TargetRef::Novel(_) => JobResult::default(),
        };
        result.winner_id = Some(target.id);
        Ok(result)
    }

    /// Kick off the import for a winning proposal. A failure to start is reported,
    /// not raised: the winner stays selected either way.
    async fn import_winner(&self, proposal_id: &str) -> JobResult {
        match self.orchestrator.start_import_for_winner(proposal_id).await {
            Ok(run_id) => JobResult {
                import_run_id: run_id,
                ..Default::default()
            },
            Err(e) => {
                warn!(proposal_id, error = %e, "Failed to start import for winner");
                JobResult {
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        }
    }

    async fn emit_winner(
        &self,
        kind: &str,
        subject_id: &str,
        previous_status: &str,
        next_status: &str,
        forced: bool,
    ) {
        if let Some(ref audit) = self.audit {
            audit
                .emit(AuditEvent::WinnerSelected {
                    kind: kind.to_string(),
                    subject_id: subject_id.to_string(),
                    previous_status: previous_status.to_string(),
                    next_status: next_status.to_string(),
                    forced,
                })
                .await;
        }
    }
}
