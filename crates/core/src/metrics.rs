//! Prometheus metrics for core components.
//!
//! Registered into the server's registry through [`all_metrics`].

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Ledger
// =============================================================================

/// Tickets granted, by ticket type and reason code.
pub static LEDGER_GRANTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("novels_ledger_granted_tickets_total", "Tickets granted"),
        &["ticket_type", "reason"],
    )
    .unwrap()
});

/// Tickets spent, by ticket type.
pub static LEDGER_SPENT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("novels_ledger_spent_tickets_total", "Tickets spent"),
        &["ticket_type"],
    )
    .unwrap()
});

/// Spends rejected for insufficient balance.
pub static LEDGER_SPEND_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "novels_ledger_spend_rejected_total",
            "Spends rejected for insufficient balance",
        ),
        &["ticket_type"],
    )
    .unwrap()
});

// =============================================================================
// Voting
// =============================================================================

/// Votes cast, by kind ("proposal", "translation").
pub static VOTES_CAST_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("novels_votes_cast_total", "Votes cast"),
        &["kind"],
    )
    .unwrap()
});

/// Tickets committed through votes, by kind.
pub static VOTE_TICKETS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("novels_vote_tickets_total", "Tickets committed through votes"),
        &["kind"],
    )
    .unwrap()
});

/// Winners promoted, by kind.
pub static WINNERS_SELECTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("novels_winners_selected_total", "Voting winners promoted"),
        &["kind"],
    )
    .unwrap()
});

// =============================================================================
// Imports
// =============================================================================

/// Import tasks started, by origin ("start", "resume", "retry").
pub static IMPORT_RUNS_STARTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("novels_import_runs_started_total", "Import tasks started"),
        &["origin"],
    )
    .unwrap()
});

/// Import tasks that exited, by the status they left the run in.
pub static IMPORT_RUNS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("novels_import_runs_finished_total", "Import tasks exited"),
        &["status"],
    )
    .unwrap()
});

/// Import tasks currently registered.
pub static IMPORT_RUNS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("novels_import_runs_active", "Import tasks currently running").unwrap()
});

/// Source fetch latency, by operation ("index", "chapter") and result.
pub static FETCH_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "novels_fetch_duration_seconds",
            "Duration of requests to the content source",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["operation", "result"],
    )
    .unwrap()
});

/// Fetch attempts retried after a timeout.
pub static FETCH_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("novels_fetch_retries_total", "Fetches retried after a timeout").unwrap()
});

/// Runs failed by an anti-bot challenge.
pub static CLOUDFLARE_BLOCKS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "novels_cloudflare_blocks_total",
        "Import runs stopped by an anti-bot challenge",
    )
    .unwrap()
});

/// Chapters persisted.
pub static CHAPTERS_SAVED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("novels_chapters_saved_total", "Chapters persisted").unwrap()
});

// =============================================================================
// Scheduler
// =============================================================================

/// Job executions, by job and outcome.
pub static JOB_RUNS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("novels_job_runs_total", "Scheduled job executions"),
        &["job", "outcome"],
    )
    .unwrap()
});

/// Job duration in seconds.
pub static JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("novels_job_duration_seconds", "Duration of scheduled jobs")
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
        &["job"],
    )
    .unwrap()
});

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Ledger
        Box::new(LEDGER_GRANTED_TOTAL.clone()),
        Box::new(LEDGER_SPENT_TOTAL.clone()),
        Box::new(LEDGER_SPEND_REJECTED.clone()),
        // Voting
        Box::new(VOTES_CAST_TOTAL.clone()),
        Box::new(VOTE_TICKETS_TOTAL.clone()),
        Box::new(WINNERS_SELECTED_TOTAL.clone()),
        // Imports
        Box::new(IMPORT_RUNS_STARTED.clone()),
        Box::new(IMPORT_RUNS_FINISHED.clone()),
        Box::new(IMPORT_RUNS_ACTIVE.clone()),
        Box::new(FETCH_DURATION.clone()),
        Box::new(FETCH_RETRIES.clone()),
        Box::new(CLOUDFLARE_BLOCKS_TOTAL.clone()),
        Box::new(CHAPTERS_SAVED_TOTAL.clone()),
        // Scheduler
        Box::new(JOB_RUNS_TOTAL.clone()),
        Box::new(JOB_DURATION.clone()),
    ]
}
