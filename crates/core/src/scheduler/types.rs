//! Scheduler jobs, reports and errors.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::{GrantRun, LedgerError};
use crate::voting::VotingError;

/// Error type for scheduled jobs.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Voting(#[from] VotingError),

    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for SchedulerError {
    fn from(e: rusqlite::Error) -> Self {
        SchedulerError::Database(e.to_string())
    }
}

/// A scheduled job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Job {
    /// Reset every user's daily votes (00:00 UTC).
    DailyVotes,
    /// Subscription and level grants (Wednesday 00:00 UTC).
    WeeklyTickets,
    /// Promote the daily poll's top proposal.
    VotingWinner,
    /// Promote the translation target with the most tickets.
    TranslationWinner,
}

impl Job {
    pub const ALL: [Job; 4] = [
        Job::DailyVotes,
        Job::WeeklyTickets,
        Job::VotingWinner,
        Job::TranslationWinner,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Job::DailyVotes => "daily_votes",
            Job::WeeklyTickets => "weekly_tickets",
            Job::VotingWinner => "voting_winner",
            Job::TranslationWinner => "translation_winner",
        }
    }

    /// Whether the job writes a grant-run log entry.
    pub fn is_grant(&self) -> bool {
        matches!(self, Job::DailyVotes | Job::WeeklyTickets)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Job {
    type Err = SchedulerError;

    /// Accepts both `daily_votes` and the URL form `daily-votes`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.replace('-', "_");
        Job::ALL
            .into_iter()
            .find(|job| job.as_str() == normalized)
            .ok_or_else(|| SchedulerError::UnknownJob(s.to_string()))
    }
}

/// How a job execution ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    /// Nothing to do, e.g. no candidate reached the winner floor.
    Skipped,
    Failed,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::Skipped => "skipped",
            JobOutcome::Failed => "failed",
        }
    }
}

/// Result of one job execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobReport {
    pub job: Job,
    pub forced: bool,
    pub outcome: JobOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Grant log entry written by grant jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant: Option<GrantRun>,
    /// Proposal or vote target promoted by winner jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<String>,
    /// Import started for the winner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Last known state of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatus {
    pub job: Job,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_outcome: Option<JobOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Executions since process start.
    pub runs: u64,
    /// Most recent grant-run log entry, including runs from earlier processes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_grant: Option<GrantRun>,
}

impl JobStatus {
    pub(crate) fn new(job: Job) -> Self {
        Self {
            job,
            last_started_at: None,
            last_finished_at: None,
            last_outcome: None,
            last_error: None,
            runs: 0,
            last_grant: None,
        }
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// The next 00:00 UTC strictly after `now`.
pub fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    midnight(now.date_naive() + Duration::days(1))
}

/// The next Wednesday 00:00 UTC strictly after `now`.
pub fn next_wednesday_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    let ahead = (7 + Weekday::Wed.num_days_from_monday() as i64
        - today.weekday().num_days_from_monday() as i64)
        % 7;
    let ahead = if ahead == 0 { 7 } else { ahead };
    midnight(today + Duration::days(ahead))
}

/// The Wednesday that opened the grant week containing `now`.
pub fn grant_week_start(now: DateTime<Utc>) -> NaiveDate {
    let today = now.date_naive();
    let behind = (7 + today.weekday().num_days_from_monday() as i64
        - Weekday::Wed.num_days_from_monday() as i64)
        % 7;
    today - Duration::days(behind)
}
