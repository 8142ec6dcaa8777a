//! Periodic jobs: daily and weekly ticket grants, and winner selection.

mod config;
mod grants;
mod recipients;
mod runner;
mod types;

pub use config::{PlanGrant, SchedulerConfig};
pub use recipients::{GrantRecipients, Recipient, SqliteRecipients};
pub use runner::JobScheduler;
pub use types::{
    grant_week_start, next_utc_midnight, next_wednesday_midnight, Job, JobOutcome, JobReport,
    JobStatus, SchedulerError,
};
