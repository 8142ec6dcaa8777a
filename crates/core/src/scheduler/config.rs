//! Scheduler configuration.

use serde::{Deserialize, Serialize};

/// Ticket amounts granted weekly to one subscription plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanGrant {
    pub novel_request: i64,
    pub translation_ticket: i64,
}

/// Configuration for the background job scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Run the periodic loops. Jobs can still be triggered manually when disabled.
    #[serde(default)]
    pub enabled: bool,

    /// Base daily vote allowance before the per-user multiplier.
    #[serde(default = "default_daily_vote_amount")]
    pub daily_vote_amount: i64,

    /// Multiplier for users whose plan does not set one.
    #[serde(default = "default_daily_vote_multiplier")]
    pub daily_vote_multiplier: i64,

    /// Interval between winner selections (seconds).
    #[serde(default = "default_winner_interval")]
    pub voting_winner_interval_secs: u64,

    /// Users fetched per page while granting.
    #[serde(default = "default_page_size")]
    pub recipients_page_size: usize,

    #[serde(default = "default_premium")]
    pub premium: PlanGrant,

    #[serde(default = "default_vip")]
    pub vip: PlanGrant,

    /// Users above this level get the level bonus.
    #[serde(default = "default_level_threshold")]
    pub level_bonus_threshold: i64,

    /// Extra novel requests per week for users above the level threshold.
    #[serde(default = "default_level_bonus")]
    pub level_bonus_novel_requests: i64,
}

fn default_daily_vote_amount() -> i64 {
    1
}

fn default_daily_vote_multiplier() -> i64 {
    1
}

fn default_winner_interval() -> u64 {
    6 * 60 * 60
}

fn default_page_size() -> usize {
    1000
}

fn default_premium() -> PlanGrant {
    PlanGrant {
        novel_request: 2,
        translation_ticket: 5,
    }
}

fn default_vip() -> PlanGrant {
    PlanGrant {
        novel_request: 5,
        translation_ticket: 15,
    }
}

fn default_level_threshold() -> i64 {
    10
}

fn default_level_bonus() -> i64 {
    1
}

impl SchedulerConfig {
    /// Weekly grant for a plan name, if the plan earns one.
    pub fn plan_grant(&self, plan: &str) -> Option<PlanGrant> {
        match plan {
            "premium" => Some(self.premium),
            "vip" => Some(self.vip),
            _ => None,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            daily_vote_amount: default_daily_vote_amount(),
            daily_vote_multiplier: default_daily_vote_multiplier(),
            voting_winner_interval_secs: default_winner_interval(),
            recipients_page_size: default_page_size(),
            premium: default_premium(),
            vip: default_vip(),
            level_bonus_threshold: default_level_threshold(),
            level_bonus_novel_requests: default_level_bonus(),
        }
    }
}
