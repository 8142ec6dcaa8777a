//! Daily and weekly ticket grants.
//!
//! Every credit carries an idempotency key derived from the job, the period
//! and the user, so re-running a job for the same period grants nothing new.

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::ledger::{
    reason, GrantRunOutcome, LedgerError, LedgerStore, TicketRef, TicketType,
};

use super::config::SchedulerConfig;
use super::recipients::{GrantRecipients, Recipient};
use super::types::SchedulerError;

/// Reference type attached to weekly grant transactions.
const WEEKLY_REF_TYPE: &str = "weekly_grant";

pub(crate) fn daily_vote_key(period: NaiveDate, user_id: &str) -> String {
    format!("daily_vote:{}:{}", period, user_id)
}

pub(crate) fn weekly_sub_key(period: NaiveDate, user_id: &str, ticket_type: TicketType) -> String {
    format!("weekly_sub:{}:{}:{}", period, user_id, ticket_type)
}

pub(crate) fn weekly_level_key(period: NaiveDate, user_id: &str) -> String {
    format!("weekly_level:{}:{}:{}", period, user_id, TicketType::NovelRequest)
}

/// Walks every recipient page and applies a per-user grant.
pub(crate) struct GrantPass<'a> {
    pub config: &'a SchedulerConfig,
    pub ledger: &'a dyn LedgerStore,
    pub recipients: &'a dyn GrantRecipients,
}

impl GrantPass<'_> {
    /// Reset daily votes to the user's allowance.
    pub async fn daily_votes(&self, period: NaiveDate) -> Result<GrantRunOutcome, SchedulerError> {
        self.for_each_recipient("daily_votes", |recipient| self.daily_vote(period, recipient))
            .await
    }

    /// Subscription plan and level rewards for the week starting at `period`.
    pub async fn weekly_tickets(
        &self,
        period: NaiveDate,
    ) -> Result<GrantRunOutcome, SchedulerError> {
        self.for_each_recipient("weekly_tickets", |recipient| {
            self.weekly_tickets_for(period, recipient)
        })
        .await
    }

    /// Returns the amount granted, `None` when the user was already processed.
    fn daily_vote(
        &self,
        period: NaiveDate,
        recipient: &Recipient,
    ) -> Result<Option<i64>, LedgerError> {
        let key = daily_vote_key(period, &recipient.user_id);
        if self.ledger.has_idempotency_key(&key)? {
            return Ok(None);
        }

        let multiplier = recipient
            .vote_multiplier
            .filter(|m| *m > 0)
            .unwrap_or(self.config.daily_vote_multiplier);
        let amount = self.config.daily_vote_amount * multiplier;

        let outcome = self.ledger.set_absolute(
            &recipient.user_id,
            TicketType::DailyVote,
            amount,
            reason::DAILY_GRANT,
            &key,
        )?;
        Ok(outcome.is_granted().then_some(amount))
    }

    fn weekly_tickets_for(
        &self,
        period: NaiveDate,
        recipient: &Recipient,
    ) -> Result<Option<i64>, LedgerError> {
        let mut granted = 0;
        let mut applied = false;
        let reference = || Some(TicketRef::kind(WEEKLY_REF_TYPE));

        if let Some(plan) = recipient
            .plan
            .as_deref()
            .and_then(|p| self.config.plan_grant(p))
        {
            for (ticket_type, amount) in [
                (TicketType::NovelRequest, plan.novel_request),
                (TicketType::TranslationTicket, plan.translation_ticket),
            ] {
                if amount <= 0 {
                    continue;
                }
                let outcome = self.ledger.grant(
                    &recipient.user_id,
                    ticket_type,
                    amount,
                    reason::SUBSCRIPTION_GRANT,
                    reference(),
                    Some(&weekly_sub_key(period, &recipient.user_id, ticket_type)),
                )?;
                applied |= outcome.is_granted();
                granted += outcome.delta();
            }
        }

        if recipient.level > self.config.level_bonus_threshold
            && self.config.level_bonus_novel_requests > 0
        {
            let outcome = self.ledger.grant(
                &recipient.user_id,
                TicketType::NovelRequest,
                self.config.level_bonus_novel_requests,
                reason::LEVEL_REWARD,
                reference(),
                Some(&weekly_level_key(period, &recipient.user_id)),
            )?;
            applied |= outcome.is_granted();
            granted += outcome.delta();
        }

        Ok(applied.then_some(granted))
    }

    async fn for_each_recipient<F>(
        &self,
        kind: &str,
        mut grant: F,
    ) -> Result<GrantRunOutcome, SchedulerError>
    where
        F: FnMut(&Recipient) -> Result<Option<i64>, LedgerError>,
    {
        let page_size = self.config.recipients_page_size.max(1);
        let mut outcome = GrantRunOutcome::default();
        let mut offset = 0;

        loop {
            let page = self.recipients.page(offset, page_size)?;
            if page.is_empty() {
                break;
            }

            for recipient in &page {
                match grant(recipient) {
                    Ok(Some(amount)) => {
                        outcome.users_processed += 1;
                        outcome.total_granted += amount;
                    }
                    Ok(None) => {
                        debug!(kind, user_id = %recipient.user_id, "Already granted for period");
                    }
                    Err(e) => {
                        warn!(kind, user_id = %recipient.user_id, error = %e, "Grant failed for user");
                    }
                }
            }

            if page.len() < page_size {
                break;
            }
            offset += page.len();
            tokio::task::yield_now().await;
        }

        info!(
            kind,
            users_processed = outcome.users_processed,
            total_granted = outcome.total_granted,
            "Grant pass finished"
        );
        Ok(outcome)
    }
}
