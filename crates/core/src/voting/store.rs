//! Voting storage trait and errors.

use thiserror::Error;

use super::types::{
    NewProposal, Proposal, ProposalStatus, ProposalVote, TargetRef, TargetSelector, TargetStatus,
    TargetSummary, TranslationVote, VoteTarget, WinnerSelected,
};
use crate::ledger::{LedgerError, TicketType};

/// Error type for voting operations.
#[derive(Debug, Error)]
pub enum VotingError {
    #[error("amount must be positive")]
    InvalidAmount(i64),

    #[error("invalid {field}: {value}")]
    InvalidId { field: &'static str, value: String },

    #[error("target not found: {0}")]
    TargetNotFound(String),

    #[error("proposal not found: {0}")]
    ProposalNotFound(String),

    #[error("cannot vote for own proposal")]
    CannotVoteOwnProposal,

    #[error("target is not in voting status (status: {status})")]
    TargetNotInVotingStatus { target_id: String, status: TargetStatus },

    #[error("proposal is not in voting status (status: {status})")]
    ProposalNotInVotingStatus {
        proposal_id: String,
        status: ProposalStatus,
    },

    #[error("cannot move target from {from} to {to}")]
    InvalidTransition { from: TargetStatus, to: TargetStatus },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for VotingError {
    fn from(e: rusqlite::Error) -> Self {
        VotingError::Database(e.to_string())
    }
}

impl VotingError {
    /// Whether the error is a business-rule conflict rather than a bad request or a fault.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            VotingError::CannotVoteOwnProposal
                | VotingError::TargetNotInVotingStatus { .. }
                | VotingError::ProposalNotInVotingStatus { .. }
                | VotingError::InvalidTransition { .. }
                | VotingError::Ledger(LedgerError::InsufficientBalance { .. })
        )
    }
}

/// Trait for proposal and vote target storage.
///
/// Every vote debits the ledger in the same database transaction that records it.
pub trait VotingStore: Send + Sync {
    // Proposals

    fn create_proposal(&self, request: NewProposal) -> Result<Proposal, VotingError>;

    fn get_proposal(&self, id: &str) -> Result<Option<Proposal>, VotingError>;

    /// Resolve a proposal by the first 8 characters of its id.
    fn find_proposal_by_short_id(&self, short_id: &str) -> Result<Option<Proposal>, VotingError>;

    fn set_proposal_status(&self, id: &str, status: ProposalStatus) -> Result<(), VotingError>;

    fn set_proposal_novel_id(&self, id: &str, novel_id: &str) -> Result<(), VotingError>;

    /// Proposals in `voting`, best first.
    fn proposal_leaderboard(&self, limit: i64) -> Result<Vec<Proposal>, VotingError>;

    /// Spend daily-poll tickets on a proposal.
    fn cast_proposal_vote(
        &self,
        user_id: &str,
        proposal_id: &str,
        ticket_type: TicketType,
        amount: i64,
    ) -> Result<ProposalVote, VotingError>;

    /// Promote the top proposal of the daily poll to `accepted`.
    fn select_proposal_winner(&self, force: bool) -> Result<Option<Proposal>, VotingError>;

    // Translation targets

    /// Get or create the target for a novel or proposal.
    fn ensure_target(&self, target: &TargetRef) -> Result<VoteTarget, VotingError>;

    fn get_target(&self, id: &str) -> Result<Option<VoteTarget>, VotingError>;

    /// Spend translation tickets on a target.
    fn cast_translation_vote(
        &self,
        user_id: &str,
        selector: &TargetSelector,
        amount: i64,
    ) -> Result<TranslationVote, VotingError>;

    /// The `voting` target with the most tickets, oldest first on ties.
    fn top_target(&self) -> Result<Option<VoteTarget>, VotingError>;

    /// Move the top target out of `voting`. `None` when nothing qualifies.
    fn select_translation_winner(&self, force: bool)
        -> Result<Option<WinnerSelected>, VotingError>;

    /// Change a target's status. `force_override` skips the transition check.
    fn set_target_status(
        &self,
        id: &str,
        status: TargetStatus,
        force_override: bool,
    ) -> Result<VoteTarget, VotingError>;

    /// Rebind a proposal-backed target to the novel imported for it.
    fn bind_proposal_to_novel(
        &self,
        proposal_id: &str,
        novel_id: &str,
    ) -> Result<Option<VoteTarget>, VotingError>;

    /// All targets, most recently updated first. `limit` is clamped to 1..=500.
    fn list_targets_for_ops(&self, limit: i64) -> Result<Vec<TargetSummary>, VotingError>;

    /// `voting` targets, best first. `limit` is clamped to 1..=50.
    fn translation_leaderboard(&self, limit: i64) -> Result<Vec<TargetSummary>, VotingError>;

    /// Sum of vote amounts on a target, computed from the vote rows.
    fn recompute_invested(&self, target_id: &str) -> Result<i64, VotingError>;
}
