//! Proposals, translation vote targets, and winner selection.

mod sqlite;
mod store;
mod types;

pub use sqlite::SqliteVotingStore;
pub use store::{VotingError, VotingStore};
pub use types::{
    NewProposal, Proposal, ProposalStatus, ProposalVote, TargetRef, TargetSelector, TargetStatus,
    TargetSummary, TranslationVote, VoteTarget, WinnerSelected,
};
