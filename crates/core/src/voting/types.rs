//! Vote target, proposal, and vote types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ledger::TicketType;

/// Lifecycle of a translation vote target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    /// Accepting translation tickets.
    Voting,
    /// Won while backed by a proposal; waiting for the novel to be imported.
    WaitingRelease,
    /// Won and the novel exists; translation work is underway.
    Translating,
    Completed,
    Cancelled,
}

impl TargetStatus {
    pub const ALL: [TargetStatus; 5] = [
        TargetStatus::Voting,
        TargetStatus::WaitingRelease,
        TargetStatus::Translating,
        TargetStatus::Completed,
        TargetStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Voting => "voting",
            TargetStatus::WaitingRelease => "waiting_release",
            TargetStatus::Translating => "translating",
            TargetStatus::Completed => "completed",
            TargetStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the normal lifecycle allows moving to `next`.
    ///
    /// Targets only move forward. The administrative override in
    /// [`VotingStore::set_target_status`](super::VotingStore::set_target_status)
    /// can bypass this.
    pub fn can_transition_to(&self, next: TargetStatus) -> bool {
        use TargetStatus::*;
        matches!(
            (self, next),
            (Voting, WaitingRelease)
                | (Voting, Translating)
                | (Voting, Cancelled)
                | (WaitingRelease, Translating)
                | (WaitingRelease, Cancelled)
                | (Translating, Completed)
                | (Translating, Cancelled)
        )
    }

    pub fn is_final(&self) -> bool {
        matches!(self, TargetStatus::Completed | TargetStatus::Cancelled)
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TargetStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("invalid target status: {}", s))
    }
}

/// What a vote target stands for: an existing novel or a not-yet-imported proposal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TargetRef {
    Novel(String),
    Proposal(String),
}

impl TargetRef {
    pub fn novel_id(&self) -> Option<&str> {
        match self {
            TargetRef::Novel(id) => Some(id),
            TargetRef::Proposal(_) => None,
        }
    }

    pub fn proposal_id(&self) -> Option<&str> {
        match self {
            TargetRef::Proposal(id) => Some(id),
            TargetRef::Novel(_) => None,
        }
    }
}

/// A candidate accumulating translation tickets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoteTarget {
    pub id: String,
    pub target: TargetRef,
    pub status: TargetStatus,
    /// Cached sum of all translation votes on this target.
    pub tickets_invested: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VoteTarget {
    /// Status a target moves to when it wins.
    pub fn winning_status(&self) -> TargetStatus {
        match self.target {
            TargetRef::Proposal(_) => TargetStatus::WaitingRelease,
            TargetRef::Novel(_) => TargetStatus::Translating,
        }
    }
}

/// How a translation vote names its target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TargetSelector {
    /// An existing target.
    Target(String),
    /// A novel; the target is created on first reference.
    Novel(String),
    /// A proposal; the target is created on first reference.
    Proposal(String),
}

/// Immutable translation vote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranslationVote {
    pub id: String,
    pub user_id: String,
    pub target_id: String,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a novel proposal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Draft,
    Moderation,
    Voting,
    /// Won the daily poll; an import is due.
    Accepted,
    Rejected,
    /// Imported as a novel.
    Published,
}

impl ProposalStatus {
    pub const ALL: [ProposalStatus; 6] = [
        ProposalStatus::Draft,
        ProposalStatus::Moderation,
        ProposalStatus::Voting,
        ProposalStatus::Accepted,
        ProposalStatus::Rejected,
        ProposalStatus::Published,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Draft => "draft",
            ProposalStatus::Moderation => "moderation",
            ProposalStatus::Voting => "voting",
            ProposalStatus::Accepted => "accepted",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Published => "published",
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProposalStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("invalid proposal status: {}", s))
    }
}

/// A user's request to import a novel from an external source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Proposal {
    pub id: String,
    /// Author of the proposal.
    pub user_id: String,
    pub title: String,
    /// Link to the novel on the external source.
    pub original_link: String,
    pub status: ProposalStatus,
    /// Sum of daily votes.
    pub vote_score: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub novel_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    /// First 8 characters of the id, accepted wherever a proposal id is.
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

/// Request to create a proposal.
#[derive(Debug, Clone)]
pub struct NewProposal {
    pub user_id: String,
    pub title: String,
    pub original_link: String,
    pub status: ProposalStatus,
}

/// Immutable daily-poll vote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposalVote {
    pub id: String,
    pub user_id: String,
    pub proposal_id: String,
    pub ticket_type: TicketType,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Result of a translation winner selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WinnerSelected {
    /// The winning target after its status change.
    pub target: VoteTarget,
    pub previous_status: TargetStatus,
    pub forced: bool,
}

/// Target row enriched with a display title, for leaderboards and ops screens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetSummary {
    pub target_id: String,
    pub status: TargetStatus,
    pub score: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub novel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<String>,
    pub title: String,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        use TargetStatus::*;
        assert!(Voting.can_transition_to(WaitingRelease));
        assert!(Voting.can_transition_to(Translating));
        assert!(Voting.can_transition_to(Cancelled));
        assert!(WaitingRelease.can_transition_to(Translating));
        assert!(Translating.can_transition_to(Completed));
    }

    #[test]
    fn test_no_way_back_to_voting() {
        for status in TargetStatus::ALL {
            assert!(!status.can_transition_to(TargetStatus::Voting));
        }
    }

    #[test]
    fn test_final_states_are_closed() {
        for next in TargetStatus::ALL {
            assert!(!TargetStatus::Completed.can_transition_to(next));
            assert!(!TargetStatus::Cancelled.can_transition_to(next));
        }
        assert!(!TargetStatus::Voting.can_transition_to(TargetStatus::Completed));
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(
            "waiting_release".parse::<TargetStatus>().unwrap(),
            TargetStatus::WaitingRelease
        );
        assert!("archived".parse::<TargetStatus>().is_err());
        assert_eq!(
            "published".parse::<ProposalStatus>().unwrap(),
            ProposalStatus::Published
        );
    }

    #[test]
    fn test_winning_status_depends_on_backing() {
        let now = Utc::now();
        let mut target = VoteTarget {
            id: "t".into(),
            target: TargetRef::Proposal("p".into()),
            status: TargetStatus::Voting,
            tickets_invested: 3,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(target.winning_status(), TargetStatus::WaitingRelease);

        target.target = TargetRef::Novel("n".into());
        assert_eq!(target.winning_status(), TargetStatus::Translating);
    }

    #[test]
    fn test_target_ref_serialization() {
        let json = serde_json::to_value(TargetRef::Novel("n-1".into())).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "novel", "id": "n-1"}));
    }
}
