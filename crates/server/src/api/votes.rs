//! Reader-facing voting endpoints.
//!
//! Casting a vote spends tickets from the caller's wallet, so both cast
//! handlers take the [`Voter`] extractor and reject anonymous callers.

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use novels_core::{
    voting::{Proposal, ProposalVote, TargetSelector, TargetSummary, TranslationVote},
    TicketType, Wallet,
};

use super::error::{json_body, ApiError};
use super::middleware::Voter;
use crate::state::AppState;

const DEFAULT_LEADERBOARD_LIMIT: i64 = 20;
const MAX_LEADERBOARD_LIMIT: i64 = 50;

/// Request body for a translation vote. Exactly one selector must be set.
#[derive(Debug, Deserialize)]
pub struct TranslationVoteBody {
    pub target_id: Option<String>,
    pub novel_id: Option<String>,
    pub proposal_id: Option<String>,
    pub amount: i64,
}

impl TranslationVoteBody {
    fn selector(&self) -> Result<TargetSelector, ApiError> {
        let present = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        match (
            present(&self.target_id),
            present(&self.novel_id),
            present(&self.proposal_id),
        ) {
            (Some(id), None, None) => Ok(TargetSelector::Target(id)),
            (None, Some(id), None) => Ok(TargetSelector::Novel(id)),
            (None, None, Some(id)) => Ok(TargetSelector::Proposal(id)),
            _ => Err(ApiError::bad_request(
                "exactly one of target_id, novel_id or proposal_id is required",
            )),
        }
    }
}

/// Request body for a daily-poll vote
#[derive(Debug, Deserialize)]
pub struct ProposalVoteBody {
    pub proposal_id: String,
    pub amount: i64,
    /// Defaults to `daily_vote`
    pub ticket_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardParams {
    pub limit: Option<i64>,
}

/// A recorded vote together with the wallet it was paid from
#[derive(Debug, Serialize)]
pub struct VoteResponse<V> {
    pub vote: V,
    pub wallet: Wallet,
}

#[derive(Debug, Serialize)]
pub struct TranslationLeaderboardResponse {
    pub entries: Vec<TargetSummary>,
}

#[derive(Debug, Serialize)]
pub struct ProposalLeaderboardResponse {
    pub entries: Vec<Proposal>,
}

fn leaderboard_limit(limit: Option<i64>) -> i64 {
    limit
        .filter(|l| *l >= 1)
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .min(MAX_LEADERBOARD_LIMIT)
}

/// Spend translation tickets on a target, novel or proposal.
pub async fn cast_translation_vote(
    State(state): State<Arc<AppState>>,
    Voter(user_id): Voter,
    payload: Result<Json<TranslationVoteBody>, JsonRejection>,
) -> Result<Json<VoteResponse<TranslationVote>>, ApiError> {
    let body = json_body(payload)?;
    let selector = body.selector()?;

    let vote = state
        .voting()
        .cast_translation_vote(&user_id, &selector, body.amount)?;
    info!(
        user_id = %user_id,
        target_id = %vote.target_id,
        amount = vote.amount,
        "Translation vote cast"
    );

    let wallet = state.ledger().wallet(&user_id)?;
    Ok(Json(VoteResponse { vote, wallet }))
}

/// Spend daily-poll tickets on a proposal.
pub async fn cast_proposal_vote(
    State(state): State<Arc<AppState>>,
    Voter(user_id): Voter,
    payload: Result<Json<ProposalVoteBody>, JsonRejection>,
) -> Result<Json<VoteResponse<ProposalVote>>, ApiError> {
    let body = json_body(payload)?;
    let proposal_id = body.proposal_id.trim();
    if proposal_id.is_empty() {
        return Err(ApiError::bad_request("proposal_id is required"));
    }
    let ticket_type = match body.ticket_type.as_deref().filter(|t| !t.is_empty()) {
        Some(t) => t.parse::<TicketType>().map_err(ApiError::bad_request)?,
        None => TicketType::DailyVote,
    };

    let vote = state
        .voting()
        .cast_proposal_vote(&user_id, proposal_id, ticket_type, body.amount)?;
    info!(
        user_id = %user_id,
        proposal_id = %vote.proposal_id,
        ticket_type = %ticket_type,
        amount = vote.amount,
        "Proposal vote cast"
    );

    let wallet = state.ledger().wallet(&user_id)?;
    Ok(Json(VoteResponse { vote, wallet }))
}

/// Targets still in `voting`, most tickets first.
pub async fn translation_leaderboard(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Json<TranslationLeaderboardResponse>, ApiError> {
    let entries = state
        .voting()
        .translation_leaderboard(leaderboard_limit(params.limit))?;
    Ok(Json(TranslationLeaderboardResponse { entries }))
}

/// Proposals in today's poll, highest score first.
pub async fn proposal_leaderboard(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LeaderboardParams>,
) -> Result<Json<ProposalLeaderboardResponse>, ApiError> {
    let entries = state
        .voting()
        .proposal_leaderboard(leaderboard_limit(params.limit))?;
    Ok(Json(ProposalLeaderboardResponse { entries }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(target: Option<&str>, novel: Option<&str>, proposal: Option<&str>) -> TranslationVoteBody {
        TranslationVoteBody {
            target_id: target.map(String::from),
            novel_id: novel.map(String::from),
            proposal_id: proposal.map(String::from),
            amount: 1,
        }
    }

    #[test]
    fn test_selector_requires_exactly_one() {
        assert!(matches!(
            body(Some("t"), None, None).selector(),
            Ok(TargetSelector::Target(id)) if id == "t"
        ));
        assert!(matches!(
            body(None, Some("n"), Some(" ")).selector(),
            Ok(TargetSelector::Novel(id)) if id == "n"
        ));
        assert!(body(None, None, None).selector().is_err());
        assert!(body(Some("t"), Some("n"), None).selector().is_err());
    }

    #[test]
    fn test_leaderboard_limit() {
        assert_eq!(leaderboard_limit(None), 20);
        assert_eq!(leaderboard_limit(Some(0)), 20);
        assert_eq!(leaderboard_limit(Some(5)), 5);
        assert_eq!(leaderboard_limit(Some(500)), 50);
    }
}
