use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use novels_core::{
    ledger::{TicketTransaction, TransactionFilter},
    TicketType, Wallet,
};

use super::error::ApiError;
use crate::state::AppState;

const DEFAULT_TRANSACTION_LIMIT: i64 = 50;
const MAX_TRANSACTION_LIMIT: i64 = 500;

/// Query parameters for a user's transaction history
#[derive(Debug, Deserialize)]
pub struct TransactionParams {
    pub ticket_type: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Response for a user's transaction history
#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    pub transactions: Vec<TicketTransaction>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Balances of every ticket type.
pub async fn get_wallet(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Wallet>, ApiError> {
    Ok(Json(state.ledger().wallet(&user_id)?))
}

/// Ledger entries for one user, newest first.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(params): Query<TransactionParams>,
) -> Result<Json<TransactionsResponse>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_TRANSACTION_LIMIT)
        .clamp(1, MAX_TRANSACTION_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = TransactionFilter::new()
        .with_user(user_id)
        .with_limit(limit)
        .with_offset(offset);
    if let Some(ticket_type) = params.ticket_type.as_deref().filter(|t| !t.is_empty()) {
        let ticket_type: TicketType = ticket_type.parse().map_err(ApiError::bad_request)?;
        filter = filter.with_ticket_type(ticket_type);
    }

    let transactions = state.ledger().transactions(&filter)?;
    let total = state.ledger().count_transactions(&filter)?;

    Ok(Json(TransactionsResponse {
        transactions,
        total,
        limit,
        offset,
    }))
}
