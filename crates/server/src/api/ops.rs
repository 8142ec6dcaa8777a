//! Operator API handlers: scheduled jobs, import runs, translation targets
//! and manual ticket grants.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use novels_core::{
    import_run::{ImportRun, ImportRunCookie, ImportRunFilter},
    ledger::{reason, GrantOutcome, TicketRef, TicketTransaction},
    scheduler::{JobReport, JobStatus},
    voting::{TargetSummary, VoteTarget},
    AuditEvent, ImportRunStatus, Job, TargetStatus, TicketType, Wallet,
};

use super::error::{json_body, require_uuid, ApiError};
use super::middleware::AuthUser;
use crate::state::AppState;

/// Default limit for import run listings
const DEFAULT_RUN_LIMIT: i64 = 50;

/// Maximum allowed limit for import run listings
const MAX_RUN_LIMIT: i64 = 200;

/// Default limit for translation target listings
const DEFAULT_TARGET_LIMIT: i64 = 100;

/// Maximum allowed limit for translation target listings
const MAX_TARGET_LIMIT: i64 = 500;

/// Length of the short proposal ids operators may type.
const SHORT_ID_LEN: usize = 8;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for running a job
#[derive(Debug, Deserialize)]
pub struct RunJobParams {
    /// `1` or `true` lets winner jobs promote a candidate below the floor
    pub force: Option<String>,
}

/// Query parameters for listing import runs
#[derive(Debug, Deserialize)]
pub struct ListRunsParams {
    pub limit: Option<i64>,
    pub status: Option<String>,
}

/// Query parameters for listing translation targets
#[derive(Debug, Deserialize)]
pub struct ListTargetsParams {
    pub limit: Option<i64>,
}

/// Request body for starting an import
#[derive(Debug, Deserialize)]
pub struct RunImportBody {
    /// Full UUID or the first 8 characters of one
    pub proposal_id: String,
}

/// Request body for storing a run cookie
#[derive(Debug, Deserialize)]
pub struct UpdateCookieBody {
    pub cookie_header: String,
}

/// Request body for overriding a target status
#[derive(Debug, Deserialize)]
pub struct SetTargetStatusBody {
    pub status: String,
}

/// Request body for a manual grant
#[derive(Debug, Deserialize)]
pub struct GrantBody {
    pub user_id: String,
    pub ticket_type: String,
    pub amount: i64,
    /// Defaults to `admin_adjustment`
    pub reason: Option<String>,
    pub idempotency_key: Option<String>,
}

/// Simple message response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

/// Response for listing import runs
#[derive(Debug, Serialize)]
pub struct ListRunsResponse {
    pub runs: Vec<ImportRun>,
    pub limit: i64,
}

/// A run plus whether a task currently owns it
#[derive(Debug, Serialize)]
pub struct ImportRunResponse {
    #[serde(flatten)]
    pub run: ImportRun,
    pub active: bool,
}

/// Response for starting or retrying an import
#[derive(Debug, Serialize)]
pub struct RunStartedResponse {
    pub run_id: String,
    pub message: String,
}

/// Response for reading a run cookie
#[derive(Debug, Serialize)]
pub struct CookieResponse {
    pub cookie: Option<ImportRunCookie>,
}

/// Response for listing translation targets
#[derive(Debug, Serialize)]
pub struct ListTargetsResponse {
    pub entries: Vec<TargetSummary>,
}

/// Response for a manual grant
#[derive(Debug, Serialize)]
pub struct GrantResponse {
    /// False when the idempotency key was already used
    pub granted: bool,
    pub transaction: Option<TicketTransaction>,
    pub wallet: Wallet,
}

// ============================================================================
// Jobs
// ============================================================================

fn is_forced(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true")
    )
}

/// Run a scheduled job now
pub async fn run_job(
    State(state): State<Arc<AppState>>,
    Path(job): Path<String>,
    Query(params): Query<RunJobParams>,
    AuthUser(user): AuthUser,
) -> Result<Json<JobReport>, ApiError> {
    let job: Job = job.parse()?;
    let force = is_forced(params.force.as_deref());
    let report = state.scheduler().run_now_by(job, force, &user).await?;
    Ok(Json(report))
}

/// Last known status of a job
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job): Path<String>,
) -> Result<Json<JobStatus>, ApiError> {
    let job: Job = job.parse()?;
    Ok(Json(state.scheduler().status(job)?))
}

// ============================================================================
// Import runs
// ============================================================================

/// List import runs, newest first
pub async fn list_import_runs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListRunsParams>,
) -> Result<Json<ListRunsResponse>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_RUN_LIMIT)
        .clamp(1, MAX_RUN_LIMIT);

    let mut filter = ImportRunFilter::new().with_limit(limit);
    if let Some(status) = params.status.as_deref().filter(|s| !s.is_empty()) {
        let status: ImportRunStatus = status.parse().map_err(ApiError::bad_request)?;
        filter = filter.with_status(status);
    }

    let runs = state.runs().list(&filter)?;
    Ok(Json(ListRunsResponse { runs, limit }))
}

/// Get one import run
pub async fn get_import_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ImportRunResponse>, ApiError> {
    require_uuid("run", &id)?;
    let run = state
        .runs()
        .get(&id)?
        .ok_or_else(|| ApiError::not_found("run not found"))?;
    let active = state.orchestrator().is_active(&id);
    Ok(Json(ImportRunResponse { run, active }))
}

fn record_run_action(state: &AppState, run: Option<&ImportRun>, run_id: &str, to: &str, user: &str) {
    let from = run.map(|r| r.status.as_str()).unwrap_or("unknown");
    info!(run_id, from_status = from, to_status = to, requested_by = user, "Import run action");
    state.audit().try_emit(AuditEvent::ImportRunStatusChanged {
        run_id: run_id.to_string(),
        from_status: from.to_string(),
        to_status: to.to_string(),
        requested_by: user.to_string(),
    });
}

/// Ask a running import to stop at its next checkpoint
pub async fn cancel_import_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AuthUser(user): AuthUser,
) -> Result<Json<MessageResponse>, ApiError> {
    require_uuid("run", &id)?;
    let before = state.runs().get(&id)?;
    if !state.orchestrator().cancel_import(&id) {
        return Err(ApiError::not_found("run is not active"));
    }
    record_run_action(&state, before.as_ref(), &id, "cancel_requested", &user);
    Ok(MessageResponse::new("cancel requested"))
}

/// Ask a running import to pause at its next checkpoint
pub async fn pause_import_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AuthUser(user): AuthUser,
) -> Result<Json<MessageResponse>, ApiError> {
    require_uuid("run", &id)?;
    let before = state.runs().get(&id)?;
    if !state.orchestrator().pause_import(&id) {
        return Err(ApiError::not_found("run is not active"));
    }
    record_run_action(
        &state,
        before.as_ref(),
        &id,
        ImportRunStatus::PauseRequested.as_str(),
        &user,
    );
    Ok(MessageResponse::new("pause requested"))
}

/// Resume a paused import from its checkpoint
pub async fn resume_import_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AuthUser(user): AuthUser,
) -> Result<Json<MessageResponse>, ApiError> {
    require_uuid("run", &id)?;
    let before = state.runs().get(&id)?;
    state.orchestrator().resume_import_async(&id).await?;
    record_run_action(
        &state,
        before.as_ref(),
        &id,
        ImportRunStatus::Running.as_str(),
        &user,
    );
    Ok(MessageResponse::new("resume requested"))
}

/// Start a new run continuing a Cloudflare-blocked one with its stored cookie
pub async fn retry_import_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RunStartedResponse>, ApiError> {
    require_uuid("run", &id)?;
    let run_id = state.orchestrator().retry_import(&id).await?;
    Ok(Json(RunStartedResponse {
        run_id,
        message: "retry started".to_string(),
    }))
}

/// Read the cookie stored for a run
pub async fn get_run_cookie(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<CookieResponse>, ApiError> {
    require_uuid("run", &id)?;
    let cookie = state.runs().get_cookie(&id)?;
    Ok(Json(CookieResponse { cookie }))
}

/// Store the cookie a blocked run should send on retry
pub async fn put_run_cookie(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AuthUser(user): AuthUser,
    payload: Result<Json<UpdateCookieBody>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    require_uuid("run", &id)?;
    if state.runs().get(&id)?.is_none() {
        return Err(ApiError::not_found("run not found"));
    }

    let body = json_body(payload)?;
    let cookie_header = body.cookie_header.trim();
    if cookie_header.is_empty() {
        return Err(ApiError::bad_request("cookie_header is required"));
    }

    state.runs().upsert_cookie(&id, cookie_header)?;
    info!(run_id = %id, updated_by = %user, "Import run cookie stored");
    state.audit().try_emit(AuditEvent::ImportCookieUpdated {
        run_id: id,
        updated_by: user,
    });
    Ok(MessageResponse::new("cookies saved"))
}

/// Start importing a proposal now
pub async fn run_import(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RunImportBody>, JsonRejection>,
) -> Result<Json<RunStartedResponse>, ApiError> {
    let body = json_body(payload)?;
    let proposal_id = body.proposal_id.trim();
    if proposal_id.is_empty() {
        return Err(ApiError::bad_request("proposal_id is required"));
    }
    if proposal_id.len() != SHORT_ID_LEN {
        require_uuid("proposal", proposal_id)?;
    }

    let run_id = state.orchestrator().start_import_async(proposal_id).await?;
    info!(proposal_id, run_id = %run_id, "Import started by operator");
    Ok(Json(RunStartedResponse {
        run_id,
        message: "import started".to_string(),
    }))
}

// ============================================================================
// Translation targets
// ============================================================================

/// List translation targets, most recently updated first
pub async fn list_translation_targets(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListTargetsParams>,
) -> Result<Json<ListTargetsResponse>, ApiError> {
    let limit = params
        .limit
        .filter(|l| *l >= 1)
        .unwrap_or(DEFAULT_TARGET_LIMIT)
        .min(MAX_TARGET_LIMIT);
    let entries = state.voting().list_targets_for_ops(limit)?;
    Ok(Json(ListTargetsResponse { entries }))
}

/// Override a target's status, bypassing the normal lifecycle
pub async fn set_translation_target_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AuthUser(user): AuthUser,
    payload: Result<Json<SetTargetStatusBody>, JsonRejection>,
) -> Result<Json<VoteTarget>, ApiError> {
    require_uuid("target", &id)?;
    let body = json_body(payload)?;
    let status = body.status.trim();
    if status.is_empty() {
        return Err(ApiError::bad_request("status is required"));
    }
    let status: TargetStatus = status
        .parse()
        .map_err(|_| ApiError::bad_request("invalid status"))?;

    let before = state
        .voting()
        .get_target(&id)?
        .ok_or_else(|| ApiError::not_found("target not found"))?;
    let target = state.voting().set_target_status(&id, status, true)?;

    info!(
        target_id = %id,
        from_status = %before.status,
        to_status = %target.status,
        changed_by = %user,
        "Translation target status overridden"
    );
    state.audit().try_emit(AuditEvent::TargetStatusOverridden {
        target_id: id,
        from_status: before.status.to_string(),
        to_status: target.status.to_string(),
        changed_by: user,
    });
    Ok(Json(target))
}

// ============================================================================
// Wallet
// ============================================================================

/// Credit tickets to a user by hand
pub async fn grant_tickets(
    State(state): State<Arc<AppState>>,
    AuthUser(operator): AuthUser,
    payload: Result<Json<GrantBody>, JsonRejection>,
) -> Result<Json<GrantResponse>, ApiError> {
    let body = json_body(payload)?;
    let user_id = body.user_id.trim();
    if user_id.is_empty() {
        return Err(ApiError::bad_request("user_id is required"));
    }
    let ticket_type: TicketType = body.ticket_type.parse().map_err(ApiError::bad_request)?;
    let grant_reason = body
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(reason::ADMIN_ADJUSTMENT);

    let outcome = state.ledger().grant(
        user_id,
        ticket_type,
        body.amount,
        grant_reason,
        Some(TicketRef::new("admin_grant", operator.clone())),
        body.idempotency_key.as_deref(),
    )?;

    let transaction = match outcome {
        GrantOutcome::Granted(tx) => {
            info!(
                user_id,
                ticket_type = %ticket_type,
                amount = tx.delta,
                granted_by = %operator,
                "Tickets granted by operator"
            );
            state.audit().try_emit(AuditEvent::TicketsGranted {
                user_id: user_id.to_string(),
                ticket_type: ticket_type.to_string(),
                amount: tx.delta,
                reason: grant_reason.to_string(),
                granted_by: operator,
            });
            Some(tx)
        }
        GrantOutcome::AlreadyApplied => None,
    };

    let wallet = state.ledger().wallet(user_id)?;
    Ok(Json(GrantResponse {
        granted: transaction.is_some(),
        transaction,
        wallet,
    }))
}
