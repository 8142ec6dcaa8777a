use axum::{
    http::{Request, Response},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Span;

use super::middleware::{auth_middleware, metrics_middleware};
use super::{audit, handlers, ops, votes, wallet};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Liveness stays reachable without credentials
    let public_routes = Router::new().route("/health", get(handlers::health));

    let protected_routes = Router::new()
        .route("/config", get(handlers::get_config))
        // Audit
        .route("/audit", get(audit::query_audit))
        // Jobs
        .route("/ops/jobs/{job}/run", post(ops::run_job))
        .route("/ops/jobs/{job}/status", get(ops::job_status))
        // Import runs
        .route("/ops/import-runs", get(ops::list_import_runs))
        .route("/ops/import-runs/{id}", get(ops::get_import_run))
        .route("/ops/import-runs/{id}/cancel", post(ops::cancel_import_run))
        .route("/ops/import-runs/{id}/pause", post(ops::pause_import_run))
        .route("/ops/import-runs/{id}/resume", post(ops::resume_import_run))
        .route("/ops/import-runs/{id}/retry", post(ops::retry_import_run))
        .route(
            "/ops/import-runs/{id}/cookies",
            get(ops::get_run_cookie).put(ops::put_run_cookie),
        )
        .route("/ops/imports/run", post(ops::run_import))
        // Translation targets
        .route("/ops/translation-targets", get(ops::list_translation_targets))
        .route(
            "/ops/translation-targets/{id}/status",
            post(ops::set_translation_target_status),
        )
        // Wallet
        .route("/ops/wallet/grant", post(ops::grant_tickets))
        .route("/wallet/{user_id}", get(wallet::get_wallet))
        .route("/wallet/{user_id}/transactions", get(wallet::list_transactions))
        // Voting
        .route("/votes/translation", post(votes::cast_translation_vote))
        .route("/votes/proposal", post(votes::cast_proposal_vote))
        .route("/translation/leaderboard", get(votes::translation_leaderboard))
        .route("/proposals/leaderboard", get(votes::proposal_leaderboard))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let api_routes = public_routes
        .merge(protected_routes)
        .route_layer(middleware::from_fn(metrics_middleware))
        .with_state(state.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
        .nest("/api/v1", api_routes)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                .on_request(())
                .on_response(|response: &Response<_>, latency: Duration, _span: &Span| {
                    let status = response.status();
                    if status.is_server_error() {
                        tracing::warn!(
                            status = %status,
                            latency_ms = latency.as_millis(),
                            "request failed"
                        );
                    } else {
                        tracing::debug!(
                            status = %status,
                            latency_ms = latency.as_millis(),
                            "request finished"
                        );
                    }
                }),
        )
}
