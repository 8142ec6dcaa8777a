//! Authentication and metrics middleware for API routes.

use axum::{
    body::Body,
    extract::{FromRequestParts, MatchedPath, State},
    http::{request::Parts, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use novels_core::{AuthError, AuthRequest, Identity};

use super::error::ApiError;
use crate::metrics::{
    normalize_path, AUTH_FAILURES_TOTAL, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL,
    HTTP_REQUEST_DURATION,
};
use crate::state::AppState;

/// Metrics middleware that tracks HTTP request duration and counts.
///
/// This middleware records:
/// - Request duration (histogram)
/// - Request count (counter)
/// - Requests in flight (gauge)
///
/// The path label is the matched route template when there is one.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| normalize_path(request.uri().path()));

    HTTP_REQUESTS_IN_FLIGHT.inc();

    let response = next.run(request).await;

    HTTP_REQUESTS_IN_FLIGHT.dec();

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path, &status])
        .observe(duration);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    response
}

/// Authentication middleware that validates requests using the configured authenticator.
///
/// The resolved [`Identity`] is stored in the request extensions. With the
/// `none` method every request passes, identified by `x-user-id` when present.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    // Header names are lowercase for AuthRequest
    let headers: HashMap<String, String> = request
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect();

    // Get source IP (default to localhost if not available)
    let source_ip = request
        .extensions()
        .get::<std::net::SocketAddr>()
        .map(|addr| addr.ip())
        .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));

    let auth_request = AuthRequest { headers, source_ip };

    match state.authenticator().authenticate(&auth_request).await {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            Ok(next.run(request).await)
        }
        Err(AuthError::NotAuthenticated) => {
            AUTH_FAILURES_TOTAL
                .with_label_values(&["not_authenticated"])
                .inc();
            Err(StatusCode::UNAUTHORIZED)
        }
        Err(AuthError::InvalidCredentials(_)) => {
            AUTH_FAILURES_TOTAL
                .with_label_values(&["invalid_credentials"])
                .inc();
            Err(StatusCode::UNAUTHORIZED)
        }
        Err(AuthError::ConfigurationError(_)) => {
            AUTH_FAILURES_TOTAL
                .with_label_values(&["internal_error"])
                .inc();
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn identity_of(parts: &Parts) -> Identity {
    parts
        .extensions
        .get::<Identity>()
        .cloned()
        .unwrap_or_else(Identity::anonymous)
}

/// Extractor for the caller's user id, `anonymous` when unidentified.
///
/// Used to attribute operator actions in the audit log.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        std::future::ready(Ok(AuthUser(identity_of(parts).user_id)))
    }
}

/// Extractor for endpoints that spend tickets: anonymous callers get 401.
#[derive(Debug, Clone)]
pub struct Voter(pub String);

impl<S> FromRequestParts<S> for Voter
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let identity = identity_of(parts);
        let result = if identity.is_anonymous() {
            AUTH_FAILURES_TOTAL.with_label_values(&["anonymous_voter"]).inc();
            Err(ApiError::unauthorized("Authentication required"))
        } else {
            Ok(Voter(identity.user_id))
        };
        std::future::ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request},
        middleware,
        routing::get,
        Router,
    };
    use http_body_util::BodyExt;
    use novels_core::{
        create_audit_system, ApiKeyAuthenticator, AuditStore, AuthConfig, AuthMethod, Authenticator,
        Config, ContentFetcher, ContentStore, Database, ImportOrchestrator, ImportRunStore,
        JobScheduler, LedgerStore, NoneAuthenticator, SqliteAuditStore, SqliteContentStore,
        SqliteImportRunStore, SqliteLedger, SqliteRecipients, SqliteVotingStore, VotingStore,
    };
    use tower::ServiceExt;

    fn create_test_config(auth: AuthConfig) -> Config {
        Config {
            auth,
            server: Default::default(),
            database: Default::default(),
            importer: Default::default(),
            scheduler: Default::default(),
            fetcher: Default::default(),
        }
    }

    fn create_test_state(auth: AuthConfig) -> Arc<AppState> {
        let authenticator: Arc<dyn Authenticator> = match auth.method {
            AuthMethod::None => Arc::new(NoneAuthenticator::new()),
            AuthMethod::ApiKey => Arc::new(ApiKeyAuthenticator::new(auth.api_key.clone().unwrap())),
        };

        let db = Database::in_memory().unwrap();
        let audit_store =
            Arc::new(SqliteAuditStore::new(db.clone()).unwrap()) as Arc<dyn AuditStore>;
        let (audit_handle, _writer) = create_audit_system(Arc::clone(&audit_store), 100);
        let ledger = Arc::new(SqliteLedger::new(db.clone()).unwrap()) as Arc<dyn LedgerStore>;
        let voting = Arc::new(SqliteVotingStore::new(db.clone()).unwrap()) as Arc<dyn VotingStore>;
        let runs =
            Arc::new(SqliteImportRunStore::new(db.clone()).unwrap()) as Arc<dyn ImportRunStore>;
        let content =
            Arc::new(SqliteContentStore::new(db.clone()).unwrap()) as Arc<dyn ContentStore>;
        let recipients = Arc::new(SqliteRecipients::new(db).unwrap());

        let orchestrator = Arc::new(ImportOrchestrator::new(
            Default::default(),
            Arc::clone(&runs),
            Arc::clone(&voting),
            content,
            Vec::<Arc<dyn ContentFetcher>>::new(),
            None,
        ));
        let scheduler = Arc::new(JobScheduler::new(
            Default::default(),
            Arc::clone(&ledger),
            Arc::clone(&voting),
            recipients,
            Arc::clone(&orchestrator),
            None,
        ));

        Arc::new(AppState::new(
            create_test_config(auth),
            authenticator,
            audit_handle,
            audit_store,
            ledger,
            voting,
            runs,
            orchestrator,
            scheduler,
        ))
    }

    fn app(state: Arc<AppState>) -> Router {
        async fn user_handler(AuthUser(user_id): AuthUser) -> String {
            user_id
        }
        async fn voter_handler(Voter(user_id): Voter) -> String {
            user_id
        }

        Router::new()
            .route("/user", get(user_handler))
            .route("/voter", get(voter_handler))
            .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state)
    }

    fn api_key_auth() -> AuthConfig {
        AuthConfig {
            method: AuthMethod::ApiKey,
            api_key: Some("secret-key".to_string()),
        }
    }

    fn no_auth() -> AuthConfig {
        AuthConfig {
            method: AuthMethod::None,
            api_key: None,
        }
    }

    async fn body_text(response: Response) -> String {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_none_auth_allows_all() {
        let request = Request::builder().uri("/user").body(Body::empty()).unwrap();

        let response = app(create_test_state(no_auth())).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "anonymous");
    }

    #[tokio::test]
    async fn test_none_auth_trusts_forwarded_user() {
        let request = Request::builder()
            .uri("/voter")
            .header("x-user-id", "reader-7")
            .body(Body::empty())
            .unwrap();

        let response = app(create_test_state(no_auth())).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "reader-7");
    }

    #[tokio::test]
    async fn test_anonymous_voter_is_rejected() {
        let request = Request::builder().uri("/voter").body(Body::empty()).unwrap();

        let response = app(create_test_state(no_auth())).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(body_text(response).await.contains("Authentication required"));
    }

    #[tokio::test]
    async fn test_api_key_auth_valid() {
        let request = Request::builder()
            .uri("/user")
            .header(header::AUTHORIZATION, "Bearer secret-key")
            .body(Body::empty())
            .unwrap();

        let response = app(create_test_state(api_key_auth())).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "api_key_user");
    }

    #[tokio::test]
    async fn test_api_key_auth_invalid() {
        let request = Request::builder()
            .uri("/user")
            .header(header::AUTHORIZATION, "Bearer wrong-key")
            .body(Body::empty())
            .unwrap();

        let response = app(create_test_state(api_key_auth())).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_api_key_auth_missing() {
        let request = Request::builder().uri("/user").body(Body::empty()).unwrap();

        let response = app(create_test_state(api_key_auth())).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_x_api_key_header_with_forwarded_user() {
        let request = Request::builder()
            .uri("/voter")
            .header("X-API-Key", "secret-key")
            .header("X-User-Id", "reader-9")
            .body(Body::empty())
            .unwrap();

        let response = app(create_test_state(api_key_auth())).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "reader-9");
    }
}
