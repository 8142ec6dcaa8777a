//! Common test utilities for API testing with mocks.
//!
//! The fixture builds the full application state over a temporary SQLite
//! database, with a [`MockFetcher`] standing in for the content source and
//! [`MockRecipients`] for the user directory.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use novels_core::{
    create_audit_system,
    scheduler::Recipient,
    testing::{fixtures, MockFetcher, MockRecipients},
    voting::ProposalStatus,
    ApiKeyAuthenticator, AuditFilter, AuditStore, AuthConfig, AuthMethod, Authenticator, Config,
    ContentFetcher, ContentStore, Database, DatabaseConfig, GrantRecipients, ImportOrchestrator,
    ImportRunStatus, ImportRunStore, ImporterConfig, JobScheduler, LedgerStore,
    NoneAuthenticator, SchedulerConfig, SqliteAuditStore, SqliteContentStore,
    SqliteImportRunStore, SqliteLedger, SqliteVotingStore, VotingStore,
};
use novels_server::{api::create_router, state::AppState};

pub const API_KEY: &str = "test-secret-key";
pub const LINK: &str = "https://books.example.com/sword-saint";

/// Test fixture driving the router in-process.
pub struct TestFixture {
    pub router: Router,
    pub fetcher: Arc<MockFetcher>,
    pub recipients: Arc<MockRecipients>,
    pub ledger: Arc<dyn LedgerStore>,
    pub voting: Arc<dyn VotingStore>,
    pub runs: Arc<dyn ImportRunStore>,
    pub audit_store: Arc<dyn AuditStore>,
    pub orchestrator: Arc<ImportOrchestrator>,
    /// Sent as `x-user-id` on every request when set
    pub user: Option<String>,
    /// Sent as a Bearer token on every request when set
    pub api_key: Option<String>,
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Fixture with `none` auth.
    pub async fn new() -> Self {
        Self::with_auth(AuthConfig {
            method: AuthMethod::None,
            api_key: None,
        })
        .await
    }

    /// Fixture protected by [`API_KEY`].
    pub async fn with_api_key() -> Self {
        Self::with_auth(AuthConfig {
            method: AuthMethod::ApiKey,
            api_key: Some(API_KEY.to_string()),
        })
        .await
    }

    pub async fn with_auth(auth: AuthConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        let db = Database::open(&db_path).expect("Failed to open database");

        let authenticator: Arc<dyn Authenticator> = match auth.method {
            AuthMethod::None => Arc::new(NoneAuthenticator::new()),
            AuthMethod::ApiKey => Arc::new(ApiKeyAuthenticator::new(
                auth.api_key.clone().expect("api key"),
            )),
        };

        let importer = ImporterConfig {
            fetch_timeout_secs: 5,
            fetch_retries: 1,
            retry_backoff_ms: 10,
            shutdown_grace_secs: 5,
            ..Default::default()
        };
        let config = Config {
            auth,
            server: Default::default(),
            database: DatabaseConfig { path: db_path },
            importer: importer.clone(),
            scheduler: SchedulerConfig::default(),
            fetcher: Default::default(),
        };

        let audit_store: Arc<dyn AuditStore> =
            Arc::new(SqliteAuditStore::new(db.clone()).expect("audit store"));
        let ledger: Arc<dyn LedgerStore> =
            Arc::new(SqliteLedger::new(db.clone()).expect("ledger"));
        let voting: Arc<dyn VotingStore> =
            Arc::new(SqliteVotingStore::new(db.clone()).expect("voting store"));
        let runs: Arc<dyn ImportRunStore> =
            Arc::new(SqliteImportRunStore::new(db.clone()).expect("run store"));
        let content: Arc<dyn ContentStore> =
            Arc::new(SqliteContentStore::new(db).expect("content store"));

        let (audit_handle, audit_writer) = create_audit_system(Arc::clone(&audit_store), 100);
        tokio::spawn(audit_writer.run());

        let fetcher = Arc::new(MockFetcher::new());
        let recipients = Arc::new(MockRecipients::new());

        let orchestrator = Arc::new(ImportOrchestrator::new(
            importer,
            Arc::clone(&runs),
            Arc::clone(&voting),
            content,
            vec![Arc::clone(&fetcher) as Arc<dyn ContentFetcher>],
            Some(audit_handle.clone()),
        ));
        let scheduler = Arc::new(JobScheduler::new(
            config.scheduler.clone(),
            Arc::clone(&ledger),
            Arc::clone(&voting),
            Arc::clone(&recipients) as Arc<dyn GrantRecipients>,
            Arc::clone(&orchestrator),
            Some(audit_handle.clone()),
        ));

        let state = Arc::new(AppState::new(
            config,
            authenticator,
            audit_handle,
            Arc::clone(&audit_store),
            Arc::clone(&ledger),
            Arc::clone(&voting),
            Arc::clone(&runs),
            Arc::clone(&orchestrator),
            scheduler,
        ));

        Self {
            router: create_router(state),
            fetcher,
            recipients,
            ledger,
            voting,
            runs,
            audit_store,
            orchestrator,
            user: None,
            api_key: None,
            temp_dir,
        }
    }

    /// Identify subsequent requests as `user_id`.
    pub fn as_user(&mut self, user_id: &str) -> &mut Self {
        self.user = Some(user_id.to_string());
        self
    }

    pub fn anonymous(&mut self) -> &mut Self {
        self.user = None;
        self
    }

    /// Add a grant recipient for the scheduled jobs.
    pub fn add_recipient(&self, recipient: Recipient) {
        self.recipients.add(recipient);
    }

    /// Create an accepted proposal whose link serves `chapters` chapters.
    pub fn accepted_proposal(&self, chapters: usize) -> String {
        self.fetcher.add_novel(LINK, "Sword Saint", chapters);
        let proposal = self
            .voting
            .create_proposal(fixtures::proposal("author", "Sword Saint", LINK))
            .expect("Failed to create proposal");
        self.voting
            .set_proposal_status(&proposal.id, ProposalStatus::Accepted)
            .expect("Failed to accept proposal");
        proposal.id
    }

    /// Poll until the run reaches `expected` and no task holds it.
    pub async fn wait_for_status(&self, run_id: &str, expected: ImportRunStatus) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            let run = self.runs.get(run_id).unwrap().unwrap();
            let settled =
                expected == ImportRunStatus::Running || !self.orchestrator.is_active(run_id);
            if run.status == expected && settled {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Poll until the audit log holds an event of `event_type`.
    pub async fn wait_for_audit(&self, event_type: &str) -> bool {
        self.wait_for_filter(AuditFilter::new().with_event_type(event_type))
            .await
    }

    /// Poll until the audit log holds an event of `event_type` attributed to `user_id`.
    pub async fn wait_for_audit_by(&self, event_type: &str, user_id: &str) -> bool {
        self.wait_for_filter(
            AuditFilter::new()
                .with_event_type(event_type)
                .with_user_id(user_id),
        )
        .await
    }

    async fn wait_for_filter(&self, filter: AuditFilter) -> bool {
        for _ in 0..100 {
            if self.audit_store.count(&filter).unwrap_or(0) > 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a PUT request with JSON body.
    pub async fn put(&self, path: &str, body: Value) -> TestResponse {
        self.request("PUT", path, Some(body)).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let builder = self
            .builder("POST", path)
            .header("Content-Type", "application/json");
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut builder = self.builder(method, path);

        let body = if let Some(json_body) = body {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(builder.body(body).unwrap()).await
    }

    fn builder(&self, method: &str, path: &str) -> axum::http::request::Builder {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(ref user) = self.user {
            builder = builder.header("x-user-id", user);
        }
        if let Some(ref key) = self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }
        builder
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body_bytes).into()))
        };

        TestResponse { status, body }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}

/// Helper to assert a JSON path equals expected value.
#[macro_export]
macro_rules! assert_json_path {
    ($json:expr, $path:expr, $expected:expr) => {
        let actual = &$json[$path];
        assert_eq!(
            actual, &$expected,
            "Path '{}' expected {:?}, got {:?}",
            $path, $expected, actual
        );
    };
}
