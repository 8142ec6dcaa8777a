use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use novels_core::{
    create_audit_system, create_authenticator, load_config, validate_config, AuditEvent,
    AuditStore, Authenticator, ContentFetcher, ContentStore, Database, ImportOrchestrator,
    ImportRunStore, JobScheduler, JsonFeedFetcher, LedgerStore, SqliteAuditStore,
    SqliteContentStore, SqliteImportRunStore, SqliteLedger, SqliteRecipients, SqliteVotingStore,
    VotingStore,
};
use novels_server::{api::create_router, state::AppState};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for audit event channel
const AUDIT_BUFFER_SIZE: usize = 1000;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("NOVELS_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run() -> Result<()> {
    init_logging();

    let config_path = std::env::var("NOVELS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Auth method: {:?}", config.auth.method);
    info!("Database path: {:?}", config.database.path);

    // Short config fingerprint for the audit log
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    let authenticator: Arc<dyn Authenticator> = Arc::from(
        create_authenticator(&config.auth).context("Failed to create authenticator")?,
    );
    info!("Using authenticator: {}", authenticator.method_name());

    // One database file shared by every store
    let db = Database::open(&config.database.path)
        .with_context(|| format!("Failed to open database {:?}", config.database.path))?;

    let audit_store: Arc<dyn AuditStore> = Arc::new(
        SqliteAuditStore::new(db.clone()).context("Failed to create audit store")?,
    );
    let ledger: Arc<dyn LedgerStore> =
        Arc::new(SqliteLedger::new(db.clone()).context("Failed to create ledger")?);
    let voting: Arc<dyn VotingStore> = Arc::new(
        SqliteVotingStore::new(db.clone()).context("Failed to create voting store")?,
    );
    let runs: Arc<dyn ImportRunStore> = Arc::new(
        SqliteImportRunStore::new(db.clone()).context("Failed to create import run store")?,
    );
    let content: Arc<dyn ContentStore> = Arc::new(
        SqliteContentStore::new(db.clone()).context("Failed to create content store")?,
    );
    let recipients = Arc::new(
        SqliteRecipients::new(db).context("Failed to create grant recipient source")?,
    );
    info!("Stores initialized");

    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), AUDIT_BUFFER_SIZE);
    let writer_handle = tokio::spawn(audit_writer.run());

    audit_handle
        .emit(AuditEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
        })
        .await;
    info!("Emitted ServiceStarted audit event");

    let fetcher: Arc<dyn ContentFetcher> = Arc::new(
        JsonFeedFetcher::new(&config.fetcher).context("Failed to create content fetcher")?,
    );
    info!(hosts = ?config.fetcher.hosts, "Content fetcher initialized");

    let orchestrator = Arc::new(ImportOrchestrator::new(
        config.importer.clone(),
        Arc::clone(&runs),
        Arc::clone(&voting),
        content,
        vec![fetcher],
        Some(audit_handle.clone()),
    ));
    let recovered = orchestrator
        .recover_orphaned_runs()
        .await
        .context("Failed to recover import runs")?;
    if !recovered.is_empty() {
        info!(runs = ?recovered, "Import runs from the previous process are paused");
    }

    let scheduler = Arc::new(JobScheduler::new(
        config.scheduler.clone(),
        Arc::clone(&ledger),
        Arc::clone(&voting),
        recipients,
        Arc::clone(&orchestrator),
        Some(audit_handle.clone()),
    ));

    if config.scheduler.enabled {
        scheduler.start();
        info!("Job scheduler started");
    } else {
        info!("Job scheduler disabled in config");
    }

    let state = Arc::new(AppState::new(
        config.clone(),
        authenticator,
        audit_handle.clone(),
        audit_store,
        ledger,
        voting,
        runs,
        Arc::clone(&orchestrator),
        Arc::clone(&scheduler),
    ));

    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    scheduler.stop();
    // Running imports are left paused so they resume from their checkpoint
    orchestrator.shutdown().await;

    audit_handle
        .emit(AuditEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // The writer exits once every AuditHandle clone is gone.
    // The final event must be emitted before these drops.
    drop(scheduler);
    drop(orchestrator);
    drop(audit_handle);

    let _ = writer_handle.await;
    info!("Audit writer stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
