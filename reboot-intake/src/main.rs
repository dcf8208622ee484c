//! reboot-intake - Shoe Intake service
//!
//! Collects shoe details, a sole photo and a condition rating per draft
//! session, then submits them: photo upload, record write and QR issuance.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use reboot_common::config::{self, StorageBackend, TomlConfig};
use reboot_common::events::EventBus;

use reboot_intake::backoff::RetryPolicy;
use reboot_intake::draft::DraftStore;
use reboot_intake::photo::{ImageNormalizer, NormalizeOptions};
use reboot_intake::qr::QrIssuer;
use reboot_intake::records::{RecordStore, SqliteRecordStore};
use reboot_intake::storage::{HttpObjectStore, LocalObjectStore, ObjectStore, RemoteUploader};
use reboot_intake::submission::{OrchestratorDeps, SubmissionOrchestrator};
use reboot_intake::sweeper::{SessionSweeper, SweeperConfig};
use reboot_intake::{build_router, AppState};

/// Command-line arguments for reboot-intake
#[derive(Parser, Debug)]
#[command(name = "reboot-intake")]
#[command(about = "Shoe intake service for ReBOOT")]
#[command(version)]
struct Args {
    /// Config file (defaults to ~/.config/reboot/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root folder holding the database and local photo storage
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "REBOOT_PORT")]
    port: Option<u16>,

    /// Address to bind (overrides config)
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(config::find_config_file);
    let toml_config = match &config_path {
        Some(path) => TomlConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TomlConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&toml_config.log_level)),
        )
        .init();

    info!(
        "Starting ReBOOT Shoe Intake (reboot-intake) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    match &config_path {
        Some(path) => info!("Config: {}", path.display()),
        None => warn!("No config file found, using defaults"),
    }

    let root_folder = config::resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    config::ensure_root_folder(&root_folder).context("Failed to initialize root folder")?;
    info!("Root folder: {}", root_folder.display());

    let db_path = config::database_path(&root_folder);
    info!("Database: {}", db_path.display());
    let db_pool = reboot_intake::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    let bind_address = args.bind.unwrap_or_else(|| toml_config.bind_address.clone());
    let port = args.port.unwrap_or(toml_config.port);

    let storage = &toml_config.storage;
    let (object_store, local_storage_dir) =
        match storage.backend {
            StorageBackend::Local => {
                let dir = config::storage_path(&root_folder);
                let public_base_url = storage
                    .public_base_url
                    .clone()
                    .unwrap_or_else(|| format!("http://{}:{}/storage", bind_address, port));
                info!("Photo storage: local {} ({})", dir.display(), public_base_url);
                let store: Arc<dyn ObjectStore> =
                    Arc::new(LocalObjectStore::new(dir.clone(), &public_base_url));
                (store, Some(dir))
            }
            StorageBackend::Remote => {
                let url = storage
                    .url
                    .as_deref()
                    .context("storage.url is required for the remote backend")?;
                info!("Photo storage: remote {}", url);
                let store: Arc<dyn ObjectStore> =
                    Arc::new(HttpObjectStore::new(url, storage.api_key.clone())?);
                (store, None)
            }
        };

    let uploader = Arc::new(RemoteUploader::new(
        object_store,
        storage.bucket.clone(),
        RetryPolicy::from(&toml_config.upload),
    ));

    let event_bus = EventBus::new(100);
    let drafts = DraftStore::new();
    let records: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(db_pool));
    let qr = QrIssuer::new(records.clone(), event_bus.clone());

    let policy = RetryPolicy::from(&toml_config.submission);
    info!(
        max_retries = policy.max_retries,
        base_delay_ms = policy.base_delay.as_millis() as u64,
        "Submission retry policy"
    );

    let orchestrator = SubmissionOrchestrator::new(OrchestratorDeps {
        drafts: drafts.clone(),
        normalizer: ImageNormalizer::new(NormalizeOptions::from(&toml_config.image)),
        uploader,
        records: records.clone(),
        qr: qr.clone(),
        policy,
        event_bus: event_bus.clone(),
    });

    let sweeper = Arc::new(SessionSweeper::new(
        SweeperConfig::from(&toml_config.session),
        drafts.clone(),
        orchestrator.clone(),
    ));
    let _sweep_task = sweeper.run();

    let mut state = AppState::new(drafts, records, orchestrator, qr, event_bus)
        .with_max_photo_bytes(toml_config.image.max_bytes);
    if let Some(dir) = local_storage_dir {
        state = state.with_local_storage(dir);
    }
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind_address, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind_address, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
