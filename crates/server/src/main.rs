use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sluice_core::collaborators::{
    ContentProcessor, FsItemCopier, FsSourceEnumerator, HttpContentProcessor, HttpIndexWriter,
    IndexWriter, NoopContentProcessor, NoopIndexWriter,
};
use sluice_core::coordinator::spawn_reapers;
use sluice_core::notify::{
    create_notification_system, LogSink, NotificationSink, NotificationStore,
    SqliteNotificationStore,
};
use sluice_core::orchestrator::{
    spawn_housekeeping, spawn_scheduler, Collaborators, ControllerDeps,
};
use sluice_core::state::{SqliteStateStore, StateStore};
use sluice_core::{load_config, validate_config, Config, ControllerRegistry, CoordinatorRegistry};

use sluice_server::api::create_router;
use sluice_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long to wait for queued notifications on shutdown
const NOTIFICATION_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        tracing::error!("Fatal error: {:#}", e);
        eprintln!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run() -> Result<()> {
    // Determine config path
    let config_path = std::env::var("SLUICE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    init_logging(&config);
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        "Sluice {} starting with config {:?} ({})",
        VERSION,
        config_path,
        &config_hash[..16]
    );
    info!("Database path: {:?}", config.database.path);

    // Stores
    let state_store: Arc<dyn StateStore> = Arc::new(
        SqliteStateStore::new(&config.database.path).context("Failed to create state store")?,
    );
    let notification_store: Arc<dyn NotificationStore> = Arc::new(
        SqliteNotificationStore::new(&config.database.path)
            .context("Failed to create notification store")?,
    );
    info!("State and notification stores initialized");

    // Notifications
    let sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(LogSink)];
    let (notify, dispatcher) = create_notification_system(
        Arc::clone(&notification_store),
        sinks,
        config.notifications.buffer_size,
    );
    let dispatcher_handle = tokio::spawn(dispatcher.run());

    // Coordinators
    let coordinators = Arc::new(CoordinatorRegistry::new(&config.coordinator.categories));
    for status in coordinators.statuses().await {
        info!(
            "Coordinator '{}' with capacity {}",
            status.category, status.capacity
        );
    }

    // Collaborators
    let (processor, index): (Arc<dyn ContentProcessor>, Arc<dyn IndexWriter>) =
        match &config.backend {
            Some(backend) => {
                info!("Using processing backend at {}", backend.url);
                (
                    Arc::new(
                        HttpContentProcessor::new(backend)
                            .context("Failed to create content processor")?,
                    ),
                    Arc::new(
                        HttpIndexWriter::new(backend).context("Failed to create index writer")?,
                    ),
                )
            }
            None => {
                info!("No backend configured, processing and indexing are no-ops");
                (Arc::new(NoopContentProcessor), Arc::new(NoopIndexWriter))
            }
        };
    let collaborators = Collaborators {
        enumerator: Arc::new(FsSourceEnumerator::new(config.sources.root.clone())),
        copier: Arc::new(FsItemCopier::new(config.sources.staging.clone())),
        processor,
        index,
    };

    let registry = Arc::new(ControllerRegistry::new(ControllerDeps {
        config: config.orchestrator.clone(),
        index_dimensions: config.index.dimensions,
        store: state_store,
        coordinators: Arc::clone(&coordinators),
        collaborators,
        notify,
    }));

    // Background loops
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let reaper_handle = spawn_reapers(
        Arc::clone(&coordinators),
        Duration::from_secs(config.coordinator.reaper_interval_secs),
        shutdown_tx.subscribe(),
    );
    let housekeeping_handle = spawn_housekeeping(
        Arc::clone(&registry),
        config.orchestrator.stuck_sweep_interval(),
        shutdown_tx.subscribe(),
    );
    let scheduler_handle = spawn_scheduler(
        Arc::clone(&registry),
        config.schedule.clone(),
        shutdown_tx.subscribe(),
    );

    let state = Arc::new(AppState::new(
        config.clone(),
        Arc::clone(&registry),
        coordinators,
        notification_store,
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
    let _ = shutdown_tx.send(());
    let _ = reaper_handle.await;
    let _ = housekeeping_handle.await;
    let _ = scheduler_handle.await;

    let running = registry.running_count().await;
    if running > 0 {
        info!(
            "{} orchestrations still running; they stay marked as running until reset",
            running
        );
    }

    // The dispatcher stops once every NotifyHandle is gone. In-flight workers
    // may still hold one, so the drain is bounded.
    drop(registry);
    if tokio::time::timeout(NOTIFICATION_DRAIN_TIMEOUT, dispatcher_handle)
        .await
        .is_err()
    {
        info!("Notification dispatcher did not drain in time");
    } else {
        info!("Notification dispatcher stopped");
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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
