use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use modis_runner_core::{
    create_audit_system, load_config, validate_config, AuditEvent, AuditStore,
    BroadcastPublisher, PassOrchestrator, PassTracker, ProcessStageRunner, ResultPublisher,
    SqliteAuditStore, StageRunner, TriggerListener,
};
use modis_runner_server::api::{create_router, spawn_forwarder, WsBroadcaster};
use modis_runner_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffer size for audit event channel
const AUDIT_BUFFER_SIZE: usize = 1000;

/// How long to wait for the audit writer to flush on shutdown
const AUDIT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    let json = std::env::var("MODIS_RUNNER_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn run() -> Result<()> {
    init_tracing();

    let config_path = std::env::var("MODIS_RUNNER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    for (platform, spec) in config.pipelines.iter() {
        info!(
            "Pipeline {}: {} stage(s), {} raw input(s)",
            platform,
            spec.stages.len(),
            spec.raw_inputs.len()
        );
    }

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    let config_hash_short = &config_hash[..16];

    let audit_store: Arc<dyn AuditStore> = Arc::new(
        SqliteAuditStore::new(&config.database.path).context("Failed to create audit store")?,
    );
    info!("Audit store initialized");

    let (audit_handle, audit_writer) =
        create_audit_system(Arc::clone(&audit_store), AUDIT_BUFFER_SIZE);
    let writer_handle = tokio::spawn(audit_writer.run());

    audit_handle
        .emit(AuditEvent::ServiceStarted {
            version: VERSION.to_string(),
            config_hash: config_hash_short.to_string(),
        })
        .await;

    // Pass tracking and stage execution
    let tracker = Arc::new(PassTracker::new(
        config.tracker.clone(),
        Arc::new(config.pipelines.clone()),
    ));
    let runner: Arc<dyn StageRunner> =
        Arc::new(ProcessStageRunner::new(config.stage_runner.clone()));

    // Product notifications go to an in-process broadcast, relayed to WebSocket clients
    let broadcast_publisher = Arc::new(BroadcastPublisher::new(config.publisher.channel_capacity));
    let result_publisher = Arc::new(
        ResultPublisher::new(config.publisher.clone(), broadcast_publisher.clone())
            .with_audit(audit_handle.clone()),
    );
    info!(
        "Publishing products on {} for station {}",
        config.publisher.topic, config.publisher.station
    );

    let orchestrator = PassOrchestrator::new(
        config.orchestrator.clone(),
        config.locator.clone(),
        Arc::clone(&tracker),
        runner,
    )
    .with_publisher(result_publisher)
    .with_audit(audit_handle.clone());

    if config.orchestrator.enabled {
        orchestrator.start().await;
        info!("Pass orchestrator started");
    } else {
        warn!("Orchestrator disabled in config; triggers are tracked but not processed");
    }

    // Shutdown signal for the listener and the WebSocket forwarder
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let (trigger_tx, trigger_rx) = mpsc::channel(config.listener.channel_capacity);
    let listener = TriggerListener::new(config.listener.clone(), Arc::clone(&tracker))
        .with_audit(audit_handle.clone())
        .with_wake(orchestrator.wake_handle());
    let listener_handle = tokio::spawn(listener.run(trigger_rx, shutdown_tx.subscribe()));

    let ws_broadcaster = WsBroadcaster::default();
    let forwarder_handle = spawn_forwarder(
        ws_broadcaster.clone(),
        broadcast_publisher.subscribe(),
        orchestrator.subscribe(),
        shutdown_tx.subscribe(),
    );

    let state = Arc::new(AppState::new(
        config.clone(),
        audit_store,
        tracker,
        orchestrator.clone(),
        trigger_tx,
        ws_broadcaster,
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
    if config.orchestrator.enabled {
        orchestrator.stop().await;
    }
    let _ = shutdown_tx.send(());
    let _ = listener_handle.await;
    let _ = forwarder_handle.await;

    audit_handle
        .emit(AuditEvent::ServiceStopped {
            reason: "graceful_shutdown".to_string(),
        })
        .await;

    // The writer only finishes once every AuditHandle clone is gone.
    drop(orchestrator);
    drop(audit_handle);

    match tokio::time::timeout(AUDIT_FLUSH_TIMEOUT, writer_handle).await {
        Ok(_) => info!("Audit writer stopped"),
        Err(_) => warn!("Audit writer did not finish within {:?}", AUDIT_FLUSH_TIMEOUT),
    }

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
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
