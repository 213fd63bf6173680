use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{net::TcpListener, signal, sync::mpsc};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use aquarium_monitor::{
    alerts::StoreAlertSink,
    api::{self, AppState},
    config::Config,
    control::ControlService,
    models::DEVICES_PATH,
    notify::HttpDispatcher,
    reading_cache::ReadingCache,
    registry::DeviceRegistry,
    rtdb::{RealtimeStore, RtdbClient},
    telemetry::{PhEvaluator, TelemetryPipeline, TelemetryWatcher},
};

/// Snapshots buffered between the stream task and the watcher.
const SNAPSHOT_BUFFER: usize = 16;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent — env vars may be set externally)
    let _ = dotenvy::dotenv();

    // Initialise tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let rtdb = RtdbClient::new(&config)?;
    let store: Arc<dyn RealtimeStore> = Arc::new(rtdb.clone());

    // Shared in-memory view of the latest reading per device
    let cache = ReadingCache::new();

    let pipeline = TelemetryPipeline::new(
        PhEvaluator::new(config.ph_alert_threshold),
        Arc::new(StoreAlertSink::new(store.clone())),
        Arc::new(HttpDispatcher::new(&config)?),
        cache.clone(),
    );

    // Stream task feeds full `devices` snapshots to the watcher
    let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
    let stream = tokio::spawn(rtdb.watch(
        DEVICES_PATH.to_owned(),
        tx,
        Duration::from_secs(config.stream_retry_secs),
    ));
    let watcher = TelemetryWatcher::start(pipeline, rx);
    info!(threshold = config.ph_alert_threshold, "pH alert watcher started");

    let state = AppState {
        cache,
        registry: DeviceRegistry::new(store.clone()),
        control: ControlService::new(store),
    };

    // Start HTTP server
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    stream.abort();
    match watcher.stop().await {
        Ok(passes) => info!(passes, "pH alert watcher stopped"),
        Err(e) => error!(error = %e, "pH alert watcher ended abnormally"),
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received");
}
