//! Service binary for the Encore song request queue.
//!
//! Wires storage, the queue engine, link ingestion, and the observer API
//! together and runs until `Ctrl-C`.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `encore-config.yaml` (or `ENCORE_CONFIG`)
//! 3. Open the repository (`PostgreSQL` when configured, else in-memory)
//! 4. Load persisted state into the engine and start it
//! 5. Build the ingestion adapter with a cached `oEmbed` source
//! 6. Start the observer API and the statistics broadcaster
//! 7. Wait for `Ctrl-C`, then shut down in reverse order

mod error;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use encore_core::policy::configured_policy;
use encore_core::{BroadcastHub, EncoreConfig, EngineSettings, QueueEngine};
use encore_db::{InMemoryRepository, PostgresConfig, PostgresPool, Repository};
use encore_ingest::{CachedMetadataSource, IngestionAdapter, OEmbedSource};
use encore_observer::state::{AppState, ObserverOptions};
use encore_observer::{ServerConfig, spawn_observer, spawn_stats_broadcaster};
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::ServerError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "encore-config.yaml";

/// How long to wait for in-flight engine commands at shutdown.
const ENGINE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any initialization step fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("encore-server starting");

    run().await?;

    info!("encore-server stopped");
    Ok(())
}

async fn run() -> Result<(), ServerError> {
    // 2. Load configuration.
    let config_path = std::env::var_os("ENCORE_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let config = EncoreConfig::load_or_default(&config_path)?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        persistent = config.database.url.is_some(),
        history_window = config.queue.history_window,
        "Configuration loaded"
    );

    // 3. Open the repository.
    let (repository, pool) = open_repository(&config).await?;

    // 4. Load state and start the engine.
    let hub = Arc::new(BroadcastHub::new(
        config.observers.buffer_size,
        config.queue.history_window,
    ));
    let engine = QueueEngine::load(
        Arc::clone(&repository),
        Arc::clone(&hub),
        Box::new(configured_policy(&config.queue)),
        EngineSettings::from(&config.queue),
    )
    .await?;
    let (handle, engine_task) = engine.spawn();
    info!("Queue engine started");

    // 5. Ingestion.
    let oembed = OEmbedSource::new(
        &config.metadata.oembed_url,
        Duration::from_millis(config.metadata.timeout_ms),
    )?;
    let metadata = CachedMetadataSource::new(oembed, Arc::clone(&repository));
    let ingest = IngestionAdapter::new(handle.clone(), Arc::new(metadata));

    // 6. Observer API and statistics.
    let state = Arc::new(AppState::new(
        Arc::clone(&hub),
        handle,
        ingest,
        ObserverOptions::from_config(&config),
    ));
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let shutdown_hub = Arc::clone(&hub);
    let (addr, observer_task) = spawn_observer(
        &ServerConfig::from(&config.server),
        Arc::clone(&state),
        async move {
            let _ = stop_rx.await;
            // Long-lived push connections would otherwise hold the
            // server open forever.
            shutdown_hub.disconnect_all().await;
        },
    )
    .await?;
    let stats_task = spawn_stats_broadcaster(Arc::clone(&state));
    info!(%addr, "Observer API started");

    // 7. Run until interrupted.
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for Ctrl-C, shutting down");
    }
    info!("Shutdown requested");

    stats_task.abort();
    let _ = stats_task.await;
    let _ = stop_tx.send(());
    if let Err(e) = observer_task.await {
        warn!(error = %e, "Observer task ended abnormally");
    }

    // The engine drains its command channel and stops once every handle
    // is gone; the last ones live in the observer state.
    drop(state);
    match tokio::time::timeout(ENGINE_STOP_TIMEOUT, engine_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Engine task ended abnormally"),
        Err(_) => warn!("Engine did not stop in time, exiting anyway"),
    }

    if let Some(pool) = pool {
        pool.close().await;
    }
    Ok(())
}

/// Connect to `PostgreSQL` when a URL is configured, otherwise fall back
/// to the in-memory repository.
async fn open_repository(
    config: &EncoreConfig,
) -> Result<(Arc<dyn Repository>, Option<PostgresPool>), ServerError> {
    let Some(url) = config.database.url.as_deref() else {
        warn!("No database configured, state will not survive a restart");
        return Ok((Arc::new(InMemoryRepository::new()), None));
    };

    let pg_config =
        PostgresConfig::new(url).with_max_connections(config.database.max_connections);
    let pool = PostgresPool::connect(&pg_config).await?;
    pool.run_migrations().await?;
    let repository = pool.repository();
    Ok((Arc::new(repository), Some(pool)))
}
