//! marketplace-reconciler entry point.
//!
//! Connects to PostgreSQL, starts the reconciliation scheduler, and serves
//! the operational HTTP and WebSocket endpoints until Ctrl+C.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use marketplace_reconciler::api;
use marketplace_reconciler::app_state::AppState;
use marketplace_reconciler::config::{LogFormat, ReconcilerConfig};
use marketplace_reconciler::domain::EventBus;
use marketplace_reconciler::metadata::HttpMetadataFetcher;
use marketplace_reconciler::persistence::postgres::PostgresStore;
use marketplace_reconciler::scheduler::{Pipeline, ReconcileScheduler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = ReconcilerConfig::from_env().context("loading configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::info!(addr = %config.listen_addr, "starting marketplace-reconciler");

    // Build persistence layer
    let store = PostgresStore::connect(&config)
        .await
        .context("connecting to database")?;
    if config.run_migrations {
        store.migrate().await.context("running migrations")?;
        tracing::info!("database migrations applied");
    }

    // Build reconciliation pipeline
    let event_bus = EventBus::new(config.event_bus_capacity);
    let fetcher = HttpMetadataFetcher::new(config.metadata_timeout(), &config.ipfs_gateway_url)
        .context("building metadata client")?;
    let pipeline = Pipeline::standard(fetcher, config.reconcile_page_size, &event_bus);
    let scheduler = Arc::new(ReconcileScheduler::new(store, pipeline));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = if config.reconcile_enabled {
        Some(tokio::spawn(
            Arc::clone(&scheduler).run(config.reconcile_interval(), shutdown_rx),
        ))
    } else {
        tracing::info!("periodic reconciliation disabled");
        None
    };

    // Build application state
    let app_state = AppState {
        reconciler: scheduler,
        event_bus,
    };
    let app = api::build_app(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
        })
        .await?;

    shutdown_tx.send(true).ok();
    if let Some(task) = scheduler_task {
        task.await.ok();
    }
    Ok(())
}
