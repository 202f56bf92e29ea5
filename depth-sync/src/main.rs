//! depth-sync - order book synchronizer
//!
//! Connects to exchange depth streams, keeps full-depth books in sync and
//! exposes their sync state over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use depth_sync::{
    Config, DepthRegistry, LoggingHandler, RestSnapshotSource, SyncMetrics, SyncState,
    WebSocketManager,
};

/// Shared state of the health server
#[derive(Clone)]
struct HealthState {
    registry: Arc<DepthRegistry>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting depth-sync");

    let config = Arc::new(match std::env::var("DEPTH_SYNC_CONFIG") {
        Ok(path) => Config::from_file(&path)?,
        Err(_) => Config::load()?,
    });
    info!(symbols = ?config.symbols, "Configuration loaded");

    let metrics = Arc::new(SyncMetrics::new()?);
    let registry = Arc::new(
        DepthRegistry::new(config.retry_policy(), metrics)
            .with_depth_limit(config.snapshot_depth)
            .with_max_pending(config.max_pending_updates),
    );
    let source = Arc::new(RestSnapshotSource::new(
        &config.rest_endpoint,
        config.bootstrap_limit,
        config.http_timeout(),
    )?);

    // Start health check server
    let health_state = HealthState {
        registry: registry.clone(),
    };
    let port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, port).await {
            warn!(error = %e, "Health server error");
        }
    });

    let mut ws_manager =
        WebSocketManager::new(config, registry, source, Arc::new(LoggingHandler));
    ws_manager.run().await?;

    Ok(())
}

/// Start HTTP server for health checks and metrics
async fn start_health_server(state: HealthState, port: u16) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<HealthState>) -> Json<serde_json::Value> {
    let states = state.registry.states();
    let all_synced = states.iter().all(|(_, s)| *s == SyncState::Synced);
    let books: Vec<serde_json::Value> = states
        .into_iter()
        .map(|(symbol, sync_state)| {
            serde_json::json!({
                "symbol": symbol,
                "state": sync_state,
            })
        })
        .collect();

    Json(serde_json::json!({
        "status": if all_synced { "healthy" } else { "syncing" },
        "component": "depth-sync",
        "books": books,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics(State(state): State<HealthState>) -> Result<String, (StatusCode, String)> {
    state
        .registry
        .metrics()
        .encode()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
