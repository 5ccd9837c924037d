//! # agora-server
//!
//! Real-time discussion server.
//!
//! This binary provides:
//! - **WebSocket sessions** multiplexing message, discussion, deletion and
//!   read-receipt events over one socket per client
//! - **Hub** fanning events out to every live session of a discussion or user
//! - **SQLite store** for discussions, participants and messages
//! - **REST API** (axum) for health checks and discussion lifecycle

mod api;
mod config;
mod connection;
mod discussions;
mod error;
mod events;
mod hub;
mod service;
mod session;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use agora_store::Database;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::discussions::{Discussions, SessionSettings};
use crate::hub::Hub;
use crate::service::StoreService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,agora_server=debug")),
        )
        .init();

    info!("Starting Agora server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store
    // -----------------------------------------------------------------------
    let db = match config.database_path {
        Some(ref path) => Database::open_at(path)?,
        None => Database::in_memory()?,
    };
    let service = Arc::new(StoreService::new(db));

    // -----------------------------------------------------------------------
    // 4. Build the hub and discussion layer
    // -----------------------------------------------------------------------
    let hub = Hub::new(config.channel_queue_size);
    let discussions = Discussions::new(hub.clone(), service, SessionSettings::from(&config));

    let app_state = AppState {
        discussions,
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 5. Run the HTTP server (blocks until shutdown)
    // -----------------------------------------------------------------------
    // tokio::select! ensures that if either the HTTP server or a shutdown
    // signal arrives, we exit cleanly.
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    hub.shutdown().await;

    Ok(())
}
