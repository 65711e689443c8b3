//! Pellet Rush Server
//!
//! Hosts one authoritative game session: clients join the lobby over
//! WebSocket, ready up, and the server runs the simulation and relays
//! every event until the game ends.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pellet_rush::network::{ConnectionManager, ServerConfig};
use pellet_rush::{HostConfig, HostSession, DEFAULT_PORT, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let bind_addr: SocketAddr = std::env::var("PELLET_RUSH_ADDR")
        .unwrap_or_else(|_| format!("0.0.0.0:{DEFAULT_PORT}"))
        .parse()
        .context("invalid PELLET_RUSH_ADDR")?;

    info!("Pellet Rush Server v{VERSION}");

    let manager = Arc::new(ConnectionManager::new(ServerConfig {
        bind_addr,
        ..Default::default()
    }));
    let session = HostSession::new(Arc::clone(&manager), HostConfig::default());

    tokio::select! {
        result = session.run() => {
            result.context("session failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            manager.stop();
        }
    }

    Ok(())
}
