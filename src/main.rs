//! DonCEyKongJr Game Server
//!
//! Authoritative game server for DonCEyKongJr.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use doncey_kong::{
    admin::{run_console, ConsoleExit},
    GameServer, RoomManager, ServerConfig, SessionRegistry, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = ServerConfig::parse();
    config.validate().context("invalid configuration")?;

    info!("DonCEyKongJr Server v{}", VERSION);
    info!(
        "Tick rate {} Hz, up to {} matches of {} players",
        config.tick_rate, config.max_matches, config.max_players
    );

    let registry = Arc::new(SessionRegistry::new(config.max_connections));
    let rooms = RoomManager::new(config.room_config(), registry.clone());
    let server = Arc::new(GameServer::new(config.network_config(), registry.clone(), rooms.clone()));

    let tcp_addr = config.tcp_addr();
    let tcp = TcpListener::bind(tcp_addr)
        .await
        .with_context(|| format!("failed to bind tcp {}", tcp_addr))?;
    let ws = match config.ws_addr() {
        Some(addr) => Some(
            TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind websocket {}", addr))?,
        ),
        None => None,
    };

    let server_task = {
        let server = server.clone();
        tokio::spawn(async move { server.run_with_listeners(tcp, ws).await })
    };

    let console = (!config.no_console).then(|| tokio::spawn(run_console(rooms.clone(), registry.clone())));
    let console_quit = async move {
        if let Some(task) = console {
            if let Ok(ConsoleExit::Quit) = task.await {
                return;
            }
        }
        std::future::pending::<()>().await
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("Ctrl-C received, shutting down");
        }
        _ = console_quit => info!("Quit requested from console"),
    }

    // Matches first so clients get MATCH_END before SHUTDOWN
    rooms.shutdown().await;
    server.shutdown();
    server_task.await.context("server task panicked")??;

    let drained = tokio::time::timeout(Duration::from_secs(1), async {
        while registry.count().await > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!("{} sessions still open at exit", registry.count().await);
    }

    info!("Server stopped");
    Ok(())
}
