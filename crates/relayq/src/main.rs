//! # RelayQ - replicated FIFO queue node
//!
//! Every node holds a full copy of one logical queue. Writes and reads
//! are fanned out to peers best-effort; membership comes from a small UDP
//! gossip layer. The node whose name ends in `-1` is the primary and
//! terminates websocket subscribers; every other node proxies them there.
//!
//! ## Architecture
//! ```text
//! client ─HTTP/WS─▶ node ─HTTP (/_push, /_pull, /queue)─▶ peers
//!                     │
//!                   gossip (UDP) ◀──▶ peers
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use relayq_common::QueueError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cluster;
mod config;
mod queue;
mod routes;
mod state;

use cluster::{GossipConfig, GossipService, MembershipDirectory, NodeDescriptor};
use crate::config::AppConfig;
use state::AppState;

/// RelayQ - replicated FIFO queue node
#[derive(Parser, Debug)]
#[command(name = "relayq")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/relayq.toml", env = "RELAYQ_CONFIG")]
    config: String,

    /// Node name; a `-1` suffix makes this node the primary (overrides config)
    #[arg(short, long, env = "NODE_NAME")]
    node_name: Option<String>,

    /// API listen address (overrides config)
    #[arg(short, long, env = "LISTEN_ADDR")]
    listen: Option<String>,

    /// API `host:port` advertised to peers (overrides config)
    #[arg(long, env = "ADVERTISE_ADDR")]
    advertise: Option<String>,

    /// Gossip bind address (overrides config)
    #[arg(long, env = "GOSSIP_BIND")]
    gossip_bind: Option<String>,

    /// Gossip seeds, comma separated `host:port` (overrides config)
    #[arg(long, env = "GOSSIP_SEEDS", value_delimiter = ',')]
    seeds: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level, args.json_logs)?;

    info!("Starting RelayQ v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::load(&args.config, &args)?;
    info!(
        node = %config.node_name,
        listen = %config.listen_addr,
        advertise = %config.advertised_api(),
        "Configuration loaded"
    );

    // Create shutdown broadcast channel
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    // Join the gossip layer
    let gossip = Arc::new(GossipService::new(
        gossip_config(&config)?,
        NodeDescriptor {
            name: config.node_name.clone(),
            metadata: config.advertised_api(),
        },
    ));
    let socket = gossip.bind().await?;
    info!(role = %gossip.local_role(), "Joined gossip layer");

    let receiver = gossip.clone();
    let receiver_socket = socket.clone();
    let receiver_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        if let Err(e) = receiver.run_receiver(receiver_socket, receiver_shutdown).await {
            tracing::error!(error = %e, "Gossip receiver failed");
        }
    });

    let broadcaster = gossip.clone();
    let broadcaster_socket = socket.clone();
    let broadcaster_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        // Announce immediately so peers learn us before the first interval
        broadcaster.broadcast_once(&broadcaster_socket).await;
        if let Err(e) = broadcaster
            .run_broadcaster(broadcaster_socket, broadcaster_shutdown)
            .await
        {
            tracing::error!(error = %e, "Gossip broadcaster failed");
        }
    });

    // Give the first round of announcements a chance to land before bootstrap
    tokio::time::sleep(Duration::from_millis(config.gossip.interval_ms * 2)).await;

    // Initialize application state
    let membership = MembershipDirectory::new(gossip.clone());
    let state = AppState::new(config.clone(), membership)?;

    match state.queue.bootstrap().await {
        Ok(merged) => info!(merged, "Queue bootstrapped from peer"),
        Err(QueueError::QueueNotFound) => info!("No peer queue found, starting empty"),
        Err(e) => tracing::warn!(error = %e, "Bootstrap incomplete"),
    }

    // Build router
    let app = routes::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!("RelayQ listening on {}", config.listen_addr);

    // Handle graceful shutdown
    let leave_gossip = gossip.clone();
    let leave_socket = socket.clone();
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
        info!("Shutdown signal received");
        leave_gossip.leave(&leave_socket).await;
        let _ = shutdown_tx.send(());
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await
    .context("Server error")?;

    info!("RelayQ shutdown complete");
    Ok(())
}

/// Translate file/CLI settings into the gossip service's config
fn gossip_config(config: &AppConfig) -> Result<GossipConfig> {
    let settings = &config.gossip;
    let subnet = match settings.subnet {
        Some(ref cidr) => Some(crate::config::parse_subnet(cidr)?),
        None => None,
    };

    Ok(GossipConfig {
        bind_addr: settings.bind_addr.clone(),
        seeds: settings.seeds.clone(),
        subnet,
        interval: Duration::from_millis(settings.interval_ms),
        suspect_after: Duration::from_secs(settings.suspect_after_secs),
        dead_after: Duration::from_secs(settings.dead_after_secs),
    })
}

/// Initialize structured logging with tracing
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }

    Ok(())
}
