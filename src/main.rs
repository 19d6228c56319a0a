//! Forwarding HTTP proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────────────┐
//!                       │                   FORWARD PROXY                       │
//!                       │                                                       │
//!   Client Request      │  ┌─────────┐   ┌─────────┐   ┌──────────────────┐    │
//!   ────────────────────┼─▶│   net   │──▶│  http   │──▶│ proxy engine     │    │
//!                       │  │listener │   │ server  │   │ resolve→translate│    │
//!                       │  └─────────┘   └─────────┘   └────────┬─────────┘    │
//!                       │                                       │              │
//!                       │                                       ▼              │
//!                       │                              ┌──────────────────┐    │
//!                       │                              │ upstream         │    │
//!                       │                              │ dispatch + pool  │────┼──▶ Upstream
//!                       │                              └────────┬─────────┘    │
//!                       │                                       │              │
//!   Client Response     │  ┌─────────┐                          ▼              │
//!   ◀───────────────────┼──│response │◀─────────── streaming relay             │
//!                       │  │ relay   │                                         │
//!                       │  └─────────┘                                         │
//!                       │                                                       │
//!                       │  config · observability · resilience · lifecycle     │
//!                       └──────────────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;

use forward_proxy::admin::{self, AdminState};
use forward_proxy::config::{load_config, ProxyConfig};
use forward_proxy::lifecycle::{spawn_signal_handler, Shutdown};
use forward_proxy::net::Listener;
use forward_proxy::observability::{init_tracing, metrics};
use forward_proxy::HttpServer;

#[derive(Debug, Parser)]
#[command(name = "forward-proxy", version, about = "Forwarding HTTP proxy")]
struct Args {
    /// Port to listen on; overrides the configured bind address's port
    #[arg(short, long)]
    port: Option<u16>,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    let level = if args.verbose {
        "debug"
    } else {
        config.observability.log_level.as_str()
    };
    init_tracing(level);

    tracing::info!("forward-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    match &args.config {
        Some(path) => tracing::info!(path = %path.display(), "Configuration loaded"),
        None => tracing::info!("No config file given, using defaults"),
    }
    if args.verbose {
        tracing::debug!("Verbose logging enabled");
    }

    if let Some(port) = args.port {
        let mut addr: SocketAddr = config.listener.bind_address.parse()?;
        addr.set_port(port);
        config.listener.bind_address = addr.to_string();
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        routing_mode = ?config.routing.mode,
        pool_enabled = config.pool.enabled,
        exchange_timeout_ms = config.timeouts.exchange_ms,
        "Configuration ready"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let listener = Listener::bind(&config.listener).await?;
    let server = HttpServer::new(config.clone());

    if config.admin.enabled {
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AdminState::new(
            &config.admin,
            server.engine().clone(),
            server.connections().clone(),
        );
        let admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = admin::serve(admin_listener, state, admin_shutdown).await {
                tracing::error!(error = %e, "Admin API stopped");
            }
        });
    }

    let server_shutdown = shutdown.subscribe();
    spawn_signal_handler(shutdown);
    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
