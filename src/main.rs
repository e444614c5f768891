//! Streaming relay server.
//!
//! Serves a page at `/` and relays an upstream event stream to each browser
//! WebSocket at `/ws`.
//!
//! # Usage
//!
//! ```bash
//! # With config file
//! streaming-relay-rs config/relay.toml
//!
//! # Against a real endpoint
//! UPSTREAM_API_KEY=sk-... streaming-relay-rs --upstream http
//!
//! # Mock upstream on another port
//! PORT=8080 streaming-relay-rs
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use streaming_relay_rs::{
    config::{Config, LoggingConfig},
    metrics::{self, init_metrics, start_metrics_server},
    server::{router, AppState, RelayServer},
    shutdown::ShutdownCoordinator,
    upstream::create_source,
};

/// Relays upstream event streams to browser WebSockets.
#[derive(Parser, Debug)]
#[command(name = "streaming-relay-rs")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Override listen address.
    #[arg(short, long)]
    listen: Option<String>,

    /// Override upstream provider (mock, http).
    #[arg(short, long)]
    upstream: Option<String>,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(args.config.as_ref())?;

    // Apply CLI overrides
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(upstream) = args.upstream {
        config.upstream.provider = upstream;
    }
    if args.debug {
        config.logging.level = "debug".to_string();
    }

    init_logging(&config.logging)?;

    config.validate()?;

    tracing::info!(
        listen_addr = %config.server.listen_addr,
        upstream = %config.upstream.provider,
        max_connections = config.server.max_connections,
        "Starting streaming relay"
    );

    init_metrics();

    if config.metrics.enabled {
        let addr = config.metrics.listen_addr.parse()?;
        start_metrics_server(addr).await?;
    }

    let source = create_source(&config.upstream)?;
    tracing::info!(source = source.name(), "Upstream source initialized");

    let shutdown = ShutdownCoordinator::new(config.server.max_connections);
    let state = AppState::new(&config, source, shutdown.clone())?;
    let app = router(state, config.page.static_dir.as_deref());

    let server = RelayServer::bind(config.listen_addr()?, app, shutdown.clone()).await?;
    tracing::info!(addr = %server.local_addr()?, "Relay listening");

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = handle_signals(signal_shutdown).await {
            tracing::error!(error = %e, "Signal handler failed");
        }
    });

    server.serve().await?;

    tracing::info!(
        active = shutdown.active_connections(),
        timeout_secs = config.server.shutdown_timeout_secs,
        "Waiting for connections to drain"
    );

    if shutdown.drain(config.server.shutdown_timeout()).await {
        tracing::info!("All connections drained");
    } else {
        tracing::warn!(
            active = shutdown.active_connections(),
            "Shutdown timeout reached, forcing exit"
        );
    }

    tracing::info!("Relay stopped");
    Ok(())
}

/// Initialize logging with tracing.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }

    Ok(())
}

/// Handle Unix signals.
async fn handle_signals(shutdown: ShutdownCoordinator) -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating shutdown");
                shutdown.shutdown();
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown");
                shutdown.shutdown();
                break;
            }
            _ = sighup.recv() => {
                tracing::info!(
                    active_connections = shutdown.active_connections(),
                    active_sessions = metrics::active_sessions(),
                    "Received SIGHUP, status report"
                );
            }
        }
    }

    Ok(())
}
