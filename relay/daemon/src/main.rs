//! Relay Daemon - HTTP Host for the Realtime Relay
//!
//! Serves the event stream, the duplex tool socket, and the message and tool
//! endpoints over one HTTP listener.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (127.0.0.1:8787)
//! relay-daemon
//!
//! # Custom listen address
//! relay-daemon --bind 0.0.0.0:9000
//!
//! # With config file
//! relay-daemon --config /etc/realtime-relay/relay.toml
//!
//! # Verbose logging
//! RUST_LOG=debug relay-daemon
//! ```
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown (open streams and tool sessions are closed)

mod server;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use relay_core::config::{default_config_path, load_config_with_overrides, ConfigOverrides};
use server::RelayServer;

/// Relay Daemon - realtime event stream and tool socket host
#[derive(Parser, Debug)]
#[command(name = "relay-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Listen address
    #[arg(short = 'b', long, value_name = "ADDR")]
    bind: Option<SocketAddr>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "RELAY_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Heartbeat interval for event streams (milliseconds)
    #[arg(long, value_name = "MS")]
    heartbeat_ms: Option<u64>,

    /// Requests admitted per identity per refill window
    #[arg(long, value_name = "N")]
    rate_limit: Option<u32>,

    /// Disable per-identity rate limiting
    #[arg(long)]
    no_rate_limit: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(addr) = self.bind {
            overrides = overrides.with_bind_addr(addr);
        }
        if let Some(ms) = self.heartbeat_ms {
            overrides = overrides.with_heartbeat_ms(ms);
        }
        if let Some(limit) = self.rate_limit {
            overrides = overrides.with_rate_limit(limit);
        }
        if self.no_rate_limit {
            overrides = overrides.without_rate_limit();
        }
        overrides
    }
}

/// Initialize logging with the specified level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("relay_daemon={level},relay_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Cancel `shutdown` on the first SIGTERM or SIGINT
fn spawn_signal_handler(shutdown: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
                _ = sigint.recv() => info!("Received SIGINT, initiating shutdown"),
            }
            shutdown.cancel();
        });
    }

    #[cfg(not(unix))]
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, initiating shutdown");
        }
        shutdown.cancel();
    });

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!("Relay Daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.clone().or_else(default_config_path);
    let config = load_config_with_overrides(config_path, &args.overrides())
        .context("Failed to load configuration")?;

    info!(
        bind_addr = %config.bind_addr,
        source = %config.source(),
        rate_limit = config.rate_limit.limit,
        rate_limit_enabled = config.rate_limit.enabled,
        "Configuration loaded"
    );

    let server = RelayServer::new(config);
    spawn_signal_handler(server.shutdown_token())?;

    let listener = server.bind().await?;
    let result = server.run(listener).await;

    match result {
        Ok(()) => {
            info!("Relay daemon stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Daemon stopped with error");
            Err(e)
        }
    }
}
