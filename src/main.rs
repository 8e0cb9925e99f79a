//! lineserve: a concurrent echo and RPC server
//!
//! Serves one of two handlers over TCP or UDP:
//! - Echo: every line comes back verbatim; `STOP` ends the session
//! - RPC: `Add` / `Subtract` calls over JSON lines
//!
//! Features:
//! - One task per connection with an optional session limit
//! - Idle timeout for abandoned clients
//! - Graceful shutdown on SIGINT/SIGTERM with a drain grace period
//! - Configuration via CLI arguments or TOML file

use clap::CommandFactory;
use lineserve::config::{CliArgs, Config, ConfigError};
use lineserve::{server, DrainOutcome};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(ConfigError::MissingAddress) => CliArgs::command()
            .error(
                clap::error::ErrorKind::MissingRequiredArgument,
                "a port or host:port to listen on is required",
            )
            .exit(),
        Err(e) => return Err(e.into()),
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        endpoint = %config.endpoint,
        service = ?config.service,
        max_sessions = ?config.max_sessions,
        idle_timeout = ?config.idle_timeout,
        grace_period = ?config.grace_period,
        "Starting lineserve"
    );

    match server::serve(config, shutdown_signal()).await? {
        DrainOutcome::Drained => info!("Shutdown complete"),
        DrainOutcome::TimedOut { forced } => {
            warn!(forced = forced.len(), "Shutdown complete, some sessions were forced closed")
        }
    }

    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
