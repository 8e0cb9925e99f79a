//! Configuration module for the lineserve server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::endpoint::{Endpoint, Transport};
use crate::error::BindError;
use crate::protocols::echo::handler::DEFAULT_STOP_WORD;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Request handler a server runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    /// Echo each line back verbatim
    Echo,
    /// Arithmetic RPC over JSON lines
    Rpc,
}

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "lineserve")]
#[command(author = "lineserve authors")]
#[command(version = "0.1.0")]
#[command(about = "A concurrent echo and RPC server", long_about = None)]
pub struct CliArgs {
    /// Port (e.g. 8001) or host:port (e.g. 127.0.0.1:8001) to listen on
    pub address: Option<String>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Transport to serve
    #[arg(short, long, value_enum)]
    pub transport: Option<Transport>,

    /// Request handler
    #[arg(short, long, value_enum)]
    pub protocol: Option<ServiceType>,

    /// Maximum concurrent sessions (0 = unlimited)
    #[arg(short = 'm', long)]
    pub max_sessions: Option<usize>,

    /// Close sessions idle for this many seconds (0 = never)
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// Seconds to wait for sessions to finish on shutdown
    #[arg(long)]
    pub grace_period: Option<u64>,

    /// Line that ends an echo session (empty disables)
    #[arg(long)]
    pub stop_word: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub echo: EchoConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Port or host:port to listen on
    pub listen: Option<String>,
    #[serde(default = "default_transport")]
    pub transport: Transport,
    #[serde(default = "default_protocol")]
    pub protocol: ServiceType,
    /// Maximum concurrent sessions (0 = unlimited)
    #[serde(default)]
    pub max_sessions: usize,
    /// Idle timeout in seconds (0 = never)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    /// Shutdown grace period in seconds
    #[serde(default = "default_grace_period")]
    pub grace_period: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: None,
            transport: default_transport(),
            protocol: default_protocol(),
            max_sessions: 0,
            idle_timeout: default_idle_timeout(),
            grace_period: default_grace_period(),
        }
    }
}

/// Echo handler configuration
#[derive(Debug, Deserialize)]
pub struct EchoConfig {
    /// Line that ends a session (empty disables)
    #[serde(default = "default_stop_word")]
    pub stop_word: String,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            stop_word: default_stop_word(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_transport() -> Transport {
    Transport::Stream
}

fn default_protocol() -> ServiceType {
    ServiceType::Echo
}

fn default_idle_timeout() -> u64 {
    300 // 5 minutes
}

fn default_grace_period() -> u64 {
    10
}

fn default_stop_word() -> String {
    DEFAULT_STOP_WORD.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoint: Endpoint,
    pub service: ServiceType,
    /// `None` means unlimited.
    pub max_sessions: Option<usize>,
    /// `None` disables the idle timeout.
    pub idle_timeout: Option<Duration>,
    pub grace_period: Duration,
    /// `None` disables the echo termination word.
    pub stop_word: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Configuration with defaults for everything but the endpoint and handler.
    pub fn new(endpoint: Endpoint, service: ServiceType) -> Self {
        Config {
            endpoint,
            service,
            max_sessions: None,
            idle_timeout: non_zero_secs(default_idle_timeout()),
            grace_period: Duration::from_secs(default_grace_period()),
            stop_word: Some(default_stop_word()),
            log_level: default_log_level(),
        }
    }

    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents)
                .map_err(|source| ConfigError::TomlParse {
                    path: config_path.clone(),
                    source,
                })?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let server = toml_config.server;

        let address = cli
            .address
            .or(server.listen)
            .ok_or(ConfigError::MissingAddress)?;
        let transport = cli.transport.unwrap_or(server.transport);
        let endpoint = Endpoint::parse(&address, transport)?;

        let max_sessions = cli.max_sessions.unwrap_or(server.max_sessions);
        let stop_word = cli.stop_word.unwrap_or(toml_config.echo.stop_word);

        Ok(Config {
            endpoint,
            service: cli.protocol.unwrap_or(server.protocol),
            max_sessions: (max_sessions > 0).then_some(max_sessions),
            idle_timeout: non_zero_secs(cli.idle_timeout.unwrap_or(server.idle_timeout)),
            grace_period: Duration::from_secs(cli.grace_period.unwrap_or(server.grace_period)),
            stop_word: (!stop_word.trim().is_empty()).then(|| stop_word.trim().to_string()),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("no listen address given")]
    MissingAddress,

    #[error(transparent)]
    Endpoint(#[from] BindError),
}
