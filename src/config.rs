//! Configuration module for hash-server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::digest::DigestAlgorithm;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Lowest port the service agrees to bind.
pub const MIN_PORT: u16 = 1024;

/// Command-line arguments for the hash server
#[derive(Parser, Debug)]
#[command(name = "hash-server")]
#[command(author = "hash-server authors")]
#[command(version = "0.1.0")]
#[command(
    about = "Replies with the hex digest of every newline-terminated record",
    long_about = None
)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// TCP port to serve on, in the range 1024-65535
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Read chunk size per connection in bytes
    #[arg(short, long)]
    pub buffer_size: Option<usize>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// I/O runtime
    #[arg(short, long, value_enum)]
    pub runtime: Option<RuntimeType>,

    /// Digest algorithm applied to each record
    #[arg(short, long, value_enum)]
    pub digest: Option<DigestAlgorithm>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// I/O runtime driving the sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// Fixed pool of worker threads sharing one I/O driver (tokio).
    #[default]
    Pool,
    /// One readiness loop per worker thread (epoll/kqueue via mio).
    Mio,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Number of worker threads
    pub workers: Option<usize>,
    #[serde(default)]
    pub runtime: RuntimeType,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: None,
            runtime: RuntimeType::default(),
            max_connections: default_max_connections(),
        }
    }
}

/// Per-connection configuration
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Read chunk size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Digest algorithm
    #[serde(default)]
    pub digest: DigestAlgorithm,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            digest: DigestAlgorithm::default(),
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

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    59999
}

fn default_buffer_size() -> usize {
    2 * 1024
}

fn default_max_connections() -> usize {
    10000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// 0 means one worker per available core.
    pub workers: usize,
    pub runtime: RuntimeType,
    pub max_connections: usize,
    pub buffer_size: usize,
    pub digest: DigestAlgorithm,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let TomlConfig {
            server,
            session,
            logging,
        } = TomlConfig::default();

        Config {
            host: server.host,
            port: server.port,
            workers: server.workers.unwrap_or(0),
            runtime: server.runtime,
            max_connections: server.max_connections,
            buffer_size: session.buffer_size,
            digest: session.digest,
            log_level: logging.level,
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::try_parse()?)
    }

    /// Resolve already-parsed CLI args against the optional config file.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port: cli.port.unwrap_or(toml_config.server.port),
            workers: cli.workers.or(toml_config.server.workers).unwrap_or(0),
            runtime: cli.runtime.unwrap_or(toml_config.server.runtime),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            buffer_size: cli
                .buffer_size
                .unwrap_or(toml_config.session.buffer_size),
            digest: cli.digest.unwrap_or(toml_config.session.digest),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// Reject values the server cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port < MIN_PORT {
            return Err(ConfigError::InvalidPort(self.port));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize);
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections);
        }
        Ok(())
    }

    /// `host:port` string for binding.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Worker threads to start, resolving 0 to the core count.
    pub fn worker_threads(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.workers
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, toml::de::Error),

    #[error(transparent)]
    Cli(#[from] clap::Error),

    #[error("Invalid port number {0}: port must be in the range {MIN_PORT}-65535")]
    InvalidPort(u16),

    #[error("Invalid buffer size: must be at least 1 byte")]
    InvalidBufferSize,

    #[error("Invalid max connections: must be at least 1")]
    InvalidMaxConnections,
}
