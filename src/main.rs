//! hash-server: a line-oriented digest service
//!
//! Every newline-terminated record received on a connection is answered
//! with its hex digest, in order, on the same connection.
//!
//! Features:
//! - SHA-224/256/384/512 record digests
//! - Records spanning any number of reads
//! - Worker-pool (tokio) or thread-per-core (mio) runtime
//! - Configuration via CLI arguments or TOML file

use clap::error::ErrorKind;
use hash_server::config::{Config, ConfigError, RuntimeType};
use hash_server::runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(ConfigError::Cli(e)) if e.kind() == ErrorKind::DisplayVersion => e.exit(),
        Err(ConfigError::Cli(e)) => {
            // Help and usage errors both end with a non-zero status.
            let _ = e.print();
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("{e}");
            eprintln!("To get help on program options use: hash-server -h");
            std::process::exit(2);
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        runtime = ?config.runtime,
        workers = config.worker_threads(),
        buffer_size = config.buffer_size,
        digest = ?config.digest,
        max_connections = config.max_connections,
        "Starting hash-server"
    );

    match config.runtime {
        RuntimeType::Pool => run_pool(config),
        RuntimeType::Mio => run_mio(config),
    }
}

/// Run with the tokio worker pool
fn run_pool(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Using worker pool runtime (tokio)");
    runtime::pool::run(config)?;
    Ok(())
}

/// Run with mio runtime (epoll on Linux, kqueue on macOS)
fn run_mio(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Using mio runtime (epoll/kqueue)");
    runtime::mio::run(config)?;
    Ok(())
}
