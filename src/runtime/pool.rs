//! Worker-pool runtime.
//!
//! A tokio multi-thread runtime with a fixed number of worker threads shares
//! one I/O driver. Every accepted connection becomes a task that drives its
//! `Session`; the task may resume on any worker, and the session's state
//! machine keeps its reads and writes strictly alternating.

use crate::config::Config;
use crate::digest::{DigestEngine, Hasher};
use crate::error::ConnectionError;
use crate::session::{ReadStatus, Session, SessionState, SessionStats};
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Server instance
pub struct Server {
    config: Config,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        let connection_limit = Arc::new(Semaphore::new(config.max_connections));
        Server {
            config,
            connection_limit,
        }
    }

    /// Bind the configured address and serve until Ctrl-C.
    pub async fn run(&self) -> io::Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        info!(address = %listener.local_addr()?, "Server listening");
        self.serve(listener, shutdown_signal()).await
    }

    /// Accept connections on `listener` until `shutdown` resolves.
    ///
    /// Sessions spawned before that point are not awaited; they end when the
    /// runtime that owns them is dropped. Once `max_connections` sessions are
    /// open, further connections wait in the listen backlog.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            if self.connection_limit.available_permits() == 0 {
                warn!(
                    max_connections = self.config.max_connections,
                    "Connection limit reached"
                );
            }

            // Wait for a connection slot
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = self.connection_limit.clone().acquire_owned() => {
                    permit.map_err(io::Error::other)?
                }
            };

            let accepted = tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");

                    let session =
                        Session::new(self.config.buffer_size, Hasher::new(self.config.digest));

                    tokio::spawn(async move {
                        match handle_connection(stream, session).await {
                            Ok(stats) => debug!(
                                peer = %addr,
                                records = stats.records,
                                bytes_in = stats.bytes_in,
                                bytes_out = stats.bytes_out,
                                "Connection closed"
                            ),
                            Err(e) => debug!(peer = %addr, error = %e, "Connection error"),
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }

        info!("Shutdown requested, no longer accepting connections");
        Ok(())
    }
}

/// Start the worker pool and run the server on it.
pub fn run(config: Config) -> io::Result<()> {
    let workers = config.worker_threads();
    info!(workers, "Starting worker pool");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .thread_name("worker")
        .enable_all()
        .build()?;

    runtime.block_on(async move { Server::new(config).run().await })
}

/// Drive one session over `stream` until it closes.
///
/// A read error is treated as end of stream so the open record still gets
/// its digest; a write error ends the session at once.
pub async fn handle_connection<S, D>(
    mut stream: S,
    mut session: Session<D>,
) -> Result<SessionStats, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    D: DigestEngine,
{
    loop {
        match session.state() {
            SessionState::Reading => {
                let (len, status) = match stream.read(session.read_buf()).await {
                    Ok(0) => (0, ReadStatus::Eof),
                    Ok(n) => (n, ReadStatus::Ok),
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!(error = %e, "Read failed, flushing open record");
                        (0, ReadStatus::Error)
                    }
                };
                session.on_read(len, status)?;
            }
            SessionState::Writing { .. } => match stream.write(session.pending_output()).await {
                Ok(0) => {
                    session.close();
                    return Err(io::Error::from(io::ErrorKind::WriteZero).into());
                }
                Ok(n) => {
                    session.on_write(n)?;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    session.close();
                    return Err(e.into());
                }
            },
            SessionState::Closed => break,
        }
    }

    // The peer may already be gone; nothing is left to deliver either way.
    let _ = stream.shutdown().await;
    Ok(session.stats())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
