//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//! Uses epoll on Linux, kqueue on macOS.
//!
//! Each worker owns a listener bound with `SO_REUSEPORT`, so the kernel
//! spreads new connections across workers. A connection stays on the worker
//! that accepted it and is registered for either `READABLE` or `WRITABLE`,
//! whichever its session is waiting on.

use crate::config::Config;
use crate::digest::Hasher;
use crate::error::ConnectionError;
use crate::runtime::ConnectionRegistry;
use crate::session::{ReadStatus, Session, SessionState};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::thread;
use tracing::{debug, error, info, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);

const EVENTS_CAPACITY: usize = 1024;

/// Per-worker connection state for mio backend.
struct MioConnection {
    stream: TcpStream,
    peer: SocketAddr,
    session: Session<Hasher>,
    /// Interest currently registered with the poller.
    interest: Interest,
}

impl MioConnection {
    fn set_interest(&mut self, registry: &Registry, token: Token, interest: Interest) -> io::Result<()> {
        if self.interest != interest {
            registry.reregister(&mut self.stream, token, interest)?;
            self.interest = interest;
        }
        Ok(())
    }
}

/// Run the mio-based server.
pub fn run(config: Config) -> io::Result<()> {
    let num_workers = config.worker_threads();

    let addr: SocketAddr = config
        .listen_addr()
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    info!(
        workers = num_workers,
        addr = %addr,
        "Starting mio runtime"
    );

    let mut handles = Vec::with_capacity(num_workers);

    for worker_id in 0..num_workers {
        // Bind here so a bind failure stops startup instead of one worker.
        let listener = bind(addr)?;
        let config = config.clone();

        let handle = thread::Builder::new()
            .name(format!("worker-{worker_id}"))
            .spawn(move || {
                if let Err(e) = serve(worker_id, listener, &config) {
                    error!(worker = worker_id, error = %e, "Worker failed");
                }
            })?;

        handles.push(handle);
    }

    // Wait for all workers
    for handle in handles {
        let _ = handle.join();
    }

    Ok(())
}

/// Run one worker's event loop on an already bound listener.
///
/// Only returns on a poller failure.
pub fn serve(worker_id: usize, listener: std::net::TcpListener, config: &Config) -> io::Result<()> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(EVENTS_CAPACITY);

    listener.set_nonblocking(true)?;
    let mut listener = TcpListener::from_std(listener);
    poll.registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let mut connections: ConnectionRegistry<MioConnection> =
        ConnectionRegistry::new(config.max_connections);

    info!(
        worker = worker_id,
        buffer_size = config.buffer_size,
        digest = ?config.digest,
        max_connections = config.max_connections,
        "Worker started"
    );

    loop {
        if let Err(e) = poll.poll(&mut events, None) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(e);
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => {
                    accept_connections(&listener, poll.registry(), &mut connections, config, worker_id);
                }
                Token(conn_id) => {
                    let was_full = connections.is_full();
                    handle_connection_event(conn_id, poll.registry(), &mut connections);

                    // Connections left in the backlog while full raise no new
                    // listener event, so pick them up as soon as a slot frees.
                    if was_full && !connections.is_full() {
                        accept_connections(&listener, poll.registry(), &mut connections, config, worker_id);
                    }
                }
            }
        }
    }
}

fn accept_connections(
    listener: &TcpListener,
    registry: &Registry,
    connections: &mut ConnectionRegistry<MioConnection>,
    config: &Config,
    worker_id: usize,
) {
    loop {
        // Pending connections wait in the backlog until a slot frees.
        if connections.is_full() {
            warn!(
                worker = worker_id,
                max_connections = connections.capacity(),
                "Connection limit reached"
            );
            break;
        }

        match listener.accept() {
            Ok((stream, peer)) => {
                let conn = MioConnection {
                    stream,
                    peer,
                    session: Session::new(config.buffer_size, Hasher::new(config.digest)),
                    interest: Interest::READABLE,
                };
                let conn_id = match connections.insert(conn) {
                    Ok(id) => id,
                    Err(_) => continue,
                };

                let conn = match connections.get_mut(conn_id) {
                    Some(conn) => conn,
                    None => continue,
                };
                if let Err(e) = registry.register(&mut conn.stream, Token(conn_id), Interest::READABLE) {
                    error!(worker = worker_id, error = %e, "Failed to register connection");
                    connections.remove(conn_id);
                    continue;
                }

                debug!(
                    worker = worker_id,
                    conn_id,
                    peer = %peer,
                    active = connections.active(),
                    "Accepted connection"
                );
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(worker = worker_id, error = %e, "Failed to accept connection");
                break;
            }
        }
    }
}

fn handle_connection_event(
    conn_id: usize,
    registry: &Registry,
    connections: &mut ConnectionRegistry<MioConnection>,
) {
    let conn = match connections.get_mut(conn_id) {
        Some(conn) => conn,
        None => return,
    };

    match drive(conn, registry, Token(conn_id)) {
        Ok(()) if conn.session.is_closed() => close_connection(registry, connections, conn_id),
        Ok(()) => {}
        Err(e) => {
            debug!(conn_id, peer = %conn.peer, error = %e, "Connection error");
            conn.session.close();
            close_connection(registry, connections, conn_id);
        }
    }
}

/// Advance the session until it closes or the socket would block.
///
/// Edge-triggered readiness means the socket must be drained before
/// waiting for the next event.
fn drive(conn: &mut MioConnection, registry: &Registry, token: Token) -> Result<(), ConnectionError> {
    loop {
        match conn.session.state() {
            SessionState::Reading => {
                let (len, status) = match conn.stream.read(conn.session.read_buf()) {
                    Ok(0) => (0, ReadStatus::Eof),
                    Ok(n) => (n, ReadStatus::Ok),
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                        conn.set_interest(registry, token, Interest::READABLE)?;
                        return Ok(());
                    }
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!(peer = %conn.peer, error = %e, "Read failed, flushing open record");
                        (0, ReadStatus::Error)
                    }
                };
                conn.session.on_read(len, status)?;
            }
            SessionState::Writing { .. } => match conn.stream.write(conn.session.pending_output()) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0").into());
                }
                Ok(n) => {
                    conn.session.on_write(n)?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    conn.set_interest(registry, token, Interest::WRITABLE)?;
                    return Ok(());
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            },
            SessionState::Closed => return Ok(()),
        }
    }
}

fn close_connection(
    registry: &Registry,
    connections: &mut ConnectionRegistry<MioConnection>,
    conn_id: usize,
) {
    if let Some(mut conn) = connections.remove(conn_id) {
        let _ = registry.deregister(&mut conn.stream);
        let stats = conn.session.stats();
        debug!(
            conn_id,
            peer = %conn.peer,
            records = stats.records,
            bytes_in = stats.bytes_in,
            bytes_out = stats.bytes_out,
            active = connections.active(),
            "Connection closed"
        );
    }
}

/// Create a TCP listener with SO_REUSEPORT for kernel load balancing.
pub fn bind(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_port(true)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
