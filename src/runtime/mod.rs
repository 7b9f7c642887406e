//! I/O runtimes that drive sessions.
//!
//! Both backends share the same `Session` state machine:
//! - `pool`: fixed tokio worker pool sharing one I/O driver (default)
//! - `mio`: one readiness loop per worker thread (epoll/kqueue)

pub mod connection;
pub mod mio;
pub mod pool;

pub use connection::ConnectionRegistry;
