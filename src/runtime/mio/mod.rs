//! mio-based event loop implementation.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS).
//! Thread-per-core: every worker runs its own poller and listener.

mod event_loop;

pub use event_loop::{bind, run, serve};
