//! Error types shared by the session state machine and the runtimes.

use crate::session::SessionState;
use thiserror::Error;

/// Misuse of the session state machine by a runtime driver.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("read completion delivered while {0:?}")]
    UnexpectedRead(SessionState),

    #[error("write completion delivered while {0:?}")]
    UnexpectedWrite(SessionState),

    #[error("read of {len} bytes exceeds buffer of {capacity} bytes")]
    ReadOverflow { len: usize, capacity: usize },

    #[error("write of {len} bytes exceeds {remaining} pending bytes")]
    WriteOverflow { len: usize, remaining: usize },
}

/// Failure of a single connection. Never affects other connections.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session error: {0}")]
    Session(#[from] SessionError),
}
