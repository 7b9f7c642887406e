//! Per-connection protocol state machine.
//!
//! A `Session` owns the read buffer, the open digest and the pending reply
//! bytes for one connection. It performs no I/O itself: a runtime issues the
//! read or write the current state asks for and reports the completion back.
//! Because a completion is only accepted in the matching state, reads and
//! writes strictly alternate and at most one of each is ever outstanding.
//!
//! ```text
//!            on_read(ok)                     on_write (drained)
//! Reading ───────────────▶ Writing ───────────────────────────▶ Reading
//!    │  ▲                     │
//!    │  └─ nothing to write   └─ on_write (drained, closing) ──▶ Closed
//!    └─ on_read(eof|error), nothing to write ──────────────────▶ Closed
//! ```

use crate::digest::DigestEngine;
use crate::error::SessionError;
use crate::splitter::RecordSplitter;
use bytes::BytesMut;

/// Current state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the next chunk from the peer.
    Reading,
    /// Draining digest lines back to the peer.
    Writing {
        /// Bytes of the pending output already written.
        written: usize,
        /// Total bytes pending.
        total: usize,
    },
    /// Both directions are done; the connection can be released.
    Closed,
}

/// How a read completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Bytes arrived and the stream is still open.
    Ok,
    /// The peer closed its sending side.
    Eof,
    /// The read failed; treated as end of stream.
    Error,
}

/// Per-session counters, logged when the connection closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub records: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

pub struct Session<D> {
    read_buf: Box<[u8]>,
    splitter: RecordSplitter<D>,
    pending: BytesMut,
    state: SessionState,
    /// Set once the peer reported end of stream or an error. No more reads
    /// are issued after that.
    closing: bool,
    bytes_in: u64,
    bytes_out: u64,
}

impl<D: DigestEngine> Session<D> {
    /// Create a session that is ready for its first read.
    ///
    /// `buffer_size` is the fixed read chunk size; it must be non-zero.
    pub fn new(buffer_size: usize, digest: D) -> Self {
        debug_assert!(buffer_size > 0, "read buffer must not be empty");
        Self {
            read_buf: vec![0u8; buffer_size].into_boxed_slice(),
            splitter: RecordSplitter::new(digest),
            pending: BytesMut::new(),
            state: SessionState::Reading,
            closing: false,
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Buffer the next read should fill.
    pub fn read_buf(&mut self) -> &mut [u8] {
        &mut self.read_buf
    }

    /// Report a finished read of `len` bytes into `read_buf`.
    ///
    /// Splits and hashes the chunk, then moves to `Writing` if any digest
    /// lines are pending. With nothing to write the session goes straight
    /// back to `Reading`, or to `Closed` once the stream has ended.
    pub fn on_read(&mut self, len: usize, status: ReadStatus) -> Result<SessionState, SessionError> {
        if self.state != SessionState::Reading {
            return Err(SessionError::UnexpectedRead(self.state));
        }
        if len > self.read_buf.len() {
            return Err(SessionError::ReadOverflow {
                len,
                capacity: self.read_buf.len(),
            });
        }

        let end_of_stream = status != ReadStatus::Ok;
        self.splitter
            .feed(&self.read_buf[..len], end_of_stream, &mut self.pending);
        self.bytes_in += len as u64;
        if end_of_stream {
            self.closing = true;
        }

        self.state = if !self.pending.is_empty() {
            SessionState::Writing {
                written: 0,
                total: self.pending.len(),
            }
        } else if self.closing {
            SessionState::Closed
        } else {
            SessionState::Reading
        };
        Ok(self.state)
    }

    /// Bytes the next write should send. Empty unless `Writing`.
    pub fn pending_output(&self) -> &[u8] {
        match self.state {
            SessionState::Writing { written, total } => &self.pending[written..total],
            _ => &[],
        }
    }

    /// Report that `len` bytes of `pending_output` were written.
    ///
    /// Partial writes keep the session in `Writing` with an advanced cursor.
    pub fn on_write(&mut self, len: usize) -> Result<SessionState, SessionError> {
        let (written, total) = match self.state {
            SessionState::Writing { written, total } => (written, total),
            other => return Err(SessionError::UnexpectedWrite(other)),
        };
        let remaining = total - written;
        if len > remaining {
            return Err(SessionError::WriteOverflow { len, remaining });
        }

        self.bytes_out += len as u64;
        let written = written + len;
        self.state = if written < total {
            SessionState::Writing { written, total }
        } else {
            self.pending.clear();
            if self.closing {
                SessionState::Closed
            } else {
                SessionState::Reading
            }
        };
        Ok(self.state)
    }

    /// Abandon the session after a write failure. Pending output is dropped
    /// since it can no longer be delivered.
    pub fn close(&mut self) {
        self.closing = true;
        self.pending.clear();
        self.state = SessionState::Closed;
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            records: self.splitter.records(),
            bytes_in: self.bytes_in,
            bytes_out: self.bytes_out,
        }
    }
}
