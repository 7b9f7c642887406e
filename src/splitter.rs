//! Record splitter.
//!
//! Turns arbitrary read chunks into digest lines. A record is every byte up to
//! and including `\n`; bytes after the last newline of a chunk stay in the open
//! digest and are carried into the next chunk. The newline itself is hashed,
//! and `\r` is ordinary payload.

use crate::digest::{push_hex_line, DigestEngine};
use bytes::BytesMut;

/// Splits a byte stream into records and hashes each one exactly once.
pub struct RecordSplitter<D> {
    digest: D,
    /// Bytes fed into the open digest since the last record boundary.
    open_len: usize,
    records: u64,
}

impl<D: DigestEngine> RecordSplitter<D> {
    pub fn new(mut digest: D) -> Self {
        digest.reset();
        Self {
            digest,
            open_len: 0,
            records: 0,
        }
    }

    /// Feed one chunk and append a digest line to `output` for every record
    /// it completes.
    ///
    /// With `end_of_stream` set, a non-empty unterminated record is finalized
    /// as the last record of the stream. Returns the number of lines appended.
    pub fn feed(&mut self, chunk: &[u8], end_of_stream: bool, output: &mut BytesMut) -> usize {
        let mut emitted = 0;
        let mut rest = chunk;

        while let Some(pos) = find_newline(rest) {
            let (record, tail) = rest.split_at(pos + 1);
            self.digest.update(record);
            self.finish_record(output);
            emitted += 1;
            rest = tail;
        }

        if !rest.is_empty() {
            self.digest.update(rest);
            self.open_len += rest.len();
        }

        if end_of_stream && self.open_len > 0 {
            self.finish_record(output);
            emitted += 1;
        }

        emitted
    }

    /// Length of the record currently being carried over.
    pub fn open_len(&self) -> usize {
        self.open_len
    }

    /// Records finalized so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    fn finish_record(&mut self, output: &mut BytesMut) {
        let digest = self.digest.finalize_reset();
        push_hex_line(&digest, output);
        self.open_len = 0;
        self.records += 1;
    }
}

fn find_newline(buffer: &[u8]) -> Option<usize> {
    buffer.iter().position(|&b| b == b'\n')
}
