//! Incremental digest capability used by the record splitter.
//!
//! The splitter only needs `update`, `finalize_reset` and `reset`, so the
//! concrete algorithm stays pluggable. `Hasher` is the production
//! implementation and covers the SHA-2 family via the `sha2` crate.

use bytes::BytesMut;
use clap::ValueEnum;
use serde::Deserialize;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

/// Stateful incremental hash.
pub trait DigestEngine: Send {
    /// Feed bytes into the open digest.
    fn update(&mut self, data: &[u8]);

    /// Finish the open digest, return it and start a fresh one.
    fn finalize_reset(&mut self) -> Vec<u8>;

    /// Discard any bytes fed since the last finalize.
    fn reset(&mut self);
}

/// Digest algorithm selectable from the CLI or config file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

#[cfg(test)]
impl DigestAlgorithm {
    /// Size of one digest in bytes.
    pub fn output_size(self) -> usize {
        match self {
            DigestAlgorithm::Sha224 => 28,
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    /// Length of one reply line: two hex chars per byte plus `\n`.
    pub fn line_len(self) -> usize {
        self.output_size() * 2 + 1
    }
}

/// SHA-2 hasher selected at runtime.
#[derive(Clone)]
pub enum Hasher {
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl Hasher {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha224 => Hasher::Sha224(Sha224::new()),
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            DigestAlgorithm::Sha384 => Hasher::Sha384(Sha384::new()),
            DigestAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }
}

impl DigestEngine for Hasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha224(h) => Digest::update(h, data),
            Hasher::Sha256(h) => Digest::update(h, data),
            Hasher::Sha384(h) => Digest::update(h, data),
            Hasher::Sha512(h) => Digest::update(h, data),
        }
    }

    fn finalize_reset(&mut self) -> Vec<u8> {
        match self {
            Hasher::Sha224(h) => h.finalize_reset().to_vec(),
            Hasher::Sha256(h) => h.finalize_reset().to_vec(),
            Hasher::Sha384(h) => h.finalize_reset().to_vec(),
            Hasher::Sha512(h) => h.finalize_reset().to_vec(),
        }
    }

    fn reset(&mut self) {
        match self {
            Hasher::Sha224(h) => Digest::reset(h),
            Hasher::Sha256(h) => Digest::reset(h),
            Hasher::Sha384(h) => Digest::reset(h),
            Hasher::Sha512(h) => Digest::reset(h),
        }
    }
}

/// Append `digest` as uppercase hex followed by `\n`.
pub fn push_hex_line(digest: &[u8], output: &mut BytesMut) {
    output.extend_from_slice(hex::encode_upper(digest).as_bytes());
    output.extend_from_slice(b"\n");
}
