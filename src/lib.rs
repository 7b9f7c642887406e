//! hash-server: replies to every newline-terminated record with its digest.
//!
//! For each TCP connection the byte stream is split on `\n`, each record
//! (newline included) is hashed, and one `UPPERCASE_HEX_DIGEST\n` line is
//! written back per record, in order. A trailing record without a newline is
//! hashed when the peer closes.

pub mod config;
pub mod digest;
pub mod error;
pub mod runtime;
pub mod session;
pub mod splitter;
