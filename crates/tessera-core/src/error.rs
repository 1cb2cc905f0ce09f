//! Error types for encoding and merging deltas.

use crate::hash::ContentHash;
use thiserror::Error;

/// Errors from the delta codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed delta: {0}")]
    Decode(String),

    #[error("unknown schema version: {version}")]
    SchemaMismatch { version: String },

    #[error("hash mismatch: expected {}, got {}", .expected.short(), .actual.short())]
    HashMismatch {
        expected: ContentHash,
        actual: ContentHash,
    },

    #[error("encoding failed: {0}")]
    Encode(String),
}

impl From<postcard::Error> for CodecError {
    fn from(err: postcard::Error) -> Self {
        CodecError::Decode(err.to_string())
    }
}

/// Errors raised by field merge functions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrdtError {
    #[error("{kind} field cannot hold a {found} value")]
    InvalidValue { kind: &'static str, found: &'static str },

    #[error("counter value type changed from {existing} to {incoming}")]
    CounterTypeMismatch {
        existing: &'static str,
        incoming: &'static str,
    },

    #[error("grow-only counter cannot apply negative increment")]
    NegativeIncrement,
}
