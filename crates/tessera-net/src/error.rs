//! Error types for peer-to-peer sync.

use crate::peer::PeerId;
use tessera_core::{CodecError, ContentHash};
use tessera_db::{DbError, ErrorClass};
use tessera_merkle::ResolveError;
use thiserror::Error;

/// Transport failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Peer unreachable: {0}")]
    Unreachable(PeerId),

    #[error("Not connected to {0}")]
    NotConnected(PeerId),

    #[error("Request to {0} timed out")]
    Timeout(PeerId),

    #[error("Incoming stream already taken")]
    AlreadySubscribed,

    #[error("Transport closed")]
    Closed,

    #[error("Frame encoding failed: {0}")]
    Codec(String),
}

impl NetworkError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NetworkError::Unreachable(_) | NetworkError::NotConnected(_) | NetworkError::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for NetworkError {
    fn from(err: serde_json::Error) -> Self {
        NetworkError::Codec(err.to_string())
    }
}

/// Errors from dispatching, receiving or reconciling commits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("Invalid block: {0}")]
    Codec(#[from] CodecError),

    #[error("Resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Peer {peer} rejected the request: {message}")]
    Remote { peer: PeerId, message: String },

    #[error("Block not found: {}", .0.short())]
    BlockNotFound(ContentHash),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("A node cannot replicate to itself")]
    SelfReplicator,

    #[error("Replicator not found: {0}")]
    ReplicatorNotFound(PeerId),

    #[error("Configured peer id {configured} does not match transport id {transport}")]
    IdentityMismatch { configured: String, transport: PeerId },

    #[error("Timed out waiting for sync")]
    WaitTimeout,

    #[error("Cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::Network(e) if e.is_retryable() => ErrorClass::Retryable,
            SyncError::Network(_) => ErrorClass::Permanent,
            SyncError::Db(e) => e.class(),
            SyncError::Codec(CodecError::SchemaMismatch { .. }) => ErrorClass::Schema,
            SyncError::Codec(_) | SyncError::BlockNotFound(_) => ErrorClass::CausalIntegrity,
            SyncError::Resolve(ResolveError::ForeignBlock(_) | ResolveError::Cycle) => ErrorClass::CausalIntegrity,
            SyncError::Resolve(_) => ErrorClass::ResourceExhausted,
            SyncError::ReplicatorNotFound(_) => ErrorClass::NotFound,
            SyncError::WaitTimeout => ErrorClass::Retryable,
            _ => ErrorClass::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let peer = PeerId::new("b");
        assert!(SyncError::from(NetworkError::Timeout(peer.clone())).is_retryable());
        assert_eq!(
            SyncError::from(NetworkError::Codec("x".into())).class(),
            ErrorClass::Permanent
        );
        assert_eq!(
            SyncError::from(ResolveError::MaxDepthExceeded { depth: 3 }).class(),
            ErrorClass::ResourceExhausted
        );
        assert_eq!(
            SyncError::from(CodecError::HashMismatch {
                expected: ContentHash::digest(b"a"),
                actual: ContentHash::digest(b"b"),
            })
            .class(),
            ErrorClass::CausalIntegrity
        );
        assert_eq!(
            SyncError::from(DbError::MissingPredecessor(ContentHash::digest(b"a"))).class(),
            ErrorClass::CausalIntegrity
        );
    }
}
