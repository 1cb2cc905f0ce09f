//! Error types for the database layer.

use tessera_core::{CodecError, ContentHash, CrdtError, DocumentId};
use tessera_kv::KvError;
use tessera_merkle::DagError;
use thiserror::Error;

/// How a caller should treat a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; retrying the same call may succeed.
    Retryable,
    /// The delta is causally invalid or corrupt and was not merged.
    CausalIntegrity,
    /// Unknown schema version, unknown field or invalid value.
    Schema,
    /// A retry, depth or size budget ran out.
    ResourceExhausted,
    NotFound,
    Permanent,
}

/// Errors that can occur in database operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("Document already exists: {0}")]
    DocumentAlreadyExists(DocumentId),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Collection already exists: {0}")]
    CollectionAlreadyExists(String),

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Field {field} does not exist in collection {collection}")]
    FieldNotExist { collection: String, field: String },

    #[error("Field {field} already exists in collection {collection}")]
    FieldAlreadyExists { collection: String, field: String },

    #[error("Invalid value for field {field}: {source}")]
    InvalidFieldValue { field: String, source: CrdtError },

    #[error("Unknown schema version: {0}")]
    SchemaMismatch(String),

    #[error("Missing predecessor: {}", .0.short())]
    MissingPredecessor(ContentHash),

    #[error("Invalid height for {}: expected {expected}, found {found}", .hash.short())]
    InvalidHeight {
        hash: ContentHash,
        expected: u64,
        found: u64,
    },

    #[error("Malformed delta: {0}")]
    MalformedDelta(String),

    #[error("Delta does not belong to {collection}/{doc_id}")]
    DocumentMismatch { collection: String, doc_id: DocumentId },

    #[error("Commit not found: {}", .0.short())]
    CommitNotFound(ContentHash),

    #[error("Gave up after {attempts} conflicting transaction attempts")]
    MaxRetriesExceeded { attempts: usize },

    #[error("Merge failed: {0}")]
    Merge(#[from] CrdtError),

    #[error("Storage error: {0}")]
    Storage(#[from] KvError),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl DbError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DbError::Storage(e) if e.is_conflict() => ErrorClass::Retryable,
            DbError::MissingPredecessor(_)
            | DbError::InvalidHeight { .. }
            | DbError::MalformedDelta(_)
            | DbError::DocumentMismatch { .. }
            | DbError::Merge(_) => ErrorClass::CausalIntegrity,
            DbError::SchemaMismatch(_)
            | DbError::FieldNotExist { .. }
            | DbError::FieldAlreadyExists { .. }
            | DbError::InvalidFieldValue { .. }
            | DbError::InvalidName(_) => ErrorClass::Schema,
            DbError::MaxRetriesExceeded { .. } => ErrorClass::ResourceExhausted,
            DbError::DocumentNotFound(_) | DbError::CollectionNotFound(_) | DbError::CommitNotFound(_) => {
                ErrorClass::NotFound
            }
            _ => ErrorClass::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::SerializationError(err.to_string())
    }
}

impl From<CodecError> for DbError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::SchemaMismatch { version } => DbError::SchemaMismatch(version),
            CodecError::Encode(e) => DbError::SerializationError(e),
            other => DbError::MalformedDelta(other.to_string()),
        }
    }
}

impl From<DagError> for DbError {
    fn from(err: DagError) -> Self {
        match err {
            DagError::MissingPredecessor(hash) => DbError::MissingPredecessor(hash),
            DagError::InvalidHeight { hash, expected, found } => DbError::InvalidHeight { hash, expected, found },
            DagError::InvalidReference { .. } => DbError::MalformedDelta(err.to_string()),
            DagError::Corrupt(e) => DbError::SerializationError(e),
            DagError::Storage(e) => DbError::Storage(e),
            DagError::Codec(e) => e.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
