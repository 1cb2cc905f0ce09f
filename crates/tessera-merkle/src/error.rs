//! Errors raised while recording or resolving DAG entries.

use tessera_core::{CodecError, ContentHash};
use tessera_kv::KvError;

/// Errors from DAG bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DagError {
    /// A predecessor or linked field delta is not present locally.
    MissingPredecessor(ContentHash),

    /// The declared height does not follow from the predecessors.
    InvalidHeight {
        hash: ContentHash,
        expected: u64,
        found: u64,
    },

    /// A reference points at a delta belonging to a different chain.
    InvalidReference { hash: ContentHash, reference: ContentHash },

    /// Stored DAG metadata could not be read back.
    Corrupt(String),

    Storage(KvError),

    Codec(CodecError),
}

impl std::fmt::Display for DagError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DagError::MissingPredecessor(h) => write!(f, "missing predecessor: {}", h.short()),
            DagError::InvalidHeight { hash, expected, found } => write!(
                f,
                "invalid height for {}: expected {}, found {}",
                hash.short(),
                expected,
                found
            ),
            DagError::InvalidReference { hash, reference } => write!(
                f,
                "{} references {} from another chain",
                hash.short(),
                reference.short()
            ),
            DagError::Corrupt(e) => write!(f, "corrupt dag metadata: {}", e),
            DagError::Storage(e) => write!(f, "storage error: {}", e),
            DagError::Codec(e) => write!(f, "codec error: {}", e),
        }
    }
}

impl std::error::Error for DagError {}

impl From<KvError> for DagError {
    fn from(e: KvError) -> Self {
        DagError::Storage(e)
    }
}

impl From<CodecError> for DagError {
    fn from(e: CodecError) -> Self {
        DagError::Codec(e)
    }
}

impl From<serde_json::Error> for DagError {
    fn from(e: serde_json::Error) -> Self {
        DagError::Corrupt(e.to_string())
    }
}

/// Errors from gap-repair resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolveError {
    /// Ancestor traversal went deeper than allowed.
    MaxDepthExceeded { depth: usize },

    /// More blocks were needed than a single resolution may collect.
    TooManyBlocks { limit: usize },

    /// A fetched block belongs to another document.
    ForeignBlock(ContentHash),

    /// The collected blocks reference each other in a loop.
    Cycle,
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::MaxDepthExceeded { depth } => write!(f, "maximum traversal depth {} exceeded", depth),
            ResolveError::TooManyBlocks { limit } => write!(f, "more than {} blocks to resolve", limit),
            ResolveError::ForeignBlock(h) => write!(f, "block {} belongs to another document", h.short()),
            ResolveError::Cycle => write!(f, "reference cycle among fetched blocks"),
        }
    }
}

impl std::error::Error for ResolveError {}
