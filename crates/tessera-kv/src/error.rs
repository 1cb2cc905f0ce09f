use thiserror::Error;

/// Errors from the key-value layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KvError {
    /// A concurrent commit invalidated this transaction's reads or writes.
    #[error("transaction conflict")]
    Conflict,

    #[error("write attempted on a read-only transaction")]
    ReadOnly,

    #[error("storage failure: {0}")]
    Storage(String),
}

impl KvError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, KvError::Conflict)
    }
}

pub type Result<T> = std::result::Result<T, KvError>;
