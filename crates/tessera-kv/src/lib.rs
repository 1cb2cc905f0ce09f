//! # tessera-kv
//!
//! The transactional key-value interface the document store runs on, plus an
//! in-memory implementation with snapshot isolation and optimistic conflict
//! detection.
//!
//! ```rust
//! use tessera_kv::{KvStore, MemoryStore, Transaction};
//!
//! let store = MemoryStore::new();
//! let mut txn = store.new_txn(false).unwrap();
//! txn.set(b"/users/1", b"alice").unwrap();
//! txn.commit().unwrap();
//!
//! let mut read = store.new_txn(true).unwrap();
//! assert_eq!(read.get(b"/users/1").unwrap(), Some(b"alice".to_vec()));
//! ```

mod error;
mod memory;

pub use error::{KvError, Result};
pub use memory::{MemoryStore, MemoryTxn};

/// Ordered `(key, value)` pairs returned by a prefix scan.
pub type KvIter = std::vec::IntoIter<(Vec<u8>, Vec<u8>)>;

/// A store that hands out transactions.
pub trait KvStore: Send + Sync + 'static {
    type Txn: Transaction;

    /// Open a transaction over a consistent snapshot of the store.
    fn new_txn(&self, read_only: bool) -> Result<Self::Txn>;
}

/// A snapshot-isolated transaction.
///
/// Reads see the snapshot taken when the transaction opened plus the
/// transaction's own writes. `commit` fails with [`KvError::Conflict`] when a
/// key read or written here was committed by someone else in the meantime.
pub trait Transaction: Send {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn has(&mut self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// All live entries whose key starts with `prefix`, in key order.
    fn iterate(&mut self, prefix: &[u8]) -> Result<KvIter>;

    fn commit(self) -> Result<()>;

    fn discard(self);
}
