//! Read-only views of committed deltas.

use crate::error::{DbError, Result};
use tessera_core::codec::{self, AnySchema};
use tessera_core::{ContentHash, DeltaTarget, DocumentId, FieldLink};
use tessera_kv::Transaction;
use tessera_merkle::{BlockStore, DocKey};

/// A committed delta.
#[derive(Clone, Debug, PartialEq)]
pub struct Commit {
    pub hash: ContentHash,
    pub height: u64,
    pub target: DeltaTarget,
    pub doc_id: DocumentId,
    pub collection: String,
    pub schema_version: String,
    /// The encoded block exactly as stored.
    pub block: Vec<u8>,
    pub predecessors: Vec<ContentHash>,
    pub links: Vec<FieldLink>,
}

impl Commit {
    /// Project a stored block.
    pub(crate) fn from_block(collection: &str, hash: ContentHash, block: Vec<u8>) -> Result<Self> {
        let delta = codec::decode(&block, AnySchema)?;
        Ok(Commit {
            hash,
            height: delta.height,
            target: delta.target,
            doc_id: delta.doc_id,
            collection: collection.to_string(),
            schema_version: delta.schema_version,
            block,
            predecessors: delta.predecessors,
            links: delta.links,
        })
    }
}

/// Every commit of one document, highest first.
///
/// Owns the read-only transaction it scans, so it reflects a single snapshot.
/// Once exhausted it stays exhausted.
pub struct CommitIter<T: Transaction> {
    txn: T,
    collection: String,
    entries: std::vec::IntoIter<(u64, ContentHash)>,
}

impl<T: Transaction> CommitIter<T> {
    pub(crate) fn new(mut txn: T, doc: &DocKey) -> Result<Self> {
        let entries = BlockStore::new(&mut txn).commits_by_height_desc(doc)?;
        Ok(CommitIter {
            txn,
            collection: doc.collection().to_string(),
            entries: entries.into_iter(),
        })
    }
}

impl<T: Transaction> Iterator for CommitIter<T> {
    type Item = Result<Commit>;

    fn next(&mut self) -> Option<Self::Item> {
        let (_, hash) = self.entries.next()?;
        let loaded = BlockStore::new(&mut self.txn)
            .get(&hash)
            .map_err(DbError::from)
            .and_then(|block| block.ok_or(DbError::CommitNotFound(hash)))
            .and_then(|block| Commit::from_block(&self.collection, hash, block));
        Some(loaded)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}
