//! Content-addressed block arena and per-document commit indices.
//!
//! Blocks are written once under their hash and never mutated. Each block is
//! also indexed under its document by hash (for height and chain lookups) and
//! by height (for ordered history scans).

use crate::error::DagError;
use crate::keys::{self, DocKey};
use serde::{Deserialize, Serialize};
use tessera_core::{ContentHash, Delta, DeltaTarget};
use tessera_kv::Transaction;

/// What the commit index records about a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMeta {
    pub height: u64,
    pub target: DeltaTarget,
}

/// Block and commit-index access within one transaction.
pub struct BlockStore<'t, T: Transaction> {
    txn: &'t mut T,
}

impl<'t, T: Transaction> BlockStore<'t, T> {
    pub fn new(txn: &'t mut T) -> Self {
        BlockStore { txn }
    }

    pub fn contains(&mut self, hash: &ContentHash) -> Result<bool, DagError> {
        Ok(self.txn.has(&keys::block_key(hash))?)
    }

    pub fn get(&mut self, hash: &ContentHash) -> Result<Option<Vec<u8>>, DagError> {
        Ok(self.txn.get(&keys::block_key(hash))?)
    }

    /// Commit metadata of `hash` if it belongs to `doc`.
    pub fn meta(&mut self, doc: &DocKey, hash: &ContentHash) -> Result<Option<CommitMeta>, DagError> {
        match self.txn.get(&doc.commit_hash_key(hash))? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Write a block and its index entries. Returns `false` if it already existed.
    pub fn put(&mut self, doc: &DocKey, hash: &ContentHash, bytes: &[u8], delta: &Delta) -> Result<bool, DagError> {
        if self.contains(hash)? {
            return Ok(false);
        }
        let meta = CommitMeta {
            height: delta.height,
            target: delta.target.clone(),
        };
        self.txn.set(&keys::block_key(hash), bytes)?;
        self.txn.set(&doc.commit_hash_key(hash), &serde_json::to_vec(&meta)?)?;
        self.txn.set(
            &doc.commit_height_key(delta.height, hash),
            delta.target.to_string().as_bytes(),
        )?;
        Ok(true)
    }

    /// All commits of a document, highest first.
    pub fn commits_by_height_desc(&mut self, doc: &DocKey) -> Result<Vec<(u64, ContentHash)>, DagError> {
        let prefix = doc.commit_height_prefix();
        let mut entries = Vec::new();
        for (key, _) in self.txn.iterate(&prefix)? {
            let tail = keys::suffix(&key, &prefix)
                .ok_or_else(|| DagError::Corrupt("non utf-8 commit key".to_string()))?;
            let entry = keys::parse_height_suffix(tail)
                .ok_or_else(|| DagError::Corrupt(format!("bad commit key {}", tail)))?;
            entries.push(entry);
        }
        entries.reverse();
        Ok(entries)
    }
}
