//! Head sets: the current maximal deltas of one chain.

use crate::error::DagError;
use crate::keys::{self, DocKey};
use tessera_core::{ContentHash, DeltaTarget};
use tessera_kv::Transaction;

/// A head and its height.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Head {
    pub hash: ContentHash,
    pub height: u64,
}

/// Heads of one field chain or of the composite chain of a document.
pub struct HeadSet<'a> {
    doc: &'a DocKey,
    target: &'a DeltaTarget,
}

impl<'a> HeadSet<'a> {
    pub fn new(doc: &'a DocKey, target: &'a DeltaTarget) -> Self {
        HeadSet { doc, target }
    }

    /// Current heads ordered by hash.
    pub fn list<T: Transaction>(&self, txn: &mut T) -> Result<Vec<Head>, DagError> {
        let prefix = self.doc.head_prefix(self.target);
        let mut heads = Vec::new();
        for (key, value) in txn.iterate(&prefix)? {
            let hash = keys::suffix(&key, &prefix)
                .and_then(ContentHash::from_hex)
                .ok_or_else(|| DagError::Corrupt("bad head key".to_string()))?;
            let height = std::str::from_utf8(&value)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| DagError::Corrupt(format!("bad head height for {}", hash.short())))?;
            heads.push(Head { hash, height });
        }
        Ok(heads)
    }

    /// Predecessors and height for a new delta on top of the current heads.
    pub fn next<T: Transaction>(&self, txn: &mut T) -> Result<(Vec<ContentHash>, u64), DagError> {
        let heads = self.list(txn)?;
        let height = heads.iter().map(|h| h.height).max().unwrap_or(0) + 1;
        Ok((heads.into_iter().map(|h| h.hash).collect(), height))
    }

    /// Replace `superseded` heads with `head`.
    pub fn replace<T: Transaction>(&self, txn: &mut T, superseded: &[ContentHash], head: Head) -> Result<(), DagError> {
        for hash in superseded {
            txn.delete(&self.doc.head_key(self.target, hash))?;
        }
        txn.set(
            &self.doc.head_key(self.target, &head.hash),
            head.height.to_string().as_bytes(),
        )?;
        Ok(())
    }
}
