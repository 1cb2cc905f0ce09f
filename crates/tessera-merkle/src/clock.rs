//! Merkle clock: admits deltas into a document's DAG.
//!
//! A delta is admitted only when every predecessor and linked field delta is
//! already present in the same document, each predecessor sits on the same
//! chain, and the declared height is exactly one past the highest
//! predecessor. Heights are always recomputed locally.

use crate::error::DagError;
use crate::heads::{Head, HeadSet};
use crate::keys::DocKey;
use crate::store::BlockStore;
use tessera_core::{ContentHash, Delta, DeltaTarget};
use tessera_kv::Transaction;
use tracing::trace;

/// Outcome of admitting a delta.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    /// The delta was new and is now a head of its chain.
    Added,
    /// The delta was already present; nothing was written.
    Known,
}

pub struct MerkleClock<'a> {
    doc: &'a DocKey,
}

impl<'a> MerkleClock<'a> {
    pub fn new(doc: &'a DocKey) -> Self {
        MerkleClock { doc }
    }

    /// Height a delta with these predecessors must declare.
    pub fn expected_height<T: Transaction>(
        &self,
        txn: &mut T,
        delta: &Delta,
        hash: &ContentHash,
    ) -> Result<u64, DagError> {
        let mut store = BlockStore::new(txn);
        let mut max = 0;
        for pred in &delta.predecessors {
            let meta = store
                .meta(self.doc, pred)?
                .ok_or(DagError::MissingPredecessor(*pred))?;
            if meta.target != delta.target {
                return Err(DagError::InvalidReference {
                    hash: *hash,
                    reference: *pred,
                });
            }
            max = max.max(meta.height);
        }
        for link in &delta.links {
            let meta = store
                .meta(self.doc, &link.hash)?
                .ok_or(DagError::MissingPredecessor(link.hash))?;
            if meta.target != DeltaTarget::Field(link.field.clone()) {
                return Err(DagError::InvalidReference {
                    hash: *hash,
                    reference: link.hash,
                });
            }
        }
        Ok(max + 1)
    }

    /// Validate and record a delta, updating the head set of its chain.
    pub fn admit<T: Transaction>(
        &self,
        txn: &mut T,
        hash: &ContentHash,
        bytes: &[u8],
        delta: &Delta,
    ) -> Result<Admission, DagError> {
        if BlockStore::new(txn).contains(hash)? {
            return Ok(Admission::Known);
        }
        if delta.doc_id != *self.doc.doc_id() {
            return Err(DagError::Corrupt(format!(
                "delta {} belongs to {}",
                hash.short(),
                delta.doc_id
            )));
        }

        let expected = self.expected_height(txn, delta, hash)?;
        if expected != delta.height {
            return Err(DagError::InvalidHeight {
                hash: *hash,
                expected,
                found: delta.height,
            });
        }

        BlockStore::new(txn).put(self.doc, hash, bytes, delta)?;
        HeadSet::new(self.doc, &delta.target).replace(
            txn,
            &delta.predecessors,
            Head {
                hash: *hash,
                height: delta.height,
            },
        )?;
        trace!(doc = %self.doc.doc_id(), target = %delta.target, hash = %hash.short(), height = delta.height, "delta admitted");
        Ok(Admission::Added)
    }
}
