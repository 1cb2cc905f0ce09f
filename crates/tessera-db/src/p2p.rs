//! Replication bookkeeping kept alongside documents.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tessera_core::DocumentId;

/// A configured replication target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatorRecord {
    pub peer: String,
    pub collections: BTreeSet<String>,
}

impl ReplicatorRecord {
    pub fn new(peer: impl Into<String>) -> Self {
        ReplicatorRecord {
            peer: peer.into(),
            collections: BTreeSet::new(),
        }
    }

    pub fn replicates(&self, collection: &str) -> bool {
        self.collections.contains(collection)
    }
}

/// A document whose heads a replicator has not acknowledged yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryEntry {
    pub peer: String,
    pub collection: String,
    pub doc_id: DocumentId,
}

impl RetryEntry {
    pub fn new(peer: impl Into<String>, collection: impl Into<String>, doc_id: DocumentId) -> Self {
        RetryEntry {
            peer: peer.into(),
            collection: collection.into(),
            doc_id,
        }
    }

    pub(crate) fn key(&self) -> Vec<u8> {
        tessera_merkle::keys::retry_key(&self.peer, &self.collection, &self.doc_id)
    }
}
