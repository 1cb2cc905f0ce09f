//! Materialized documents.

use crate::collection::Collection;
use crate::error::{DbError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tessera_core::{ContentHash, DocStatus, DocumentId, FieldState, FieldValue, Priority};
use tessera_kv::Transaction;
use tessera_merkle::{keys, DocKey};

/// Persisted composite state of a document.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusState {
    pub status: DocStatus,
    pub winner: Option<Priority>,
}

/// A document as currently materialized on this replica.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub collection: String,
    pub fields: BTreeMap<String, FieldValue>,
    pub deleted: bool,
}

impl Document {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Read a document inside `txn`. `None` if no composite delta of it is known.
    pub(crate) fn load<T: Transaction>(txn: &mut T, doc: &DocKey, collection: &Collection) -> Result<Option<Self>> {
        if !txn.has(&doc.index_key())? {
            return Ok(None);
        }
        let status = load_status(txn, doc)?;

        let prefix = doc.field_prefix();
        let mut fields = BTreeMap::new();
        for (key, raw) in txn.iterate(&prefix)? {
            let name = keys::suffix(&key, &prefix)
                .ok_or_else(|| DbError::SerializationError("non utf-8 field key".to_string()))?;
            if collection.kind(name).is_none() {
                continue;
            }
            let state: FieldState = serde_json::from_slice(&raw)?;
            fields.insert(name.to_string(), state.value);
        }

        Ok(Some(Document {
            id: doc.doc_id().clone(),
            collection: doc.collection().to_string(),
            fields,
            deleted: status.status == DocStatus::Deleted,
        }))
    }
}

pub(crate) fn load_status<T: Transaction>(txn: &mut T, doc: &DocKey) -> Result<StatusState> {
    match txn.get(&doc.status_key())? {
        Some(raw) => Ok(serde_json::from_slice(&raw)?),
        None => Ok(StatusState::default()),
    }
}

/// Result of a local create, update or delete.
#[derive(Clone, Debug, PartialEq)]
pub struct CommitResult {
    pub doc_id: DocumentId,
    /// Hash of the composite delta that was committed.
    pub hash: ContentHash,
    pub height: u64,
    pub document: Document,
}
