//! Composite document CRDT.
//!
//! Applies one delta to a document: admits it into the commit DAG, then merges
//! the field value through the field's kind, or the document status for a
//! composite delta. Fields the collection does not define stay in the DAG but
//! are never materialized.

use crate::collection::Collection;
use crate::document::{load_status, StatusState};
use crate::error::{DbError, Result};
use tessera_core::codec;
use tessera_core::{ContentHash, Delta, DeltaTarget, FieldCrdt, FieldState, FieldUpdate, Priority};
use tessera_kv::Transaction;
use tessera_merkle::{Admission, DocKey, Head, HeadSet, MerkleClock};
use tracing::debug;

/// What applying a delta did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// `false` when the delta was already known.
    pub changed: bool,
    /// Heads of the delta's chain afterwards.
    pub new_heads: Vec<Head>,
}

/// Apply a delta whose `hash` and `bytes` were produced by the codec.
pub fn apply_delta<T: Transaction>(
    txn: &mut T,
    doc: &DocKey,
    collection: &Collection,
    hash: &ContentHash,
    bytes: &[u8],
    delta: &Delta,
) -> Result<ApplyOutcome> {
    if delta.doc_id != *doc.doc_id() {
        return Err(DbError::DocumentMismatch {
            collection: doc.collection().to_string(),
            doc_id: doc.doc_id().clone(),
        });
    }
    if !collection.has_version(&delta.schema_version) {
        return Err(DbError::SchemaMismatch(delta.schema_version.clone()));
    }

    let admission = MerkleClock::new(doc).admit(txn, hash, bytes, delta)?;
    if admission == Admission::Added {
        let priority = Priority::new(delta.height, *hash);
        match &delta.target {
            DeltaTarget::Composite => merge_status(txn, doc, delta, priority)?,
            DeltaTarget::Field(name) => merge_field(txn, doc, collection, name, delta, hash)?,
        }
    }

    Ok(ApplyOutcome {
        changed: admission == Admission::Added,
        new_heads: HeadSet::new(doc, &delta.target).list(txn)?,
    })
}

fn merge_status<T: Transaction>(txn: &mut T, doc: &DocKey, delta: &Delta, priority: Priority) -> Result<()> {
    let incoming = codec::decode_status(&delta.value)?;
    let current = load_status(txn, doc)?;
    let merged = StatusState {
        status: current.status.merge(incoming),
        winner: Some(current.winner.map_or(priority, |w| w.max(priority))),
    };
    txn.set(&doc.status_key(), &serde_json::to_vec(&merged)?)?;
    txn.set(&doc.index_key(), delta.schema_version.as_bytes())?;
    Ok(())
}

fn merge_field<T: Transaction>(
    txn: &mut T,
    doc: &DocKey,
    collection: &Collection,
    name: &str,
    delta: &Delta,
    hash: &ContentHash,
) -> Result<()> {
    let Some(kind) = collection.kind(name) else {
        debug!(doc = %doc.doc_id(), field = name, hash = %hash.short(), "field outside schema kept opaque");
        return Ok(());
    };

    let value = codec::decode_value(&delta.value)?;
    let key = doc.field_key(name);
    let local = match txn.get(&key)? {
        Some(raw) => serde_json::from_slice::<FieldState>(&raw)?,
        None => kind.initial_value(),
    };
    let merged = kind
        .merge(&local, &FieldUpdate::new(&value, delta.height, *hash))
        .map_err(|source| DbError::InvalidFieldValue {
            field: name.to_string(),
            source,
        })?;
    txn.set(&key, &serde_json::to_vec(&merged)?)?;
    Ok(())
}
