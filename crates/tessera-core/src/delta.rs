//! Delta records and their builder.
//!
//! A delta is one immutable change to a single field, or a composite change
//! that ties a document's field deltas together. Each delta references the
//! hashes of the heads it supersedes and carries a height one past the
//! highest of them.

use crate::docid::DocumentId;
use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a delta changes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeltaTarget {
    /// The document as a whole (status plus links to field deltas).
    Composite,
    /// A single named field.
    Field(String),
}

impl DeltaTarget {
    pub fn field(name: impl Into<String>) -> Self {
        DeltaTarget::Field(name.into())
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, DeltaTarget::Composite)
    }

    pub fn field_name(&self) -> Option<&str> {
        match self {
            DeltaTarget::Composite => None,
            DeltaTarget::Field(name) => Some(name),
        }
    }
}

impl fmt::Display for DeltaTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaTarget::Composite => f.write_str("_composite"),
            DeltaTarget::Field(name) => f.write_str(name),
        }
    }
}

/// Link from a composite delta to a field delta committed alongside it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldLink {
    pub field: String,
    pub hash: ContentHash,
}

/// Lifecycle status carried by composite deltas.
///
/// `Deleted` is absorbing: merging any status with `Deleted` yields `Deleted`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub enum DocStatus {
    #[default]
    Active,
    Deleted,
}

impl DocStatus {
    pub fn merge(self, other: DocStatus) -> DocStatus {
        self.max(other)
    }
}

/// An immutable, content-addressed change record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub doc_id: DocumentId,
    pub target: DeltaTarget,
    pub height: u64,
    /// Encoded `FieldValue` for field deltas, encoded `DocStatus` for composites.
    pub value: Vec<u8>,
    /// Sorted, deduplicated heads this delta supersedes.
    pub predecessors: Vec<ContentHash>,
    /// Sorted field links; empty for field deltas.
    pub links: Vec<FieldLink>,
    pub schema_version: String,
    pub nonce: u64,
}

impl Delta {
    pub fn is_composite(&self) -> bool {
        self.target.is_composite()
    }

    /// Every hash this delta depends on: predecessors first, then links.
    pub fn dependencies(&self) -> impl Iterator<Item = &ContentHash> {
        self.predecessors
            .iter()
            .chain(self.links.iter().map(|link| &link.hash))
    }

    /// Sort and deduplicate the reference lists in place.
    pub fn normalize(&mut self) {
        self.predecessors.sort();
        self.predecessors.dedup();
        self.links.sort();
        self.links.dedup();
    }

    pub fn is_normalized(&self) -> bool {
        self.predecessors.windows(2).all(|w| w[0] < w[1]) && self.links.windows(2).all(|w| w[0] < w[1])
    }
}

/// Builder for deltas.
pub struct DeltaBuilder {
    doc_id: DocumentId,
    target: DeltaTarget,
    height: u64,
    value: Vec<u8>,
    predecessors: Vec<ContentHash>,
    links: Vec<FieldLink>,
    schema_version: String,
    nonce: u64,
}

impl DeltaBuilder {
    pub fn new(doc_id: DocumentId, target: DeltaTarget) -> Self {
        DeltaBuilder {
            doc_id,
            target,
            height: 1,
            value: Vec::new(),
            predecessors: Vec::new(),
            links: Vec::new(),
            schema_version: String::new(),
            nonce: 0,
        }
    }

    pub fn with_height(mut self, height: u64) -> Self {
        self.height = height;
        self
    }

    pub fn with_value(mut self, value: Vec<u8>) -> Self {
        self.value = value;
        self
    }

    pub fn with_predecessors(mut self, predecessors: Vec<ContentHash>) -> Self {
        self.predecessors = predecessors;
        self
    }

    pub fn with_predecessor(mut self, predecessor: ContentHash) -> Self {
        self.predecessors.push(predecessor);
        self
    }

    pub fn with_link(mut self, field: impl Into<String>, hash: ContentHash) -> Self {
        self.links.push(FieldLink {
            field: field.into(),
            hash,
        });
        self
    }

    pub fn with_schema_version(mut self, version: impl Into<String>) -> Self {
        self.schema_version = version.into();
        self
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn build(self) -> Delta {
        let mut delta = Delta {
            doc_id: self.doc_id,
            target: self.target,
            height: self.height,
            value: self.value,
            predecessors: self.predecessors,
            links: self.links,
            schema_version: self.schema_version,
            nonce: self.nonce,
        };
        delta.normalize();
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn doc() -> DocumentId {
        DocumentId::derive("users", &BTreeMap::new()).unwrap()
    }

    #[test]
    fn test_builder_normalizes_references() {
        let a = ContentHash::digest(b"a");
        let b = ContentHash::digest(b"b");
        let delta = DeltaBuilder::new(doc(), DeltaTarget::Composite)
            .with_predecessors(vec![b, a, b])
            .with_link("name", b)
            .with_link("age", a)
            .build();

        assert!(delta.is_normalized());
        assert_eq!(delta.predecessors.len(), 2);
        assert_eq!(delta.links[0].field, "age");
        assert_eq!(delta.dependencies().count(), 4);
    }

    #[test]
    fn test_deleted_status_absorbs() {
        assert_eq!(DocStatus::Active.merge(DocStatus::Deleted), DocStatus::Deleted);
        assert_eq!(DocStatus::Deleted.merge(DocStatus::Active), DocStatus::Deleted);
        assert_eq!(DocStatus::Active.merge(DocStatus::Active), DocStatus::Active);
    }

    #[test]
    fn test_target_display() {
        assert_eq!(DeltaTarget::Composite.to_string(), "_composite");
        assert_eq!(DeltaTarget::field("age").to_string(), "age");
        assert_eq!(DeltaTarget::field("age").field_name(), Some("age"));
    }
}
