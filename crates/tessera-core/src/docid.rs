//! Document identifiers derived from seed content.

use crate::hash::ContentHash;
use crate::value::FieldValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

const DOC_ID_PREFIX: &str = "bae-";

/// Stable identifier of a document.
///
/// Derived once from the collection name and the seed fields the document was
/// created with; two replicas creating the same seed get the same id.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    /// Derive the id for a seed document in `collection`.
    pub fn derive(collection: &str, seed: &BTreeMap<String, FieldValue>) -> Result<Self, postcard::Error> {
        let encoded = postcard::to_stdvec(&(collection, seed))?;
        let digest = ContentHash::digest(&encoded);
        let uuid = Uuid::new_v5(&Uuid::NAMESPACE_OID, digest.as_bytes());
        Ok(DocumentId(format!("{}{}", DOC_ID_PREFIX, uuid)))
    }

    /// Parse an id from its string form.
    pub fn parse(id: &str) -> Option<Self> {
        let rest = id.strip_prefix(DOC_ID_PREFIX)?;
        Uuid::parse_str(rest).ok()?;
        Some(DocumentId(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
