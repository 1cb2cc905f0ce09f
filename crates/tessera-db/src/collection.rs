//! Collection definitions and schema versions.
//!
//! A collection groups documents that share a schema. Every definition has a
//! version id derived from the hash of its canonical form; patching a
//! collection adds fields and produces a new version whose parent is the old
//! one. Every version a collection ever had stays known, so deltas written
//! under an older version still decode.

use crate::error::{DbError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tessera_core::{ContentHash, FieldKind};

/// One field of a collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(default)]
    pub kind: FieldKind,
}

impl FieldDefinition {
    /// A last-writer-wins field.
    pub fn lww(name: impl Into<String>) -> Self {
        FieldDefinition {
            name: name.into(),
            kind: FieldKind::LwwRegister,
        }
    }

    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        FieldDefinition {
            name: name.into(),
            kind,
        }
    }
}

/// What a caller registers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDefinition {
    pub name: String,
    pub fields: Vec<FieldDefinition>,
}

impl CollectionDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        CollectionDefinition {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldDefinition::new(name, kind));
        self
    }
}

/// A registered version of a collection, as persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDescription {
    pub name: String,
    pub version_id: String,
    pub parent: Option<String>,
    /// Sorted by field name.
    pub fields: Vec<FieldDefinition>,
}

impl CollectionDescription {
    /// Build the first version of a collection.
    pub fn initial(definition: CollectionDefinition) -> Result<Self> {
        validate_name(&definition.name)?;
        let fields = canonical_fields(&definition.name, definition.fields)?;
        Self::versioned(definition.name, None, fields)
    }

    /// Build the version that follows this one with `new_fields` added.
    pub fn patched(&self, new_fields: Vec<FieldDefinition>) -> Result<Self> {
        let mut fields = self.fields.clone();
        for field in new_fields {
            if fields.iter().any(|f| f.name == field.name) {
                return Err(DbError::FieldAlreadyExists {
                    collection: self.name.clone(),
                    field: field.name,
                });
            }
            fields.push(field);
        }
        let fields = canonical_fields(&self.name, fields)?;
        Self::versioned(self.name.clone(), Some(self.version_id.clone()), fields)
    }

    fn versioned(name: String, parent: Option<String>, fields: Vec<FieldDefinition>) -> Result<Self> {
        let canonical = serde_json::to_vec(&(&name, &parent, &fields))?;
        Ok(CollectionDescription {
            version_id: ContentHash::digest(&canonical).to_hex(),
            name,
            parent,
            fields,
        })
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A collection resolved for merging: its latest description, every version
/// it has had, and the field kind table.
#[derive(Clone, Debug)]
pub struct Collection {
    description: CollectionDescription,
    versions: BTreeSet<String>,
    kinds: BTreeMap<String, FieldKind>,
}

impl Collection {
    pub fn new(description: CollectionDescription, versions: BTreeSet<String>) -> Self {
        let kinds = description
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.kind))
            .collect();
        let mut versions = versions;
        versions.insert(description.version_id.clone());
        Collection {
            description,
            versions,
            kinds,
        }
    }

    pub fn name(&self) -> &str {
        &self.description.name
    }

    pub fn version_id(&self) -> &str {
        &self.description.version_id
    }

    pub fn description(&self) -> &CollectionDescription {
        &self.description
    }

    pub fn has_version(&self, version: &str) -> bool {
        self.versions.contains(version)
    }

    pub fn versions(&self) -> &BTreeSet<String> {
        &self.versions
    }

    /// Merge kind of a field, `None` if the field is not part of the schema.
    pub fn kind(&self, field: &str) -> Option<FieldKind> {
        self.kinds.get(field).copied()
    }

    /// Kind of `field` or `FieldNotExist`.
    pub fn require_kind(&self, field: &str) -> Result<FieldKind> {
        self.kind(field).ok_or_else(|| DbError::FieldNotExist {
            collection: self.name().to_string(),
            field: field.to_string(),
        })
    }
}

/// Collection and field names: an ASCII letter followed by letters, digits or `_`.
pub fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => first.is_ascii_alphabetic() && chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(DbError::InvalidName(name.to_string()))
    }
}

fn canonical_fields(collection: &str, mut fields: Vec<FieldDefinition>) -> Result<Vec<FieldDefinition>> {
    for field in &fields {
        validate_name(&field.name)?;
    }
    fields.sort_by(|a, b| a.name.cmp(&b.name));
    if let Some(pair) = fields.windows(2).find(|w| w[0].name == w[1].name) {
        return Err(DbError::FieldAlreadyExists {
            collection: collection.to_string(),
            field: pair[0].name.clone(),
        });
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> CollectionDefinition {
        CollectionDefinition::new("users")
            .with_field("name", FieldKind::LwwRegister)
            .with_field("age", FieldKind::LwwRegister)
    }

    #[test]
    fn test_version_is_order_independent() {
        let a = CollectionDescription::initial(users()).unwrap();
        let mut reversed = users();
        reversed.fields.reverse();
        let b = CollectionDescription::initial(reversed).unwrap();
        assert_eq!(a.version_id, b.version_id);
        assert_eq!(a.fields[0].name, "age");
    }

    #[test]
    fn test_patch_creates_child_version() {
        let v1 = CollectionDescription::initial(users()).unwrap();
        let v2 = v1.patched(vec![FieldDefinition::new("visits", FieldKind::PCounter)]).unwrap();
        assert_eq!(v2.parent.as_deref(), Some(v1.version_id.as_str()));
        assert_ne!(v1.version_id, v2.version_id);
        assert_eq!(v2.field("visits").unwrap().kind, FieldKind::PCounter);

        assert!(matches!(
            v2.patched(vec![FieldDefinition::lww("age")]),
            Err(DbError::FieldAlreadyExists { .. })
        ));
    }

    #[test]
    fn test_names_are_validated() {
        assert!(validate_name("users").is_ok());
        assert!(validate_name("user_2").is_ok());
        assert!(validate_name("_composite").is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(CollectionDescription::initial(CollectionDefinition::new("users").with_field("9lives", FieldKind::LwwRegister)).is_err());
    }

    #[test]
    fn test_collection_tracks_versions() {
        let v1 = CollectionDescription::initial(users()).unwrap();
        let v2 = v1.patched(vec![FieldDefinition::lww("email")]).unwrap();
        let collection = Collection::new(v2.clone(), [v1.version_id.clone()].into_iter().collect());
        assert!(collection.has_version(&v1.version_id));
        assert!(collection.has_version(&v2.version_id));
        assert_eq!(collection.kind("email"), Some(FieldKind::LwwRegister));
        assert!(collection.require_kind("missing").is_err());
    }
}
