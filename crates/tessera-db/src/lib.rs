//! # tessera-db
//!
//! Document store for Tessera.
//!
//! This crate provides:
//! - Collections with versioned, additively patched schemas
//! - A composite document CRDT over per-field CRDTs
//! - [`DocumentStore`] with bounded conflict retry on every mutation
//! - Commit history queries
//! - Post-commit [`Event`]s that drive replication
//!
//! ## Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use tessera_core::{FieldKind, FieldValue};
//! use tessera_db::{CollectionDefinition, DocumentStore, StoreConfig};
//! use tessera_kv::MemoryStore;
//!
//! let store = DocumentStore::open(MemoryStore::new(), StoreConfig::default()).unwrap();
//! store
//!     .add_collection(
//!         CollectionDefinition::new("users")
//!             .with_field("name", FieldKind::LwwRegister)
//!             .with_field("age", FieldKind::LwwRegister),
//!     )
//!     .unwrap();
//!
//! let mut fields = BTreeMap::new();
//! fields.insert("name".to_string(), FieldValue::from("John"));
//! fields.insert("age".to_string(), FieldValue::Int(21));
//! let created = store.create("users", fields).unwrap();
//!
//! let mut patch = BTreeMap::new();
//! patch.insert("age".to_string(), FieldValue::Int(22));
//! let updated = store.update("users", &created.doc_id, patch).unwrap();
//! assert_eq!(updated.document.get("age"), Some(&FieldValue::Int(22)));
//! ```

pub mod collection;
pub mod commits;
pub mod composite;
pub mod config;
pub mod document;
pub mod error;
pub mod events;
pub mod p2p;
pub mod store;

pub use collection::{Collection, CollectionDefinition, CollectionDescription, FieldDefinition};
pub use commits::{Commit, CommitIter};
pub use composite::{apply_delta, ApplyOutcome};
pub use config::{StoreConfig, StoreConfigBuilder};
pub use document::{CommitResult, Document};
pub use error::{DbError, ErrorClass, Result};
pub use events::{Event, EventBus, MergeEvent, UpdateEvent};
pub use p2p::{ReplicatorRecord, RetryEntry};
pub use store::{DocumentStore, MergeOutcome};
