//! # tessera-merkle
//!
//! Merkle-Clock commit DAG for the Tessera document store.
//!
//! This crate provides:
//! - The persisted key layout shared by every layer
//! - A content-addressed block arena with per-document commit indices
//! - Head sets per field chain and per composite chain
//! - [`MerkleClock`] admission with local height validation
//! - [`Resolver`] for bounded gap repair of remote heads
//!
//! All state lives in a [`tessera_kv::Transaction`]; nothing is cached
//! outside of it.
//!
//! ## Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use tessera_core::{codec, DeltaBuilder, DeltaTarget, DocumentId};
//! use tessera_kv::{KvStore, MemoryStore, Transaction};
//! use tessera_merkle::{DocKey, HeadSet, MerkleClock};
//!
//! let store = MemoryStore::new();
//! let doc = DocKey::new("users", DocumentId::derive("users", &BTreeMap::new()).unwrap());
//! let target = DeltaTarget::field("name");
//! let mut txn = store.new_txn(false).unwrap();
//!
//! let (preds, height) = HeadSet::new(&doc, &target).next(&mut txn).unwrap();
//! let delta = DeltaBuilder::new(doc.doc_id().clone(), target.clone())
//!     .with_height(height)
//!     .with_predecessors(preds)
//!     .build();
//! let encoded = codec::encode(&delta).unwrap();
//! MerkleClock::new(&doc).admit(&mut txn, &encoded.hash, &encoded.bytes, &delta).unwrap();
//! txn.commit().unwrap();
//! ```

mod clock;
mod error;
mod heads;
pub mod keys;
mod store;
mod syncer;

pub use clock::{Admission, MerkleClock};
pub use error::{DagError, ResolveError};
pub use heads::{Head, HeadSet};
pub use keys::DocKey;
pub use store::{BlockStore, CommitMeta};
pub use syncer::{Resolver, ResolverConfig, VerifiedBlock};
