//! Document Store - transactional API over the commit DAG.
//!
//! Provides:
//! - Collection registration and additive schema patches
//! - Create, update and delete committed as field deltas plus one composite delta
//! - Merging of verified remote blocks
//! - Commit history queries
//! - Persisted subscriptions, replicator records and undelivered pushes
//!
//! Every mutation runs in one KV transaction. A conflicting commit is retried
//! from scratch with refreshed heads, up to `max_txn_retries` times.

use crate::collection::{Collection, CollectionDefinition, CollectionDescription, FieldDefinition};
use crate::commits::{Commit, CommitIter};
use crate::composite::apply_delta;
use crate::config::StoreConfig;
use crate::document::{CommitResult, Document};
use crate::error::{DbError, Result};
use crate::events::{Event, EventBus, MergeEvent, UpdateEvent};
use crate::p2p::{ReplicatorRecord, RetryEntry};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tessera_core::codec::{self, SchemaRegistry};
use tessera_core::{ContentHash, DeltaBuilder, DeltaTarget, DocStatus, DocumentId, FieldCrdt, FieldValue};
use tessera_kv::{KvError, KvStore, Transaction};
use tessera_merkle::{keys, BlockStore, DocKey, Head, HeadSet, VerifiedBlock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Outcome of merging a batch of remote blocks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeOutcome {
    pub hash: ContentHash,
    pub height: u64,
    pub changed: bool,
}

struct Catalog {
    collections: BTreeMap<String, Arc<Collection>>,
    /// schema version -> collection name
    versions: HashMap<String, String>,
}

/// A document store over a transactional KV store.
pub struct DocumentStore<S: KvStore> {
    kv: S,
    config: StoreConfig,
    catalog: RwLock<Catalog>,
    events: EventBus,
}

impl<S: KvStore> DocumentStore<S> {
    /// Open a store, loading every registered collection from `kv`.
    pub fn open(kv: S, config: StoreConfig) -> Result<Self> {
        let mut txn = kv.new_txn(true)?;
        let mut versions = HashMap::new();
        let schema_prefix = keys::SCHEMA_PREFIX.as_bytes();
        for (key, value) in txn.iterate(schema_prefix)? {
            let version = keys::suffix(&key, schema_prefix)
                .ok_or_else(|| DbError::SerializationError("non utf-8 schema key".to_string()))?;
            let name = String::from_utf8(value).map_err(|e| DbError::SerializationError(e.to_string()))?;
            versions.insert(version.to_string(), name);
        }

        let mut collections = BTreeMap::new();
        for (_, raw) in txn.iterate(keys::COLLECTION_PREFIX.as_bytes())? {
            let description: CollectionDescription = serde_json::from_slice(&raw)?;
            let known = versions
                .iter()
                .filter(|(_, name)| **name == description.name)
                .map(|(version, _)| version.clone())
                .collect();
            collections.insert(description.name.clone(), Arc::new(Collection::new(description, known)));
        }
        txn.discard();

        info!(collections = collections.len(), "document store opened");
        Ok(DocumentStore {
            kv,
            events: EventBus::new(config.event_capacity),
            config,
            catalog: RwLock::new(Catalog { collections, versions }),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn kv(&self) -> &S {
        &self.kv
    }

    /// Subscribe to post-commit events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    // === Collections ===

    /// Register a new collection.
    pub fn add_collection(&self, definition: CollectionDefinition) -> Result<CollectionDescription> {
        let description = CollectionDescription::initial(definition)?;
        self.with_retry("add_collection", |txn| {
            if txn.has(&keys::collection_key(&description.name))? {
                return Err(DbError::CollectionAlreadyExists(description.name.clone()));
            }
            write_description(txn, &description)
        })?;
        self.install(description.clone());
        info!(collection = %description.name, version = %description.version_id, "collection added");
        Ok(description)
    }

    /// Add fields to a collection, creating a new schema version.
    pub fn patch_collection(&self, name: &str, new_fields: Vec<FieldDefinition>) -> Result<CollectionDescription> {
        let description = self.with_retry("patch_collection", |txn| {
            let raw = txn
                .get(&keys::collection_key(name))?
                .ok_or_else(|| DbError::CollectionNotFound(name.to_string()))?;
            let current: CollectionDescription = serde_json::from_slice(&raw)?;
            let next = current.patched(new_fields.clone())?;
            write_description(txn, &next)?;
            Ok(next)
        })?;
        self.install(description.clone());
        info!(collection = %name, version = %description.version_id, "collection patched");
        Ok(description)
    }

    pub fn collection(&self, name: &str) -> Result<CollectionDescription> {
        Ok(self.resolve(name)?.description().clone())
    }

    pub fn collections(&self) -> Vec<CollectionDescription> {
        self.catalog
            .read()
            .collections
            .values()
            .map(|c| c.description().clone())
            .collect()
    }

    /// Collection a schema version belongs to.
    pub fn collection_of_version(&self, version: &str) -> Option<String> {
        self.catalog.read().versions.get(version).cloned()
    }

    fn resolve(&self, name: &str) -> Result<Arc<Collection>> {
        self.catalog
            .read()
            .collections
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::CollectionNotFound(name.to_string()))
    }

    fn install(&self, description: CollectionDescription) {
        let mut catalog = self.catalog.write();
        catalog
            .versions
            .insert(description.version_id.clone(), description.name.clone());
        let known: BTreeSet<String> = catalog
            .versions
            .iter()
            .filter(|(_, name)| **name == description.name)
            .map(|(version, _)| version.clone())
            .collect();
        let name = description.name.clone();
        catalog
            .collections
            .insert(name, Arc::new(Collection::new(description, known)));
    }

    // === Mutations ===

    /// Create a document. Its id is derived from the collection and `fields`.
    pub fn create(&self, collection: &str, fields: BTreeMap<String, FieldValue>) -> Result<CommitResult> {
        let coll = self.resolve(collection)?;
        validate_patch(&coll, &fields)?;
        let doc_id = DocumentId::derive(collection, &fields).map_err(|e| DbError::SerializationError(e.to_string()))?;
        let doc = DocKey::new(collection, doc_id.clone());

        let result = self.with_retry("create", |txn| {
            if txn.has(&doc.index_key())? {
                return Err(DbError::DocumentAlreadyExists(doc_id.clone()));
            }
            let (hash, height) = write_deltas(txn, &doc, &coll, &fields, DocStatus::Active, false)?;
            load_result(txn, &doc, &coll, hash, height)
        })?;

        debug!(collection, doc = %doc_id, hash = %result.hash.short(), "document created");
        self.publish_update(collection, &result, true);
        Ok(result)
    }

    /// Apply `patch` on top of the current heads of every touched field.
    pub fn update(
        &self,
        collection: &str,
        doc_id: &DocumentId,
        patch: BTreeMap<String, FieldValue>,
    ) -> Result<CommitResult> {
        let coll = self.resolve(collection)?;
        validate_patch(&coll, &patch)?;
        let doc = DocKey::new(collection, doc_id.clone());

        let result = self.with_retry("update", |txn| {
            require_live(txn, &doc, &coll)?;
            let (hash, height) = write_deltas(txn, &doc, &coll, &patch, DocStatus::Active, true)?;
            load_result(txn, &doc, &coll, hash, height)
        })?;

        debug!(collection, doc = %doc_id, hash = %result.hash.short(), height = result.height, "document updated");
        self.publish_update(collection, &result, false);
        Ok(result)
    }

    /// Commit a tombstone.
    pub fn delete(&self, collection: &str, doc_id: &DocumentId) -> Result<CommitResult> {
        let coll = self.resolve(collection)?;
        let doc = DocKey::new(collection, doc_id.clone());

        let result = self.with_retry("delete", |txn| {
            require_live(txn, &doc, &coll)?;
            let (hash, height) = write_deltas(txn, &doc, &coll, &BTreeMap::new(), DocStatus::Deleted, false)?;
            load_result(txn, &doc, &coll, hash, height)
        })?;

        debug!(collection, doc = %doc_id, hash = %result.hash.short(), "document deleted");
        self.publish_update(collection, &result, false);
        Ok(result)
    }

    fn publish_update(&self, collection: &str, result: &CommitResult, is_create: bool) {
        self.events.publish(Event::Update(UpdateEvent {
            doc_id: result.doc_id.clone(),
            collection: collection.to_string(),
            hash: result.hash,
            height: result.height,
            is_create,
        }));
    }

    /// Merge remote blocks ordered ancestors first.
    ///
    /// Either every block is applied or none is.
    pub fn merge_remote(
        &self,
        collection: &str,
        doc_id: &DocumentId,
        blocks: &[VerifiedBlock],
        origin: Option<&str>,
    ) -> Result<MergeOutcome> {
        let last = blocks
            .last()
            .ok_or_else(|| DbError::MalformedDelta("empty merge batch".to_string()))?;
        let coll = self.resolve(collection)?;
        let doc = DocKey::new(collection, doc_id.clone());

        let changed = self.with_retry("merge_remote", |txn| {
            let mut changed = false;
            for block in blocks {
                changed |= apply_delta(txn, &doc, &coll, &block.hash, &block.bytes, &block.delta)?.changed;
            }
            Ok(changed)
        })?;

        let outcome = MergeOutcome {
            hash: last.hash,
            height: last.delta.height,
            changed,
        };
        debug!(
            collection,
            doc = %doc_id,
            hash = %outcome.hash.short(),
            blocks = blocks.len(),
            changed,
            origin = origin.unwrap_or("local"),
            "remote blocks merged"
        );
        self.events.publish(Event::Merged(MergeEvent {
            doc_id: doc_id.clone(),
            collection: collection.to_string(),
            hash: outcome.hash,
            height: outcome.height,
            origin: origin.map(str::to_string),
            changed,
        }));
        Ok(outcome)
    }

    // === Queries ===

    /// The materialized document. Deleted documents are not found.
    pub fn get_document(&self, collection: &str, doc_id: &DocumentId) -> Result<Document> {
        let coll = self.resolve(collection)?;
        let doc = DocKey::new(collection, doc_id.clone());
        let mut txn = self.kv.new_txn(true)?;
        match Document::load(&mut txn, &doc, &coll)? {
            Some(document) if !document.deleted => Ok(document),
            _ => Err(DbError::DocumentNotFound(doc_id.clone())),
        }
    }

    /// Tombstoned or not, whether any composite delta of the document is known.
    pub fn contains_document(&self, collection: &str, doc_id: &DocumentId) -> Result<bool> {
        let doc = DocKey::new(collection, doc_id.clone());
        Ok(self.kv.new_txn(true)?.has(&doc.index_key())?)
    }

    /// Ids of every known document of a collection, tombstones included.
    pub fn doc_ids(&self, collection: &str) -> Result<Vec<DocumentId>> {
        self.resolve(collection)?;
        let prefix = keys::docs_prefix(collection);
        let mut txn = self.kv.new_txn(true)?;
        let mut ids = Vec::new();
        for (key, _) in txn.iterate(&prefix)? {
            let id = keys::suffix(&key, &prefix)
                .and_then(DocumentId::parse)
                .ok_or_else(|| DbError::SerializationError("bad document index key".to_string()))?;
            ids.push(id);
        }
        Ok(ids)
    }

    pub fn composite_heads(&self, collection: &str, doc_id: &DocumentId) -> Result<Vec<Head>> {
        let doc = DocKey::new(collection, doc_id.clone());
        let mut txn = self.kv.new_txn(true)?;
        Ok(HeadSet::new(&doc, &DeltaTarget::Composite).list(&mut txn)?)
    }

    pub fn get_block(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>> {
        let mut txn = self.kv.new_txn(true)?;
        Ok(BlockStore::new(&mut txn).get(hash)?)
    }

    pub fn has_block(&self, hash: &ContentHash) -> Result<bool> {
        let mut txn = self.kv.new_txn(true)?;
        Ok(BlockStore::new(&mut txn).contains(hash)?)
    }

    pub fn get_commit(&self, hash: &ContentHash) -> Result<Commit> {
        let block = self.get_block(hash)?.ok_or(DbError::CommitNotFound(*hash))?;
        let delta = codec::decode(&block, codec::AnySchema)?;
        let collection = self
            .collection_of_version(&delta.schema_version)
            .ok_or_else(|| DbError::SchemaMismatch(delta.schema_version.clone()))?;
        Commit::from_block(&collection, *hash, block)
    }

    /// Lazily walk every commit of a document, highest first.
    pub fn get_all_commits(&self, collection: &str, doc_id: &DocumentId) -> Result<CommitIter<S::Txn>> {
        let doc = DocKey::new(collection, doc_id.clone());
        let mut txn = self.kv.new_txn(true)?;
        if !txn.has(&doc.index_key())? {
            return Err(DbError::DocumentNotFound(doc_id.clone()));
        }
        CommitIter::new(txn, &doc)
    }

    /// Commits at the composite heads of a document.
    pub fn get_latest_commits(&self, collection: &str, doc_id: &DocumentId) -> Result<Vec<Commit>> {
        let heads = self.composite_heads(collection, doc_id)?;
        if heads.is_empty() {
            return Err(DbError::DocumentNotFound(doc_id.clone()));
        }
        heads
            .iter()
            .map(|head| {
                let block = self.get_block(&head.hash)?.ok_or(DbError::CommitNotFound(head.hash))?;
                Commit::from_block(collection, head.hash, block)
            })
            .collect()
    }

    // === P2P bookkeeping ===

    /// Persist gossip subscriptions. Unknown collections are rejected.
    pub fn add_p2p_collections(&self, names: &[String]) -> Result<()> {
        for name in names {
            self.resolve(name)?;
        }
        self.with_retry("add_p2p_collections", |txn| {
            for name in names {
                txn.set(&keys::p2p_collection_key(name), b"")?;
            }
            Ok(())
        })
    }

    pub fn remove_p2p_collections(&self, names: &[String]) -> Result<()> {
        self.with_retry("remove_p2p_collections", |txn| {
            for name in names {
                txn.delete(&keys::p2p_collection_key(name))?;
            }
            Ok(())
        })
    }

    pub fn p2p_collections(&self) -> Result<BTreeSet<String>> {
        let prefix = keys::P2P_COLLECTION_PREFIX.as_bytes();
        let mut txn = self.kv.new_txn(true)?;
        let mut names = BTreeSet::new();
        for (key, _) in txn.iterate(prefix)? {
            if let Some(name) = keys::suffix(&key, prefix) {
                names.insert(name.to_string());
            }
        }
        Ok(names)
    }

    /// Store a replicator record, replacing any previous one for the peer.
    pub fn put_replicator(&self, record: &ReplicatorRecord) -> Result<()> {
        for name in &record.collections {
            self.resolve(name)?;
        }
        let raw = serde_json::to_vec(record)?;
        self.with_retry("put_replicator", |txn| {
            txn.set(&keys::replicator_key(&record.peer), &raw)?;
            Ok(())
        })
    }

    /// Remove a replicator record together with its pending retries.
    pub fn remove_replicator(&self, peer: &str) -> Result<()> {
        self.with_retry("remove_replicator", |txn| {
            txn.delete(&keys::replicator_key(peer))?;
            for entry in scan_retries(txn, peer)? {
                txn.delete(&entry.key())?;
            }
            Ok(())
        })
    }

    pub fn replicator(&self, peer: &str) -> Result<Option<ReplicatorRecord>> {
        let mut txn = self.kv.new_txn(true)?;
        match txn.get(&keys::replicator_key(peer))? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn replicators(&self) -> Result<Vec<ReplicatorRecord>> {
        let mut txn = self.kv.new_txn(true)?;
        txn.iterate(keys::REPLICATOR_PREFIX.as_bytes())?
            .map(|(_, raw)| serde_json::from_slice(&raw).map_err(DbError::from))
            .collect()
    }

    /// Remember that `entry.peer` still lacks the heads of a document.
    pub fn put_replicator_retry(&self, entry: &RetryEntry) -> Result<()> {
        let raw = serde_json::to_vec(entry)?;
        self.with_retry("put_replicator_retry", |txn| {
            txn.set(&entry.key(), &raw)?;
            Ok(())
        })
    }

    pub fn remove_replicator_retry(&self, entry: &RetryEntry) -> Result<()> {
        self.with_retry("remove_replicator_retry", |txn| {
            txn.delete(&entry.key())?;
            Ok(())
        })
    }

    /// Pending retries for `peer`, ordered by collection then document.
    pub fn replicator_retries(&self, peer: &str) -> Result<Vec<RetryEntry>> {
        let mut txn = self.kv.new_txn(true)?;
        scan_retries(&mut txn, peer)
    }

    // === Transactions ===

    /// Run `attempt` in a fresh read-write transaction until it commits.
    fn with_retry<R>(&self, op: &'static str, mut attempt: impl FnMut(&mut S::Txn) -> Result<R>) -> Result<R> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let mut txn = self.kv.new_txn(false)?;
            let value = match attempt(&mut txn) {
                Ok(value) => value,
                Err(err) => {
                    txn.discard();
                    return Err(err);
                }
            };
            match txn.commit() {
                Ok(()) => return Ok(value),
                Err(KvError::Conflict) if attempts <= self.config.max_txn_retries => {
                    debug!(op, attempts, "transaction conflict, retrying");
                }
                Err(KvError::Conflict) => {
                    warn!(op, attempts, "transaction retries exhausted");
                    return Err(DbError::MaxRetriesExceeded { attempts });
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}

fn scan_retries<T: Transaction>(txn: &mut T, peer: &str) -> Result<Vec<RetryEntry>> {
    let mut entries = Vec::new();
    for (_, raw) in txn.iterate(keys::RETRY_PREFIX.as_bytes())? {
        let entry: RetryEntry = serde_json::from_slice(&raw)?;
        // peer ids may contain '/', so match on the record rather than the key
        if entry.peer == peer {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Registered schema versions are the ones deltas may decode under.
impl<S: KvStore> SchemaRegistry for DocumentStore<S> {
    fn knows_version(&self, version: &str) -> bool {
        self.catalog.read().versions.contains_key(version)
    }
}

fn write_description<T: Transaction>(txn: &mut T, description: &CollectionDescription) -> Result<()> {
    txn.set(
        &keys::collection_key(&description.name),
        &serde_json::to_vec(description)?,
    )?;
    txn.set(&keys::schema_key(&description.version_id), description.name.as_bytes())?;
    Ok(())
}

fn validate_patch(coll: &Collection, patch: &BTreeMap<String, FieldValue>) -> Result<()> {
    for (name, value) in patch {
        coll.require_kind(name)?
            .validate(value)
            .map_err(|source| DbError::InvalidFieldValue {
                field: name.clone(),
                source,
            })?;
    }
    Ok(())
}

fn require_live<T: Transaction>(txn: &mut T, doc: &DocKey, coll: &Collection) -> Result<()> {
    match Document::load(txn, doc, coll)? {
        Some(document) if !document.deleted => Ok(()),
        _ => Err(DbError::DocumentNotFound(doc.doc_id().clone())),
    }
}

/// Write one delta per patched field and a composite delta linking them.
///
/// Counter updates get a random nonce so equal concurrent increments stay
/// distinct; everything else uses nonce 0 so creation is reproducible.
fn write_deltas<T: Transaction>(
    txn: &mut T,
    doc: &DocKey,
    coll: &Collection,
    patch: &BTreeMap<String, FieldValue>,
    status: DocStatus,
    random_counter_nonce: bool,
) -> Result<(ContentHash, u64)> {
    let mut composite = DeltaBuilder::new(doc.doc_id().clone(), DeltaTarget::Composite)
        .with_schema_version(coll.version_id())
        .with_value(codec::encode_status(status)?);

    for (name, value) in patch {
        let kind = coll.require_kind(name)?;
        let target = DeltaTarget::field(name.as_str());
        let (preds, height) = HeadSet::new(doc, &target).next(txn)?;
        let nonce = if random_counter_nonce && kind.is_counter() {
            rand::random()
        } else {
            0
        };
        let delta = DeltaBuilder::new(doc.doc_id().clone(), target)
            .with_height(height)
            .with_value(codec::encode_value(value)?)
            .with_predecessors(preds)
            .with_schema_version(coll.version_id())
            .with_nonce(nonce)
            .build();
        let encoded = codec::encode(&delta)?;
        apply_delta(txn, doc, coll, &encoded.hash, &encoded.bytes, &delta)?;
        composite = composite.with_link(name.as_str(), encoded.hash);
    }

    let (preds, height) = HeadSet::new(doc, &DeltaTarget::Composite).next(txn)?;
    let delta = composite.with_height(height).with_predecessors(preds).build();
    let encoded = codec::encode(&delta)?;
    apply_delta(txn, doc, coll, &encoded.hash, &encoded.bytes, &delta)?;
    Ok((encoded.hash, height))
}

fn load_result<T: Transaction>(
    txn: &mut T,
    doc: &DocKey,
    coll: &Collection,
    hash: ContentHash,
    height: u64,
) -> Result<CommitResult> {
    let document = Document::load(txn, doc, coll)?
        .ok_or_else(|| DbError::DocumentNotFound(doc.doc_id().clone()))?;
    Ok(CommitResult {
        doc_id: doc.doc_id().clone(),
        hash,
        height,
        document,
    })
}
