//! Persisted key layout.
//!
//! ```text
//! /block/<hash>                                        encoded delta
//! /docs/<collection>/<doc>                             document index
//! /doc/<collection>/<doc>/status                       composite state
//! /doc/<collection>/<doc>/field/<name>                 field state
//! /doc/<collection>/<doc>/head/<target>/<hash>         head entry -> height
//! /doc/<collection>/<doc>/commit/hash/<hash>           commit meta
//! /doc/<collection>/<doc>/commit/height/<h:020>/<hash> commit target
//! /collection/<name>                                   collection definition
//! /schema/<version>                                    collection name
//! /p2p/collection/<name>                               gossip subscription
//! /replicator/<peer>                                   replicator record
//! /retry/<peer>/<collection>/<doc>                     undelivered replicator push
//! ```

use tessera_core::{ContentHash, DeltaTarget, DocumentId};

pub const BLOCK_PREFIX: &str = "/block/";
pub const COLLECTION_PREFIX: &str = "/collection/";
pub const SCHEMA_PREFIX: &str = "/schema/";
pub const P2P_COLLECTION_PREFIX: &str = "/p2p/collection/";
pub const REPLICATOR_PREFIX: &str = "/replicator/";
pub const RETRY_PREFIX: &str = "/retry/";

pub fn block_key(hash: &ContentHash) -> Vec<u8> {
    format!("{}{}", BLOCK_PREFIX, hash).into_bytes()
}

pub fn collection_key(name: &str) -> Vec<u8> {
    format!("{}{}", COLLECTION_PREFIX, name).into_bytes()
}

pub fn schema_key(version: &str) -> Vec<u8> {
    format!("{}{}", SCHEMA_PREFIX, version).into_bytes()
}

pub fn p2p_collection_key(name: &str) -> Vec<u8> {
    format!("{}{}", P2P_COLLECTION_PREFIX, name).into_bytes()
}

pub fn replicator_key(peer: &str) -> Vec<u8> {
    format!("{}{}", REPLICATOR_PREFIX, peer).into_bytes()
}

pub fn retry_key(peer: &str, collection: &str, doc_id: &DocumentId) -> Vec<u8> {
    format!("{}{}/{}/{}", RETRY_PREFIX, peer, collection, doc_id).into_bytes()
}

pub fn docs_prefix(collection: &str) -> Vec<u8> {
    format!("/docs/{}/", collection).into_bytes()
}

/// Strip `prefix` from a scanned key and return the remainder as text.
pub fn suffix<'a>(key: &'a [u8], prefix: &[u8]) -> Option<&'a str> {
    std::str::from_utf8(key.strip_prefix(prefix)?).ok()
}

/// Keys scoped to a single document.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocKey {
    collection: String,
    doc_id: DocumentId,
}

impl DocKey {
    pub fn new(collection: impl Into<String>, doc_id: DocumentId) -> Self {
        DocKey {
            collection: collection.into(),
            doc_id,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn doc_id(&self) -> &DocumentId {
        &self.doc_id
    }

    fn base(&self) -> String {
        format!("/doc/{}/{}", self.collection, self.doc_id)
    }

    pub fn index_key(&self) -> Vec<u8> {
        format!("/docs/{}/{}", self.collection, self.doc_id).into_bytes()
    }

    pub fn status_key(&self) -> Vec<u8> {
        format!("{}/status", self.base()).into_bytes()
    }

    pub fn field_key(&self, name: &str) -> Vec<u8> {
        format!("{}/field/{}", self.base(), name).into_bytes()
    }

    pub fn field_prefix(&self) -> Vec<u8> {
        format!("{}/field/", self.base()).into_bytes()
    }

    pub fn head_prefix(&self, target: &DeltaTarget) -> Vec<u8> {
        format!("{}/head/{}/", self.base(), target).into_bytes()
    }

    pub fn head_key(&self, target: &DeltaTarget, hash: &ContentHash) -> Vec<u8> {
        format!("{}/head/{}/{}", self.base(), target, hash).into_bytes()
    }

    pub fn commit_hash_key(&self, hash: &ContentHash) -> Vec<u8> {
        format!("{}/commit/hash/{}", self.base(), hash).into_bytes()
    }

    pub fn commit_height_prefix(&self) -> Vec<u8> {
        format!("{}/commit/height/", self.base()).into_bytes()
    }

    pub fn commit_height_key(&self, height: u64, hash: &ContentHash) -> Vec<u8> {
        format!("{}/commit/height/{:020}/{}", self.base(), height, hash).into_bytes()
    }
}

/// Parse `<height:020>/<hash>` from the tail of a height-index key.
pub fn parse_height_suffix(tail: &str) -> Option<(u64, ContentHash)> {
    let (height, hash) = tail.split_once('/')?;
    Some((height.parse().ok()?, ContentHash::from_hex(hash)?))
}
