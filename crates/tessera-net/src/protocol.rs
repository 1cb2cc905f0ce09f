//! Messages exchanged between peers.

use crate::peer::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tessera_core::{ContentHash, DocumentId};

/// Gossip notice of a new composite head.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub doc_id: DocumentId,
    pub collection: String,
    pub hash: ContentHash,
    pub height: u64,
    pub creator: PeerId,
}

/// Composite heads of one document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocHeads {
    pub doc_id: DocumentId,
    pub heads: Vec<ContentHash>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Handshake carrying the sender's gossip subscriptions.
    Hello {
        peer: PeerId,
        collections: BTreeSet<String>,
    },
    /// The sender's subscriptions changed.
    Subscriptions { collections: BTreeSet<String> },
    Announce(Announcement),
    /// Direct push to a replicator.
    PushDelta {
        doc_id: DocumentId,
        collection: String,
        hash: ContentHash,
        block: Vec<u8>,
        predecessors: Vec<ContentHash>,
        creator: PeerId,
    },
    GetDelta { hash: ContentHash },
    Delta {
        hash: ContentHash,
        block: Option<Vec<u8>>,
    },
    GetHeads { collection: String },
    Heads {
        collection: String,
        docs: Vec<DocHeads>,
    },
    Ack,
    Error { message: String },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "hello",
            Message::Subscriptions { .. } => "subscriptions",
            Message::Announce(_) => "announce",
            Message::PushDelta { .. } => "push-delta",
            Message::GetDelta { .. } => "get-delta",
            Message::Delta { .. } => "delta",
            Message::GetHeads { .. } => "get-heads",
            Message::Heads { .. } => "heads",
            Message::Ack => "ack",
            Message::Error { .. } => "error",
        }
    }
}

/// Gossip topic of a collection.
pub fn topic(collection: &str) -> String {
    format!("/tessera/collection/{}", collection)
}
