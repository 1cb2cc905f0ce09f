//! Peer identity and per-peer connection state.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Unique identifier for a peer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id.
    pub fn random() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Peer connection state.
///
/// `Disconnected -> Connecting -> Subscribed -> Syncing -> Subscribed`, and
/// back to `Disconnected` when the link drops.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum PeerState {
    #[default]
    Disconnected,
    Connecting,
    /// Connected; the peer subscribes to these collections.
    Subscribed(BTreeSet<String>),
    /// Anti-entropy in progress.
    Syncing(BTreeSet<String>),
}

impl PeerState {
    pub fn collections(&self) -> Option<&BTreeSet<String>> {
        match self {
            PeerState::Subscribed(c) | PeerState::Syncing(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.collections().is_some()
    }
}

/// State of every peer this node has seen.
#[derive(Default)]
pub struct PeerTable {
    peers: RwLock<HashMap<PeerId, PeerState>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, peer: &PeerId) -> PeerState {
        self.peers.read().get(peer).cloned().unwrap_or_default()
    }

    fn set(&self, peer: &PeerId, state: PeerState) {
        debug!(peer = %peer, state = ?state, "peer state");
        self.peers.write().insert(peer.clone(), state);
    }

    pub fn connecting(&self, peer: &PeerId) {
        self.set(peer, PeerState::Connecting);
    }

    /// Record the peer's subscriptions. Keeps a sync in progress flagged.
    pub fn subscribed(&self, peer: &PeerId, collections: BTreeSet<String>) {
        let state = match self.state(peer) {
            PeerState::Syncing(_) => PeerState::Syncing(collections),
            _ => PeerState::Subscribed(collections),
        };
        self.set(peer, state);
    }

    /// Mark a sync as started; returns the peer's collections.
    pub fn syncing(&self, peer: &PeerId) -> BTreeSet<String> {
        let collections = self.state(peer).collections().cloned().unwrap_or_default();
        self.set(peer, PeerState::Syncing(collections.clone()));
        collections
    }

    pub fn synced(&self, peer: &PeerId) {
        if let PeerState::Syncing(collections) = self.state(peer) {
            self.set(peer, PeerState::Subscribed(collections));
        }
    }

    pub fn disconnected(&self, peer: &PeerId) {
        self.set(peer, PeerState::Disconnected);
    }
}
