//! Sync events and anti-entropy.
//!
//! Anti-entropy compares composite heads with a peer for every collection
//! both sides subscribe to and pulls whatever is missing. It repairs
//! announcements lost while a peer was offline.

use crate::error::{NetworkError, Result, SyncError};
use crate::network::NetworkTransport;
use crate::node::Shared;
use crate::peer::PeerId;
use crate::protocol::{DocHeads, Message};
use crate::receiver;
use std::sync::Arc;
use std::time::Duration;
use tessera_core::{ContentHash, DocumentId};
use tessera_kv::KvStore;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Events emitted by a sync node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncEvent {
    /// Anti-entropy started with a peer.
    SyncStarted(PeerId),
    /// Anti-entropy completed with a peer.
    SyncCompleted(PeerId),
    /// Blocks received from `from` were merged and changed local state.
    ReceivedUpdate {
        from: PeerId,
        doc_id: DocumentId,
        hash: ContentHash,
    },
    /// A replicator acknowledged a push.
    SentUpdate {
        to: PeerId,
        doc_id: DocumentId,
        hash: ContentHash,
    },
    SyncError { peer: PeerId, error: String },
    /// Heads of newly replicated collections were pushed.
    BackfillCompleted { peer: PeerId, pushed: usize },
}

/// Pull every head `peer` has that this node lacks, for mutually subscribed
/// collections. Returns the number of heads that changed local state.
///
/// Every failure is also emitted as [`SyncEvent::SyncError`].
pub(crate) async fn sync_with<S: KvStore, T: NetworkTransport>(shared: &Arc<Shared<S, T>>, peer: &PeerId) -> Result<usize> {
    if !shared.peers.state(peer).is_connected() {
        let err = SyncError::from(NetworkError::NotConnected(peer.clone()));
        warn!(peer = %peer, "anti-entropy needs a connected peer");
        shared.emit(SyncEvent::SyncError {
            peer: peer.clone(),
            error: err.to_string(),
        });
        return Err(err);
    }
    let theirs = shared.peers.syncing(peer);
    let ours = shared.subscriptions();
    shared.emit(SyncEvent::SyncStarted(peer.clone()));

    let result = pull_heads(shared, peer, ours.intersection(&theirs).cloned().collect()).await;
    shared.peers.synced(peer);
    match &result {
        Ok(merged) => {
            info!(peer = %peer, merged, "anti-entropy completed");
            shared.emit(SyncEvent::SyncCompleted(peer.clone()));
        }
        Err(err) => {
            warn!(peer = %peer, error = %err, "anti-entropy failed");
            shared.emit(SyncEvent::SyncError {
                peer: peer.clone(),
                error: err.to_string(),
            });
        }
    }
    result
}

async fn pull_heads<S: KvStore, T: NetworkTransport>(
    shared: &Arc<Shared<S, T>>,
    peer: &PeerId,
    collections: Vec<String>,
) -> Result<usize> {
    let mut merged = 0;
    for collection in collections {
        let docs = match shared.request(peer, Message::GetHeads { collection: collection.clone() }).await? {
            Message::Heads { docs, .. } => docs,
            other => return Err(SyncError::UnexpectedResponse(other.kind().to_string())),
        };
        debug!(peer = %peer, collection = %collection, docs = docs.len(), "heads received");

        for DocHeads { doc_id, heads } in docs {
            for head in heads {
                match receiver::receive_block(shared, peer, &collection, &doc_id, head, None).await {
                    Ok(true) => merged += 1,
                    Ok(false) => {}
                    Err(err) if err.is_retryable() => return Err(err),
                    Err(err) => receiver::quarantine(shared, peer, &head, err),
                }
            }
        }
    }
    Ok(merged)
}

/// Wait until a block from `peer` for `doc_id` has been merged.
pub async fn wait_for_merge(
    rx: &mut broadcast::Receiver<SyncEvent>,
    peer: &PeerId,
    doc_id: &DocumentId,
    timeout: Duration,
) -> Result<ContentHash> {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(SyncEvent::ReceivedUpdate { from, doc_id: merged, hash }) if from == *peer && merged == *doc_id => {
                    return Ok(hash);
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(SyncError::Cancelled),
            }
        }
    };
    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| SyncError::WaitTimeout)?
}

/// Wait for the next event matching `predicate`.
pub async fn wait_for_event<F>(rx: &mut broadcast::Receiver<SyncEvent>, timeout: Duration, mut predicate: F) -> Result<SyncEvent>
where
    F: FnMut(&SyncEvent) -> bool,
{
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return Ok(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(SyncError::Cancelled),
            }
        }
    };
    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| SyncError::WaitTimeout)?
}
