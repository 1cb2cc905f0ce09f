//! Outbound sync.
//!
//! Every new head is announced on the collection's gossip topic when this
//! node subscribes to it, and pushed directly to each replicator of the
//! collection. Merged remote heads are forwarded the same way, except back
//! to the peer they came from.
//!
//! A push that exhausts its retries is persisted as a [`RetryEntry`] and
//! delivered later by the retry loop, so a replicator that was offline still
//! receives documents nobody edits again.

use crate::error::{NetworkError, Result, SyncError};
use crate::network::NetworkTransport;
use crate::node::Shared;
use crate::peer::PeerId;
use crate::protocol::{topic, Announcement, Message};
use crate::replicator::ReplicatorStatus;
use crate::sync::SyncEvent;
use std::sync::Arc;
use tessera_core::{ContentHash, DocumentId};
use tessera_db::{Event, RetryEntry};
use tessera_kv::KvStore;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

pub(crate) async fn run<S: KvStore, T: NetworkTransport>(shared: Arc<Shared<S, T>>, mut events: broadcast::Receiver<Event>) {
    loop {
        let event = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(Event::Update(update)) => {
                dispatch(&shared, update.collection, update.doc_id, update.hash, update.height, None).await;
            }
            Ok(Event::Merged(merged)) if merged.changed => {
                let origin = merged.origin.map(PeerId::new);
                dispatch(&shared, merged.collection, merged.doc_id, merged.hash, merged.height, origin).await;
            }
            Ok(Event::Merged(_)) => {}
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "store events lagged; re-announcing heads");
                announce_all(&shared).await;
                for (peer, collections) in shared.replicator_targets() {
                    tokio::spawn(backfill(shared.clone(), peer, collections));
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("dispatcher stopped");
}

async fn dispatch<S: KvStore, T: NetworkTransport>(
    shared: &Arc<Shared<S, T>>,
    collection: String,
    doc_id: DocumentId,
    hash: ContentHash,
    height: u64,
    origin: Option<PeerId>,
) {
    for peer in shared.replicators_for(&collection) {
        if origin.as_ref() == Some(&peer) {
            continue;
        }
        tokio::spawn(push(shared.clone(), peer, collection.clone(), doc_id.clone(), hash));
    }

    if shared.is_subscribed(&collection) {
        shared.seen.lock().insert(hash);
        announce(
            shared,
            Announcement {
                doc_id,
                collection,
                hash,
                height,
                creator: shared.local_id().clone(),
            },
        )
        .await;
    }
}

async fn announce<S: KvStore, T: NetworkTransport>(shared: &Shared<S, T>, announcement: Announcement) {
    let topic = topic(&announcement.collection);
    let hash = announcement.hash;
    match shared.transport.publish(&topic, Message::Announce(announcement)).await {
        Ok(reached) => trace!(topic = %topic, hash = %hash.short(), reached, "head announced"),
        Err(err) => warn!(topic = %topic, error = %err, "announcement failed"),
    }
}

/// Announce every composite head of every subscribed collection.
pub(crate) async fn announce_all<S: KvStore, T: NetworkTransport>(shared: &Arc<Shared<S, T>>) {
    for collection in shared.subscriptions() {
        let doc_ids = match shared.store.doc_ids(&collection) {
            Ok(ids) => ids,
            Err(err) => {
                warn!(collection = %collection, error = %err, "cannot list documents");
                continue;
            }
        };
        for doc_id in doc_ids {
            let heads = match shared.store.composite_heads(&collection, &doc_id) {
                Ok(heads) => heads,
                Err(err) => {
                    warn!(doc = %doc_id, error = %err, "cannot read heads");
                    continue;
                }
            };
            for head in heads {
                let announcement = Announcement {
                    doc_id: doc_id.clone(),
                    collection: collection.clone(),
                    hash: head.hash,
                    height: head.height,
                    creator: shared.local_id().clone(),
                };
                announce(shared, announcement).await;
            }
        }
    }
}

/// Push one block to a replicator, retrying with backoff until it is
/// acknowledged or the attempts run out.
pub(crate) async fn push<S: KvStore, T: NetworkTransport>(
    shared: Arc<Shared<S, T>>,
    peer: PeerId,
    collection: String,
    doc_id: DocumentId,
    hash: ContentHash,
) -> Result<()> {
    let result = push_with_retry(&shared, &peer, &collection, &doc_id, hash).await;
    match &result {
        Ok(()) => {
            shared.mark_replicator(&peer, ReplicatorStatus::Active);
            shared.emit(SyncEvent::SentUpdate {
                to: peer.clone(),
                doc_id,
                hash,
            });
        }
        Err(SyncError::Cancelled) => {}
        Err(err) => {
            warn!(peer = %peer, hash = %hash.short(), error = %err, "push failed");
            if matches!(err, SyncError::Network(_) | SyncError::Remote { .. }) {
                let pending = RetryEntry::new(peer.as_str(), collection.as_str(), doc_id);
                if let Err(err) = shared.store.put_replicator_retry(&pending) {
                    warn!(peer = %peer, error = %err, "cannot persist push for retry");
                }
            }
            shared.mark_replicator(&peer, ReplicatorStatus::Inactive);
            shared.emit(SyncEvent::SyncError {
                peer: peer.clone(),
                error: err.to_string(),
            });
        }
    }
    result
}

async fn push_with_retry<S: KvStore, T: NetworkTransport>(
    shared: &Shared<S, T>,
    peer: &PeerId,
    collection: &str,
    doc_id: &DocumentId,
    hash: ContentHash,
) -> Result<()> {
    let block = shared
        .store
        .get_block(&hash)?
        .ok_or(SyncError::BlockNotFound(hash))?;
    let commit = shared.store.get_commit(&hash)?;
    let message = Message::PushDelta {
        doc_id: doc_id.clone(),
        collection: collection.to_string(),
        hash,
        block,
        predecessors: commit.predecessors,
        creator: shared.local_id().clone(),
    };

    let policy = &shared.config.push_retry;
    let mut failed = 0;
    loop {
        let err = match shared.request(peer, message.clone()).await {
            Ok(Message::Ack) => {
                debug!(peer = %peer, hash = %hash.short(), "push acknowledged");
                return Ok(());
            }
            Ok(other) => SyncError::UnexpectedResponse(other.kind().to_string()),
            Err(err) => err,
        };
        failed += 1;
        if !err.is_retryable() || failed >= policy.max_attempts {
            return Err(err);
        }

        let delay = policy.backoff(failed);
        debug!(peer = %peer, attempt = failed, delay_ms = delay.as_millis() as u64, error = %err, "push retry");
        tokio::select! {
            _ = shared.shutdown.cancelled() => return Err(SyncError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        if matches!(err, SyncError::Network(NetworkError::NotConnected(_) | NetworkError::Unreachable(_))) {
            if let Err(err) = shared.transport.connect(peer).await {
                trace!(peer = %peer, error = %err, "relink failed");
            }
        }
    }
}

/// Push the current composite heads of `collections` to a new replicator.
pub(crate) async fn backfill<S: KvStore, T: NetworkTransport>(
    shared: Arc<Shared<S, T>>,
    peer: PeerId,
    collections: Vec<String>,
) {
    let mut pushed = 0;
    for collection in collections {
        let doc_ids = match shared.store.doc_ids(&collection) {
            Ok(ids) => ids,
            Err(err) => {
                warn!(collection = %collection, error = %err, "backfill cannot list documents");
                continue;
            }
        };
        for doc_id in doc_ids {
            let heads = match shared.store.composite_heads(&collection, &doc_id) {
                Ok(heads) => heads,
                Err(err) => {
                    warn!(doc = %doc_id, error = %err, "backfill cannot read heads");
                    continue;
                }
            };
            for head in heads {
                if shared.shutdown.is_cancelled() {
                    return;
                }
                if push(shared.clone(), peer.clone(), collection.clone(), doc_id.clone(), head.hash)
                    .await
                    .is_ok()
                {
                    pushed += 1;
                }
            }
        }
    }
    debug!(peer = %peer, pushed, "backfill completed");
    shared.emit(SyncEvent::BackfillCompleted { peer, pushed });
}

/// Deliver persisted retries every `retry_interval`, and right away when
/// woken through `retry_now`.
pub(crate) async fn retry_loop<S: KvStore, T: NetworkTransport>(shared: Arc<Shared<S, T>>) {
    let mut ticker = tokio::time::interval(shared.config.retry_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
            _ = shared.retry_now.notified() => {}
        }
        retry_pending(&shared).await;
    }
    debug!("retry loop stopped");
}

async fn retry_pending<S: KvStore, T: NetworkTransport>(shared: &Arc<Shared<S, T>>) {
    for (peer, _) in shared.replicator_targets() {
        let pending = match shared.store.replicator_retries(peer.as_str()) {
            Ok(pending) => pending,
            Err(err) => {
                warn!(peer = %peer, error = %err, "cannot read pending retries");
                continue;
            }
        };
        for entry in pending {
            if shared.shutdown.is_cancelled() {
                return;
            }
            if redeliver(shared, &peer, entry).await.is_err() {
                // still unreachable, the rest waits for the next round
                break;
            }
        }
    }
}

/// Push the current heads of a pending document. The entry is dropped
/// before pushing; a failed push records it again.
async fn redeliver<S: KvStore, T: NetworkTransport>(shared: &Arc<Shared<S, T>>, peer: &PeerId, entry: RetryEntry) -> Result<()> {
    shared.store.remove_replicator_retry(&entry)?;
    if !shared.replicates(peer, &entry.collection) {
        trace!(peer = %peer, collection = %entry.collection, "retry for a collection no longer replicated");
        return Ok(());
    }
    let heads = shared.store.composite_heads(&entry.collection, &entry.doc_id)?;
    trace!(peer = %peer, doc = %entry.doc_id, heads = heads.len(), "redelivering");
    for head in heads {
        push(shared.clone(), peer.clone(), entry.collection.clone(), entry.doc_id.clone(), head.hash).await?;
    }
    Ok(())
}
