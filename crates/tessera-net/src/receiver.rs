//! Inbound sync.
//!
//! Each incoming message is handled on its own task so a handler waiting on
//! a block fetch never blocks the replies that fetch depends on.

use crate::error::{Result, SyncError};
use crate::network::{Incoming, NetworkTransport};
use crate::node::Shared;
use crate::peer::PeerId;
use crate::protocol::{Announcement, DocHeads, Message};
use crate::sync::{self, SyncEvent};
use std::sync::Arc;
use tessera_core::codec::decode_verified;
use tessera_core::{ContentHash, DocumentId};
use tessera_kv::KvStore;
use tessera_merkle::{Resolver, ResolverConfig, VerifiedBlock};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

pub(crate) async fn run<S: KvStore, T: NetworkTransport>(shared: Arc<Shared<S, T>>, mut incoming: mpsc::Receiver<Incoming>) {
    loop {
        let next = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            next = incoming.recv() => next,
        };
        let Some(incoming) = next else { break };
        tokio::spawn(handle(shared.clone(), incoming));
    }
    debug!("receiver stopped");
}

async fn handle<S: KvStore, T: NetworkTransport>(shared: Arc<Shared<S, T>>, incoming: Incoming) {
    let (from, message, responder) = incoming.into_parts();
    trace!(from = %from, kind = message.kind(), "message received");

    let reply = match message {
        Message::Hello { collections, .. } => {
            shared.peers.subscribed(&from, collections);
            if shared.is_replicator(&from) {
                shared.retry_now.notify_one();
            }
            let task_shared = shared.clone();
            let peer = from.clone();
            tokio::spawn(async move {
                if let Err(err) = sync::sync_with(&task_shared, &peer).await {
                    // already emitted as SyncEvent::SyncError
                    debug!(peer = %peer, error = %err, "reverse anti-entropy failed");
                }
            });
            Some(Message::Hello {
                peer: shared.local_id().clone(),
                collections: shared.subscriptions(),
            })
        }
        Message::Subscriptions { collections } => {
            shared.peers.subscribed(&from, collections);
            None
        }
        Message::Announce(announcement) => {
            on_announcement(&shared, &from, announcement).await;
            None
        }
        Message::PushDelta {
            doc_id,
            collection,
            hash,
            block,
            ..
        } => match receive_block(&shared, &from, &collection, &doc_id, hash, Some(block)).await {
            Ok(_) => Some(Message::Ack),
            Err(err) => {
                let message = err.to_string();
                quarantine(&shared, &from, &hash, err);
                Some(Message::Error { message })
            }
        },
        Message::GetDelta { hash } => {
            let block = shared.store.get_block(&hash).unwrap_or_else(|err| {
                warn!(hash = %hash.short(), error = %err, "block lookup failed");
                None
            });
            Some(Message::Delta { hash, block })
        }
        Message::GetHeads { collection } => Some(heads_of(&shared, collection)),
        other => {
            debug!(from = %from, kind = other.kind(), "unsolicited message ignored");
            None
        }
    };

    if let (Some(responder), Some(reply)) = (responder, reply) {
        if let Err(err) = responder.respond(reply) {
            debug!(peer = %from, error = %err, "reply not delivered");
        }
    }
}

async fn on_announcement<S: KvStore, T: NetworkTransport>(shared: &Arc<Shared<S, T>>, from: &PeerId, announcement: Announcement) {
    if !shared.is_subscribed(&announcement.collection) {
        trace!(collection = %announcement.collection, "announcement outside subscriptions");
        return;
    }
    let fresh = shared.seen.lock().insert(announcement.hash);
    if !fresh {
        return;
    }

    let Announcement {
        doc_id, collection, hash, ..
    } = announcement;
    if let Err(err) = receive_block(shared, from, &collection, &doc_id, hash, None).await {
        shared.seen.lock().forget(&hash);
        quarantine(shared, from, &hash, err);
    }
}

fn heads_of<S: KvStore, T: NetworkTransport>(shared: &Shared<S, T>, collection: String) -> Message {
    let listed = shared.store.doc_ids(&collection).and_then(|ids| {
        ids.into_iter()
            .map(|doc_id| -> tessera_db::Result<DocHeads> {
                let heads = shared.store.composite_heads(&collection, &doc_id)?;
                Ok(DocHeads {
                    doc_id,
                    heads: heads.into_iter().map(|h| h.hash).collect(),
                })
            })
            .collect::<tessera_db::Result<Vec<DocHeads>>>()
    });
    match listed {
        Ok(docs) => Message::Heads { collection, docs },
        Err(err) => Message::Error {
            message: err.to_string(),
        },
    }
}

/// Fetch `root` and every missing ancestor from `from`, then merge them in
/// one transaction. Returns whether local state changed.
///
/// `root_bytes` are used for the root when the sender already supplied them.
pub(crate) async fn receive_block<S: KvStore, T: NetworkTransport>(
    shared: &Arc<Shared<S, T>>,
    from: &PeerId,
    collection: &str,
    doc_id: &DocumentId,
    root: ContentHash,
    mut root_bytes: Option<Vec<u8>>,
) -> Result<bool> {
    let store = &shared.store;
    if store.has_block(&root)? {
        return Ok(false);
    }

    let config = ResolverConfig {
        max_depth: shared.config.max_fetch_depth,
        max_blocks: shared.config.max_fetch_blocks,
    };
    let mut resolver = Resolver::new(root, config);
    while let Some((hash, depth)) = resolver.next_wanted() {
        if store.has_block(&hash)? {
            continue;
        }
        let bytes = match root_bytes.take().filter(|_| hash == root) {
            Some(bytes) => bytes,
            None => fetch_block(shared, from, hash).await?,
        };
        let delta = decode_verified(&bytes, &hash, &**store)?;
        if delta.doc_id != *doc_id {
            return Err(tessera_merkle::ResolveError::ForeignBlock(hash).into());
        }
        resolver.insert(depth, VerifiedBlock { hash, bytes, delta })?;
    }

    let blocks = resolver.into_ordered()?;
    if blocks.is_empty() {
        return Ok(false);
    }
    let outcome = store.merge_remote(collection, doc_id, &blocks, Some(from.as_str()))?;
    if outcome.changed {
        debug!(from = %from, doc = %doc_id, hash = %root.short(), blocks = blocks.len(), "remote head merged");
        shared.emit(SyncEvent::ReceivedUpdate {
            from: from.clone(),
            doc_id: doc_id.clone(),
            hash: root,
        });
    }
    Ok(outcome.changed)
}

async fn fetch_block<S: KvStore, T: NetworkTransport>(shared: &Shared<S, T>, from: &PeerId, hash: ContentHash) -> Result<Vec<u8>> {
    match shared.request(from, Message::GetDelta { hash }).await? {
        Message::Delta { block: Some(block), .. } => Ok(block),
        Message::Delta { block: None, .. } => Err(SyncError::BlockNotFound(hash)),
        other => Err(SyncError::UnexpectedResponse(other.kind().to_string())),
    }
}

/// Log and report a head that could not be merged. Local state is untouched.
pub(crate) fn quarantine<S: KvStore, T: NetworkTransport>(shared: &Shared<S, T>, from: &PeerId, hash: &ContentHash, err: SyncError) {
    warn!(peer = %from, hash = %hash.short(), class = ?err.class(), error = %err, "remote head rejected");
    shared.emit(SyncEvent::SyncError {
        peer: from.clone(),
        error: err.to_string(),
    });
}
