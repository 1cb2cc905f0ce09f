//! A sync node: a document store attached to a transport.
//!
//! The node owns three background tasks. The dispatcher follows the store's
//! event stream and announces or pushes new heads; the receiver answers
//! peers and merges what they send; the retry loop re-pushes heads that
//! replicators have not acknowledged. All stop when the node shuts down.

use crate::config::NodeConfig;
use crate::dispatcher;
use crate::error::{NetworkError, Result, SyncError};
use crate::gossip::SeenCache;
use crate::network::NetworkTransport;
use crate::peer::{PeerId, PeerState, PeerTable};
use crate::protocol::{topic, Message};
use crate::receiver;
use crate::replicator::{Replicator, ReplicatorStatus};
use crate::sync::{self, SyncEvent};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tessera_db::DocumentStore;
use tessera_kv::KvStore;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// State shared by the node handle and its background tasks.
pub(crate) struct Shared<S: KvStore, T: NetworkTransport> {
    pub store: Arc<DocumentStore<S>>,
    pub transport: Arc<T>,
    pub config: NodeConfig,
    pub peers: PeerTable,
    subscriptions: RwLock<BTreeSet<String>>,
    replicators: RwLock<BTreeMap<PeerId, Replicator>>,
    pub seen: Mutex<SeenCache>,
    events: broadcast::Sender<SyncEvent>,
    /// Wakes the retry loop before its next tick.
    pub retry_now: Notify,
    pub shutdown: CancellationToken,
}

impl<S: KvStore, T: NetworkTransport> Shared<S, T> {
    pub fn local_id(&self) -> &PeerId {
        self.transport.local_id()
    }

    pub fn emit(&self, event: SyncEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn subscriptions(&self) -> BTreeSet<String> {
        self.subscriptions.read().clone()
    }

    pub fn is_subscribed(&self, collection: &str) -> bool {
        self.subscriptions.read().contains(collection)
    }

    /// Replicators of `collection`.
    pub fn replicators_for(&self, collection: &str) -> Vec<PeerId> {
        self.replicators
            .read()
            .values()
            .filter(|r| r.collections.contains(collection))
            .map(|r| r.peer.clone())
            .collect()
    }

    pub fn is_replicator(&self, peer: &PeerId) -> bool {
        self.replicators.read().contains_key(peer)
    }

    pub fn replicates(&self, peer: &PeerId, collection: &str) -> bool {
        self.replicators
            .read()
            .get(peer)
            .is_some_and(|r| r.collections.contains(collection))
    }

    /// Every replicator with the collections it receives.
    pub fn replicator_targets(&self) -> Vec<(PeerId, Vec<String>)> {
        self.replicators
            .read()
            .values()
            .map(|r| (r.peer.clone(), r.collections.iter().cloned().collect()))
            .collect()
    }

    pub fn mark_replicator(&self, peer: &PeerId, status: ReplicatorStatus) {
        if let Some(replicator) = self.replicators.write().get_mut(peer) {
            if replicator.mark(status) {
                info!(peer = %peer, status = ?status, "replicator status changed");
            }
        }
    }

    /// Request/response with the configured timeout. An `Error` reply becomes
    /// [`SyncError::Remote`].
    pub async fn request(&self, peer: &PeerId, message: Message) -> Result<Message> {
        let response = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(SyncError::Cancelled),
            response = self.transport.request(peer, message, self.config.fetch_timeout()) => response,
        };
        match response {
            Ok(Message::Error { message }) => Err(SyncError::Remote {
                peer: peer.clone(),
                message,
            }),
            Ok(reply) => Ok(reply),
            Err(err) => {
                if matches!(err, NetworkError::Unreachable(_)) {
                    self.peers.disconnected(peer);
                }
                Err(err.into())
            }
        }
    }

    /// Tell every connected peer about our subscriptions.
    async fn advertise(&self) {
        let collections = self.subscriptions();
        for peer in self.transport.connected_peers().await {
            let message = Message::Subscriptions {
                collections: collections.clone(),
            };
            if let Err(err) = self.transport.send(&peer, message).await {
                debug!(peer = %peer, error = %err, "subscription update not delivered");
            }
        }
    }
}

/// A peer-to-peer sync node.
pub struct Node<S: KvStore, T: NetworkTransport> {
    shared: Arc<Shared<S, T>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: KvStore, T: NetworkTransport> Node<S, T> {
    /// Start syncing `store` over `transport`.
    ///
    /// Persisted subscriptions and replicators are restored; topics are
    /// joined before the background tasks start. Pushes left undelivered by
    /// a previous run are retried right away.
    ///
    /// A configured peer id must match the transport's own id.
    pub async fn start(store: Arc<DocumentStore<S>>, transport: T, config: NodeConfig) -> Result<Self> {
        if let Some(configured) = config.peer_id.as_deref() {
            if configured != transport.local_id().as_str() {
                return Err(SyncError::IdentityMismatch {
                    configured: configured.to_string(),
                    transport: transport.local_id().clone(),
                });
            }
        }
        let incoming = transport.subscribe()?;
        let store_events = store.subscribe();

        let subscriptions = store.p2p_collections()?;
        for collection in &subscriptions {
            transport.join_topic(&topic(collection)).await?;
        }
        let replicators: BTreeMap<PeerId, Replicator> = store
            .replicators()?
            .into_iter()
            .map(Replicator::from_record)
            .map(|r| (r.peer.clone(), r))
            .collect();

        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let shared = Arc::new(Shared {
            store,
            transport: Arc::new(transport),
            peers: PeerTable::new(),
            subscriptions: RwLock::new(subscriptions),
            replicators: RwLock::new(replicators),
            seen: Mutex::new(SeenCache::new(config.seen_capacity)),
            events,
            retry_now: Notify::new(),
            shutdown: CancellationToken::new(),
            config,
        });

        let tasks = vec![
            tokio::spawn(dispatcher::run(shared.clone(), store_events)),
            tokio::spawn(receiver::run(shared.clone(), incoming)),
            tokio::spawn(dispatcher::retry_loop(shared.clone())),
        ];
        let restored: Vec<PeerId> = shared.replicators.read().keys().cloned().collect();
        for peer in restored {
            if let Err(err) = shared.transport.connect(&peer).await {
                debug!(peer = %peer, error = %err, "restored replicator not reachable");
            }
        }
        info!(peer = %shared.local_id(), "sync node started");

        Ok(Node {
            shared,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn peer_id(&self) -> &PeerId {
        self.shared.local_id()
    }

    pub fn store(&self) -> &Arc<DocumentStore<S>> {
        &self.shared.store
    }

    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    pub fn peer_state(&self, peer: &PeerId) -> PeerState {
        self.shared.peers.state(peer)
    }

    pub fn subscribe_sync_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.shared.events.subscribe()
    }

    /// Connect, exchange subscriptions, then run anti-entropy.
    pub async fn connect(&self, peer: &PeerId) -> Result<()> {
        let shared = &self.shared;
        shared.peers.connecting(peer);
        if let Err(err) = shared.transport.connect(peer).await {
            shared.peers.disconnected(peer);
            return Err(err.into());
        }

        let hello = Message::Hello {
            peer: shared.local_id().clone(),
            collections: shared.subscriptions(),
        };
        match shared.request(peer, hello).await {
            Ok(Message::Hello { collections, .. }) => shared.peers.subscribed(peer, collections),
            Ok(other) => {
                shared.peers.disconnected(peer);
                return Err(SyncError::UnexpectedResponse(other.kind().to_string()));
            }
            Err(err) => {
                shared.peers.disconnected(peer);
                return Err(err);
            }
        }
        info!(peer = %peer, "connected");
        if shared.is_replicator(peer) {
            shared.retry_now.notify_one();
        }

        sync::sync_with(shared, peer).await?;
        Ok(())
    }

    pub async fn disconnect(&self, peer: &PeerId) -> Result<()> {
        self.shared.transport.disconnect(peer).await?;
        self.shared.peers.disconnected(peer);
        info!(peer = %peer, "disconnected");
        Ok(())
    }

    /// Run anti-entropy with a connected peer.
    pub async fn sync_with(&self, peer: &PeerId) -> Result<usize> {
        sync::sync_with(&self.shared, peer).await
    }

    // === Gossip subscriptions ===

    /// Subscribe to the gossip topics of `names`. Every collection must exist.
    pub async fn add_p2p_collections(&self, names: &[String]) -> Result<()> {
        self.shared.store.add_p2p_collections(names)?;
        for name in names {
            self.shared.transport.join_topic(&topic(name)).await?;
        }
        self.shared.subscriptions.write().extend(names.iter().cloned());
        info!(collections = ?names, "gossip subscriptions added");
        self.shared.advertise().await;
        Ok(())
    }

    pub async fn remove_p2p_collections(&self, names: &[String]) -> Result<()> {
        self.shared.store.remove_p2p_collections(names)?;
        for name in names {
            self.shared.transport.leave_topic(&topic(name)).await?;
        }
        {
            let mut subscriptions = self.shared.subscriptions.write();
            for name in names {
                subscriptions.remove(name);
            }
        }
        info!(collections = ?names, "gossip subscriptions removed");
        self.shared.advertise().await;
        Ok(())
    }

    pub fn p2p_collections(&self) -> BTreeSet<String> {
        self.shared.subscriptions()
    }

    // === Replicators ===

    /// Push every commit of `collections` to `peer`. An empty list means all
    /// collections that currently exist.
    ///
    /// Current heads of newly added collections are backfilled once; a
    /// [`SyncEvent::BackfillCompleted`] reports how many were pushed. Setting
    /// an existing replicator again also retries its undelivered pushes.
    pub async fn set_replicator(&self, peer: &PeerId, collections: &[String]) -> Result<()> {
        let shared = &self.shared;
        if peer == shared.local_id() {
            return Err(SyncError::SelfReplicator);
        }

        let wanted: BTreeSet<String> = if collections.is_empty() {
            shared.store.collections().into_iter().map(|d| d.name).collect()
        } else {
            for name in collections {
                shared.store.collection(name)?;
            }
            collections.iter().cloned().collect()
        };

        let mut replicator = shared
            .replicators
            .read()
            .get(peer)
            .cloned()
            .unwrap_or_else(|| Replicator::new(peer.clone()));
        let added: Vec<String> = wanted.difference(&replicator.collections).cloned().collect();
        replicator.collections.extend(added.iter().cloned());
        shared.store.put_replicator(&replicator.to_record())?;
        shared.replicators.write().insert(peer.clone(), replicator);
        info!(peer = %peer, added = ?added, "replicator set");

        if let Err(err) = shared.transport.connect(peer).await {
            warn!(peer = %peer, error = %err, "replicator not reachable yet");
        }

        let task = tokio::spawn(dispatcher::backfill(shared.clone(), peer.clone(), added));
        self.tasks.lock().push(task);
        shared.retry_now.notify_one();
        Ok(())
    }

    /// Stop replicating `collections` to `peer`; an empty list removes the
    /// replicator entirely.
    pub fn delete_replicator(&self, peer: &PeerId, collections: &[String]) -> Result<()> {
        let shared = &self.shared;
        let mut replicator = shared
            .replicators
            .read()
            .get(peer)
            .cloned()
            .ok_or_else(|| SyncError::ReplicatorNotFound(peer.clone()))?;

        if collections.is_empty() {
            replicator.collections.clear();
        } else {
            for name in collections {
                replicator.collections.remove(name);
            }
        }

        if replicator.collections.is_empty() {
            shared.store.remove_replicator(peer.as_str())?;
            shared.replicators.write().remove(peer);
            info!(peer = %peer, "replicator removed");
        } else {
            shared.store.put_replicator(&replicator.to_record())?;
            shared.replicators.write().insert(peer.clone(), replicator);
            info!(peer = %peer, removed = ?collections, "replicator narrowed");
        }
        Ok(())
    }

    pub fn replicators(&self) -> Vec<Replicator> {
        self.shared.replicators.read().values().cloned().collect()
    }

    pub fn replicator(&self, peer: &PeerId) -> Option<Replicator> {
        self.shared.replicators.read().get(peer).cloned()
    }

    /// Stop the background tasks and wait for them.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for joined in futures::future::join_all(tasks).await {
            if let Err(err) = joined {
                if !err.is_cancelled() {
                    warn!(error = %err, "sync task panicked");
                }
            }
        }
        info!(peer = %self.peer_id(), "sync node stopped");
    }
}

impl<S: KvStore, T: NetworkTransport> Drop for Node<S, T> {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}
