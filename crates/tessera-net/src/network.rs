//! Network transport abstractions for Tessera sync.

use crate::error::NetworkError;
use crate::peer::PeerId;
use crate::protocol::Message;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

/// A message delivered to this node.
#[derive(Debug)]
pub struct Incoming {
    pub from: PeerId,
    pub message: Message,
    reply: Option<oneshot::Sender<Message>>,
}

impl Incoming {
    pub fn new(from: PeerId, message: Message, reply: Option<oneshot::Sender<Message>>) -> Self {
        Self { from, message, reply }
    }

    /// Split into the message and its reply handle.
    pub fn into_parts(self) -> (PeerId, Message, Option<Responder>) {
        let responder = self.reply.map(|tx| Responder { tx });
        (self.from, self.message, responder)
    }
}

/// Answers a request.
#[derive(Debug)]
pub struct Responder {
    tx: oneshot::Sender<Message>,
}

impl Responder {
    pub fn respond(self, message: Message) -> Result<(), NetworkError> {
        let message = transit(&message)?;
        self.tx.send(message).map_err(|_| NetworkError::Closed)
    }
}

/// Abstract network transport trait.
#[async_trait]
pub trait NetworkTransport: Send + Sync + 'static {
    fn local_id(&self) -> &PeerId;

    /// Establish a link to a peer.
    async fn connect(&self, peer: &PeerId) -> Result<(), NetworkError>;

    async fn disconnect(&self, peer: &PeerId) -> Result<(), NetworkError>;

    /// Fire-and-forget delivery to a connected peer.
    async fn send(&self, peer: &PeerId, message: Message) -> Result<(), NetworkError>;

    /// Send a message and wait for the peer's response.
    async fn request(&self, peer: &PeerId, message: Message, timeout: Duration) -> Result<Message, NetworkError>;

    async fn join_topic(&self, topic: &str) -> Result<(), NetworkError>;

    async fn leave_topic(&self, topic: &str) -> Result<(), NetworkError>;

    /// Deliver to every connected peer that joined `topic`. Returns how many were reached.
    async fn publish(&self, topic: &str, message: Message) -> Result<usize, NetworkError>;

    async fn connected_peers(&self) -> Vec<PeerId>;

    /// Take the stream of incoming messages. Only one caller gets it.
    fn subscribe(&self) -> Result<mpsc::Receiver<Incoming>, NetworkError>;
}

/// Serialize and deserialize a message the way it would cross a wire.
fn transit(message: &Message) -> Result<Message, NetworkError> {
    let bytes = serde_json::to_vec(message)?;
    Ok(serde_json::from_slice(&bytes)?)
}

struct Endpoint {
    inbox: mpsc::Sender<Incoming>,
    online: bool,
    topics: HashSet<String>,
    links: HashSet<PeerId>,
}

#[derive(Default)]
struct Hub {
    endpoints: HashMap<PeerId, Endpoint>,
}

impl Hub {
    /// Inbox of `to` if both ends are online and linked.
    fn route(&self, from: &PeerId, to: &PeerId) -> Result<mpsc::Sender<Incoming>, NetworkError> {
        let source = self.endpoints.get(from).ok_or(NetworkError::Closed)?;
        if !source.online {
            return Err(NetworkError::Unreachable(to.clone()));
        }
        if !source.links.contains(to) {
            return Err(NetworkError::NotConnected(to.clone()));
        }
        match self.endpoints.get(to) {
            Some(target) if target.online => Ok(target.inbox.clone()),
            _ => Err(NetworkError::Unreachable(to.clone())),
        }
    }
}

/// In-memory network connecting any number of [`MemoryTransport`]s.
///
/// Every message is serialized to JSON and back in transit.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<RwLock<Hub>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer and return its transport.
    pub fn endpoint(&self, peer: PeerId) -> MemoryTransport {
        let (tx, rx) = mpsc::channel(1024);
        self.hub.write().endpoints.insert(
            peer.clone(),
            Endpoint {
                inbox: tx,
                online: true,
                topics: HashSet::new(),
                links: HashSet::new(),
            },
        );
        MemoryTransport {
            local_id: peer,
            hub: self.hub.clone(),
            incoming: Mutex::new(Some(rx)),
        }
    }

    /// Take a peer offline or bring it back. Offline peers neither send nor receive.
    pub fn set_online(&self, peer: &PeerId, online: bool) {
        if let Some(endpoint) = self.hub.write().endpoints.get_mut(peer) {
            endpoint.online = online;
        }
    }

    pub fn is_online(&self, peer: &PeerId) -> bool {
        self.hub.read().endpoints.get(peer).is_some_and(|e| e.online)
    }
}

/// One peer's handle on a [`MemoryNetwork`].
pub struct MemoryTransport {
    local_id: PeerId,
    hub: Arc<RwLock<Hub>>,
    incoming: Mutex<Option<mpsc::Receiver<Incoming>>>,
}

impl MemoryTransport {
    fn route(&self, peer: &PeerId) -> Result<mpsc::Sender<Incoming>, NetworkError> {
        self.hub.read().route(&self.local_id, peer)
    }

    async fn deliver(&self, inbox: mpsc::Sender<Incoming>, peer: &PeerId, incoming: Incoming) -> Result<(), NetworkError> {
        inbox
            .send(incoming)
            .await
            .map_err(|_| NetworkError::Unreachable(peer.clone()))
    }
}

#[async_trait]
impl NetworkTransport for MemoryTransport {
    fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    async fn connect(&self, peer: &PeerId) -> Result<(), NetworkError> {
        let mut hub = self.hub.write();
        let reachable = hub.endpoints.get(peer).is_some_and(|e| e.online)
            && hub.endpoints.get(&self.local_id).is_some_and(|e| e.online);
        if !reachable || *peer == self.local_id {
            return Err(NetworkError::Unreachable(peer.clone()));
        }
        if let Some(local) = hub.endpoints.get_mut(&self.local_id) {
            local.links.insert(peer.clone());
        }
        if let Some(remote) = hub.endpoints.get_mut(peer) {
            remote.links.insert(self.local_id.clone());
        }
        Ok(())
    }

    async fn disconnect(&self, peer: &PeerId) -> Result<(), NetworkError> {
        let mut hub = self.hub.write();
        if let Some(local) = hub.endpoints.get_mut(&self.local_id) {
            local.links.remove(peer);
        }
        if let Some(remote) = hub.endpoints.get_mut(peer) {
            remote.links.remove(&self.local_id);
        }
        Ok(())
    }

    async fn send(&self, peer: &PeerId, message: Message) -> Result<(), NetworkError> {
        let inbox = self.route(peer)?;
        let incoming = Incoming::new(self.local_id.clone(), transit(&message)?, None);
        self.deliver(inbox, peer, incoming).await
    }

    async fn request(&self, peer: &PeerId, message: Message, timeout: Duration) -> Result<Message, NetworkError> {
        let inbox = self.route(peer)?;
        let (tx, rx) = oneshot::channel();
        let incoming = Incoming::new(self.local_id.clone(), transit(&message)?, Some(tx));
        self.deliver(inbox, peer, incoming).await?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(NetworkError::Unreachable(peer.clone())),
            Err(_) => Err(NetworkError::Timeout(peer.clone())),
        }
    }

    async fn join_topic(&self, topic: &str) -> Result<(), NetworkError> {
        if let Some(local) = self.hub.write().endpoints.get_mut(&self.local_id) {
            local.topics.insert(topic.to_string());
        }
        Ok(())
    }

    async fn leave_topic(&self, topic: &str) -> Result<(), NetworkError> {
        if let Some(local) = self.hub.write().endpoints.get_mut(&self.local_id) {
            local.topics.remove(topic);
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, message: Message) -> Result<usize, NetworkError> {
        let targets: Vec<(PeerId, mpsc::Sender<Incoming>)> = {
            let hub = self.hub.read();
            let local = hub.endpoints.get(&self.local_id).ok_or(NetworkError::Closed)?;
            if !local.online {
                return Ok(0);
            }
            local
                .links
                .iter()
                .filter_map(|peer| {
                    let endpoint = hub.endpoints.get(peer)?;
                    (endpoint.online && endpoint.topics.contains(topic)).then(|| (peer.clone(), endpoint.inbox.clone()))
                })
                .collect()
        };

        let mut reached = 0;
        for (peer, inbox) in targets {
            let incoming = Incoming::new(self.local_id.clone(), transit(&message)?, None);
            if self.deliver(inbox, &peer, incoming).await.is_ok() {
                reached += 1;
            }
        }
        trace!(topic, reached, "published");
        Ok(reached)
    }

    async fn connected_peers(&self) -> Vec<PeerId> {
        let hub = self.hub.read();
        hub.endpoints
            .get(&self.local_id)
            .map(|e| e.links.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn subscribe(&self) -> Result<mpsc::Receiver<Incoming>, NetworkError> {
        self.incoming.lock().take().ok_or(NetworkError::AlreadySubscribed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn hello(peer: &str) -> Message {
        Message::Hello {
            peer: PeerId::new(peer),
            collections: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn test_memory_transport() {
        let network = MemoryNetwork::new();
        let a = network.endpoint(PeerId::new("a"));
        let b = network.endpoint(PeerId::new("b"));
        let mut inbox = b.subscribe().unwrap();

        a.connect(b.local_id()).await.unwrap();
        assert_eq!(a.connected_peers().await, vec![PeerId::new("b")]);
        assert_eq!(b.connected_peers().await, vec![PeerId::new("a")]);

        a.send(b.local_id(), hello("a")).await.unwrap();
        let incoming = inbox.recv().await.unwrap();
        assert_eq!(incoming.from, PeerId::new("a"));
        assert_eq!(incoming.message, hello("a"));
        assert!(incoming.into_parts().2.is_none());
        assert_eq!(b.subscribe().unwrap_err(), NetworkError::AlreadySubscribed);
    }

    #[tokio::test]
    async fn test_request_response() {
        let network = MemoryNetwork::new();
        let a = network.endpoint(PeerId::new("a"));
        let b = network.endpoint(PeerId::new("b"));
        let mut inbox = b.subscribe().unwrap();
        a.connect(b.local_id()).await.unwrap();

        tokio::spawn(async move {
            let incoming = inbox.recv().await.unwrap();
            let (_, _, responder) = incoming.into_parts();
            responder.unwrap().respond(Message::Ack).unwrap();
        });

        let response = a
            .request(b.local_id(), hello("a"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response, Message::Ack);
    }

    #[tokio::test]
    async fn test_request_times_out() {
        let network = MemoryNetwork::new();
        let a = network.endpoint(PeerId::new("a"));
        let b = network.endpoint(PeerId::new("b"));
        let _inbox = b.subscribe().unwrap();
        a.connect(b.local_id()).await.unwrap();

        let err = a
            .request(b.local_id(), hello("a"), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, NetworkError::Timeout(PeerId::new("b")));
    }

    #[tokio::test]
    async fn test_publish_reaches_topic_members_only() {
        let network = MemoryNetwork::new();
        let a = network.endpoint(PeerId::new("a"));
        let b = network.endpoint(PeerId::new("b"));
        let c = network.endpoint(PeerId::new("c"));
        a.connect(b.local_id()).await.unwrap();
        a.connect(c.local_id()).await.unwrap();
        b.join_topic("users").await.unwrap();

        assert_eq!(a.publish("users", Message::Ack).await.unwrap(), 1);
        b.leave_topic("users").await.unwrap();
        assert_eq!(a.publish("users", Message::Ack).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_peer_unreachable() {
        let network = MemoryNetwork::new();
        let a = network.endpoint(PeerId::new("a"));
        let b = network.endpoint(PeerId::new("b"));
        a.connect(b.local_id()).await.unwrap();

        network.set_online(b.local_id(), false);
        assert!(!network.is_online(b.local_id()));
        assert_eq!(
            a.send(b.local_id(), Message::Ack).await.unwrap_err(),
            NetworkError::Unreachable(PeerId::new("b"))
        );
        assert!(a.connect(b.local_id()).await.is_err());

        network.set_online(b.local_id(), true);
        assert!(a.send(b.local_id(), Message::Ack).await.is_ok());
    }
}
