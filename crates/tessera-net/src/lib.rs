//! # tessera-net
//!
//! Peer-to-peer sync for Tessera document stores.
//!
//! A [`Node`] attaches a [`DocumentStore`](tessera_db::DocumentStore) to a
//! [`NetworkTransport`] and keeps it converged with its peers:
//!
//! - the dispatcher announces new heads on per-collection gossip topics and
//!   pushes them to replicators, with retry and backoff
//! - the receiver merges announced or pushed heads, fetching missing
//!   ancestors first
//! - [`sync`] runs anti-entropy by comparing heads after (re)connecting
//!
//! [`MemoryNetwork`] is an in-process transport for tests and demos.
//!
//! ## Example
//!
//! ```rust
//! use tessera_net::{MemoryNetwork, NetworkTransport, NodeConfigBuilder, PeerId};
//!
//! let network = MemoryNetwork::new();
//! let transport = network.endpoint(PeerId::new("a"));
//! assert_eq!(transport.local_id().as_str(), "a");
//!
//! let config = NodeConfigBuilder::new().peer_id("a").fetch_timeout(500).build();
//! assert_eq!(config.fetch_timeout_ms, 500);
//! ```

pub mod config;
mod dispatcher;
pub mod error;
pub mod gossip;
pub mod network;
pub mod node;
pub mod peer;
pub mod protocol;
mod receiver;
pub mod replicator;
pub mod sync;

pub use config::{NodeConfig, NodeConfigBuilder, RetryPolicy};
pub use error::{NetworkError, Result, SyncError};
pub use gossip::SeenCache;
pub use network::{Incoming, MemoryNetwork, MemoryTransport, NetworkTransport, Responder};
pub use node::Node;
pub use peer::{PeerId, PeerState, PeerTable};
pub use protocol::{topic, Announcement, DocHeads, Message};
pub use replicator::{Replicator, ReplicatorStatus};
pub use sync::{wait_for_event, wait_for_merge, SyncEvent};
