//! Node configuration.

use crate::peer::PeerId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff for replicator pushes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 2000,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `failed + 1`, doubling from the initial backoff.
    pub fn backoff(&self, failed: u32) -> Duration {
        let exponent = failed.saturating_sub(1).min(20);
        let delay = self.initial_backoff_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}

/// Configuration for a sync [`Node`](crate::Node).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Generated when unset.
    pub peer_id: Option<String>,
    /// Timeout for a single block or heads request.
    pub fetch_timeout_ms: u64,
    pub max_fetch_depth: usize,
    pub max_fetch_blocks: usize,
    pub push_retry: RetryPolicy,
    /// Period of the loop that re-pushes heads replicators missed.
    pub retry_interval_ms: u64,
    /// Capacity of the sync event queue.
    pub event_capacity: usize,
    /// Announcement hashes remembered for deduplication.
    pub seen_capacity: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            peer_id: None,
            fetch_timeout_ms: 5000,
            max_fetch_depth: 1000,
            max_fetch_blocks: 10_000,
            push_retry: RetryPolicy::default(),
            retry_interval_ms: 2000,
            event_capacity: 1024,
            seen_capacity: 4096,
        }
    }
}

impl NodeConfig {
    /// Parse a JSON config; missing keys keep their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// The configured peer id, or a fresh random one.
    pub fn resolve_peer_id(&self) -> PeerId {
        self.peer_id.as_deref().map(PeerId::new).unwrap_or_else(PeerId::random)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms.max(1))
    }
}

/// Builder for node configuration.
pub struct NodeConfigBuilder {
    config: NodeConfig,
}

impl NodeConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
        }
    }

    pub fn peer_id(mut self, id: impl Into<String>) -> Self {
        self.config.peer_id = Some(id.into());
        self
    }

    pub fn fetch_timeout(mut self, ms: u64) -> Self {
        self.config.fetch_timeout_ms = ms;
        self
    }

    pub fn max_fetch_depth(mut self, depth: usize) -> Self {
        self.config.max_fetch_depth = depth;
        self
    }

    pub fn max_fetch_blocks(mut self, blocks: usize) -> Self {
        self.config.max_fetch_blocks = blocks;
        self
    }

    pub fn push_retry(mut self, policy: RetryPolicy) -> Self {
        self.config.push_retry = policy;
        self
    }

    pub fn retry_interval(mut self, ms: u64) -> Self {
        self.config.retry_interval_ms = ms;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> NodeConfig {
        self.config
    }
}

impl Default for NodeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_config_builder() {
        let config = NodeConfigBuilder::new()
            .peer_id("a")
            .fetch_timeout(300)
            .max_fetch_depth(10)
            .max_fetch_blocks(20)
            .build();

        assert_eq!(config.peer_id.as_deref(), Some("a"));
        assert_eq!(config.fetch_timeout(), Duration::from_millis(300));
        assert_eq!(config.max_fetch_depth, 10);
        assert_eq!(config.max_fetch_blocks, 20);
        assert_eq!(config.push_retry, RetryPolicy::default());
        assert_eq!(config.resolve_peer_id(), PeerId::new("a"));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(50));
        assert_eq!(policy.backoff(2), Duration::from_millis(100));
        assert_eq!(policy.backoff(3), Duration::from_millis(200));
        assert_eq!(policy.backoff(40), Duration::from_millis(2000));
    }

    #[test]
    fn test_from_json() {
        let config = NodeConfig::from_json_str(r#"{"peer_id": "b", "push_retry": {"max_attempts": 2}}"#).unwrap();
        assert_eq!(config.peer_id.as_deref(), Some("b"));
        assert_eq!(config.push_retry.max_attempts, 2);
        assert_eq!(config.push_retry.initial_backoff_ms, 50);
        assert_eq!(config.fetch_timeout_ms, 5000);
        assert_eq!(config.retry_interval(), Duration::from_secs(2));
    }
}
