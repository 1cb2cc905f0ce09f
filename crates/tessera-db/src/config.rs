//! Document store configuration.

use serde::{Deserialize, Serialize};

/// Configuration for a [`DocumentStore`](crate::DocumentStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How many times a conflicting transaction is restarted before giving up.
    pub max_txn_retries: usize,
    /// Capacity of the post-commit event queue.
    pub event_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_txn_retries: 16,
            event_capacity: 1024,
        }
    }
}

impl StoreConfig {
    /// Parse a JSON config; missing keys keep their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Builder for store configuration.
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: StoreConfig::default(),
        }
    }

    pub fn max_txn_retries(mut self, retries: usize) -> Self {
        self.config.max_txn_retries = retries;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> StoreConfig {
        self.config
    }
}

impl Default for StoreConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = StoreConfigBuilder::new().max_txn_retries(3).event_capacity(0).build();
        assert_eq!(config.max_txn_retries, 3);
        assert_eq!(config.event_capacity, 1);
    }

    #[test]
    fn test_json_defaults() {
        let config = StoreConfig::from_json_str(r#"{"max_txn_retries": 4}"#).unwrap();
        assert_eq!(config.max_txn_retries, 4);
        assert_eq!(config.event_capacity, StoreConfig::default().event_capacity);
    }
}
