//! Configuration for a mesh node

use std::time::Duration;

use serde::{Deserialize, Serialize};
use skein_core::{ConfigError, LinkRole, MAX_MESSAGE_SIZE};

/// Tunables for connections, queues and timers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Silence after which a link is considered dead, in milliseconds
    pub node_timeout_ms: u64,
    /// Largest envelope accepted for sending, in bytes
    pub max_message_size: usize,
    /// Queue length at which normal messages are rejected
    pub max_queue_len: usize,
    /// Extra queue slots only priority messages may use
    pub priority_headroom: usize,
    /// Heap budget shared by all send queues, in bytes
    pub heap_budget: usize,
    /// Free heap that must remain after admitting a message, in bytes
    pub min_free_memory: usize,
    /// Delay before dropped-connection cleanup runs, in milliseconds
    pub dropped_connection_delay_ms: u64,
    /// Reactor tick period, in milliseconds
    pub tick_interval_ms: u64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            node_timeout_ms: 10_000,
            max_message_size: MAX_MESSAGE_SIZE,
            max_queue_len: 50,
            priority_headroom: 8,
            heap_budget: 96 * 1024,
            min_free_memory: 4_000,
            dropped_connection_delay_ms: 1_000,
            tick_interval_ms: 100,
        }
    }
}

impl MeshConfig {
    /// Liveness timeout
    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }

    /// Sync cadence for a link role
    ///
    /// The initiating side syncs four times as often as the accepting side
    /// so both ends do not request at the same moment.
    pub fn sync_interval(&self, role: LinkRole) -> Duration {
        match role {
            LinkRole::Initiator => self.node_timeout() / 2,
            LinkRole::Acceptor => self.node_timeout() * 2,
        }
    }

    /// Hard queue bound, priority headroom included
    pub fn queue_capacity(&self) -> usize {
        self.max_queue_len + self.priority_headroom
    }

    /// Delay before dropped-connection cleanup
    pub fn dropped_connection_delay(&self) -> Duration {
        Duration::from_millis(self.dropped_connection_delay_ms)
    }

    /// Reactor tick period
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Set the liveness timeout
    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the normal queue length limit
    pub fn with_max_queue_len(mut self, len: usize) -> Self {
        self.max_queue_len = len;
        self
    }

    /// Set the heap budget and safety margin
    pub fn with_memory(mut self, heap_budget: usize, min_free_memory: usize) -> Self {
        self.heap_budget = heap_budget;
        self.min_free_memory = min_free_memory;
        self
    }

    /// Set the dropped-connection cleanup delay
    pub fn with_dropped_connection_delay(mut self, delay: Duration) -> Self {
        self.dropped_connection_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Check that the values can work together
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "node_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_message_size == 0 || self.max_message_size > MAX_MESSAGE_SIZE {
            return Err(ConfigError::Invalid {
                field: "max_message_size",
                reason: format!("must be between 1 and {}", MAX_MESSAGE_SIZE),
            });
        }
        if self.max_queue_len == 0 {
            return Err(ConfigError::Invalid {
                field: "max_queue_len",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.min_free_memory >= self.heap_budget {
            return Err(ConfigError::Invalid {
                field: "min_free_memory",
                reason: format!("must be below heap_budget ({})", self.heap_budget),
            });
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "tick_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MeshConfig::default();
        assert_eq!(config.max_message_size, 1400);
        assert_eq!(config.max_queue_len, 50);
        assert_eq!(config.queue_capacity(), 58);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sync_interval_by_role() {
        let config = MeshConfig::default().with_node_timeout(Duration::from_secs(10));
        assert_eq!(config.sync_interval(LinkRole::Initiator), Duration::from_secs(5));
        assert_eq!(config.sync_interval(LinkRole::Acceptor), Duration::from_secs(20));
    }

    #[test]
    fn test_validation() {
        let config = MeshConfig {
            max_message_size: 1401,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = MeshConfig::default().with_memory(1_000, 1_000);
        assert!(config.validate().is_err());

        let config = MeshConfig::default().with_max_queue_len(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let config: MeshConfig = serde_json::from_str(r#"{"max_queue_len": 5}"#).unwrap();
        assert_eq!(config.max_queue_len, 5);
        assert_eq!(config.node_timeout_ms, 10_000);
    }
}
