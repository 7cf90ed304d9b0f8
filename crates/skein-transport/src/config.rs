//! TCP transport configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};
use skein_core::{ConfigError, MAX_MESSAGE_SIZE};

/// Tunables for TCP links
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Bytes a link accepts before reporting backpressure
    pub send_buffer: usize,
    /// Largest inbound frame before the link is dropped, in bytes
    pub max_frame: usize,
    /// Idle poll period per link, in milliseconds
    pub poll_interval_ms: u64,
    /// Outbound connect timeout, in milliseconds
    pub connect_timeout_ms: u64,
    /// Capacity of the transport event channel
    pub event_buffer: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            send_buffer: 5_744,
            max_frame: 16 * 1024,
            poll_interval_ms: 2_000,
            connect_timeout_ms: 5_000,
            event_buffer: 256,
        }
    }
}

impl TcpConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Set the send buffer size
    pub fn with_send_buffer(mut self, bytes: usize) -> Self {
        self.send_buffer = bytes;
        self
    }

    /// Set the idle poll period
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Check that the values can work together
    pub fn validate(&self) -> Result<(), ConfigError> {
        // A full-size envelope plus its newline must fit
        if self.send_buffer <= MAX_MESSAGE_SIZE {
            return Err(ConfigError::Invalid {
                field: "send_buffer",
                reason: format!("must exceed the {} byte message limit", MAX_MESSAGE_SIZE),
            });
        }
        if self.max_frame < MAX_MESSAGE_SIZE {
            return Err(ConfigError::Invalid {
                field: "max_frame",
                reason: format!("must be at least {}", MAX_MESSAGE_SIZE),
            });
        }
        if self.poll_interval_ms == 0 || self.event_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_ms",
                reason: "poll interval and event buffer must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TcpConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_send_buffer_must_fit_a_message() {
        let config = TcpConfig::default().with_send_buffer(MAX_MESSAGE_SIZE);
        assert!(config.validate().is_err());
    }
}
