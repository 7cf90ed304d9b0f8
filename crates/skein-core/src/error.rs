//! Error types for Skein

use thiserror::Error;

use crate::identity::NodeId;

/// Top-level error type for Skein
#[derive(Debug, Error)]
pub enum SkeinError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while decoding or encoding wire envelopes
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Invalid sub-connection list: {0}")]
    InvalidSubConnections(String),
}

/// Reasons a message could not be admitted to an outbound queue
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("Message too large: {size} bytes exceeds limit of {limit}")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("Out of memory: {free} bytes free, {needed} needed")]
    OutOfMemory { needed: usize, free: usize },

    #[error("Send queue full: {capacity} messages")]
    QueueFull { capacity: usize },

    #[error("No route to node {0}")]
    NoRoute(NodeId),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Encoding failed: {0}")]
    Encoding(String),
}

/// Outcome of a failed write against a transport link
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The link cannot take more bytes right now; retry on the next
    /// readiness signal.
    #[error("Write would block")]
    WouldBlock,

    #[error("Link closed")]
    Closed,

    #[error("Link I/O error: {0}")]
    Io(String),
}

impl LinkError {
    /// Whether the failure is transient backpressure rather than a fault
    pub fn is_backpressure(&self) -> bool {
        matches!(self, LinkError::WouldBlock)
    }
}

/// Errors in configuration values
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),
}

/// Result type alias for Skein operations
pub type SkeinResult<T> = Result<T, SkeinError>;
