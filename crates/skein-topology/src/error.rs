//! Topology error types

use thiserror::Error;

/// Errors raised while parsing a topology aggregate
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("Malformed topology aggregate: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Result type for topology operations
pub type TopologyResult<T> = Result<T, TopologyError>;
