//! Errors for the TCP transport

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors from setting up TCP links
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Connecting to {0} timed out")]
    Timeout(SocketAddr),

    #[error("Socket setup failed: {0}")]
    Io(#[from] io::Error),

    #[error("Transport stopped")]
    Stopped,
}

pub type TransportResult<T> = Result<T, TransportError>;
