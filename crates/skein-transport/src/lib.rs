//! # Skein Transport
//!
//! TCP links for the Skein mesh.
//!
//! Each envelope travels as one line: the JSON text followed by `\n`.
//! Inbound lines become `Received` events, write completions become `Sent`
//! events, and an idle ticker emits `Poll` so stalled queues are retried.
//! A clean EOF is reported as an empty `Received`; resets and aborts are
//! reported as faults.
//!
//! ```no_run
//! use skein_transport::{TcpConfig, TcpTransport};
//!
//! # async fn example() -> Result<(), skein_transport::TransportError> {
//! let (transport, mut events) = TcpTransport::new(TcpConfig::default());
//! let local = transport.listen("127.0.0.1:5555".parse().unwrap()).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # let _ = local;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod link;
pub mod tcp;

pub use config::TcpConfig;
pub use error::{TransportError, TransportResult};
pub use link::{FRAME_DELIMITER, TcpLink, classify};
pub use tcp::TcpTransport;
