//! # Skein Core
//!
//! Core types, errors and contracts shared by the Skein mesh stack.
//!
//! The routing core in `skein-mesh` is written against the abstractions in
//! this crate so the same logic runs over real TCP links and over the
//! in-memory [`MockLink`] used by tests.
//!
//! ## Key Types
//!
//! - [`NodeId`]: Numeric mesh node identifier (`0` means "not yet known")
//! - [`Envelope`]: The JSON wire envelope exchanged between nodes
//! - [`MessageType`]: Stable wire values for envelope types
//! - [`Scheduler`]: Cooperative one-shot / repeating task scheduler
//! - [`MemoryTracker`]: Heap budget accounting for queued messages
//!
//! ## Key Trait
//!
//! - [`LinkTransport`]: One physical link as seen by a connection

pub mod error;
pub mod identity;
pub mod memory;
pub mod message;
pub mod mock_transport;
pub mod scheduler;
pub mod transport;

// Re-export main types
pub use error::*;
pub use identity::*;
pub use memory::*;
pub use message::*;
pub use mock_transport::*;
pub use scheduler::*;
pub use transport::*;
