//! # Skein Mesh
//!
//! Connection management and message routing for a self-organizing mesh.
//!
//! A node keeps direct links to a few neighbors, learns from them which
//! nodes are reachable through each link, and forwards application
//! messages hop by hop toward their destination.
//!
//! ## Architecture
//!
//! ```text
//! transport ──TransportEvent──> MeshNode::handle_event ──> dispatch ──> callbacks
//!                                   │                         │
//!                                   │                         └──> forward via registry
//! ticker ─────────────────────> MeshNode::tick ──> timers (liveness, node sync, cleanup)
//! ```
//!
//! [`MeshNode`] is synchronous and deterministic; [`MeshRuntime`] drives
//! it from a tokio task.
//!
//! ## Example
//!
//! ```
//! use std::time::Instant;
//! use skein_core::{LinkHandle, LinkRole, MockLink, NodeId, TransportEvent};
//! use skein_mesh::{Dispatch, MeshConfig, MeshNode};
//!
//! let mut node = MeshNode::new(NodeId(1), MeshConfig::default()).unwrap();
//! let (link, tap) = MockLink::new(4096);
//! let now = Instant::now();
//!
//! let opened = node.handle_event(
//!     TransportEvent::Opened { handle: LinkHandle(1), role: LinkRole::Initiator, link: Box::new(link) },
//!     now,
//! );
//! assert!(matches!(opened, Dispatch::Opened(_)));
//!
//! // The initiator asks for the peer's topology on the first tick
//! node.tick(now);
//! assert_eq!(tap.written().len(), 1);
//! ```

pub mod callbacks;
pub mod collaborators;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod flow;
pub mod node;
pub mod registry;
pub mod runtime;
pub mod task;

pub use callbacks::MeshCallbacks;
pub use collaborators::{
    Admission, BasicNodeSync, LocalTimeSync, MAX_STABILITY, NoRadio, NodeSync, RadioLink,
    STABILITY_STEP, TimeSync,
};
pub use config::MeshConfig;
pub use connection::{ClosedConnection, Connection, ConnectionId};
pub use dispatch::{Dispatch, DropReason};
pub use flow::Priority;
pub use node::{MeshCore, MeshNode};
pub use registry::ConnectionRegistry;
pub use runtime::{MeshHandle, MeshRuntime, RuntimeError};
pub use task::MeshTask;
