//! # Skein Topology
//!
//! Topology advertisements for Skein.
//!
//! Every node tells its neighbors which nodes it can reach, as a nested
//! textual aggregate of `{nodeId, subs}` entries. Routing looks ids up in
//! that text, so this crate works on the text directly and offers a
//! parsed tree only where an exact answer is needed.
//!
//! ## Core Components
//!
//! - [`encode`] / [`TopologyWriter`]: Build an aggregate from direct peers
//! - [`contains_id`]: Token-safe membership test ("800" is not "80")
//! - [`approx_node_count`]: Length-based size estimate, never below 1
//! - [`extract_ids`]: Lazy, restartable iteration over every id
//! - [`parse_topology`] / [`NodeTree`]: Exact parsed form
//!
//! ## Example
//!
//! ```
//! use skein_core::NodeId;
//! use skein_topology::{contains_id, encode, extract_ids};
//!
//! let text = encode([(NodeId(800), "[]"), (NodeId(12), "[]")], NodeId::UNASSIGNED);
//!
//! assert!(contains_id(&text, NodeId(800)));
//! assert!(!contains_id(&text, NodeId(80)));
//! assert_eq!(extract_ids(&text).collect::<Vec<_>>(), vec![NodeId(800), NodeId(12)]);
//! ```

pub mod codec;
pub mod error;
pub mod tree;

// Re-export main types
pub use codec::{
    EMPTY_TOPOLOGY, MAX_TOKEN_MATCHES, NODE_ID_MARKER, NodeIds, TopologyWriter,
    approx_node_count, contains_id, encode, extract_ids,
};
pub use error::{TopologyError, TopologyResult};
pub use tree::{NodeTree, exact_node_count, parse_topology};
