//! Parsed topology aggregate
//!
//! Exact counterpart of the text scans in [`crate::codec`]. Nesting depth
//! is bounded by `serde_json`'s recursion limit, so hostile input cannot
//! exhaust the stack.

use serde::{Deserialize, Serialize};
use skein_core::NodeId;

use crate::error::TopologyResult;

/// One node and everything reachable through it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTree {
    #[serde(rename = "nodeId")]
    pub node_id: NodeId,
    #[serde(default)]
    pub subs: Vec<NodeTree>,
}

impl NodeTree {
    /// A node with nothing behind it
    pub fn leaf(node_id: NodeId) -> Self {
        Self {
            node_id,
            subs: Vec::new(),
        }
    }

    /// Number of nodes in this subtree, itself included
    pub fn count(&self) -> usize {
        1 + self.subs.iter().map(NodeTree::count).sum::<usize>()
    }

    /// Ids in this subtree, depth first
    pub fn ids(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.count());
        self.collect_ids(&mut out);
        out
    }

    fn collect_ids(&self, out: &mut Vec<NodeId>) {
        out.push(self.node_id);
        for sub in &self.subs {
            sub.collect_ids(out);
        }
    }

    /// Whether `id` is anywhere in this subtree
    pub fn contains(&self, id: NodeId) -> bool {
        self.node_id == id || self.subs.iter().any(|sub| sub.contains(id))
    }

    /// Hops to the deepest node, 1 for a leaf
    pub fn depth(&self) -> usize {
        1 + self.subs.iter().map(NodeTree::depth).max().unwrap_or(0)
    }
}

/// Parse an aggregate; blank text is an empty topology
pub fn parse_topology(text: &str) -> TopologyResult<Vec<NodeTree>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(text)?)
}

/// Exact number of nodes described by an aggregate
pub fn exact_node_count(text: &str) -> TopologyResult<usize> {
    Ok(parse_topology(text)?.iter().map(NodeTree::count).sum())
}
