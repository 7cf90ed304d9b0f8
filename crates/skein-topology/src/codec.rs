//! Textual topology aggregate
//!
//! A node advertises what it can reach as
//!
//! ```text
//! [{"nodeId":<u32>,"subs":<aggregate>},...]
//! ```
//!
//! where each `subs` is the aggregate last received from that neighbor.
//! The functions here work on the text directly: routing only needs
//! membership and rough size, and scanning the string is cheaper than
//! building the tree on every lookup. See [`crate::tree`] for the parsed
//! form.

use skein_core::NodeId;
use tracing::warn;

/// Marker that precedes every id in the aggregate
pub const NODE_ID_MARKER: &str = "\"nodeId\":";

/// The aggregate of a node with no admitted neighbors
pub const EMPTY_TOPOLOGY: &str = "[]";

/// Upper bound on candidate positions examined by [`contains_id`]
pub const MAX_TOKEN_MATCHES: usize = 4096;

/// Average encoded size of one entry, used by [`approx_node_count`]
const APPROX_BYTES_PER_NODE: f64 = 30.0;

/// Incremental builder for an aggregate
///
/// Empty `subs` text is written as `[]` so the output stays valid JSON.
#[derive(Debug)]
pub struct TopologyWriter {
    out: String,
    entries: usize,
}

impl TopologyWriter {
    pub fn new() -> Self {
        Self {
            out: String::from("["),
            entries: 0,
        }
    }

    /// Append one `{nodeId, subs}` entry
    pub fn push(&mut self, node_id: NodeId, subs: &str) {
        if self.entries > 0 {
            self.out.push(',');
        }
        let subs = if subs.trim().is_empty() {
            EMPTY_TOPOLOGY
        } else {
            subs
        };
        self.out.push('{');
        self.out.push_str(NODE_ID_MARKER);
        self.out.push_str(&node_id.to_string());
        self.out.push_str(",\"subs\":");
        self.out.push_str(subs);
        self.out.push('}');
        self.entries += 1;
    }

    /// Number of entries written so far
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Close the aggregate and return its text
    pub fn finish(mut self) -> String {
        self.out.push(']');
        self.out
    }
}

impl Default for TopologyWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode `(node id, subs)` entries into an aggregate
///
/// Entries whose id is unassigned or equal to `exclude` are skipped. Pass
/// [`NodeId::UNASSIGNED`] to exclude nothing.
pub fn encode<'a, I>(entries: I, exclude: NodeId) -> String
where
    I: IntoIterator<Item = (NodeId, &'a str)>,
{
    let mut writer = TopologyWriter::new();
    for (node_id, subs) in entries {
        if node_id.is_assigned() && node_id != exclude {
            writer.push(node_id, subs);
        }
    }
    writer.finish()
}

/// Whether `id` occurs in `text` as a complete number
///
/// `"a:800"` contains 800 but not 80. Every occurrence is checked until one
/// is bounded by non-digits on both sides, up to [`MAX_TOKEN_MATCHES`]
/// candidates.
pub fn contains_id(text: &str, id: NodeId) -> bool {
    if !id.is_assigned() {
        return false;
    }
    let needle = id.to_string();
    let bytes = text.as_bytes();

    for (checked, (index, _)) in text.match_indices(needle.as_str()).enumerate() {
        if checked >= MAX_TOKEN_MATCHES {
            warn!(
                node_id = %id,
                text_len = text.len(),
                "Token scan limit reached, treating id as absent"
            );
            return false;
        }

        let end = index + needle.len();
        let digit_before = index > 0 && bytes[index - 1].is_ascii_digit();
        let digit_after = end < bytes.len() && bytes[end].is_ascii_digit();
        if !digit_before && !digit_after {
            return true;
        }
    }
    false
}

/// Cheap estimate of how many nodes an aggregate describes
///
/// Based on text length alone and never less than 1. Good for sizing
/// decisions, not for membership.
pub fn approx_node_count(text: &str) -> usize {
    let estimate = (text.len() as f64 / APPROX_BYTES_PER_NODE).round();
    (estimate as usize).max(1)
}

/// Iterate over every id in an aggregate, nested ones included
///
/// The iterator is lazy and `Clone`, so a scan can be restarted from any
/// point by cloning it.
pub fn extract_ids(text: &str) -> NodeIds<'_> {
    NodeIds { rest: text }
}

/// Iterator returned by [`extract_ids`]
#[derive(Debug, Clone)]
pub struct NodeIds<'a> {
    rest: &'a str,
}

impl Iterator for NodeIds<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        loop {
            let start = self.rest.find(NODE_ID_MARKER)? + NODE_ID_MARKER.len();
            let after = self.rest[start..].trim_start();
            let digits_len = after
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(after.len());
            let digits = &after[..digits_len];
            self.rest = &after[digits_len..];

            match digits.parse::<u32>() {
                Ok(value) => return Some(NodeId(value)),
                Err(_) => continue,
            }
        }
    }
}
