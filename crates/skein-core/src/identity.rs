//! Node identity
//!
//! Nodes are addressed by a plain `u32`. The value `0` is reserved for
//! "not yet known" and never names a real node.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Numeric identifier of a mesh node
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Placeholder id of a peer whose identity exchange has not completed
    pub const UNASSIGNED: NodeId = NodeId(0);

    /// Get the raw numeric value
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Whether this is a real node id (not [`NodeId::UNASSIGNED`])
    pub fn is_assigned(&self) -> bool {
        self.0 != 0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl FromStr for NodeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u32>().map(NodeId)
    }
}
