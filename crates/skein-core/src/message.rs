//! Wire envelope
//!
//! Every logical message on a link is one newline-free JSON object:
//!
//! ```text
//! {"type":<int>,"from":<u32>,"dest":<u32>,"msg":<string>, ...}
//! ```
//!
//! Type-specific fields (for example `subs` on node-sync messages) are kept
//! in [`Envelope::extra`] so a forwarded envelope is re-serialized without
//! losing anything. Unknown `type` values decode fine and are left for the
//! receiver to ignore.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::identity::NodeId;

/// Maximum serialized size of one envelope in bytes
pub const MAX_MESSAGE_SIZE: usize = 1400;

/// Envelope types with their stable wire values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Round-trip delay measurement addressed to one node
    TimeDelay = 3,
    /// Clock offset exchange between neighbors
    TimeSync = 4,
    /// Topology request carrying the sender's advertisement
    NodeSyncRequest = 5,
    /// Topology reply carrying the responder's advertisement
    NodeSyncReply = 6,
    /// Application data for every node
    Broadcast = 8,
    /// Application data for a single node
    Single = 9,
}

impl MessageType {
    /// Map a wire value to a known type, `None` for anything unrecognized
    pub fn from_wire(value: i64) -> Option<Self> {
        match value {
            3 => Some(Self::TimeDelay),
            4 => Some(Self::TimeSync),
            5 => Some(Self::NodeSyncRequest),
            6 => Some(Self::NodeSyncReply),
            8 => Some(Self::Broadcast),
            9 => Some(Self::Single),
            _ => None,
        }
    }

    /// The stable wire value
    pub fn wire_value(self) -> i64 {
        self as i64
    }

    /// Whether this is one of the two node-sync types
    pub fn is_node_sync(self) -> bool {
        matches!(self, Self::NodeSyncRequest | Self::NodeSyncReply)
    }
}

/// A decoded wire envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Raw type value; see [`Envelope::message_type`]
    #[serde(rename = "type")]
    pub kind: i64,
    /// Originating node
    pub from: NodeId,
    /// Destination node (unused by broadcasts)
    pub dest: NodeId,
    /// Payload; a string for application data, any JSON for time sync
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub msg: Value,
    /// Type-specific fields preserved across forwarding
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    /// Create an envelope with a string payload
    pub fn new(kind: MessageType, from: NodeId, dest: NodeId, msg: impl Into<String>) -> Self {
        Self {
            kind: kind.wire_value(),
            from,
            dest,
            msg: Value::String(msg.into()),
            extra: Map::new(),
        }
    }

    /// Application message for a single node
    pub fn single(from: NodeId, dest: NodeId, msg: impl Into<String>) -> Self {
        Self::new(MessageType::Single, from, dest, msg)
    }

    /// Application message for every node
    pub fn broadcast(from: NodeId, msg: impl Into<String>) -> Self {
        Self::new(MessageType::Broadcast, from, NodeId::UNASSIGNED, msg)
    }

    /// Node-sync request or reply carrying a topology advertisement
    ///
    /// `subs` must be the textual aggregate produced by the topology codec.
    pub fn node_sync(
        kind: MessageType,
        from: NodeId,
        dest: NodeId,
        subs: &str,
    ) -> Result<Self, ProtocolError> {
        let subs: Value = serde_json::from_str(subs)
            .map_err(|e| ProtocolError::InvalidSubConnections(e.to_string()))?;
        if !subs.is_array() {
            return Err(ProtocolError::InvalidSubConnections(
                "expected a JSON array".to_string(),
            ));
        }

        let mut extra = Map::new();
        extra.insert("subs".to_string(), subs);
        Ok(Self {
            kind: kind.wire_value(),
            from,
            dest,
            msg: Value::Null,
            extra,
        })
    }

    /// The known message type, if any
    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_wire(self.kind)
    }

    /// Payload as text
    ///
    /// String payloads are returned as-is, other JSON is rendered compactly
    /// and a missing payload is empty.
    pub fn msg_text(&self) -> Cow<'_, str> {
        match &self.msg {
            Value::String(s) => Cow::Borrowed(s.as_str()),
            Value::Null => Cow::Borrowed(""),
            other => Cow::Owned(other.to_string()),
        }
    }

    /// The `subs` field of a node-sync envelope rendered as aggregate text
    pub fn subs_text(&self) -> Option<String> {
        self.extra.get("subs").map(Value::to_string)
    }

    /// Decode an envelope from raw bytes
    pub fn from_slice(data: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(data).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Encode to compact JSON
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}
