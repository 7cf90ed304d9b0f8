//! Scheduled work of a mesh node

use skein_core::NodeId;

use crate::connection::ConnectionId;

/// Payload of a scheduler task
///
/// Tasks name their target by id only. A task whose connection is already
/// gone finds nothing and does nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshTask {
    /// No data arrived within the node timeout
    LivenessTimeout(ConnectionId),
    /// Time to send a node-sync request
    NodeSync(ConnectionId),
    /// Time-sync round owned by the time-sync collaborator
    TimeSync(ConnectionId),
    /// Deferred cleanup after a connection to this node went away
    DroppedConnection(NodeId),
}
