//! Connection registry
//!
//! Owns every connection of a node. Connections are addressed by
//! [`ConnectionId`]; closed ones stay in place until [`ConnectionRegistry::prune_closed`]
//! runs at the start of the next tick, so ids handed out to timers and
//! callbacks stay meaningful for the rest of the current pass.

use std::time::Instant;

use skein_core::{LinkHandle, LinkRole, NodeId, Scheduler};
use skein_topology::{TopologyWriter, contains_id};
use tracing::debug;

use crate::connection::{Connection, ConnectionId};
use crate::task::MeshTask;

/// All connections of one node, in insertion order
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Vec<Connection>,
    next_id: u64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the id for the next connection
    pub fn allocate_id(&mut self) -> ConnectionId {
        self.next_id += 1;
        ConnectionId(self.next_id)
    }

    pub fn insert(&mut self, connection: Connection) {
        self.connections.push(connection);
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id() == id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|c| c.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.iter_mut()
    }

    /// Ids of every connection, closed ones included
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(Connection::id).collect()
    }

    /// Number of entries, closed ones included
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of connections still connected
    pub fn live_count(&self) -> usize {
        self.connections.iter().filter(|c| c.is_connected()).count()
    }

    /// Connection to use for reaching `node_id`
    ///
    /// A connection whose direct peer is `node_id` wins. Otherwise the
    /// first connection whose advertised topology contains `node_id` is
    /// returned. Closed connections and the unassigned id never match.
    pub fn lookup_by_peer_id(&self, node_id: NodeId) -> Option<ConnectionId> {
        if !node_id.is_assigned() {
            return None;
        }

        let live = || self.connections.iter().filter(|c| c.is_connected());

        if let Some(direct) = live().find(|c| c.peer_id() == node_id) {
            return Some(direct.id());
        }
        live()
            .find(|c| contains_id(c.sub_connections(), node_id))
            .map(Connection::id)
    }

    /// Live connection bound to a transport handle
    pub fn lookup_by_handle(&self, handle: LinkHandle) -> Option<ConnectionId> {
        self.connections
            .iter()
            .find(|c| c.is_connected() && c.handle() == handle)
            .map(Connection::id)
    }

    /// The live connection this node initiated, if any
    pub fn station_connection(&self) -> Option<ConnectionId> {
        self.connections
            .iter()
            .find(|c| c.is_connected() && c.role() == LinkRole::Initiator)
            .map(Connection::id)
    }

    /// Remove closed connections, returning how many were removed
    pub fn prune_closed(&mut self) -> usize {
        let before = self.connections.len();
        self.connections.retain(Connection::is_connected);
        let removed = before - self.connections.len();
        if removed > 0 {
            debug!(removed, remaining = self.connections.len(), "Pruned closed connections");
        }
        removed
    }

    /// Topology aggregate of everything reachable through this node
    ///
    /// Admitted connections other than `exclude` contribute their peer id
    /// and last advertised topology. Closed connections found on the way
    /// get their liveness timer forced so they are finished off promptly.
    pub fn encode_topology(
        &mut self,
        exclude: NodeId,
        scheduler: &mut Scheduler<MeshTask>,
        now: Instant,
    ) -> String {
        let mut writer = TopologyWriter::new();
        for conn in &mut self.connections {
            if !conn.is_connected() {
                conn.force_liveness(scheduler, now);
                continue;
            }
            let peer = conn.peer_id();
            if peer.is_assigned() && peer != exclude {
                writer.push(peer, conn.sub_connections());
            }
        }
        writer.finish()
    }
}
