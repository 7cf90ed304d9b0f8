//! Application callbacks
//!
//! Each callback is optional; unset ones are skipped. Callbacks run inside
//! the reactor pass that triggered them and must not block.

use skein_core::NodeId;

type ReceivedFn = Box<dyn FnMut(NodeId, &str) + Send>;
type NodeFn = Box<dyn FnMut(NodeId) + Send>;
type ChangedFn = Box<dyn FnMut() + Send>;
type TimeAdjustedFn = Box<dyn FnMut(i32) + Send>;
type DelayFn = Box<dyn FnMut(NodeId, i32) + Send>;

/// Hooks the application can register on a node
#[derive(Default)]
pub struct MeshCallbacks {
    received: Option<ReceivedFn>,
    new_connection: Option<NodeFn>,
    dropped_connection: Option<NodeFn>,
    changed_connections: Option<ChangedFn>,
    node_time_adjusted: Option<TimeAdjustedFn>,
    node_delay_received: Option<DelayFn>,
}

impl MeshCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Application message delivered to this node
    pub fn on_receive(&mut self, f: impl FnMut(NodeId, &str) + Send + 'static) {
        self.received = Some(Box::new(f));
    }

    /// A neighbor was admitted
    pub fn on_new_connection(&mut self, f: impl FnMut(NodeId) + Send + 'static) {
        self.new_connection = Some(Box::new(f));
    }

    /// A neighbor went away
    pub fn on_dropped_connection(&mut self, f: impl FnMut(NodeId) + Send + 'static) {
        self.dropped_connection = Some(Box::new(f));
    }

    /// The reachable topology changed
    pub fn on_changed_connections(&mut self, f: impl FnMut() + Send + 'static) {
        self.changed_connections = Some(Box::new(f));
    }

    /// The mesh clock was adjusted by the given offset
    pub fn on_node_time_adjusted(&mut self, f: impl FnMut(i32) + Send + 'static) {
        self.node_time_adjusted = Some(Box::new(f));
    }

    /// A delay measurement to a node completed
    pub fn on_node_delay_received(&mut self, f: impl FnMut(NodeId, i32) + Send + 'static) {
        self.node_delay_received = Some(Box::new(f));
    }

    pub(crate) fn received(&mut self, from: NodeId, msg: &str) {
        if let Some(f) = self.received.as_mut() {
            f(from, msg);
        }
    }

    pub(crate) fn new_connection(&mut self, node_id: NodeId) {
        if let Some(f) = self.new_connection.as_mut() {
            f(node_id);
        }
    }

    pub(crate) fn dropped_connection(&mut self, node_id: NodeId) {
        if let Some(f) = self.dropped_connection.as_mut() {
            f(node_id);
        }
    }

    pub(crate) fn changed_connections(&mut self) {
        if let Some(f) = self.changed_connections.as_mut() {
            f();
        }
    }

    /// Report a clock adjustment; used by time-sync collaborators
    pub fn node_time_adjusted(&mut self, offset: i32) {
        if let Some(f) = self.node_time_adjusted.as_mut() {
            f(offset);
        }
    }

    /// Report a measured delay; used by time-sync collaborators
    pub fn node_delay_received(&mut self, node_id: NodeId, delay: i32) {
        if let Some(f) = self.node_delay_received.as_mut() {
            f(node_id, delay);
        }
    }
}

impl std::fmt::Debug for MeshCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshCallbacks")
            .field("received", &self.received.is_some())
            .field("new_connection", &self.new_connection.is_some())
            .field("dropped_connection", &self.dropped_connection.is_some())
            .field("changed_connections", &self.changed_connections.is_some())
            .field("node_time_adjusted", &self.node_time_adjusted.is_some())
            .field("node_delay_received", &self.node_delay_received.is_some())
            .finish()
    }
}
