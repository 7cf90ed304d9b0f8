//! The mesh node reactor
//!
//! [`MeshNode`] is the single owner of all connection state. It changes
//! only through [`MeshNode::handle_event`] for transport events and
//! [`MeshNode::tick`] for due timers, both called from one task. Nothing
//! inside runs concurrently, so no locks guard the registry.
//!
//! [`MeshCore`] is the part of the node the protocol collaborators may
//! touch; [`MeshNode`] adds the collaborators themselves.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use skein_core::scheduler::FirstRun;
use skein_core::{
    ConfigError, Envelope, LinkHandle, LinkRole, LinkTransport, MemoryTracker,
    MessageType, NodeId, Scheduler, SendError, TransportEvent,
};
use skein_topology::{approx_node_count, extract_ids};
use tracing::{debug, info, instrument, warn};

use crate::callbacks::MeshCallbacks;
use crate::collaborators::{
    Admission, BasicNodeSync, LocalTimeSync, MAX_STABILITY, NoRadio, NodeSync, RadioLink,
    TimeSync,
};
use crate::config::MeshConfig;
use crate::connection::{ClosedConnection, Connection, ConnectionId};
use crate::dispatch::Dispatch;
use crate::flow::Priority;
use crate::registry::ConnectionRegistry;
use crate::task::MeshTask;

/// Connection state and services shared with the collaborators
pub struct MeshCore {
    local_id: NodeId,
    config: MeshConfig,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) scheduler: Scheduler<MeshTask>,
    memory: Arc<MemoryTracker>,
    pub(crate) callbacks: MeshCallbacks,
    radio: Box<dyn RadioLink>,
    stability: u32,
    now: Instant,
}

impl MeshCore {
    fn new(local_id: NodeId, config: MeshConfig) -> Self {
        let memory = Arc::new(MemoryTracker::new(config.heap_budget));
        Self {
            local_id,
            config,
            registry: ConnectionRegistry::new(),
            scheduler: Scheduler::new(),
            memory,
            callbacks: MeshCallbacks::new(),
            radio: Box::new(NoRadio),
            stability: 0,
            now: Instant::now(),
        }
    }

    /// This node's id
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    /// Time of the event or tick being processed
    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.registry.get(id)
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn callbacks_mut(&mut self) -> &mut MeshCallbacks {
        &mut self.callbacks
    }

    /// Heap budget shared by all send queues
    pub fn memory(&self) -> &Arc<MemoryTracker> {
        &self.memory
    }

    pub fn stability(&self) -> u32 {
        self.stability
    }

    /// Add to the stability score, saturating at [`MAX_STABILITY`]
    pub fn raise_stability(&mut self, amount: u32) {
        self.stability = self.stability.saturating_add(amount).min(MAX_STABILITY);
    }

    fn open_connection(
        &mut self,
        handle: LinkHandle,
        role: LinkRole,
        link: Box<dyn LinkTransport>,
    ) -> ConnectionId {
        let id = self.registry.allocate_id();
        let connection = Connection::open(
            id,
            handle,
            role,
            link,
            &self.config,
            &mut self.scheduler,
            self.now,
        );
        self.registry.insert(connection);
        id
    }

    /// Close a connection
    ///
    /// Initiator links also drop the station association. Cleanup is
    /// scheduled after the configured delay, even for a link whose peer
    /// never identified itself. Returns `None` if the connection was
    /// unknown or already closed.
    pub fn close_connection(
        &mut self,
        id: ConnectionId,
        release_transport: bool,
    ) -> Option<ClosedConnection> {
        let closed = self
            .registry
            .get_mut(id)?
            .close(release_transport, &mut self.scheduler)?;

        if closed.role == LinkRole::Initiator {
            self.radio.disconnect_station();
            if closed.released {
                self.radio.close_station_transport();
            }
        }

        self.scheduler.schedule_once(
            self.config.dropped_connection_delay(),
            MeshTask::DroppedConnection(closed.peer_id),
            self.now,
        );
        Some(closed)
    }

    /// Topology aggregate of this node, leaving out `exclude`
    pub fn sub_connection_json(&mut self, exclude: NodeId) -> String {
        self.registry
            .encode_topology(exclude, &mut self.scheduler, self.now)
    }

    /// Encode an envelope and queue it on one connection
    pub fn send_envelope(
        &mut self,
        conn: ConnectionId,
        envelope: &Envelope,
        priority: Priority,
    ) -> Result<(), SendError> {
        let json = envelope
            .to_json()
            .map_err(|e| SendError::Encoding(e.to_string()))?;
        let connection = self
            .registry
            .get_mut(conn)
            .ok_or(SendError::ConnectionClosed)?;
        connection.enqueue(json, priority, &self.memory)
    }

    /// Send our advertisement on `conn`, leaving out the peer itself
    pub fn send_node_sync(&mut self, conn: ConnectionId, kind: MessageType) -> Result<(), SendError> {
        let peer = self
            .registry
            .get(conn)
            .filter(|c| c.is_connected())
            .map(Connection::peer_id)
            .ok_or(SendError::ConnectionClosed)?;

        let subs = self.sub_connection_json(peer);
        let envelope = Envelope::node_sync(kind, self.local_id, peer, &subs)
            .map_err(|e| SendError::Encoding(e.to_string()))?;
        debug!(connection = %conn, %peer, ?kind, "Sending node sync");
        self.send_envelope(conn, &envelope, Priority::High)
    }

    /// Queue one copy of `envelope` on every admitted connection except
    /// `exclude`, returning the number of copies queued
    pub fn broadcast(
        &mut self,
        envelope: &Envelope,
        exclude: Option<ConnectionId>,
    ) -> Result<usize, SendError> {
        let payload = Bytes::from(
            envelope
                .to_json()
                .map_err(|e| SendError::Encoding(e.to_string()))?,
        );

        let mut copies = 0;
        for conn in self.registry.iter_mut() {
            if Some(conn.id()) == exclude || !conn.is_admitted() {
                continue;
            }
            match conn.enqueue(payload.clone(), Priority::Normal, &self.memory) {
                Ok(()) => copies += 1,
                Err(e) => {
                    warn!(connection = %conn.id(), peer = %conn.peer_id(), error = %e, "Broadcast copy dropped");
                }
            }
        }
        Ok(copies)
    }

    /// Connection toward `dest`, direct or through a neighbor
    pub fn route(&self, dest: NodeId) -> Option<ConnectionId> {
        self.registry.lookup_by_peer_id(dest)
    }

    /// Bind `conn` to `peer` with the topology it advertised
    ///
    /// Any other live connection already bound to `peer` is closed, so a
    /// node is reached directly over one link only.
    pub fn admit_peer(
        &mut self,
        conn: ConnectionId,
        peer: NodeId,
        subs: String,
    ) -> Option<Admission> {
        let connection = self.registry.get_mut(conn).filter(|c| c.is_connected())?;
        let previous = connection.peer_id();
        let changed = previous != peer || connection.sub_connections() != subs;
        connection.set_peer_id(peer);
        connection.set_sub_connections(subs);

        if previous != peer {
            let duplicates: Vec<ConnectionId> = self
                .registry
                .iter()
                .filter(|c| c.id() != conn && c.is_connected() && c.peer_id() == peer)
                .map(Connection::id)
                .collect();
            for duplicate in duplicates {
                info!(connection = %duplicate, %peer, "Closing duplicate link to peer");
                self.close_connection(duplicate, true);
            }
        }

        Some(Admission {
            is_new: !previous.is_assigned(),
            changed,
        })
    }

    /// Arm a repeating time-sync round on `conn`
    pub fn schedule_time_sync(&mut self, conn: ConnectionId, interval: Duration) {
        let task = self.scheduler.schedule_repeating(
            interval,
            MeshTask::TimeSync(conn),
            self.now,
            FirstRun::Immediately,
        );
        match self.registry.get_mut(conn) {
            Some(connection) => connection.set_time_sync_task(&mut self.scheduler, Some(task)),
            None => {
                self.scheduler.cancel(task);
            }
        }
    }

    fn finish_dropped(&mut self, node: NodeId) {
        info!(peer = %node, "Running dropped connection cleanup");
        self.callbacks.changed_connections();

        // An unidentified link has no peer to report
        let known = node.is_assigned();
        let reconnected = known
            && self
                .registry
                .iter()
                .any(|c| c.is_connected() && c.peer_id() == node);
        if known && !reconnected {
            self.callbacks.dropped_connection(node);
        }

        let now = self.now;
        for conn in self.registry.iter_mut() {
            if conn.is_connected() && (!known || conn.peer_id() != node) {
                conn.force_node_sync(&mut self.scheduler, now);
            }
        }
        self.stability /= 2;
    }
}

impl std::fmt::Debug for MeshCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshCore")
            .field("local_id", &self.local_id)
            .field("connections", &self.registry.len())
            .field("scheduled", &self.scheduler.len())
            .field("stability", &self.stability)
            .finish_non_exhaustive()
    }
}

/// A mesh node: connection state plus protocol collaborators
pub struct MeshNode {
    pub(crate) core: MeshCore,
    pub(crate) node_sync: Box<dyn NodeSync>,
    pub(crate) time_sync: Box<dyn TimeSync>,
}

impl MeshNode {
    /// Create a node with the default collaborators
    pub fn new(local_id: NodeId, config: MeshConfig) -> Result<Self, ConfigError> {
        if !local_id.is_assigned() {
            return Err(ConfigError::Invalid {
                field: "node_id",
                reason: "must not be 0".to_string(),
            });
        }
        config.validate()?;
        Ok(Self {
            core: MeshCore::new(local_id, config),
            node_sync: Box::new(BasicNodeSync),
            time_sync: Box::new(LocalTimeSync::new()),
        })
    }

    /// Replace the node-sync protocol
    pub fn with_node_sync(mut self, node_sync: impl NodeSync + 'static) -> Self {
        self.node_sync = Box::new(node_sync);
        self
    }

    /// Replace the time-sync protocol
    pub fn with_time_sync(mut self, time_sync: impl TimeSync + 'static) -> Self {
        self.time_sync = Box::new(time_sync);
        self
    }

    /// Replace the radio layer
    pub fn with_radio(mut self, radio: impl RadioLink + 'static) -> Self {
        self.core.radio = Box::new(radio);
        self
    }

    pub fn local_id(&self) -> NodeId {
        self.core.local_id
    }

    pub fn config(&self) -> &MeshConfig {
        &self.core.config
    }

    pub fn core(&self) -> &MeshCore {
        &self.core
    }

    pub fn callbacks_mut(&mut self) -> &mut MeshCallbacks {
        &mut self.core.callbacks
    }

    /// Process one transport event
    #[instrument(skip_all, fields(node = %self.core.local_id, handle = %event.handle()))]
    pub fn handle_event(&mut self, event: TransportEvent, now: Instant) -> Dispatch {
        self.core.now = now;
        match event {
            TransportEvent::Opened { handle, role, link } => {
                if let Some(stale) = self.core.registry.lookup_by_handle(handle) {
                    warn!(connection = %stale, "Handle reused, closing stale connection");
                    self.core.close_connection(stale, false);
                }
                Dispatch::Opened(self.core.open_connection(handle, role, link))
            }
            TransportEvent::Received { handle, fragments } => {
                self.handle_received(handle, fragments, now)
            }
            TransportEvent::Sent { handle } | TransportEvent::Poll { handle } => {
                let Some(id) = self.core.registry.lookup_by_handle(handle) else {
                    return Dispatch::Ignored;
                };
                if let Some(conn) = self.core.registry.get_mut(id) {
                    conn.on_send_ready();
                }
                Dispatch::Resumed
            }
            TransportEvent::Fault { handle, fault } => {
                let Some(id) = self.core.registry.lookup_by_handle(handle) else {
                    return Dispatch::Ignored;
                };
                if fault.is_fatal() {
                    warn!(connection = %id, ?fault, "Link failed");
                    self.core.close_connection(id, false);
                    Dispatch::Closed
                } else {
                    warn!(connection = %id, ?fault, "Link error");
                    Dispatch::Ignored
                }
            }
        }
    }

    /// Prune closed connections, then run every due timer
    pub fn tick(&mut self, now: Instant) {
        self.core.now = now;
        self.core.registry.prune_closed();

        for task in self.core.scheduler.poll(now) {
            self.run_task(task);
        }
    }

    /// Earliest timer deadline, for reactors that sleep until it
    pub fn next_deadline(&self) -> Option<Instant> {
        self.core.scheduler.next_deadline()
    }

    fn run_task(&mut self, task: MeshTask) {
        let live = |core: &MeshCore, id: ConnectionId| {
            core.registry.get(id).is_some_and(Connection::is_connected)
        };

        match task {
            MeshTask::LivenessTimeout(id) => {
                if live(&self.core, id) {
                    info!(connection = %id, "No data within node timeout, closing");
                    self.core.close_connection(id, true);
                }
            }
            MeshTask::NodeSync(id) => {
                if live(&self.core, id) {
                    if let Err(e) = self.core.send_node_sync(id, MessageType::NodeSyncRequest) {
                        warn!(connection = %id, error = %e, "Failed to send node sync request");
                    }
                }
            }
            MeshTask::TimeSync(id) => {
                if live(&self.core, id) {
                    self.time_sync.on_time_sync_due(&mut self.core, id);
                }
            }
            MeshTask::DroppedConnection(node) => self.core.finish_dropped(node),
        }
    }

    /// Send an application message to one node
    pub fn send_single(&mut self, dest: NodeId, msg: impl Into<String>) -> Result<(), SendError> {
        let via = self.core.route(dest).ok_or(SendError::NoRoute(dest))?;
        let envelope = Envelope::single(self.core.local_id, dest, msg);
        self.core.send_envelope(via, &envelope, Priority::Normal)
    }

    /// Send an application message to every node, returning the number of
    /// neighbors it was queued for
    pub fn send_broadcast(&mut self, msg: impl Into<String>) -> Result<usize, SendError> {
        let envelope = Envelope::broadcast(self.core.local_id, msg);
        self.core.broadcast(&envelope, None)
    }

    /// Every node reachable through this one
    pub fn node_list(&mut self) -> Vec<NodeId> {
        let text = self.core.sub_connection_json(NodeId::UNASSIGNED);
        extract_ids(&text).collect()
    }

    /// Rough size of the reachable mesh
    pub fn approx_node_count(&mut self) -> usize {
        approx_node_count(&self.core.sub_connection_json(NodeId::UNASSIGNED))
    }

    /// Topology aggregate of this node, leaving out `exclude`
    pub fn sub_connection_json(&mut self, exclude: NodeId) -> String {
        self.core.sub_connection_json(exclude)
    }

    /// Close the station-side connection, if there is one
    pub fn close_station_link(&mut self) -> bool {
        match self.core.registry.station_connection() {
            Some(id) => self.core.close_connection(id, true).is_some(),
            None => false,
        }
    }

    /// Close a connection by id
    pub fn close_connection(&mut self, id: ConnectionId, release_transport: bool) -> bool {
        self.core.close_connection(id, release_transport).is_some()
    }

    pub fn stability(&self) -> u32 {
        self.core.stability
    }

    /// Number of connections still connected
    pub fn connection_count(&self) -> usize {
        self.core.registry.live_count()
    }

    /// Mesh time in microseconds
    pub fn node_time(&self, now: Instant) -> u32 {
        self.time_sync.node_time(now)
    }

    pub fn on_receive(&mut self, f: impl FnMut(NodeId, &str) + Send + 'static) {
        self.core.callbacks.on_receive(f);
    }

    pub fn on_new_connection(&mut self, f: impl FnMut(NodeId) + Send + 'static) {
        self.core.callbacks.on_new_connection(f);
    }

    pub fn on_dropped_connection(&mut self, f: impl FnMut(NodeId) + Send + 'static) {
        self.core.callbacks.on_dropped_connection(f);
    }

    pub fn on_changed_connections(&mut self, f: impl FnMut() + Send + 'static) {
        self.core.callbacks.on_changed_connections(f);
    }
}

impl std::fmt::Debug for MeshNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshNode").field("core", &self.core).finish_non_exhaustive()
    }
}
