//! One physical link to one peer
//!
//! A [`Connection`] owns its transport link, its outbound queue (see
//! [`crate::flow`]) and the ids of its timers. The timers themselves live in
//! the node's scheduler; the connection only remembers which tasks are its
//! own so it can reset, force or cancel them.
//!
//! ## Lifecycle
//!
//! ```text
//! open ──> connected, peer unknown ──(node sync)──> admitted
//!   │                                                  │
//!   └──────────────(timeout / close / fault)───────────┴──> closed ──(next tick)──> pruned
//! ```

use std::collections::VecDeque;
use std::fmt::{self, Display};
use std::time::{Duration, Instant};

use skein_core::{LinkHandle, LinkRole, LinkTransport, NodeId, Scheduler, TaskId};
use skein_core::scheduler::FirstRun;
use tracing::{debug, info, warn};

use crate::config::MeshConfig;
use crate::flow::{QueueLimits, QueuedMessage};
use crate::task::MeshTask;

/// Stable index of a connection in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub(crate) u64);

impl Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Timer tasks owned by a connection
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ConnectionTimers {
    pub(crate) liveness: Option<TaskId>,
    pub(crate) node_sync: Option<TaskId>,
    pub(crate) time_sync: Option<TaskId>,
}

/// What is left of a connection after [`Connection::close`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedConnection {
    pub id: ConnectionId,
    pub handle: LinkHandle,
    pub role: LinkRole,
    /// Peer id the connection had before closing
    pub peer_id: NodeId,
    /// Whether the transport link was released by us
    pub released: bool,
}

/// State of one link to one peer
pub struct Connection {
    id: ConnectionId,
    handle: LinkHandle,
    role: LinkRole,
    peer_id: NodeId,
    pub(crate) link: Option<Box<dyn LinkTransport>>,
    pub(crate) queue: VecDeque<QueuedMessage>,
    pub(crate) limits: QueueLimits,
    pub(crate) send_ready: bool,
    connected: bool,
    sub_connections: String,
    pub(crate) timers: ConnectionTimers,
}

impl Connection {
    /// Take ownership of a new link and arm its timers
    ///
    /// The liveness timer fires once after the node timeout unless data
    /// arrives. The sync timer repeats at the role's cadence: the
    /// initiator requests a sync right away, the acceptor waits one
    /// interval.
    pub fn open(
        id: ConnectionId,
        handle: LinkHandle,
        role: LinkRole,
        link: Box<dyn LinkTransport>,
        config: &MeshConfig,
        scheduler: &mut Scheduler<MeshTask>,
        now: Instant,
    ) -> Self {
        let liveness =
            scheduler.schedule_once(config.node_timeout(), MeshTask::LivenessTimeout(id), now);

        let first_run = match role {
            LinkRole::Initiator => FirstRun::Immediately,
            LinkRole::Acceptor => FirstRun::AfterInterval,
        };
        let node_sync = scheduler.schedule_repeating(
            config.sync_interval(role),
            MeshTask::NodeSync(id),
            now,
            first_run,
        );

        info!(connection = %id, %handle, %role, "Connection opened");

        Self {
            id,
            handle,
            role,
            peer_id: NodeId::UNASSIGNED,
            link: Some(link),
            queue: VecDeque::new(),
            limits: QueueLimits::from_config(config),
            send_ready: true,
            connected: true,
            sub_connections: String::new(),
            timers: ConnectionTimers {
                liveness: Some(liveness),
                node_sync: Some(node_sync),
                time_sync: None,
            },
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn handle(&self) -> LinkHandle {
        self.handle
    }

    pub fn role(&self) -> LinkRole {
        self.role
    }

    /// Far node id, [`NodeId::UNASSIGNED`] until admitted
    pub fn peer_id(&self) -> NodeId {
        self.peer_id
    }

    pub fn set_peer_id(&mut self, peer_id: NodeId) {
        self.peer_id = peer_id;
    }

    /// Liveness flag; false means the connection awaits pruning
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Connected and identified, so usable for routing and advertising
    pub fn is_admitted(&self) -> bool {
        self.connected && self.peer_id.is_assigned()
    }

    /// Whether the transport link is still owned by this connection
    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    /// Topology last advertised by the peer
    pub fn sub_connections(&self) -> &str {
        &self.sub_connections
    }

    pub fn set_sub_connections(&mut self, subs: impl Into<String>) {
        self.sub_connections = subs.into();
    }

    pub fn liveness_task(&self) -> Option<TaskId> {
        self.timers.liveness
    }

    pub fn node_sync_task(&self) -> Option<TaskId> {
        self.timers.node_sync
    }

    pub fn time_sync_task(&self) -> Option<TaskId> {
        self.timers.time_sync
    }

    /// Fresh data proves the link is alive
    pub fn reset_liveness(
        &mut self,
        scheduler: &mut Scheduler<MeshTask>,
        timeout: Duration,
        now: Instant,
    ) {
        if let Some(task) = self.timers.liveness {
            scheduler.delay(task, timeout, now);
        }
    }

    /// Make the liveness timer fire on the next pass
    pub fn force_liveness(&mut self, scheduler: &mut Scheduler<MeshTask>, now: Instant) {
        if let Some(task) = self.timers.liveness {
            scheduler.force_next_iteration(task, now);
        }
    }

    /// Make the sync timer fire on the next pass
    pub fn force_node_sync(&mut self, scheduler: &mut Scheduler<MeshTask>, now: Instant) {
        if let Some(task) = self.timers.node_sync {
            scheduler.force_next_iteration(task, now);
        }
    }

    /// Tell the link `len` received bytes were consumed
    pub fn acknowledge(&mut self, len: usize) {
        if let Some(link) = self.link.as_mut() {
            link.acknowledge(len);
        }
    }

    /// Replace the time-sync task, canceling the previous one
    pub fn set_time_sync_task(&mut self, scheduler: &mut Scheduler<MeshTask>, task: Option<TaskId>) {
        if let Some(old) = std::mem::replace(&mut self.timers.time_sync, task) {
            scheduler.cancel(old);
        }
    }

    /// Shut the connection down
    ///
    /// Idempotent: returns `None` when the connection was already closed.
    /// All timers are canceled and the queue is discarded. The link is
    /// taken out of the connection before it is closed, so it is released
    /// at most once and nothing can reach it afterwards. With
    /// `release_transport == false` the link is dropped without a close
    /// call, for links the transport has already torn down.
    pub fn close(
        &mut self,
        release_transport: bool,
        scheduler: &mut Scheduler<MeshTask>,
    ) -> Option<ClosedConnection> {
        if !self.connected {
            return None;
        }

        for task in [
            self.timers.liveness.take(),
            self.timers.node_sync.take(),
            self.timers.time_sync.take(),
        ]
        .into_iter()
        .flatten()
        {
            scheduler.cancel(task);
        }

        let peer_id = std::mem::replace(&mut self.peer_id, NodeId::UNASSIGNED);
        self.connected = false;
        self.send_ready = false;

        let dropped = self.queue.len();
        self.queue.clear();

        let mut released = false;
        if let Some(mut link) = self.link.take() {
            if release_transport {
                if let Err(e) = link.close() {
                    warn!(connection = %self.id, error = %e, "Failed to close link");
                }
                released = true;
            }
        }

        info!(
            connection = %self.id,
            handle = %self.handle,
            peer = %peer_id,
            role = %self.role,
            released,
            dropped_messages = dropped,
            "Connection closed"
        );

        Some(ClosedConnection {
            id: self.id,
            handle: self.handle,
            role: self.role,
            peer_id,
            released,
        })
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("role", &self.role)
            .field("peer_id", &self.peer_id)
            .field("connected", &self.connected)
            .field("queued", &self.queue.len())
            .field("send_ready", &self.send_ready)
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.link.is_some() {
            debug!(connection = %self.id, "Dropping connection that still owns its link");
        }
    }
}
