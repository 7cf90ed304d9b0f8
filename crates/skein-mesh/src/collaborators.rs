//! Pluggable protocol collaborators
//!
//! The node classifies node-sync and time-sync traffic but leaves the
//! protocols themselves to these traits. Each receives the [`MeshCore`]
//! so it can reply, admit peers and fire callbacks within the same pass.
//!
//! Default implementations:
//!
//! - [`BasicNodeSync`]: peer identification and topology exchange
//! - [`LocalTimeSync`]: monotonic local clock, no adjustment
//! - [`NoRadio`]: no radio layer to manage

use std::time::{Duration, Instant};

use skein_core::{Envelope, MessageType};
use tracing::{debug, info, warn};

use crate::connection::ConnectionId;
use crate::node::MeshCore;

/// Node-sync protocol
pub trait NodeSync: Send {
    /// Handle a NODE_SYNC_REQUEST or NODE_SYNC_REPLY from `from`
    fn on_node_sync(&mut self, core: &mut MeshCore, from: ConnectionId, envelope: Envelope);
}

/// Time-sync protocol and mesh clock
pub trait TimeSync: Send {
    /// Mesh time in microseconds, wrapping
    fn node_time(&self, now: Instant) -> u32;

    /// Cadence of time-sync rounds on newly admitted initiator links,
    /// `None` to never schedule any
    fn sync_interval(&self) -> Option<Duration> {
        None
    }

    /// Handle a TIME_SYNC envelope
    fn on_time_sync(
        &mut self,
        core: &mut MeshCore,
        from: ConnectionId,
        envelope: Envelope,
        received_at: u32,
    );

    /// Handle a TIME_DELAY envelope addressed to this node
    fn on_time_delay(
        &mut self,
        core: &mut MeshCore,
        from: ConnectionId,
        envelope: Envelope,
        received_at: u32,
    );

    /// A scheduled time-sync round is due on `conn`
    fn on_time_sync_due(&mut self, _core: &mut MeshCore, _conn: ConnectionId) {}
}

/// Radio association layer
pub trait RadioLink: Send {
    /// Leave the access point this node joined as a station
    fn disconnect_station(&mut self);

    /// Tear down the station-side transport path
    fn close_station_transport(&mut self);
}

/// Stability gained per sync round that changed nothing
pub const STABILITY_STEP: u32 = 10;

/// Upper bound of the stability score
pub const MAX_STABILITY: u32 = 1000;

/// Topology exchange that trusts the peer's advertisement
///
/// The sender's `from` becomes the connection's peer id and its `subs`
/// become the connection's topology. Requests are answered with this
/// node's own advertisement.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicNodeSync;

impl NodeSync for BasicNodeSync {
    fn on_node_sync(&mut self, core: &mut MeshCore, from: ConnectionId, envelope: Envelope) {
        let peer = envelope.from;
        if !peer.is_assigned() {
            warn!(connection = %from, "Node sync without sender id, ignoring");
            return;
        }
        if peer == core.local_id() {
            warn!(connection = %from, "Node sync from our own id, closing loopback link");
            core.close_connection(from, true);
            return;
        }

        let subs = envelope.subs_text().unwrap_or_else(|| "[]".to_string());
        let Some(admission) = core.admit_peer(from, peer, subs) else {
            return;
        };

        if envelope.message_type() == Some(MessageType::NodeSyncRequest) {
            if let Err(e) = core.send_node_sync(from, MessageType::NodeSyncReply) {
                warn!(connection = %from, peer = %peer, error = %e, "Failed to send node sync reply");
            }
        }

        if admission.is_new {
            info!(connection = %from, peer = %peer, "Peer admitted");
            core.callbacks_mut().new_connection(peer);
        }
        if admission.changed {
            core.callbacks_mut().changed_connections();
        } else {
            core.raise_stability(STABILITY_STEP);
        }
    }
}

/// Mesh time from the local monotonic clock
///
/// Never adjusts the clock. Sync traffic is only logged.
#[derive(Debug, Clone, Copy)]
pub struct LocalTimeSync {
    started: Instant,
}

impl LocalTimeSync {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn started_at(started: Instant) -> Self {
        Self { started }
    }
}

impl Default for LocalTimeSync {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSync for LocalTimeSync {
    fn node_time(&self, now: Instant) -> u32 {
        // Truncation gives the wrapping 32-bit microsecond clock
        now.saturating_duration_since(self.started).as_micros() as u32
    }

    fn on_time_sync(
        &mut self,
        _core: &mut MeshCore,
        from: ConnectionId,
        envelope: Envelope,
        received_at: u32,
    ) {
        debug!(connection = %from, peer = %envelope.from, received_at, "Time sync ignored");
    }

    fn on_time_delay(
        &mut self,
        _core: &mut MeshCore,
        from: ConnectionId,
        envelope: Envelope,
        received_at: u32,
    ) {
        debug!(connection = %from, peer = %envelope.from, received_at, "Time delay ignored");
    }
}

/// No radio layer
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRadio;

impl RadioLink for NoRadio {
    fn disconnect_station(&mut self) {}

    fn close_station_transport(&mut self) {}
}

/// Result of [`MeshCore::admit_peer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// The connection had no peer id before
    pub is_new: bool,
    /// Peer id or advertised topology differ from before
    pub changed: bool,
}
