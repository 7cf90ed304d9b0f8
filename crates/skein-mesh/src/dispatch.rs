//! Inbound message dispatch
//!
//! Turns the fragments of one `Received` event into a routing decision:
//!
//! | type | addressed to us | otherwise |
//! |---|---|---|
//! | NODE_SYNC_REQUEST / REPLY | node-sync collaborator | same |
//! | TIME_SYNC | time-sync collaborator | same |
//! | TIME_DELAY | time-sync collaborator | forward |
//! | SINGLE | receive callback | forward |
//! | BROADCAST | flood, then receive callback | same |
//!
//! Forwarding is best effort: a message with no route is dropped without
//! telling anyone.

use std::time::Instant;

use bytes::{Bytes, BytesMut};
use skein_core::{Envelope, LinkHandle, LinkRole, MessageType, NodeId, SendError};
use tracing::{debug, info, trace, warn};

use crate::connection::ConnectionId;
use crate::flow::Priority;
use crate::node::MeshNode;

/// What a node did with a transport event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A new connection was created
    Opened(ConnectionId),
    /// No live connection owns the handle, or nothing needed doing
    Ignored,
    /// The event closed the connection
    Closed,
    /// Send readiness was restored and the queue drained
    Resumed,
    /// The payload was not a valid envelope
    Malformed,
    /// Handed to the node-sync collaborator
    NodeSync,
    /// Handed to the time-sync collaborator
    TimeSync,
    /// Addressed to this node and delivered
    Delivered,
    /// Queued toward `dest` on another connection
    Forwarded { via: ConnectionId, dest: NodeId },
    /// Addressed elsewhere and not forwarded
    Dropped { dest: NodeId, reason: DropReason },
    /// Flooded to `copies` neighbors and delivered locally
    Flooded { copies: usize },
    /// Type value this node does not know
    UnknownType(i64),
}

/// Why a forwarded message went nowhere
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    NoRoute,
    Rejected(SendError),
}

/// Join fragments in arrival order
fn reassemble(mut fragments: Vec<Bytes>, total: usize) -> Bytes {
    if fragments.len() == 1 {
        return fragments.pop().unwrap_or_default();
    }
    let mut buf = BytesMut::with_capacity(total);
    for fragment in &fragments {
        buf.extend_from_slice(fragment);
    }
    buf.freeze()
}

impl MeshNode {
    pub(crate) fn handle_received(
        &mut self,
        handle: LinkHandle,
        fragments: Vec<Bytes>,
        now: Instant,
    ) -> Dispatch {
        let Some(id) = self.core.registry.lookup_by_handle(handle) else {
            debug!("Data for unknown handle, ignoring");
            return Dispatch::Ignored;
        };

        let total: usize = fragments.iter().map(Bytes::len).sum();
        if total == 0 {
            info!(connection = %id, "Peer closed the link");
            self.core.close_connection(id, true);
            return Dispatch::Closed;
        }

        let received_at = self.time_sync.node_time(now);
        let timeout = self.core.config().node_timeout();
        if let Some(conn) = self.core.registry.get_mut(id) {
            conn.reset_liveness(&mut self.core.scheduler, timeout, now);
            conn.acknowledge(total);
        }

        let payload = reassemble(fragments, total);
        let envelope = match Envelope::from_slice(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(connection = %id, len = total, error = %e, "Discarding malformed message");
                return Dispatch::Malformed;
            }
        };

        trace!(connection = %id, kind = envelope.kind, from = %envelope.from, dest = %envelope.dest, "Message received");
        self.dispatch(id, envelope, received_at)
    }

    fn dispatch(&mut self, from: ConnectionId, envelope: Envelope, received_at: u32) -> Dispatch {
        let Some(kind) = envelope.message_type() else {
            debug!(connection = %from, kind = envelope.kind, "Unknown message type, ignoring");
            return Dispatch::UnknownType(envelope.kind);
        };

        match kind {
            MessageType::NodeSyncRequest | MessageType::NodeSyncReply => {
                self.node_sync.on_node_sync(&mut self.core, from, envelope);
                self.arm_time_sync(from);
                Dispatch::NodeSync
            }
            MessageType::TimeSync => {
                self.time_sync
                    .on_time_sync(&mut self.core, from, envelope, received_at);
                Dispatch::TimeSync
            }
            MessageType::Single | MessageType::TimeDelay => {
                if envelope.dest != self.core.local_id() {
                    return self.forward(envelope);
                }
                if kind == MessageType::TimeDelay {
                    self.time_sync
                        .on_time_delay(&mut self.core, from, envelope, received_at);
                } else {
                    debug!(connection = %from, from = %envelope.from, "Delivering message");
                    self.core
                        .callbacks
                        .received(envelope.from, &envelope.msg_text());
                }
                Dispatch::Delivered
            }
            MessageType::Broadcast => {
                let copies = match self.core.broadcast(&envelope, Some(from)) {
                    Ok(copies) => copies,
                    Err(e) => {
                        warn!(connection = %from, error = %e, "Failed to re-encode broadcast");
                        0
                    }
                };
                self.core
                    .callbacks
                    .received(envelope.from, &envelope.msg_text());
                Dispatch::Flooded { copies }
            }
        }
    }

    fn forward(&mut self, envelope: Envelope) -> Dispatch {
        let dest = envelope.dest;
        let Some(via) = self.core.route(dest) else {
            debug!(%dest, "No route, dropping message");
            return Dispatch::Dropped {
                dest,
                reason: DropReason::NoRoute,
            };
        };

        match self.core.send_envelope(via, &envelope, Priority::Normal) {
            Ok(()) => {
                debug!(%dest, via = %via, "Message forwarded");
                Dispatch::Forwarded { via, dest }
            }
            Err(e) => {
                warn!(%dest, via = %via, error = %e, "Forwarding rejected");
                Dispatch::Dropped {
                    dest,
                    reason: DropReason::Rejected(e),
                }
            }
        }
    }

    /// Start time-sync rounds once an initiator link is admitted
    fn arm_time_sync(&mut self, conn: ConnectionId) {
        let Some(interval) = self.time_sync.sync_interval() else {
            return;
        };
        let needs_rounds = self.core.connection(conn).is_some_and(|c| {
            c.is_admitted() && c.role() == LinkRole::Initiator && c.time_sync_task().is_none()
        });
        if needs_rounds {
            self.core.schedule_time_sync(conn, interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::collaborators::TimeSync;
    use crate::config::MeshConfig;
    use crate::node::MeshCore;
    use skein_core::{MockLink, MockLinkTap, TransportEvent};

    fn open(node: &mut MeshNode, handle: u64, now: Instant) -> (ConnectionId, MockLinkTap) {
        let (link, tap) = MockLink::new(64 * 1024);
        match node.handle_event(
            TransportEvent::Opened {
                handle: LinkHandle(handle),
                role: LinkRole::Acceptor,
                link: Box::new(link),
            },
            now,
        ) {
            Dispatch::Opened(id) => (id, tap),
            other => panic!("expected Opened, got {other:?}"),
        }
    }

    fn receive(node: &mut MeshNode, handle: u64, fragments: &[&str], now: Instant) -> Dispatch {
        node.handle_event(
            TransportEvent::Received {
                handle: LinkHandle(handle),
                fragments: fragments
                    .iter()
                    .map(|f| Bytes::copy_from_slice(f.as_bytes()))
                    .collect(),
            },
            now,
        )
    }

    /// Node 1 with neighbors 2 (handle 2) and 3 (handle 3, reaching 4)
    fn admitted_node(now: Instant) -> (MeshNode, MockLinkTap, MockLinkTap) {
        let mut node = MeshNode::new(NodeId(1), MeshConfig::default()).unwrap();
        let (_, p2) = open(&mut node, 2, now);
        let (_, p3) = open(&mut node, 3, now);
        receive(&mut node, 2, &[r#"{"type":6,"from":2,"dest":1,"subs":[]}"#], now);
        receive(
            &mut node,
            3,
            &[r#"{"type":6,"from":3,"dest":1,"subs":[{"nodeId":4,"subs":[]}]}"#],
            now,
        );
        p2.take_written();
        p3.take_written();
        (node, p2, p3)
    }

    fn collect_received(node: &mut MeshNode) -> Arc<Mutex<Vec<(NodeId, String)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        node.on_receive(move |from, msg| sink.lock().unwrap().push((from, msg.to_string())));
        seen
    }

    #[test]
    fn test_fragments_are_reassembled() {
        let now = Instant::now();
        let (mut node, _, _) = admitted_node(now);
        let seen = collect_received(&mut node);

        let outcome = receive(
            &mut node,
            2,
            &[r#"{"type":9,"from":2,"#, r#""dest":1,"msg":"split"}"#],
            now,
        );
        assert_eq!(outcome, Dispatch::Delivered);
        assert_eq!(*seen.lock().unwrap(), vec![(NodeId(2), "split".to_string())]);
    }

    #[test]
    fn test_single_to_self_delivered_not_forwarded() {
        let now = Instant::now();
        let (mut node, p2, p3) = admitted_node(now);
        let seen = collect_received(&mut node);

        receive(&mut node, 2, &[r#"{"type":9,"from":2,"dest":1,"msg":"hi"}"#], now);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(p2.written().is_empty());
        assert!(p3.written().is_empty());
    }

    #[test]
    fn test_single_forwarded_with_extra_fields() {
        let now = Instant::now();
        let (mut node, p2, p3) = admitted_node(now);
        let seen = collect_received(&mut node);

        let outcome = receive(
            &mut node,
            2,
            &[r#"{"type":9,"from":2,"dest":4,"msg":"far","hops":1}"#],
            now,
        );
        assert!(matches!(outcome, Dispatch::Forwarded { dest: NodeId(4), .. }));
        assert!(seen.lock().unwrap().is_empty());
        assert!(p2.written().is_empty());

        let written = p3.written_strings();
        assert_eq!(written.len(), 1);
        let env = Envelope::from_slice(written[0].as_bytes()).unwrap();
        assert_eq!(env.dest, NodeId(4));
        assert_eq!(env.msg_text(), "far");
        assert_eq!(env.extra.get("hops"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn test_single_without_route_is_dropped_quietly() {
        let now = Instant::now();
        let (mut node, p2, p3) = admitted_node(now);
        let seen = collect_received(&mut node);

        let outcome = receive(&mut node, 2, &[r#"{"type":9,"from":2,"dest":40,"msg":"x"}"#], now);
        assert_eq!(
            outcome,
            Dispatch::Dropped {
                dest: NodeId(40),
                reason: DropReason::NoRoute
            }
        );
        assert!(seen.lock().unwrap().is_empty());
        assert!(p2.written().is_empty());
        assert!(p3.written().is_empty());
    }

    #[test]
    fn test_broadcast_not_echoed_to_origin() {
        let now = Instant::now();
        let (mut node, p2, p3) = admitted_node(now);
        let seen = collect_received(&mut node);

        let outcome = receive(&mut node, 2, &[r#"{"type":8,"from":2,"dest":0,"msg":"all"}"#], now);
        assert_eq!(outcome, Dispatch::Flooded { copies: 1 });
        assert!(p2.written().is_empty());
        assert_eq!(p3.written().len(), 1);
        assert_eq!(*seen.lock().unwrap(), vec![(NodeId(2), "all".to_string())]);
    }

    #[test]
    fn test_malformed_keeps_connection_open() {
        let now = Instant::now();
        let (mut node, _, _) = admitted_node(now);

        assert_eq!(receive(&mut node, 2, &["{not json"], now), Dispatch::Malformed);
        assert_eq!(node.connection_count(), 2);
    }

    #[test]
    fn test_unknown_type_ignored() {
        let now = Instant::now();
        let (mut node, p2, p3) = admitted_node(now);

        let outcome = receive(&mut node, 2, &[r#"{"type":7,"from":2,"dest":4}"#], now);
        assert_eq!(outcome, Dispatch::UnknownType(7));
        assert!(p2.written().is_empty());
        assert!(p3.written().is_empty());
    }

    #[test]
    fn test_empty_payload_closes() {
        let now = Instant::now();
        let (mut node, p2, _) = admitted_node(now);

        assert_eq!(receive(&mut node, 2, &[], now), Dispatch::Closed);
        assert_eq!(p2.close_calls(), 1);
        assert_eq!(node.connection_count(), 1);
    }

    #[test]
    fn test_receive_resets_liveness_and_acknowledges() {
        let now = Instant::now();
        let (mut node, p2, _) = admitted_node(now);

        let later = now + Duration::from_secs(9);
        let msg = r#"{"type":9,"from":2,"dest":1,"msg":"ping"}"#;
        receive(&mut node, 2, &[msg], later);
        assert!(p2.acknowledged() >= msg.len());

        node.tick(now + Duration::from_secs(15));
        assert_eq!(p2.close_calls(), 0);
    }

    #[test]
    fn test_request_is_answered_and_admits_peer() {
        let now = Instant::now();
        let mut node = MeshNode::new(NodeId(1), MeshConfig::default()).unwrap();
        let (id, tap) = open(&mut node, 9, now);

        let admitted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&admitted);
        node.on_new_connection(move |peer| sink.lock().unwrap().push(peer));

        let outcome = receive(
            &mut node,
            9,
            &[r#"{"type":5,"from":9,"dest":0,"subs":[{"nodeId":10,"subs":[]}]}"#],
            now,
        );
        assert_eq!(outcome, Dispatch::NodeSync);
        assert_eq!(node.core().connection(id).unwrap().peer_id(), NodeId(9));
        assert_eq!(*admitted.lock().unwrap(), vec![NodeId(9)]);

        let written = tap.written_strings();
        assert_eq!(written.len(), 1);
        let reply = Envelope::from_slice(written[0].as_bytes()).unwrap();
        assert_eq!(reply.message_type(), Some(MessageType::NodeSyncReply));
        assert_eq!(reply.dest, NodeId(9));
        assert_eq!(reply.subs_text().as_deref(), Some("[]"));

        assert_eq!(node.node_list(), vec![NodeId(9), NodeId(10)]);
    }

    #[test]
    fn test_repeated_unchanged_sync_raises_stability() {
        let now = Instant::now();
        let (mut node, _, _) = admitted_node(now);
        assert_eq!(node.stability(), 0);

        receive(&mut node, 2, &[r#"{"type":6,"from":2,"dest":1,"subs":[]}"#], now);
        assert_eq!(node.stability(), crate::collaborators::STABILITY_STEP);
    }

    struct CountingTimeSync {
        syncs: Arc<Mutex<Vec<u32>>>,
    }

    impl TimeSync for CountingTimeSync {
        fn node_time(&self, _now: Instant) -> u32 {
            42
        }

        fn on_time_sync(&mut self, _core: &mut MeshCore, _from: ConnectionId, _envelope: Envelope, received_at: u32) {
            self.syncs.lock().unwrap().push(received_at);
        }

        fn on_time_delay(&mut self, _core: &mut MeshCore, _from: ConnectionId, _envelope: Envelope, received_at: u32) {
            self.syncs.lock().unwrap().push(received_at + 1);
        }
    }

    #[test]
    fn test_time_traffic_goes_to_collaborator() {
        let now = Instant::now();
        let syncs = Arc::new(Mutex::new(Vec::new()));
        let mut node = MeshNode::new(NodeId(1), MeshConfig::default())
            .unwrap()
            .with_time_sync(CountingTimeSync {
                syncs: Arc::clone(&syncs),
            });
        open(&mut node, 2, now);

        assert_eq!(
            receive(&mut node, 2, &[r#"{"type":4,"from":2,"dest":1,"msg":{"t0":5}}"#], now),
            Dispatch::TimeSync
        );
        assert_eq!(
            receive(&mut node, 2, &[r#"{"type":3,"from":2,"dest":1,"msg":"d"}"#], now),
            Dispatch::Delivered
        );
        assert_eq!(*syncs.lock().unwrap(), vec![42, 43]);
    }
}
