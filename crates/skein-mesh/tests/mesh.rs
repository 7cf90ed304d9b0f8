//! Multi-node tests for skein-mesh
//!
//! Nodes are wired together with in-memory links; `pump` carries whatever
//! one side wrote to the other side as `Received` events until the mesh
//! goes quiet.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use skein_core::{
    LinkFault, LinkHandle, LinkRole, MockLink, MockLinkTap, NodeId, SendError, TransportEvent,
};
use skein_mesh::{Dispatch, MeshConfig, MeshNode};
use tokio_test::assert_ok;

const LINK_CAPACITY: usize = 16 * 1024;

struct Link {
    a: usize,
    a_handle: LinkHandle,
    a_tap: MockLinkTap,
    b: usize,
    b_handle: LinkHandle,
    b_tap: MockLinkTap,
}

type Inbox = Arc<Mutex<Vec<(NodeId, String)>>>;

struct Mesh {
    nodes: Vec<MeshNode>,
    inboxes: Vec<Inbox>,
    dropped: Vec<Arc<Mutex<Vec<NodeId>>>>,
    links: Vec<Link>,
    now: Instant,
    next_handle: u64,
}

impl Mesh {
    fn new(ids: &[u32]) -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let mut nodes = Vec::new();
        let mut inboxes = Vec::new();
        let mut dropped = Vec::new();
        for id in ids {
            let mut node = MeshNode::new(NodeId(*id), MeshConfig::default()).unwrap();

            let inbox: Inbox = Arc::default();
            let sink = Arc::clone(&inbox);
            node.on_receive(move |from, msg| sink.lock().unwrap().push((from, msg.to_string())));

            let gone = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&gone);
            node.on_dropped_connection(move |id| sink.lock().unwrap().push(id));

            nodes.push(node);
            inboxes.push(inbox);
            dropped.push(gone);
        }
        Self {
            nodes,
            inboxes,
            dropped,
            links: Vec::new(),
            now: Instant::now(),
            next_handle: 1,
        }
    }

    fn open(&mut self, node: usize, role: LinkRole) -> (LinkHandle, MockLinkTap) {
        let handle = LinkHandle(self.next_handle);
        self.next_handle += 1;
        let (link, tap) = MockLink::new(LINK_CAPACITY);
        let outcome = self.nodes[node].handle_event(
            TransportEvent::Opened {
                handle,
                role,
                link: Box::new(link),
            },
            self.now,
        );
        assert!(matches!(outcome, Dispatch::Opened(_)));
        (handle, tap)
    }

    /// Link `a` (initiator) to `b` (acceptor), returning the link index
    fn connect(&mut self, a: usize, b: usize) -> usize {
        let (a_handle, a_tap) = self.open(a, LinkRole::Initiator);
        let (b_handle, b_tap) = self.open(b, LinkRole::Acceptor);
        self.links.push(Link {
            a,
            a_handle,
            a_tap,
            b,
            b_handle,
            b_tap,
        });
        self.links.len() - 1
    }

    fn pump(&mut self) -> usize {
        let mut moved = 0;
        for _ in 0..64 {
            let mut round = 0;
            for i in 0..self.links.len() {
                let (a, a_handle, a_tap, b, b_handle, b_tap) = {
                    let l = &self.links[i];
                    (l.a, l.a_handle, l.a_tap.clone(), l.b, l.b_handle, l.b_tap.clone())
                };
                round += self.carry(a, a_handle, &a_tap, b, b_handle);
                round += self.carry(b, b_handle, &b_tap, a, a_handle);
            }
            if round == 0 {
                return moved;
            }
            moved += round;
        }
        panic!("mesh did not go quiet");
    }

    fn carry(
        &mut self,
        from: usize,
        from_handle: LinkHandle,
        tap: &MockLinkTap,
        to: usize,
        to_handle: LinkHandle,
    ) -> usize {
        let frames = tap.take_written();
        tap.set_capacity(LINK_CAPACITY);
        self.nodes[from].handle_event(TransportEvent::Sent { handle: from_handle }, self.now);
        for frame in &frames {
            self.nodes[to].handle_event(
                TransportEvent::Received {
                    handle: to_handle,
                    fragments: vec![frame.clone()],
                },
                self.now,
            );
        }
        frames.len()
    }

    fn advance(&mut self, by: Duration) {
        self.now += by;
        for node in &mut self.nodes {
            node.tick(self.now);
        }
    }

    fn inbox(&self, node: usize) -> Vec<(NodeId, String)> {
        self.inboxes[node].lock().unwrap().clone()
    }

    /// Three nodes in a line, 1 - 2 - 3, with topology fully exchanged
    fn line() -> Self {
        let mut mesh = Mesh::new(&[1, 2, 3]);
        mesh.connect(0, 1);
        mesh.connect(1, 2);

        mesh.advance(Duration::ZERO);
        mesh.pump();
        // Second round carries what each node learned in the first
        mesh.advance(Duration::from_secs(5));
        mesh.pump();
        mesh
    }
}

#[test]
fn test_topology_propagates_along_a_line() {
    let mut mesh = Mesh::line();

    let mut list = mesh.nodes[0].node_list();
    list.sort();
    assert_eq!(list, vec![NodeId(2), NodeId(3)]);

    let mut list = mesh.nodes[2].node_list();
    list.sort();
    assert_eq!(list, vec![NodeId(1), NodeId(2)]);

    assert_eq!(mesh.nodes[1].node_list().len(), 2);
    assert!(mesh.nodes[0].approx_node_count() >= 1);
}

#[test]
fn test_single_is_forwarded_over_two_hops() {
    let mut mesh = Mesh::line();

    assert_ok!(mesh.nodes[0].send_single(NodeId(3), "hello"));
    mesh.pump();

    assert_eq!(mesh.inbox(2), vec![(NodeId(1), "hello".to_string())]);
    assert!(mesh.inbox(1).is_empty());
    assert!(mesh.inbox(0).is_empty());
}

#[test]
fn test_broadcast_reaches_everyone_once() {
    let mut mesh = Mesh::line();

    assert_eq!(mesh.nodes[0].send_broadcast("all").unwrap(), 1);
    mesh.pump();

    assert_eq!(mesh.inbox(1), vec![(NodeId(1), "all".to_string())]);
    assert_eq!(mesh.inbox(2), vec![(NodeId(1), "all".to_string())]);
    assert!(mesh.inbox(0).is_empty());
}

#[test]
fn test_dropped_link_is_cleaned_up() {
    let mut mesh = Mesh::line();
    let stability = mesh.nodes[1].stability();
    assert!(stability > 0);

    let link = &mesh.links[1];
    let (middle, handle) = (link.a, link.a_handle);
    assert_eq!(
        mesh.nodes[middle].handle_event(
            TransportEvent::Fault {
                handle,
                fault: LinkFault::Reset,
            },
            mesh.now,
        ),
        Dispatch::Closed
    );
    assert_eq!(mesh.links[1].a_tap.close_calls(), 0);

    // Cleanup runs after the dropped-connection delay
    mesh.advance(Duration::from_millis(500));
    assert!(mesh.dropped[1].lock().unwrap().is_empty());
    mesh.advance(Duration::from_millis(600));
    assert_eq!(*mesh.dropped[1].lock().unwrap(), vec![NodeId(3)]);
    assert_eq!(mesh.nodes[1].stability(), stability / 2);

    // The forced sync tells node 1 that node 3 is gone
    mesh.advance(Duration::from_millis(10));
    mesh.pump();
    assert_eq!(mesh.nodes[0].node_list(), vec![NodeId(2)]);
    assert_eq!(
        mesh.nodes[0].send_single(NodeId(3), "late"),
        Err(SendError::NoRoute(NodeId(3)))
    );
}

#[test]
fn test_silent_peer_times_out() {
    let mut mesh = Mesh::new(&[1, 2]);
    mesh.connect(0, 1);

    // Nothing is pumped, so neither side hears anything
    mesh.advance(Duration::from_secs(11));
    assert_eq!(mesh.nodes[0].connection_count(), 0);
    assert_eq!(mesh.nodes[1].connection_count(), 0);
    assert_eq!(mesh.links[0].a_tap.close_calls(), 1);
    assert_eq!(mesh.links[0].b_tap.close_calls(), 1);
}
