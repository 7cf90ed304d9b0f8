//! Loopback tests for the TCP transport

use std::time::Duration;

use bytes::Bytes;
use skein_core::{LinkRole, LinkTransport, NodeId, TransportEvent};
use skein_mesh::{MeshConfig, MeshNode, MeshRuntime};
use skein_transport::{TcpConfig, TcpTransport};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn next_event(events: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Skip `Sent` and `Poll` noise
async fn next_significant(events: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
    loop {
        match next_event(events).await {
            TransportEvent::Sent { .. } | TransportEvent::Poll { .. } => continue,
            other => return other,
        }
    }
}

async fn open_pair() -> (
    Box<dyn LinkTransport>,
    mpsc::Receiver<TransportEvent>,
    Box<dyn LinkTransport>,
    mpsc::Receiver<TransportEvent>,
) {
    let (server, mut server_events) = TcpTransport::new(TcpConfig::default());
    let (client, mut client_events) = TcpTransport::new(TcpConfig::default());

    let addr = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
    client.connect(addr).await.unwrap();

    let TransportEvent::Opened { role, link: client_link, .. } = next_event(&mut client_events).await
    else {
        panic!("expected Opened on client");
    };
    assert_eq!(role, LinkRole::Initiator);

    let TransportEvent::Opened { role, link: server_link, .. } = next_event(&mut server_events).await
    else {
        panic!("expected Opened on server");
    };
    assert_eq!(role, LinkRole::Acceptor);

    (client_link, client_events, server_link, server_events)
}

#[tokio::test]
async fn test_frames_arrive_whole_and_in_order() {
    let (mut client, _client_events, _server, mut server_events) = open_pair().await;

    client.write(br#"{"type":9,"from":1,"dest":2,"msg":"one"}"#).unwrap();
    client.write(br#"{"type":9,"from":1,"dest":2,"msg":"two"}"#).unwrap();

    for expected in ["one", "two"] {
        let TransportEvent::Received { fragments, .. } = next_significant(&mut server_events).await
        else {
            panic!("expected Received");
        };
        let frame: Vec<u8> = fragments.iter().flat_map(|b: &Bytes| b.iter().copied()).collect();
        let text = String::from_utf8(frame).unwrap();
        assert!(text.contains(expected));
        assert!(!text.ends_with('\n'));
    }
}

#[tokio::test]
async fn test_close_reports_graceful_eof() {
    let (mut client, _client_events, _server, mut server_events) = open_pair().await;

    client.close().unwrap();
    assert!(client.write(b"late").is_err());

    let TransportEvent::Received { fragments, .. } = next_significant(&mut server_events).await
    else {
        panic!("expected Received");
    };
    assert!(fragments.is_empty());
}

async fn received_text(events: &mut mpsc::Receiver<TransportEvent>) -> String {
    let TransportEvent::Received { fragments, .. } = next_significant(events).await else {
        panic!("expected Received");
    };
    let frame: Vec<u8> = fragments.iter().flat_map(|b: &Bytes| b.iter().copied()).collect();
    String::from_utf8(frame).unwrap()
}

#[tokio::test]
async fn test_links_outlive_dropped_transport() {
    // Both transports are gone once the pair is open
    let (mut client, mut client_events, mut server, mut server_events) = open_pair().await;

    client.write(b"from client").unwrap();
    assert_eq!(received_text(&mut server_events).await, "from client");

    server.write(b"from server").unwrap();
    assert_eq!(received_text(&mut client_events).await, "from server");
}

#[tokio::test]
async fn test_shutdown_closes_open_links() {
    let (server, mut server_events) = TcpTransport::new(TcpConfig::default());
    let (client, mut client_events) = TcpTransport::new(TcpConfig::default());

    let addr = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
    client.connect(addr).await.unwrap();
    let TransportEvent::Opened { link: _client_link, .. } = next_event(&mut client_events).await
    else {
        panic!("expected Opened on client");
    };
    let TransportEvent::Opened { link: _server_link, .. } = next_event(&mut server_events).await
    else {
        panic!("expected Opened on server");
    };

    client.shutdown();

    let TransportEvent::Received { fragments, .. } = next_significant(&mut server_events).await
    else {
        panic!("expected Received");
    };
    assert!(fragments.is_empty());
    server.shutdown();
}

#[tokio::test]
async fn test_send_capacity_shrinks_until_written() {
    let config = TcpConfig::default();
    let (mut client, mut client_events, _server, _server_events) = open_pair().await;

    let full = client.send_capacity();
    assert!(full >= 1400 && full < config.send_buffer);

    client.write(&[b'x'; 1000]).unwrap();
    assert!(client.send_capacity() <= full);

    loop {
        if let TransportEvent::Sent { .. } = next_event(&mut client_events).await {
            break;
        }
    }
    assert_eq!(client.send_capacity(), full);
}

#[tokio::test]
async fn test_two_nodes_discover_each_other() {
    let (server, server_events) = TcpTransport::new(TcpConfig::default());
    let (client, client_events) = TcpTransport::new(TcpConfig::default());

    let config = MeshConfig::default();
    let (server_handle, server_task) =
        MeshRuntime::spawn(MeshNode::new(NodeId(100), config.clone()).unwrap(), server_events);
    let (client_handle, client_task) =
        MeshRuntime::spawn(MeshNode::new(NodeId(200), config).unwrap(), client_events);

    let addr = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
    client.connect(addr).await.unwrap();

    timeout(WAIT, async {
        loop {
            let server_sees = server_handle.node_list().await.unwrap();
            let client_sees = client_handle.node_list().await.unwrap();
            if server_sees == vec![NodeId(200)] && client_sees == vec![NodeId(100)] {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("nodes never discovered each other");

    client_handle.send_single(NodeId(100), "over tcp").await.unwrap();

    server_handle.shutdown().await.unwrap();
    client_handle.shutdown().await.unwrap();
    server_task.await.unwrap();
    client_task.await.unwrap();
    server.shutdown();
    client.shutdown();
}
