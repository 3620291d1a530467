//! Gossip exchange over real sockets.

mod common;

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use cluster_gossip::wire::frame::{FrameReader, FrameWriter, frame_bytes};
use cluster_gossip::wire::proto::{
    GossipEnvelope, GossipMessage, HeartbeatPing, PROTOCOL_VERSION_V1, WireLimits, decode_envelope,
    encode_envelope,
};
use cluster_gossip::{
    ClusterId, Generation, GossipConfig, Gossiper, NodeId, PeerAddr, TcpDialer, TcpGossipServer,
    TcpServerHandle, WallClock,
};

/// Reserve an ephemeral port. Small race window between drop and
/// rebind, fine for tests.
fn reserve_addr() -> PeerAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    PeerAddr::new(addr.to_string()).unwrap()
}

/// Poll until `probe` yields a value or the deadline passes.
fn wait_for<T>(timeout: Duration, mut probe: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if let Some(value) = probe() {
            return Some(value);
        }
        if std::time::Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn start_node(name: &str, cluster: &str, addr: PeerAddr) -> (Arc<Gossiper>, TcpServerHandle) {
    let mut config = GossipConfig::new(
        NodeId::new(name).unwrap(),
        ClusterId::new(cluster).unwrap(),
        addr.clone(),
    );
    config.rpc_timeout = Some(Duration::from_millis(500));

    let gossiper = Arc::new(Gossiper::new(config, Arc::new(TcpDialer::new())).unwrap());
    let handle = TcpGossipServer::new(addr, gossiper.clone())
        .start()
        .unwrap();
    (gossiper, handle)
}

#[test]
fn two_nodes_exchange_over_tcp() {
    common::init_tracing();
    let addr_a = reserve_addr();
    let addr_b = reserve_addr();
    let (a, _server_a) = start_node("a", "tcp-test", addr_a.clone());
    let (b, _server_b) = start_node("b", "tcp-test", addr_b.clone());

    a.store().tick_local(WallClock::now());
    b.store().tick_local(WallClock::now());

    a.registry().add_peer(&addr_b);
    a.run_round(1);

    // SYN/ACK gave a b's state synchronously.
    let b_seen_by_a = a
        .store()
        .snapshot_endpoint(b.store().node_id())
        .expect("a merged b's endpoint");
    assert_eq!(b_seen_by_a.generation(), b.store().generation());

    // The ACK2 is one-way; b applies it on its connection thread.
    let a_seen_by_b = wait_for(Duration::from_secs(2), || {
        b.store().snapshot_endpoint(a.store().node_id())
    })
    .expect("b merged a's endpoint");
    assert_eq!(a_seen_by_b.generation(), a.store().generation());

    // Peer discovery: b learned a's address from the SYN.
    assert!(b.registry().snapshot().live.contains(&addr_a));
}

#[test]
fn ping_round_trips_over_tcp() {
    let addr = reserve_addr();
    let (_node, _server) = start_node("pingee", "tcp-test", addr.clone());

    let dialer_node_addr = reserve_addr();
    let mut config = GossipConfig::new(
        NodeId::new("pinger").unwrap(),
        ClusterId::new("tcp-test").unwrap(),
        dialer_node_addr,
    );
    config.rpc_timeout = Some(Duration::from_millis(500));
    let pinger = Gossiper::new(config, Arc::new(TcpDialer::new())).unwrap();

    let pong = pinger.ping(&addr).unwrap();
    assert_eq!(pong.node_id, NodeId::new("pingee").unwrap());
}

#[test]
fn malformed_message_does_not_kill_the_connection() {
    let addr = reserve_addr();
    let (_node, _server) = start_node("victim", "tcp-test", addr.clone());

    let mut stream = TcpStream::connect(addr.as_str()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    // A well-framed payload that is not valid CBOR: discarded, logged,
    // connection stays up.
    let garbage = frame_bytes(b"not cbor at all", 1024 * 1024).unwrap();
    stream.write_all(&garbage).unwrap();

    // A valid ping on the same connection still gets its pong.
    let ping = GossipEnvelope {
        version: PROTOCOL_VERSION_V1,
        message: GossipMessage::Ping(HeartbeatPing {
            node_id: NodeId::new("prober").unwrap(),
            generation: Generation::new(1),
        }),
    };
    let bytes = encode_envelope(&ping).unwrap();
    let mut writer = FrameWriter::new(stream.try_clone().unwrap(), 1024 * 1024);
    writer.write_frame(&bytes).unwrap();

    let mut reader = FrameReader::new(stream, 1024 * 1024);
    let reply = reader.read_frame().unwrap().expect("pong frame");
    let envelope = decode_envelope(&reply, &WireLimits::default()).unwrap();
    match envelope.message {
        GossipMessage::Pong(pong) => {
            assert_eq!(pong.node_id, NodeId::new("victim").unwrap());
        }
        other => panic!("expected PONG, got {other:?}"),
    }
}

#[test]
fn shutdown_stops_accepting() {
    let addr = reserve_addr();
    let (_node, mut server) = start_node("closer", "tcp-test", addr.clone());
    assert!(TcpStream::connect(addr.as_str()).is_ok());

    server.shutdown();

    // The listener is gone; new connections are refused.
    assert!(TcpStream::connect(addr.as_str()).is_err());
}
