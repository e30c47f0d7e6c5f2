use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use ronclient::client::client_config::RonClientConfig;
use ronclient::client::request::RequestCounters;
use ronclient::client::ron_node::RonNode;
use ronclient::messaging::packet::{RonPacket, MAX_PACKET_SIZE};
use ronclient::test_util::trace::RecordingTrace;
use tokio::net::UdpSocket;
use tokio::time;

fn loopback_config() -> RonClientConfig {
    RonClientConfig::new("127.0.0.1:0".parse().unwrap())
}

/// Polls until the condition holds, failing after a generous deadline
async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(time::Instant::now() < deadline, "condition not met in time");
        time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_requests_are_acknowledged_over_udp() {
    let mut server = RonNode::new(loopback_config());
    server.start().await.unwrap();
    let server_addr = server.myself().unwrap();

    let trace = Arc::new(RecordingTrace::default());
    let mut config = loopback_config();
    config.max_packets = 3;
    config.interval = Duration::from_millis(50);
    config.timeout = Duration::from_secs(5);
    let mut client = RonNode::with_trace(config, trace.clone());
    client.set_remote(server_addr).await;
    client.set_fill_text("hello").await.unwrap();
    client.start().await.unwrap();

    wait_for(|| trace.acked_sequences().len() == 3).await;

    client.stop().await;
    server.stop().await;

    assert_eq!(trace.sent_data_sequences(), vec![0, 1, 2]);
    assert_eq!(client.final_counters(), Some((3, RequestCounters { acknowledged: 3, abandoned: 0 })));
}

#[tokio::test]
async fn test_relay_over_udp() {
    let mut server = RonNode::new(loopback_config());
    server.start().await.unwrap();
    let server_addr = server.myself().unwrap();

    let relay_trace = Arc::new(RecordingTrace::default());
    let mut relay = RonNode::with_trace(loopback_config(), relay_trace.clone());
    relay.start().await.unwrap();
    let relay_addr = relay.myself().unwrap();

    // a hand-crafted request that takes the detour through the relay
    let requester = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let requester_addr = requester.local_addr().unwrap();
    let request = RonPacket::data(17, requester_addr, server_addr, Bytes::from_static(b"via relay"));
    requester.send_to(&request.to_bytes(), relay_addr).await.unwrap();

    let mut buf = vec![0u8; MAX_PACKET_SIZE];
    let (len, from) = time::timeout(Duration::from_secs(10), requester.recv_from(&mut buf)).await.unwrap().unwrap();

    assert_eq!(from, relay_addr);
    assert_eq!(RonPacket::try_deser(&buf[..len]).unwrap(), RonPacket::ack(17, server_addr, requester_addr));

    relay.stop().await;
    server.stop().await;

    assert_eq!(relay_trace.forwarded(), vec![request, RonPacket::ack(17, server_addr, requester_addr)]);
}
