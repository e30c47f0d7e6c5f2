use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::bail;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::client_config::RonClientConfig;
use crate::client::driver::{run_ron_client, ClientCommand, InboundQueue};
use crate::client::payload_fill::PayloadFill;
use crate::client::request::RequestCounters;
use crate::client::ron_client::RonClient;
use crate::client::ron_trace::{NoopTrace, RonTrace};
use crate::messaging::transport::udp::UdpTransport;
use crate::messaging::transport::Transport;

/// This is the public API for running a node. A node is configured, started, and stopped:
///
/// ```ascii
/// Configured --start--> Running --stop--> Stopped
/// ```
///
/// Configuration can be changed in any state; changes made while running take effect for
///  subsequently originated requests. A stopped node cannot be restarted.
pub struct RonNode {
    config: RonClientConfig,
    trace: Arc<dyn RonTrace>,
    lifecycle: Lifecycle,
}

enum Lifecycle {
    Configured,
    Running(RunningNode),
    Stopped(StoppedNode),
}

struct RunningNode {
    myself: SocketAddr,
    transport: Arc<dyn Transport>,
    commands: mpsc::Sender<ClientCommand>,
    event_loop: JoinHandle<RonClient>,
    recv_loop: JoinHandle<()>,
}

struct StoppedNode {
    num_originated: u32,
    counters: RequestCounters,
}

impl RonNode {
    pub fn new(config: RonClientConfig) -> RonNode {
        RonNode::with_trace(config, Arc::new(NoopTrace))
    }

    pub fn with_trace(config: RonClientConfig, trace: Arc<dyn RonTrace>) -> RonNode {
        RonNode {
            config,
            trace,
            lifecycle: Lifecycle::Configured,
        }
    }

    pub fn config(&self) -> &RonClientConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Running(_))
    }

    /// The address this node is known by, once it is running
    pub fn myself(&self) -> Option<SocketAddr> {
        match &self.lifecycle {
            Lifecycle::Running(running) => Some(running.myself),
            _ => None,
        }
    }

    /// Number of requests originated and their outcomes, once the node is stopped
    pub fn final_counters(&self) -> Option<(u32, RequestCounters)> {
        match &self.lifecycle {
            Lifecycle::Stopped(stopped) => Some((stopped.num_originated, stopped.counters)),
            _ => None,
        }
    }

    pub async fn set_remote(&mut self, remote: SocketAddr) {
        self.config.remote = Some(remote);
        self.send_command(ClientCommand::SetRemote(remote)).await;
    }

    /// Sets the payload to `size` bytes with unspecified content, replacing any text or fill
    ///  pattern
    pub async fn set_data_size(&mut self, size: u32) -> anyhow::Result<()> {
        self.set_fill(PayloadFill::unspecified(size)).await
    }

    pub async fn set_fill_text(&mut self, text: &str) -> anyhow::Result<()> {
        self.set_fill(PayloadFill::text(text)).await
    }

    pub async fn set_fill_byte(&mut self, fill_byte: u8, size: u32) -> anyhow::Result<()> {
        self.set_fill(PayloadFill::repeating_byte(fill_byte, size)).await
    }

    pub async fn set_fill_pattern(&mut self, pattern: &[u8], size: u32) -> anyhow::Result<()> {
        self.set_fill(PayloadFill::repeating(pattern, size)).await
    }

    /// Fails without changing anything if the payload does not fit into a single datagram
    pub async fn set_fill(&mut self, fill: PayloadFill) -> anyhow::Result<()> {
        fill.validate()?;
        self.config.fill = fill.clone();
        self.send_command(ClientCommand::SetFill(fill)).await;
        Ok(())
    }

    pub fn data_size(&self) -> u32 {
        self.config.fill.effective_size()
    }

    pub async fn add_peer(&mut self, peer: SocketAddr) {
        self.config.peers.push(peer);
        self.send_command(ClientCommand::AddPeer(peer)).await;
    }

    /// Binds a UDP socket to the configured address and starts the node on it
    pub async fn start(&mut self) -> anyhow::Result<()> {
        if self.is_running() {
            warn!("node is already running - ignoring start request");
            return Ok(());
        }
        self.check_startable()?;
        self.config.validate()?;

        let transport = UdpTransport::bind(self.config.bind_addr).await?;
        self.start_with_transport(Arc::new(transport)).await
    }

    pub async fn start_with_transport(&mut self, transport: Arc<dyn Transport>) -> anyhow::Result<()> {
        if self.is_running() {
            warn!("node is already running - ignoring start request");
            return Ok(());
        }
        self.check_startable()?;
        self.config.validate()?;

        let config = Arc::new(self.config.clone());
        let (timeouts_send, timeouts_recv) = mpsc::unbounded_channel();
        let (inbound_send, inbound_recv) = mpsc::channel(config.inbound_queue_size);
        let (commands_send, commands_recv) = mpsc::channel(16);

        let client = RonClient::new(config, transport.clone(), self.trace.clone(), timeouts_send);
        let myself = client.myself();

        let recv_loop = {
            let transport = transport.clone();
            let handler = Arc::new(InboundQueue::new(inbound_send));
            tokio::spawn(async move {
                if let Err(e) = transport.recv_loop(handler).await {
                    error!("receive loop terminated: {}", e);
                }
            })
        };
        let event_loop = tokio::spawn(run_ron_client(client, inbound_recv, timeouts_recv, commands_recv));

        self.lifecycle = Lifecycle::Running(RunningNode {
            myself,
            transport,
            commands: commands_send,
            event_loop,
            recv_loop,
        });
        Ok(())
    }

    /// Stops originating requests, cancels all pending timeouts, and stops receiving. Calling
    ///  this more than once, or on a node that was never started, has no further effect.
    pub async fn stop(&mut self) {
        let running = match std::mem::replace(&mut self.lifecycle, Lifecycle::Configured) {
            Lifecycle::Running(running) => running,
            Lifecycle::Configured => {
                debug!("node was never started - nothing to stop");
                return;
            }
            stopped @ Lifecycle::Stopped(_) => {
                debug!("node is already stopped");
                self.lifecycle = stopped;
                return;
            }
        };

        // the event loop may have terminated already, and then there is nobody to tell
        let _ = running.commands.send(ClientCommand::Stop).await;

        let stopped = match running.event_loop.await {
            Ok(client) => StoppedNode {
                num_originated: client.num_originated(),
                counters: client.counters(),
            },
            Err(e) => {
                error!("client event loop terminated abnormally: {}", e);
                StoppedNode {
                    num_originated: 0,
                    counters: RequestCounters::default(),
                }
            }
        };

        running.transport.shut_down_recv_loop();
        if let Err(e) = running.recv_loop.await {
            error!("receive loop terminated abnormally: {}", e);
        }

        info!(myself = ?running.myself, "node stopped");
        self.lifecycle = Lifecycle::Stopped(stopped);
    }

    fn check_startable(&self) -> anyhow::Result<()> {
        if let Lifecycle::Stopped(_) = self.lifecycle {
            bail!("a stopped node cannot be restarted");
        }
        Ok(())
    }

    async fn send_command(&self, cmd: ClientCommand) {
        if let Lifecycle::Running(running) = &self.lifecycle {
            if running.commands.send(cmd).await.is_err() {
                warn!("client event loop is gone - configuration change only affects the stored configuration");
            }
        }
    }
}

impl Drop for RonNode {
    fn drop(&mut self) {
        if let Lifecycle::Running(running) = &self.lifecycle {
            debug!("node dropped while running - aborting its tasks");
            running.event_loop.abort();
            running.transport.shut_down_recv_loop();
            running.recv_loop.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use bytes::Bytes;
    use tokio::time;
    use crate::client::client_config::RonClientConfig;
    use crate::client::payload_fill::PayloadFill;
    use crate::client::request::RequestCounters;
    use crate::client::ron_node::RonNode;
    use crate::messaging::packet::{PacketKind, RonPacket};
    use crate::test_util::node::test_addr_from_number;
    use crate::test_util::sim_network::SimNetwork;
    use crate::test_util::trace::RecordingTrace;

    fn config(number: u16) -> RonClientConfig {
        RonClientConfig::new(test_addr_from_number(number))
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_sends_and_relay_on_timeout() {
        let network = SimNetwork::new();
        let transport = network.transport(test_addr_from_number(1));

        let mut config = config(1);
        config.interval = Duration::from_secs(1);
        config.max_packets = 3;
        config.timeout = Duration::from_secs(2);
        config.peers = vec![test_addr_from_number(3), test_addr_from_number(4)];

        let remote: SocketAddr = "10.0.0.1:9".parse().unwrap();
        let mut node = RonNode::new(config);
        node.set_remote(remote).await;
        node.set_fill_text("hello").await.unwrap();
        assert_eq!(node.data_size(), 5);

        node.start_with_transport(transport.clone()).await.unwrap();
        assert_eq!(node.myself(), Some(test_addr_from_number(1)));

        time::sleep(Duration::from_millis(2500)).await;
        node.stop().await;

        let sent = transport.take_sent_packets();
        let hello = |sequence| RonPacket::data(sequence, test_addr_from_number(1), remote, Bytes::from_static(b"hello"));

        let direct = sent.iter()
            .filter(|(to, _)| *to == remote)
            .map(|(_, p)| p.clone())
            .collect::<Vec<_>>();
        assert_eq!(direct, vec![hello(0), hello(1), hello(2)]);

        // only sequence 0 timed out before the node was stopped
        let relayed = sent.iter()
            .filter(|(to, _)| *to != remote)
            .cloned()
            .collect::<Vec<_>>();
        assert_eq!(relayed, vec![
            (test_addr_from_number(3), hello(0)),
            (test_addr_from_number(4), hello(0)),
        ]);

        assert_eq!(node.final_counters(), Some((3, RequestCounters { acknowledged: 0, abandoned: 3 })));

        // no timer fires after stop
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.num_sent(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_count() {
        let network = SimNetwork::new();
        let transport = network.transport(test_addr_from_number(1));

        let mut config = config(1);
        config.max_packets = 0;
        config.remote = Some(test_addr_from_number(2));

        let mut node = RonNode::new(config);
        node.start_with_transport(transport.clone()).await.unwrap();
        time::sleep(Duration::from_millis(10_500)).await;
        node.stop().await;

        let sequences = transport.take_sent_packets().into_iter()
            .map(|(_, p)| p.sequence())
            .collect::<Vec<_>>();
        assert_eq!(sequences, (0..=10).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_relay_end_to_end() {
        let network = SimNetwork::new();
        let a = test_addr_from_number(1);
        let b = test_addr_from_number(2);
        let c = test_addr_from_number(3);
        network.block_link(a, b);

        let client_trace = Arc::new(RecordingTrace::default());
        let mut client_config = config(1);
        client_config.remote = Some(b);
        client_config.max_packets = 1;
        client_config.peers = vec![c];
        client_config.fill = PayloadFill::repeating_byte(b'x', 10);
        let mut client = RonNode::with_trace(client_config, client_trace.clone());

        let server_trace = Arc::new(RecordingTrace::default());
        let mut server = RonNode::with_trace(config(2), server_trace.clone());

        let relay_trace = Arc::new(RecordingTrace::default());
        let mut relay = RonNode::with_trace(config(3), relay_trace.clone());

        server.start_with_transport(network.transport(b)).await.unwrap();
        relay.start_with_transport(network.transport(c)).await.unwrap();
        client.start_with_transport(network.transport(a)).await.unwrap();

        time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(client_trace.sent_data_sequences(), vec![0, 0]);
        assert_eq!(client_trace.acked_sequences(), vec![0]);
        assert_eq!(server_trace.sent_ack_sequences(), vec![0]);

        let forwarded = relay_trace.forwarded();
        assert_eq!(forwarded.len(), 2);
        assert_eq!(forwarded[0].kind(), PacketKind::Data);
        assert_eq!(forwarded[0].header.destination, b);
        assert_eq!(forwarded[0].body, Bytes::from_static(&[b'x'; 10]));
        assert_eq!(forwarded[1], RonPacket::ack(0, b, a));

        client.stop().await;
        server.stop().await;
        relay.stop().await;
        assert_eq!(client.final_counters(), Some((1, RequestCounters { acknowledged: 1, abandoned: 0 })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_ack_needs_no_relay() {
        let network = SimNetwork::new();
        let a = test_addr_from_number(1);
        let b = test_addr_from_number(2);
        let c = test_addr_from_number(3);

        let client_trace = Arc::new(RecordingTrace::default());
        let mut client_config = config(1);
        client_config.remote = Some(b);
        client_config.max_packets = 2;
        client_config.peers = vec![c];
        let mut client = RonNode::with_trace(client_config, client_trace.clone());
        let mut server = RonNode::new(config(2));
        let relay_transport = network.transport(c);

        server.start_with_transport(network.transport(b)).await.unwrap();
        client.start_with_transport(network.transport(a)).await.unwrap();

        time::sleep(Duration::from_secs(5)).await;

        assert_eq!(client_trace.sent_data_sequences(), vec![0, 1]);
        assert_eq!(client_trace.acked_sequences(), vec![0, 1]);
        assert_eq!(relay_transport.num_sent(), 0);

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_configuration_while_running() {
        let network = SimNetwork::new();
        let transport = network.transport(test_addr_from_number(1));

        let mut config = config(1);
        config.max_packets = 0;
        config.timeout = Duration::from_millis(1500);
        let mut node = RonNode::new(config);
        node.start_with_transport(transport.clone()).await.unwrap();

        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(transport.num_sent(), 0);

        node.set_remote(test_addr_from_number(2)).await;
        node.set_fill_byte(7, 3).await.unwrap();
        node.add_peer(test_addr_from_number(3)).await;
        assert_eq!(node.data_size(), 3);
        assert_eq!(node.config().peers, vec![test_addr_from_number(3)]);

        time::sleep(Duration::from_millis(2000)).await;
        node.stop().await;

        let sent = transport.take_sent_packets();
        assert!(sent.contains(&(test_addr_from_number(3), RonPacket::data(0, test_addr_from_number(1), test_addr_from_number(2), Bytes::from_static(&[7, 7, 7])))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let network = SimNetwork::new();
        let transport = network.transport(test_addr_from_number(1));

        let mut config = config(1);
        config.remote = Some(test_addr_from_number(2));
        let mut node = RonNode::new(config);

        // stopping a node that was never started has no effect
        node.stop().await;
        node.stop().await;
        assert!(node.final_counters().is_none());

        node.start_with_transport(transport.clone()).await.unwrap();
        assert!(node.is_running());
        time::sleep(Duration::from_millis(1500)).await;

        node.stop().await;
        let counters = node.final_counters();
        node.stop().await;
        assert_eq!(node.final_counters(), counters);
        assert!(!node.is_running());

        let num_sent = transport.take_sent().len();
        assert_eq!(num_sent, 2);
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.num_sent(), 0);

        assert!(node.start_with_transport(transport).await.is_err());
    }

    #[tokio::test]
    async fn test_start_with_invalid_config() {
        let mut config = config(1);
        config.interval = Duration::ZERO;
        let mut node = RonNode::new(config);

        assert!(node.start().await.is_err());
        assert!(!node.is_running());
    }

    #[tokio::test]
    async fn test_wildcard_bind_requires_advertised_addr() {
        let mut node = RonNode::new(RonClientConfig::new("0.0.0.0:0".parse().unwrap()));

        assert!(node.start().await.is_err());
        assert!(!node.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_payload_is_rejected() {
        let network = SimNetwork::new();
        let transport = network.transport(test_addr_from_number(1));

        let mut config = config(1);
        config.remote = Some(test_addr_from_number(2));
        let mut node = RonNode::new(config);
        node.set_fill_text("hello").await.unwrap();
        node.start_with_transport(transport.clone()).await.unwrap();

        assert!(node.set_data_size(70_000).await.is_err());
        assert!(node.set_fill_byte(1, 70_000).await.is_err());
        assert_eq!(node.data_size(), 5);

        time::sleep(Duration::from_millis(10)).await;
        node.stop().await;

        let sent = transport.take_sent_packets();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.body, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_start_binds_udp_socket() {
        let mut node = RonNode::new(RonClientConfig::new("127.0.0.1:0".parse().unwrap()));
        node.start().await.unwrap();

        let myself = node.myself().unwrap();
        assert!(myself.ip().is_loopback());
        assert_ne!(myself.port(), 0);

        node.stop().await;
    }
}
