use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::bail;
use async_trait::async_trait;
use bytes::Bytes;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::select;
use tokio::sync::{mpsc, watch};
use tracing::trace;

use crate::messaging::packet::RonPacket;
use crate::messaging::transport::{PacketHandler, Transport};

type Datagram = (Bytes, SocketAddr);

/// An in-memory network connecting [SimTransport]s. Delivery is immediate and in order, and
///  individual links can be blocked to simulate a broken direct path.
#[derive(Default)]
pub struct SimNetwork {
    state: Mutex<SimNetworkState>,
}

#[derive(Default)]
struct SimNetworkState {
    endpoints: FxHashMap<SocketAddr, mpsc::UnboundedSender<Datagram>>,
    blocked_links: FxHashSet<(SocketAddr, SocketAddr)>,
}

impl SimNetwork {
    pub fn new() -> Arc<SimNetwork> {
        Default::default()
    }

    /// Creates a transport listening on `addr`, replacing any previous transport for that address
    pub fn transport(self: &Arc<Self>, addr: SocketAddr) -> Arc<SimTransport> {
        let (inbound_sender, inbound) = mpsc::unbounded_channel();
        self.state.lock().unwrap()
            .endpoints.insert(addr, inbound_sender);

        let (shut_down, _) = watch::channel(false);

        Arc::new(SimTransport {
            addr,
            network: self.clone(),
            inbound: Mutex::new(Some(inbound)),
            shut_down,
            sent: Default::default(),
        })
    }

    /// Blocks packets between two nodes in both directions
    pub fn block_link(&self, a: SocketAddr, b: SocketAddr) {
        let mut state = self.state.lock().unwrap();
        state.blocked_links.insert((a, b));
        state.blocked_links.insert((b, a));
    }

    pub fn unblock_link(&self, a: SocketAddr, b: SocketAddr) {
        let mut state = self.state.lock().unwrap();
        state.blocked_links.remove(&(a, b));
        state.blocked_links.remove(&(b, a));
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, data: Bytes) {
        let state = self.state.lock().unwrap();
        if state.blocked_links.contains(&(from, to)) {
            trace!(?from, ?to, "link is blocked - dropping packet");
            return;
        }
        match state.endpoints.get(&to) {
            Some(endpoint) => {
                // a closed endpoint is a node that went away: the packet is lost like on a real network
                let _ = endpoint.send((data, from));
            }
            None => trace!(?to, "no such endpoint - dropping packet"),
        }
    }
}

/// [Transport] on a [SimNetwork]. It records everything it sends, so tests can inspect it.
pub struct SimTransport {
    addr: SocketAddr,
    network: Arc<SimNetwork>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Datagram>>>,
    shut_down: watch::Sender<bool>,
    sent: Mutex<Vec<(SocketAddr, Bytes)>>,
}

impl SimTransport {
    /// Removes and returns all recorded packets as (recipient, raw bytes)
    pub fn take_sent(&self) -> Vec<(SocketAddr, Bytes)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    /// Removes and returns all recorded packets as (recipient, packet), panicking if any of them
    ///  does not decode
    pub fn take_sent_packets(&self) -> Vec<(SocketAddr, RonPacket)> {
        self.take_sent()
            .into_iter()
            .map(|(to, buf)| (to, RonPacket::try_deser(&buf).expect("sent packet does not decode")))
            .collect()
    }

    pub fn num_sent(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for SimTransport {
    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn send(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()> {
        let data = Bytes::copy_from_slice(buf);
        self.sent.lock().unwrap().push((to, data.clone()));
        self.network.deliver(self.addr, to, data);
        Ok(())
    }

    async fn recv_loop(&self, handler: Arc<dyn PacketHandler>) -> anyhow::Result<()> {
        let Some(mut inbound) = self.inbound.lock().unwrap().take() else {
            bail!("receive loop for {:?} is already running", self.addr);
        };
        let mut shut_down = self.shut_down.subscribe();

        loop {
            if *shut_down.borrow_and_update() {
                break;
            }

            select! {
                datagram = inbound.recv() => {
                    match datagram {
                        Some((data, from)) => handler.handle_packet(&data, from).await,
                        None => break,
                    }
                }
                _ = shut_down.changed() => {}
            }
        }

        *self.inbound.lock().unwrap() = Some(inbound);
        Ok(())
    }

    fn shut_down_recv_loop(&self) {
        self.shut_down.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use tokio::time;
    use super::*;
    use crate::test_util::node::test_addr_from_number;

    struct ChannelHandler(mpsc::UnboundedSender<Datagram>);

    #[async_trait]
    impl PacketHandler for ChannelHandler {
        async fn handle_packet(&self, buf: &[u8], sender: SocketAddr) {
            self.0.send((Bytes::copy_from_slice(buf), sender)).unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_link() {
        let network = SimNetwork::new();
        let a = network.transport(test_addr_from_number(1));
        let b = network.transport(test_addr_from_number(2));

        let (send, mut recv) = mpsc::unbounded_channel();
        let b_loop = {
            let b = b.clone();
            tokio::spawn(async move { b.recv_loop(Arc::new(ChannelHandler(send))).await })
        };

        network.block_link(test_addr_from_number(2), test_addr_from_number(1));
        a.send(test_addr_from_number(2), b"lost").await.unwrap();
        network.unblock_link(test_addr_from_number(1), test_addr_from_number(2));
        a.send(test_addr_from_number(2), b"delivered").await.unwrap();

        assert_eq!(recv.recv().await, Some((Bytes::from_static(b"delivered"), test_addr_from_number(1))));
        assert_eq!(a.num_sent(), 2);

        // blocked packets are recorded as sent, keyed by their recipient
        assert_eq!(a.take_sent(), vec![
            (test_addr_from_number(2), Bytes::from_static(b"lost")),
            (test_addr_from_number(2), Bytes::from_static(b"delivered")),
        ]);
        assert_eq!(a.num_sent(), 0);

        b.shut_down_recv_loop();
        time::timeout(Duration::from_secs(1), b_loop).await.unwrap().unwrap().unwrap();
    }
}
