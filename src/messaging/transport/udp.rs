use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::messaging::packet::MAX_PACKET_SIZE;
use crate::messaging::transport::{PacketHandler, Transport};

/// [Transport] on a single UDP socket.
///
/// The same socket is used for sending and receiving: relays and servers reply to the source
///  address of what they receive, so that address must be the one we listen on.
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    shut_down: watch::Sender<bool>,
}

impl Debug for UdpTransport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "UdpTransport{{{:?}}}", self.local_addr)
    }
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<UdpTransport> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        info!("bound UDP socket to {:?}", local_addr);

        let (shut_down, _) = watch::channel(false);

        Ok(UdpTransport {
            socket,
            local_addr,
            shut_down,
        })
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()> {
        trace!(?to, len = buf.len(), "sending datagram");
        self.socket.send_to(buf, to).await?;
        Ok(())
    }

    async fn recv_loop(&self, handler: Arc<dyn PacketHandler>) -> anyhow::Result<()> {
        let mut shut_down = self.shut_down.subscribe();
        let mut buf = vec![0u8; MAX_PACKET_SIZE];

        debug!("starting UDP receive loop on {:?}", self.local_addr);

        loop {
            if *shut_down.borrow_and_update() {
                break;
            }

            select! {
                r = self.socket.recv_from(&mut buf) => {
                    match r {
                        Ok((len, from)) => {
                            handler.handle_packet(&buf[..len], from).await;
                        }
                        Err(e) => {
                            // e.g. ICMP 'port unreachable' for an earlier send surfacing here
                            warn!(error = ?e, "error receiving from datagram socket");
                        }
                    }
                }
                _ = shut_down.changed() => {}
            }
        }

        debug!("UDP receive loop on {:?} shut down", self.local_addr);
        Ok(())
    }

    fn shut_down_recv_loop(&self) {
        self.shut_down.send_replace(true);
    }
}
