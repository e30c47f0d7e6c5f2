pub mod udp;

use std::net::SocketAddr;
use std::sync::Arc;

/// A datagram channel bound to a local endpoint. Sending is fire-and-forget: a successful
///  `send` means the datagram was handed to the network, not that it arrived.
#[async_trait::async_trait]
pub trait Transport : Sync + Send {
    /// The address this transport is bound to
    fn local_addr(&self) -> SocketAddr;

    async fn send(&self, to: SocketAddr, buf: &[u8]) -> anyhow::Result<()>;

    /// Receives datagrams until [Transport::shut_down_recv_loop] is called, passing each of
    ///  them to the handler.
    async fn recv_loop(&self, handler: Arc<dyn PacketHandler>) -> anyhow::Result<()>;

    /// Causes a running (or the next) receive loop to return. Calling this repeatedly is harmless.
    fn shut_down_recv_loop(&self);
}

/// This trait decouples receiving datagrams from processing them. It is passed around as an
///  `Arc<dyn ...>` to minimize dependencies of [Transport] implementations.
#[async_trait::async_trait]
pub trait PacketHandler : Sync + Send {
    async fn handle_packet(&self, buf: &[u8], sender: SocketAddr);
}
