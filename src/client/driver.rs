use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, span, Instrument, Level};

use crate::client::payload_fill::PayloadFill;
use crate::client::request::TimeoutEvent;
use crate::client::ron_client::RonClient;
use crate::messaging::transport::PacketHandler;

/// Configuration changes and lifecycle requests for a running client's event loop
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ClientCommand {
    SetRemote(SocketAddr),
    SetFill(PayloadFill),
    AddPeer(SocketAddr),
    Stop,
}

#[derive(Debug)]
pub struct InboundPacket {
    pub data: Bytes,
    pub from: SocketAddr,
}

/// Hands received packets from the transport's receive loop to the client's event loop
pub struct InboundQueue {
    sender: mpsc::Sender<InboundPacket>,
}

impl InboundQueue {
    pub fn new(sender: mpsc::Sender<InboundPacket>) -> InboundQueue {
        InboundQueue { sender }
    }
}

#[async_trait]
impl PacketHandler for InboundQueue {
    async fn handle_packet(&self, buf: &[u8], sender: SocketAddr) {
        let packet = InboundPacket {
            data: Bytes::copy_from_slice(buf),
            from: sender,
        };
        if self.sender.send(packet).await.is_err() {
            debug!(from = ?sender, "client event loop is gone - dropping packet");
        }
    }
}

/// The event loop that owns a [RonClient]. Every handler runs to completion before the next event
///  is picked up, so the client's state is never touched concurrently.
///
/// Commands take precedence over everything else so a stop request is handled promptly, followed
///  by received packets (acks arriving in time must win against their timeouts), timeouts and the
///  periodic sends.
///
/// The loop terminates on [ClientCommand::Stop] or when the command channel is closed. All
///  outstanding requests are abandoned then, and the client is returned for inspection.
pub async fn run_ron_client(
    mut client: RonClient,
    mut inbound: mpsc::Receiver<InboundPacket>,
    mut timeouts: mpsc::UnboundedReceiver<TimeoutEvent>,
    mut commands: mpsc::Receiver<ClientCommand>,
) -> RonClient {
    let mut send_ticks = time::interval(client.interval());
    // A node without a remote does not tick, and it should not catch up on missed sends once a
    //  remote is configured
    send_ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(myself = ?client.myself(), remote = ?client.remote(), "starting ron client");

    loop {
        select! {
            biased;
            cmd = commands.recv() => {
                match cmd {
                    Some(ClientCommand::Stop) | None => break,
                    Some(cmd) => apply_command(&mut client, cmd),
                }
            }
            Some(packet) = inbound.recv() => {
                let span = span!(Level::TRACE, "inbound", from = ?packet.from);
                client.on_packet(packet.data, packet.from)
                    .instrument(span)
                    .await;
            }
            Some(event) = timeouts.recv() => {
                client.on_timeout(event).await;
            }
            _ = send_ticks.tick(), if client.has_remaining_sends() => {
                client.originate_send().await;
                if !client.has_remaining_sends() {
                    debug!("originated all {} requests", client.num_originated());
                }
            }
        }
    }

    client.cancel_all();

    let counters = client.counters();
    info!(myself = ?client.myself(), originated = client.num_originated(), acknowledged = counters.acknowledged, abandoned = counters.abandoned, "ron client stopped");
    client
}

fn apply_command(client: &mut RonClient, cmd: ClientCommand) {
    match cmd {
        ClientCommand::SetRemote(remote) => client.set_remote(remote),
        ClientCommand::SetFill(fill) => client.set_fill(fill),
        ClientCommand::AddPeer(peer) => client.add_peer(peer),
        ClientCommand::Stop => {}
    }
}
