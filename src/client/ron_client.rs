use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::client::client_config::RonClientConfig;
use crate::client::payload_fill::PayloadFill;
use crate::client::request::{RequestCounters, RequestRecord, RequestState, TimeoutEvent};
use crate::client::ron_trace::RonTrace;
use crate::messaging::packet::{PacketKind, RonPacket};
use crate::messaging::transport::Transport;

/// The delivery logic of a node: it originates requests, retries them through relay peers when
///  they are not acknowledged in time, acknowledges requests addressed to itself, and relays
///  packets addressed to other nodes.
///
/// A [RonClient] is not thread safe by design: all handlers take `&mut self`, and
///  [crate::client::driver::run_ron_client] calls them from a single event loop. Timers are
///  spawned tasks that post a [TimeoutEvent] to that loop rather than touching the client.
pub struct RonClient {
    config: Arc<RonClientConfig>,
    myself: SocketAddr,
    remote: Option<SocketAddr>,
    peers: Vec<SocketAddr>,
    fill: PayloadFill,
    payload: Bytes,
    next_sequence: u32,
    num_originated: u32,
    outstanding: FxHashMap<u32, RequestRecord>,
    counters: RequestCounters,
    transport: Arc<dyn Transport>,
    trace: Arc<dyn RonTrace>,
    timeouts: mpsc::UnboundedSender<TimeoutEvent>,
}

impl RonClient {
    pub fn new(config: Arc<RonClientConfig>, transport: Arc<dyn Transport>, trace: Arc<dyn RonTrace>, timeouts: mpsc::UnboundedSender<TimeoutEvent>) -> RonClient {
        let myself = config.advertised_addr
            .unwrap_or_else(|| transport.local_addr());

        RonClient {
            myself,
            remote: config.remote,
            peers: config.peers.clone(),
            fill: config.fill.clone(),
            payload: config.fill.build_body(),
            next_sequence: 0,
            num_originated: 0,
            outstanding: FxHashMap::default(),
            counters: RequestCounters::default(),
            transport,
            trace,
            timeouts,
            config,
        }
    }

    pub fn myself(&self) -> SocketAddr {
        self.myself
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn set_remote(&mut self, remote: SocketAddr) {
        debug!(?remote, "setting remote");
        self.remote = Some(remote);
    }

    pub fn peers(&self) -> &[SocketAddr] {
        &self.peers
    }

    /// Duplicates are allowed, they just get more relay attempts
    pub fn add_peer(&mut self, peer: SocketAddr) {
        debug!(?peer, "adding relay peer");
        self.peers.push(peer);
    }

    pub fn fill(&self) -> &PayloadFill {
        &self.fill
    }

    pub fn set_fill(&mut self, fill: PayloadFill) {
        self.payload = fill.build_body();
        self.fill = fill;
    }

    pub fn data_size(&self) -> u32 {
        self.fill.effective_size()
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    pub fn counters(&self) -> RequestCounters {
        self.counters
    }

    pub fn num_originated(&self) -> u32 {
        self.num_originated
    }

    pub fn is_outstanding(&self, sequence: u32) -> bool {
        self.outstanding.contains_key(&sequence)
    }

    pub fn outstanding_sequences(&self) -> Vec<u32> {
        let mut result = self.outstanding.keys().copied().collect::<Vec<_>>();
        result.sort();
        result
    }

    pub fn request(&self, sequence: u32) -> Option<&RequestRecord> {
        self.outstanding.get(&sequence)
    }

    /// Requests are originated only while a remote is configured, up to the configured number
    ///  (if any)
    pub fn has_remaining_sends(&self) -> bool {
        self.remote.is_some()
            && (self.config.max_packets == 0 || self.num_originated < self.config.max_packets)
    }

    pub async fn originate_send(&mut self) {
        self.num_originated = self.num_originated.saturating_add(1);

        let Some(remote) = self.remote else {
            warn!("no remote configured - not sending");
            return;
        };

        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        let packet = RonPacket::data(sequence, self.myself, remote, self.payload.clone());
        debug!(sequence, ?remote, "sending request");
        self.transmit(remote, &packet.to_bytes()).await;

        let record = RequestRecord {
            sequence,
            destination: remote,
            body: packet.body.clone(),
            sent_at: Instant::now(),
            attempts: 1,
            state: RequestState::AwaitingAck,
            timer: self.arm_timeout(sequence, 1),
        };
        if let Some(previous) = self.outstanding.insert(sequence, record) {
            // only possible after the sequence counter wrapped around
            warn!(sequence, "sequence number is still outstanding from before wrap-around - replacing it");
            previous.timer.abort();
        }

        self.trace.on_send(&packet, sequence);
    }

    pub async fn on_timeout(&mut self, event: TimeoutEvent) {
        let sequence = event.sequence;

        let Some(record) = self.outstanding.get_mut(&sequence) else {
            trace!(sequence, "timeout for a request that is not outstanding any more - ignoring");
            return;
        };
        if record.attempts != event.attempt {
            trace!(sequence, attempt = event.attempt, current_attempt = record.attempts, "timeout for an earlier attempt - ignoring");
            return;
        }

        if let Some(max_attempts) = self.config.max_attempts {
            if record.attempts >= max_attempts {
                if let Some(record) = self.complete_request(sequence, RequestState::Abandoned) {
                    warn!(sequence, destination = ?record.destination, "no ack after {} attempts - giving up", record.attempts);
                }
                return;
            }
        }

        record.state = RequestState::Relaying;
        record.attempts = record.attempts.saturating_add(1);
        record.sent_at = Instant::now();
        let attempt = record.attempts;
        let packet = RonPacket::data(sequence, self.myself, record.destination, record.body.clone());

        if self.peers.is_empty() {
            debug!(sequence, "request timed out, and there are no relay peers to retry through");
        }
        else {
            debug!(sequence, attempt, "request timed out - retrying through {} relay peer(s)", self.peers.len());
        }

        let buf = packet.to_bytes();
        for &peer in &self.peers {
            self.transmit(peer, &buf).await;
            self.trace.on_send(&packet, sequence);
        }

        let timer = self.arm_timeout(sequence, attempt);
        if let Some(record) = self.outstanding.get_mut(&sequence) {
            record.timer = timer;
            record.state = RequestState::AwaitingAck;
        }
    }

    pub async fn on_packet(&mut self, buf: Bytes, from: SocketAddr) {
        let packet = match RonPacket::try_deser(&buf) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(?from, "received a packet that could not be decoded - discarding: {}", e);
                return;
            }
        };

        trace!(?from, sequence = packet.sequence(), kind = ?packet.kind(), "received packet");

        let addressed_to_me = packet.header.destination == self.myself;
        match (packet.kind(), addressed_to_me) {
            (PacketKind::Data, true) => self.on_request(packet, from).await,
            (PacketKind::Ack, true) => self.on_ack(packet),
            (_, false) => self.relay(packet, &buf, from).await,
        }
    }

    /// Stops all timers, abandoning whatever is still outstanding
    pub fn cancel_all(&mut self) {
        let sequences = self.outstanding.keys().copied().collect::<Vec<_>>();
        if !sequences.is_empty() {
            debug!("canceling {} outstanding request(s)", sequences.len());
        }
        for sequence in sequences {
            self.complete_request(sequence, RequestState::Abandoned);
        }
    }

    async fn on_request(&mut self, packet: RonPacket, from: SocketAddr) {
        let sequence = packet.sequence();
        let requester = packet.header.origin;

        // The ack goes back the way the request came: directly, or to the relay that will pass
        //  it on to the requester
        if from == requester {
            debug!(sequence, ?requester, "acknowledging request");
        }
        else {
            debug!(sequence, ?requester, relay = ?from, "acknowledging request through relay");
        }

        let ack = RonPacket::ack(sequence, self.myself, requester);
        self.transmit(from, &ack.to_bytes()).await;
        self.trace.on_send(&ack, sequence);
    }

    fn on_ack(&mut self, packet: RonPacket) {
        let sequence = packet.sequence();
        match self.complete_request(sequence, RequestState::Acknowledged) {
            Some(record) => {
                debug!(sequence, attempts = record.attempts, elapsed = ?record.sent_at.elapsed(), "request acknowledged");
                self.trace.on_ack(&packet, sequence);
            }
            None => {
                // expected when relays deliver the same request more than once
                trace!(sequence, "ack for a request that is not outstanding (any more) - ignoring");
            }
        }
    }

    /// Passes a packet for another node on unchanged. Relays keep no state for what they pass on.
    async fn relay(&self, packet: RonPacket, raw: &[u8], from: SocketAddr) {
        let sequence = packet.sequence();
        let destination = packet.header.destination;

        if destination == from {
            debug!(sequence, ?from, "received a packet addressed to its sender - not sending it back");
            return;
        }

        debug!(sequence, kind = ?packet.kind(), origin = ?packet.header.origin, ?destination, "relaying packet");
        self.transmit(destination, raw).await;
        self.trace.on_forward(&packet, sequence);
    }

    /// Removes the request from the outstanding set first, then cancels its timer
    fn complete_request(&mut self, sequence: u32, final_state: RequestState) -> Option<RequestRecord> {
        let mut record = self.outstanding.remove(&sequence)?;
        record.timer.abort();
        record.state = final_state;

        match final_state {
            RequestState::Acknowledged => self.counters.acknowledged += 1,
            RequestState::Abandoned => self.counters.abandoned += 1,
            RequestState::AwaitingAck | RequestState::Relaying => {}
        }
        Some(record)
    }

    fn arm_timeout(&self, sequence: u32, attempt: u32) -> JoinHandle<()> {
        let timeouts = self.timeouts.clone();
        let timeout = self.config.timeout;

        tokio::spawn(async move {
            time::sleep(timeout).await;
            // the receiving end is gone if the client was dropped, and then nobody cares
            let _ = timeouts.send(TimeoutEvent { sequence, attempt });
        })
    }

    async fn transmit(&self, to: SocketAddr, buf: &[u8]) {
        if let Err(e) = self.transport.send(to, buf).await {
            warn!(?to, "error sending packet: {}", e);
        }
    }
}

impl Drop for RonClient {
    fn drop(&mut self) {
        for record in self.outstanding.values() {
            record.timer.abort();
        }
    }
}
