#[cfg(test)] use mockall::automock;
use tracing::trace;

use crate::messaging::packet::RonPacket;

/// Hooks for observing what a client does. They are purely observational: implementations
///  must not block, and nothing they do feeds back into delivery logic.
///
/// All hooks default to doing nothing.
#[cfg_attr(test, automock)]
pub trait RonTrace: Send + Sync + 'static {
    /// A packet this node created was transmitted: an originated data packet (directly or through
    ///  a relay), or an ack for data addressed to this node
    fn on_send(&self, _packet: &RonPacket, _sequence: u32) {}

    /// An ack for an outstanding request of this node arrived
    fn on_ack(&self, _packet: &RonPacket, _sequence: u32) {}

    /// A packet addressed to some other node was passed on
    fn on_forward(&self, _packet: &RonPacket, _sequence: u32) {}
}

#[derive(Debug, Default)]
pub struct NoopTrace;
impl RonTrace for NoopTrace {}

/// Writes every event to the `tracing` log at TRACE level
#[derive(Debug, Default)]
pub struct LoggingTrace;
impl RonTrace for LoggingTrace {
    fn on_send(&self, packet: &RonPacket, sequence: u32) {
        trace!(sequence, kind = ?packet.kind(), destination = ?packet.header.destination, "send");
    }

    fn on_ack(&self, packet: &RonPacket, sequence: u32) {
        trace!(sequence, from = ?packet.header.origin, "ack");
    }

    fn on_forward(&self, packet: &RonPacket, sequence: u32) {
        trace!(sequence, kind = ?packet.kind(), origin = ?packet.header.origin, destination = ?packet.header.destination, "forward");
    }
}
