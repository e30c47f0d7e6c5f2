use std::sync::Mutex;

use crate::client::ron_trace::RonTrace;
use crate::messaging::packet::{PacketKind, RonPacket};

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TraceEvent {
    Send(RonPacket),
    Ack(RonPacket),
    Forward(RonPacket),
}

/// [RonTrace] that records all events for later inspection
#[derive(Debug, Default)]
pub struct RecordingTrace {
    events: Mutex<Vec<TraceEvent>>,
}

impl RecordingTrace {
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn acked_sequences(&self) -> Vec<u32> {
        self.events().into_iter()
            .filter_map(|evt| match evt {
                TraceEvent::Ack(packet) => Some(packet.sequence()),
                _ => None,
            })
            .collect()
    }

    /// sequence numbers of all data packets this node transmitted, including relay attempts
    pub fn sent_data_sequences(&self) -> Vec<u32> {
        self.events().into_iter()
            .filter_map(|evt| match evt {
                TraceEvent::Send(packet) if packet.kind() == PacketKind::Data => Some(packet.sequence()),
                _ => None,
            })
            .collect()
    }

    pub fn sent_ack_sequences(&self) -> Vec<u32> {
        self.events().into_iter()
            .filter_map(|evt| match evt {
                TraceEvent::Send(packet) if packet.kind() == PacketKind::Ack => Some(packet.sequence()),
                _ => None,
            })
            .collect()
    }

    pub fn forwarded(&self) -> Vec<RonPacket> {
        self.events().into_iter()
            .filter_map(|evt| match evt {
                TraceEvent::Forward(packet) => Some(packet),
                _ => None,
            })
            .collect()
    }
}

impl RonTrace for RecordingTrace {
    fn on_send(&self, packet: &RonPacket, _sequence: u32) {
        self.events.lock().unwrap().push(TraceEvent::Send(packet.clone()));
    }

    fn on_ack(&self, packet: &RonPacket, _sequence: u32) {
        self.events.lock().unwrap().push(TraceEvent::Ack(packet.clone()));
    }

    fn on_forward(&self, packet: &RonPacket, _sequence: u32) {
        self.events.lock().unwrap().push(TraceEvent::Forward(packet.clone()));
    }
}
