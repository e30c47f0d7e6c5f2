use std::net::SocketAddr;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Where a request is in its lifecycle.
///
/// ```ascii
///  AwaitingAck ---ack---> Acknowledged
///   |      ^
///   |      | relay attempts sent, timeout re-armed
/// timeout  |
///   v      |
///   Relaying
///
///  AwaitingAck ---retry budget exhausted / client stopped---> Abandoned
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RequestState {
    AwaitingAck,
    Relaying,
    Acknowledged,
    Abandoned,
}

/// Posted by a request's timer when it expires. `attempt` identifies the transmission round the
///  timer was armed for, so an event that was queued before its timer was superseded or canceled
///  can be recognized as stale.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TimeoutEvent {
    pub sequence: u32,
    pub attempt: u32,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct RequestCounters {
    pub acknowledged: u64,
    pub abandoned: u64,
}

/// Book-keeping for a request that was sent and not acknowledged yet
#[derive(Debug)]
pub struct RequestRecord {
    pub sequence: u32,
    /// final destination, captured when the request was originated
    pub destination: SocketAddr,
    pub body: Bytes,
    /// time of the most recent transmission round
    pub sent_at: Instant,
    /// number of transmission rounds so far, the direct send being the first
    pub attempts: u32,
    pub state: RequestState,
    pub(crate) timer: JoinHandle<()>,
}
