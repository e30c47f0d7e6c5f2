use std::net::SocketAddr;
use std::time::Duration;

use anyhow::bail;

use crate::client::payload_fill::PayloadFill;

#[derive(Debug, Clone)]
pub struct RonClientConfig {
    /// The address that the UDP socket is bound to
    pub bind_addr: SocketAddr,

    /// The address other nodes know this node by, i.e. the destination they put into packets
    ///  meant for this node. Defaults to the bound address, so it is required when binding to a
    ///  wildcard address.
    pub advertised_addr: Option<SocketAddr>,

    /// The node that originated requests are sent to. A node without a remote does not originate
    ///  requests, but it still acknowledges and relays.
    pub remote: Option<SocketAddr>,

    /// Number of requests to originate, 0 for 'no limit'
    pub max_packets: u32,
    pub interval: Duration,

    /// Time after which an unacknowledged request is retried through the relay peers. The timer
    ///  is re-armed after each round of relay attempts.
    pub timeout: Duration,

    /// Total number of transmission rounds for a request (the initial direct send counts as the
    ///  first) before it is abandoned. `None` retries until acknowledged or stopped.
    pub max_attempts: Option<u32>,

    pub fill: PayloadFill,

    /// Relay peers in fan-out order
    pub peers: Vec<SocketAddr>,

    /// Capacity of the queue between the receiving socket and the client's event loop
    pub inbound_queue_size: usize,
}

impl RonClientConfig {
    pub fn new(bind_addr: SocketAddr) -> RonClientConfig {
        RonClientConfig {
            bind_addr,
            advertised_addr: None,
            remote: None,
            max_packets: 100,
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
            max_attempts: None,
            fill: PayloadFill::default(),
            peers: Vec::new(),
            inbound_queue_size: 1024,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval.is_zero() {
            bail!("send interval must not be zero");
        }
        if self.timeout.is_zero() {
            bail!("timeout must not be zero");
        }
        if self.max_attempts == Some(0) {
            bail!("max_attempts must be at least 1 if it is set");
        }
        if self.inbound_queue_size == 0 {
            bail!("inbound queue size must not be zero");
        }
        if self.advertised_addr.is_none() && self.bind_addr.ip().is_unspecified() {
            bail!("bound to the wildcard address {:?}: an advertised address is required for other nodes to address this node", self.bind_addr);
        }
        if let Some(advertised_addr) = self.advertised_addr {
            if advertised_addr.ip().is_unspecified() {
                bail!("advertised address {:?} must not be a wildcard address", advertised_addr);
            }
        }
        self.fill.validate()?;
        Ok(())
    }
}
