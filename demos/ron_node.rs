use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use clap::Parser;
use clap_derive::Parser;
use ronclient::client::client_config::RonClientConfig;
use ronclient::client::ron_node::RonNode;
use ronclient::client::ron_trace::LoggingTrace;
use tokio::{select, time};
use tracing::{info, Level};

/// Runs a single node: it acknowledges requests addressed to it and relays packets for others,
///  and if a remote is given, it sends requests to that remote.
#[derive(Parser)]
struct Args {
    bind_address: String,

    /// the address other nodes send to, required when binding to a wildcard address
    #[clap(long)]
    advertised_address: Option<String>,

    #[clap(long)]
    remote: Option<String>,

    #[clap(long)]
    peer: Vec<String>,

    /// number of requests to send, 0 for 'until stopped'
    #[clap(long, default_value_t = 100)]
    count: u32,

    #[clap(long, default_value_t = 1000)]
    interval_ms: u64,

    #[clap(long, default_value_t = 1000)]
    timeout_ms: u64,

    #[clap(long)]
    max_attempts: Option<u32>,

    /// text to send as payload instead of unspecified bytes
    #[clap(long)]
    fill: Option<String>,

    #[clap(long)]
    data_size: Option<u32>,

    /// stop after this many seconds instead of waiting for Ctrl-C
    #[clap(long)]
    run_for_secs: Option<u64>,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    if args.fill.is_some() && args.data_size.is_some() {
        return Err(anyhow!("--fill and --data-size are mutually exclusive"));
    }

    let mut config = RonClientConfig::new(args.bind_address.parse()?);
    if let Some(advertised) = &args.advertised_address {
        config.advertised_addr = Some(advertised.parse()?);
    }
    config.max_packets = args.count;
    config.interval = Duration::from_millis(args.interval_ms);
    config.timeout = Duration::from_millis(args.timeout_ms);
    config.max_attempts = args.max_attempts;

    let mut node = RonNode::with_trace(config, Arc::new(LoggingTrace));
    if let Some(remote) = &args.remote {
        let remote: SocketAddr = remote.parse()?;
        node.set_remote(remote).await;
    }
    for peer in &args.peer {
        let peer: SocketAddr = peer.parse()?;
        node.add_peer(peer).await;
    }
    if let Some(text) = &args.fill {
        node.set_fill_text(text).await?;
    }
    if let Some(data_size) = args.data_size {
        node.set_data_size(data_size).await?;
    }

    node.start().await?;
    info!("node running on {:?} with {} byte payload", node.myself(), node.data_size());

    select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = run_for(args.run_for_secs) => {}
    }

    node.stop().await;
    if let Some((originated, counters)) = node.final_counters() {
        info!("{} requests sent, {} acknowledged, {} abandoned", originated, counters.acknowledged, counters.abandoned);
    }
    Ok(())
}

async fn run_for(secs: Option<u64>) {
    match secs {
        Some(secs) => time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending().await,
    }
}
