//! The replica binary: parses `port id peer [peer ...]` (§6), wires up
//! the UDP transport, and runs the event loop forever. Peer ids are
//! `host:port` strings, the same convention the teacher's server used
//! for its peer list, so no separate id-to-address table is needed.

use std::collections::HashMap;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use raftkv::config::{Cli, ClusterConfig};
use raftkv::replica::Replica;
use raftkv::storage::InMemoryStorage;
use raftkv::transport::UdpTransport;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let peer_addresses: HashMap<String, SocketAddr> = cli
        .peers
        .iter()
        .map(|peer| {
            let addr: SocketAddr = peer.parse().with_context(|| format!("peer id `{peer}` is not a valid host:port"))?;
            Ok((peer.clone(), addr))
        })
        .collect::<Result<_>>()?;

    let config = ClusterConfig::from(&cli);
    info!("starting replica {} on port {}, peers: {:?}", config.id, cli.port, config.peers);

    let transport = UdpTransport::bind(cli.port, peer_addresses).await?;
    let storage = InMemoryStorage;
    let replica = Replica::new(config, transport, &storage);

    replica.run().await
}
