//! A small CLI client for the replicated key-value store. It knows the
//! whole cluster up front (no service discovery), tries replicas in
//! turn, and follows `redirect` replies to the leader the same way the
//! original teacher's encryptor client follows `NOT_LEADER` hints —
//! clients are expected to retry on `fail` or timeout (§1 Non-goals).

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::Rng;

use raftkv::message::{Body, Message};

const REPLY_TIMEOUT: Duration = Duration::from_millis(800);
const MAX_ROUNDS: usize = 20;

#[derive(Parser)]
#[command(name = "raftkv-client", version, about = "A client for the replicated key-value store")]
struct Cli {
    /// Cluster members as `id@host:port`, e.g. `n1@127.0.0.1:9001`.
    #[arg(long = "replica", required = true, num_args = 1..)]
    replicas: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a key.
    Get { key: String },
    /// Write a key/value pair.
    Put { key: String, value: String },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let members = parse_replicas(&cli.replicas)?;
    let socket = UdpSocket::bind("0.0.0.0:0").context("failed to bind client socket")?;
    socket.set_read_timeout(Some(REPLY_TIMEOUT))?;

    let client_id = format!("client-{}", rand::thread_rng().gen::<u32>());
    let mid = format!("{}-0", client_id);

    let body = match cli.command {
        Commands::Get { key } => Body::Get { key, mid: mid.clone() },
        Commands::Put { key, value } => Body::Put { key, value, mid: mid.clone() },
    };

    match send_until_answered(&socket, &client_id, &members, body)? {
        Body::Ok { value: Some(v), .. } => println!("{}", v),
        Body::Ok { value: None, .. } => println!("ok"),
        other => bail!("unexpected reply: {:?}", other),
    }

    Ok(())
}

fn parse_replicas(raw: &[String]) -> Result<Vec<(String, SocketAddr)>> {
    raw.iter()
        .map(|entry| {
            let (id, addr) = entry
                .split_once('@')
                .with_context(|| format!("expected `id@host:port`, got `{entry}`"))?;
            let addr: SocketAddr = addr.parse().with_context(|| format!("invalid address in `{entry}`"))?;
            Ok((id.to_string(), addr))
        })
        .collect()
}

/// Tries replicas in order, following `redirect` hints toward the
/// leader, until an `ok` arrives or `MAX_ROUNDS` is exhausted.
fn send_until_answered(socket: &UdpSocket, client_id: &str, members: &[(String, SocketAddr)], body: Body) -> Result<Body> {
    let addr_by_id: HashMap<&str, SocketAddr> = members.iter().map(|(id, addr)| (id.as_str(), *addr)).collect();
    let mut target = members.first().map(|(id, _)| id.clone()).context("no replicas configured")?;

    for round in 0..MAX_ROUNDS {
        let Some(&addr) = addr_by_id.get(target.as_str()) else {
            target = members[round % members.len()].0.clone();
            continue;
        };

        let msg = Message::new(client_id, target.clone(), "unknown", body.clone());
        let encoded = serde_json::to_vec(&msg)?;
        socket.send_to(&encoded, addr)?;

        let mut buf = vec![0u8; 64 * 1024];
        match socket.recv_from(&mut buf) {
            Ok((len, _)) => match serde_json::from_slice::<Message>(&buf[..len]) {
                Ok(reply) => match reply.body {
                    Body::Ok { .. } => return Ok(reply.body),
                    Body::Redirect { .. } if reply.leader != "unknown" => {
                        target = reply.leader;
                    }
                    Body::Redirect { .. } | Body::Fail { .. } => {
                        target = members[(round + 1) % members.len()].0.clone();
                    }
                    other => bail!("unexpected reply kind from {}: {:?}", addr, other),
                },
                Err(e) => {
                    log::warn!("dropping malformed reply from {addr}: {e}");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                target = members[(round + 1) % members.len()].0.clone();
            }
            Err(e) => return Err(e.into()),
        }
    }

    bail!("no replica answered after {MAX_ROUNDS} rounds")
}
