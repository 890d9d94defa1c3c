//! The event loop (§5): one cooperative, single-threaded loop per
//! replica. Every iteration checks the heartbeat and election timers,
//! then blocks briefly for an inbound datagram. All mutation of
//! `ReplicaState` happens serially inside this loop, so no locking is
//! needed anywhere in the consensus core.

use std::time::Instant;

use log::{info, warn};

use crate::config::{ClusterConfig, RECV_POLL_INTERVAL};
use crate::consensus;
use crate::message::Message;
use crate::state::ReplicaState;
use crate::transport::Transport;

pub struct Replica<T: Transport> {
    config: ClusterConfig,
    state: ReplicaState,
    transport: T,
}

impl<T: Transport> Replica<T> {
    /// `storage` is consulted once, if it holds a prior run's state —
    /// see `crate::storage` for why this core otherwise never touches
    /// disk.
    pub fn new(config: ClusterConfig, transport: T, storage: &dyn crate::storage::Storage) -> Self {
        let mut state = ReplicaState::new(&config);
        if let Some(persisted) = storage.load() {
            state.term = persisted.term;
            state.voted_for = persisted.voted_for;
            state.log = persisted.log;
        }
        Self { config, state, transport }
    }

    pub fn state(&self) -> &ReplicaState {
        &self.state
    }

    /// Runs the replica forever. Only returns on a fatal transport
    /// error (§7: "Socket error: surfaced as fatal").
    pub async fn run(mut self) -> anyhow::Result<()> {
        for msg in consensus::startup(&self.config) {
            self.send(&msg).await?;
        }

        loop {
            self.tick().await?;
        }
    }

    /// One iteration of the loop, broken out for testability: timers,
    /// then one bounded wait for a datagram.
    async fn tick(&mut self) -> anyhow::Result<()> {
        let now = Instant::now();

        if consensus::should_heartbeat(&self.config, &self.state, now) {
            let outbound = consensus::heartbeat_broadcast(&self.config, &mut self.state);
            self.send_all(outbound).await?;
        }

        if consensus::should_start_election(&self.state, now) {
            info!("{}: election timeout, starting election for term {}", self.config.id, self.state.term + 1);
            let outbound = consensus::start_election(&self.config, &mut self.state, now);
            self.send_all(outbound).await?;
        }

        match tokio::time::timeout(RECV_POLL_INTERVAL, self.transport.recv()).await {
            Ok(Ok(Some(msg))) => self.handle(msg).await?,
            Ok(Ok(None)) => {} // dropped malformed/oversized datagram, already logged
            Ok(Err(e)) => return Err(e),
            Err(_) => {} // nothing arrived within the poll interval
        }

        Ok(())
    }

    async fn handle(&mut self, msg: Message) -> anyhow::Result<()> {
        let outbound = consensus::dispatch(&self.config, &mut self.state, msg);
        self.send_all(outbound).await
    }

    async fn send_all(&mut self, messages: Vec<Message>) -> anyhow::Result<()> {
        for msg in &messages {
            self.send(msg).await?;
        }
        Ok(())
    }

    async fn send(&mut self, msg: &Message) -> anyhow::Result<()> {
        if let Err(e) = self.transport.send(msg).await {
            warn!("{}: failed to send {} to {}: {}", self.config.id, msg.kind(), msg.dst, e);
        }
        Ok(())
    }
}
