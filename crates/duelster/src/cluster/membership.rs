//! Cluster membership: peer registry, registration, heartbeats and the
//! staleness sweep.
//!
//! Entries are created on first contact and never removed, only flipped to
//! not-alive. Liveness evidence flows from inbound heartbeats/registrations
//! and from outbound calls that succeed.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::metrics::NodeMetrics;
use crate::rpc::{HeartbeatRequest, PeerRpc, RegisterRequest};
use crate::types::PeerAddr;

#[derive(Debug, Clone)]
struct PeerState {
    last_ping: Instant,
    alive: bool,
}

/// Registry of every peer this node has ever seen.
pub struct PeerRegistry {
    self_addr: PeerAddr,
    peers: RwLock<HashMap<PeerAddr, PeerState>>,
    metrics: Arc<NodeMetrics>,
}

impl PeerRegistry {
    pub fn new(self_addr: PeerAddr, metrics: Arc<NodeMetrics>) -> Self {
        let mut peers = HashMap::new();
        peers.insert(
            self_addr.clone(),
            PeerState {
                last_ping: Instant::now(),
                alive: true,
            },
        );
        Self {
            self_addr,
            peers: RwLock::new(peers),
            metrics,
        }
    }

    /// Record liveness evidence for a peer, creating its entry on first
    /// contact.
    pub fn observe(&self, addr: &PeerAddr) {
        let mut peers = self.peers.write();
        let entry = peers.entry(addr.clone()).or_insert(PeerState {
            last_ping: Instant::now(),
            alive: true,
        });
        entry.last_ping = Instant::now();
        entry.alive = true;
        drop(peers);
        self.update_metrics();
    }

    /// Merge a peer list learned from a registration response.
    pub fn merge(&self, addrs: &[PeerAddr]) {
        let mut peers = self.peers.write();
        for addr in addrs {
            peers.entry(addr.clone()).or_insert(PeerState {
                last_ping: Instant::now(),
                alive: true,
            });
        }
        drop(peers);
        self.update_metrics();
    }

    /// All peers ever seen, excluding this node.
    #[must_use]
    pub fn known_peers(&self) -> Vec<PeerAddr> {
        self.peers
            .read()
            .keys()
            .filter(|a| **a != self.self_addr)
            .cloned()
            .collect()
    }

    /// Peers currently marked alive, excluding this node. This is the input
    /// to every other component's "known peers" query.
    #[must_use]
    pub fn alive_peers(&self) -> Vec<PeerAddr> {
        self.peers
            .read()
            .iter()
            .filter(|(addr, state)| **addr != self.self_addr && state.alive)
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    /// Membership snapshot for the debug endpoint: `(addr, alive)` pairs.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(PeerAddr, bool)> {
        self.peers
            .read()
            .iter()
            .map(|(addr, state)| (addr.clone(), state.alive))
            .collect()
    }

    /// Flip peers silent for longer than `stale_after` to not-alive.
    pub fn sweep(&self, stale_after: Duration) {
        let now = Instant::now();
        let mut peers = self.peers.write();
        for (addr, state) in peers.iter_mut() {
            if *addr == self.self_addr {
                continue;
            }
            if state.alive && now.duration_since(state.last_ping) > stale_after {
                tracing::warn!(peer = %addr, "peer marked not-alive");
                state.alive = false;
            }
        }
        drop(peers);
        self.update_metrics();
    }

    #[must_use]
    pub fn is_alive(&self, addr: &PeerAddr) -> bool {
        self.peers.read().get(addr).is_some_and(|s| s.alive)
    }

    fn update_metrics(&self) {
        let peers = self.peers.read();
        self.metrics.peers_known.set(peers.len() as i64 - 1);
        self.metrics
            .peers_alive
            .set(peers.iter().filter(|(a, s)| **a != self.self_addr && s.alive).count() as i64);
    }
}

/// Snapshot of leader state attached to outbound heartbeats.
pub trait LeaderAdvertiser: Send + Sync {
    fn advertisement(&self) -> (u64, Option<PeerAddr>);
}

/// Background half of membership: registration until first contact, periodic
/// heartbeats carrying the leader advertisement, and the staleness sweep.
pub struct MembershipTasks {
    pub registry: Arc<PeerRegistry>,
    pub rpc: Arc<dyn PeerRpc>,
    pub config: NodeConfig,
    pub advertiser: Arc<dyn LeaderAdvertiser>,
}

impl MembershipTasks {
    /// Spawn all membership loops, each observing `cancel` at every tick.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) {
        for peer in self.config.peers.clone() {
            let tasks = Arc::clone(&self);
            let cancel = cancel.clone();
            tokio::spawn(async move { tasks.register_loop(peer, cancel).await });
        }

        let tasks = Arc::clone(&self);
        let heartbeat_cancel = cancel.clone();
        tokio::spawn(async move { tasks.heartbeat_loop(heartbeat_cancel).await });

        let tasks = self;
        tokio::spawn(async move { tasks.sweep_loop(cancel).await });
    }

    /// POST a registration every 5s until the peer responds, then merge its
    /// view of the cluster.
    async fn register_loop(&self, peer: PeerAddr, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let req = RegisterRequest {
                addr: self.config.addr.clone(),
            };
            match self.rpc.register(&peer, req).await {
                Ok(resp) => {
                    self.registry.observe(&peer);
                    self.registry.merge(&resp.peers);
                    tracing::info!(peer = %peer, learned = resp.peers.len(), "registered with peer");
                    return;
                }
                Err(e) => {
                    tracing::debug!(peer = %peer, error = %e, "registration attempt failed, retrying");
                }
            }
        }
    }

    async fn heartbeat_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let (term, leader) = self.advertiser.advertisement();
            for peer in self.registry.known_peers() {
                let req = HeartbeatRequest {
                    sender: self.config.addr.clone(),
                    term,
                    leader: leader.clone(),
                };
                match self.rpc.heartbeat(&peer, req).await {
                    Ok(()) => self.registry.observe(&peer),
                    Err(e) => {
                        tracing::debug!(peer = %peer, error = %e, "heartbeat failed");
                    }
                }
            }
        }
    }

    async fn sweep_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            self.registry.sweep(self.config.peer_stale_after);
        }
    }
}
