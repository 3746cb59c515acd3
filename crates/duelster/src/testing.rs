//! In-memory test cluster: nodes wired through a direct-call mesh instead of
//! HTTP, and a recording client bus instead of MQTT. Partitions are simulated
//! by refusing calls from or to a partitioned address.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::broker::ClientBus;
use crate::config::NodeConfig;
use crate::error::DuelError;
use crate::metrics::NodeMetrics;
use crate::node::Node;
use crate::protocol::ClientEvent;
use crate::rpc::{
    AnnounceLeaderRequest, BuyPackRequest, BuyPackResponse, GameEventRequest, GameEventResponse,
    HeartbeatRequest, InventoryStatusResponse, NotifyPlayerRequest, OpponentRequest,
    OpponentResponse, PeerRpc, RegisterRequest, RegisterResponse, ReplicateRequest,
    ReplicateResponse, VoteRequest, VoteResponse,
};
use crate::types::{MatchId, PeerAddr};

/// Recording [`ClientBus`] for assertions on client-visible traffic.
#[derive(Default)]
pub struct MemoryBus {
    client_events: Mutex<HashMap<String, Vec<ClientEvent>>>,
    match_events: Mutex<HashMap<MatchId, Vec<ClientEvent>>>,
}

impl MemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events published to `clients/{client}/events` so far.
    #[must_use]
    pub fn client_events(&self, client: &str) -> Vec<ClientEvent> {
        self.client_events
            .lock()
            .get(client)
            .cloned()
            .unwrap_or_default()
    }

    /// Events published to `matches/{id}/events` so far.
    #[must_use]
    pub fn match_events(&self, match_id: MatchId) -> Vec<ClientEvent> {
        self.match_events
            .lock()
            .get(&match_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ClientBus for MemoryBus {
    async fn publish_to_client(&self, client: &str, event: &ClientEvent) -> Result<(), DuelError> {
        self.client_events
            .lock()
            .entry(client.to_string())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn publish_to_match(
        &self,
        match_id: MatchId,
        event: &ClientEvent,
    ) -> Result<(), DuelError> {
        self.match_events
            .lock()
            .entry(match_id)
            .or_default()
            .push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
struct MeshInner {
    nodes: RwLock<HashMap<PeerAddr, Arc<Node>>>,
    partitioned: RwLock<HashSet<PeerAddr>>,
}

impl MeshInner {
    fn target(&self, from: &PeerAddr, peer: &PeerAddr) -> Result<Arc<Node>, DuelError> {
        let partitioned = self.partitioned.read();
        if partitioned.contains(from) || partitioned.contains(peer) {
            return Err(DuelError::PeerUnavailable {
                address: peer.clone(),
                source: None,
            });
        }
        drop(partitioned);
        self.nodes
            .read()
            .get(peer)
            .cloned()
            .ok_or(DuelError::PeerUnavailable {
                address: peer.clone(),
                source: None,
            })
    }
}

/// Per-node handle on the shared mesh; carries the caller's address so a
/// partition cuts both directions.
pub struct MeshRpc {
    inner: Arc<MeshInner>,
    from: PeerAddr,
}

#[async_trait]
impl PeerRpc for MeshRpc {
    async fn register(
        &self,
        peer: &PeerAddr,
        req: RegisterRequest,
    ) -> Result<RegisterResponse, DuelError> {
        Ok(self.inner.target(&self.from, peer)?.handle_register(req))
    }

    async fn heartbeat(&self, peer: &PeerAddr, req: HeartbeatRequest) -> Result<(), DuelError> {
        self.inner.target(&self.from, peer)?.handle_heartbeat(req);
        Ok(())
    }

    async fn request_vote(
        &self,
        peer: &PeerAddr,
        req: VoteRequest,
    ) -> Result<VoteResponse, DuelError> {
        Ok(self.inner.target(&self.from, peer)?.handle_vote(req))
    }

    async fn announce_leader(
        &self,
        peer: &PeerAddr,
        req: AnnounceLeaderRequest,
    ) -> Result<(), DuelError> {
        self.inner.target(&self.from, peer)?.handle_announce(req);
        Ok(())
    }

    async fn buy_pack(
        &self,
        peer: &PeerAddr,
        req: BuyPackRequest,
    ) -> Result<BuyPackResponse, DuelError> {
        self.inner
            .target(&self.from, peer)?
            .handle_buy_pack_rpc(req)
            .await
    }

    async fn inventory_status(
        &self,
        peer: &PeerAddr,
    ) -> Result<InventoryStatusResponse, DuelError> {
        self.inner
            .target(&self.from, peer)?
            .handle_inventory_status()
            .await
    }

    async fn request_opponent(
        &self,
        peer: &PeerAddr,
        req: OpponentRequest,
    ) -> Result<OpponentResponse, DuelError> {
        Ok(self
            .inner
            .target(&self.from, peer)?
            .handle_opponent_request(req)
            .await)
    }

    async fn submit_event(
        &self,
        peer: &PeerAddr,
        req: GameEventRequest,
    ) -> Result<GameEventResponse, DuelError> {
        self.inner
            .target(&self.from, peer)?
            .handle_game_event(req)
            .await
    }

    async fn replicate(
        &self,
        peer: &PeerAddr,
        req: ReplicateRequest,
    ) -> Result<ReplicateResponse, DuelError> {
        Ok(self.inner.target(&self.from, peer)?.handle_replicate(req))
    }

    async fn notify_player(
        &self,
        peer: &PeerAddr,
        req: NotifyPlayerRequest,
    ) -> Result<(), DuelError> {
        self.inner
            .target(&self.from, peer)?
            .handle_notify_player(req)
            .await
    }
}

/// A cluster of in-process nodes.
#[derive(Default)]
pub struct TestMesh {
    inner: Arc<MeshInner>,
}

impl TestMesh {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a node wired into the mesh. Background loops are not spawned;
    /// tests drive ticks explicitly.
    pub fn add_node(&self, config: NodeConfig) -> (Arc<Node>, Arc<MemoryBus>) {
        let bus = Arc::new(MemoryBus::new());
        let rpc = Arc::new(MeshRpc {
            inner: Arc::clone(&self.inner),
            from: config.addr.clone(),
        });
        let metrics = Arc::new(NodeMetrics::unregistered());
        let node = Node::new(config, Arc::clone(&bus) as _, rpc, metrics);
        self.inner
            .nodes
            .write()
            .insert(node.config.addr.clone(), Arc::clone(&node));
        (node, bus)
    }

    /// Cut a node off from the mesh in both directions.
    pub fn partition(&self, addr: &PeerAddr) {
        self.inner.partitioned.write().insert(addr.clone());
    }

    /// Reconnect a previously partitioned node.
    pub fn heal(&self, addr: &PeerAddr) {
        self.inner.partitioned.write().remove(addr);
    }
}
