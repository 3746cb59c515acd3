//! Peer RPC surface: request/response payloads and the transport seam.
//!
//! Components talk to peers through the [`PeerRpc`] trait so the HTTP
//! transport can be swapped for an in-memory mesh in tests.

pub mod api;
pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::engine::event::MatchCommand;
use crate::engine::state::MatchState;
use crate::error::DuelError;
use crate::protocol::ClientEvent;
use crate::types::{Card, ClientId, MatchId, PeerAddr, Rarity};

/// `POST /register`: cluster join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub addr: PeerAddr,
}

/// Registration response: the receiving peer's view of the cluster, merged in
/// by the caller so peers are learned transitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub peers: Vec<PeerAddr>,
}

/// `POST /heartbeat`: liveness plus leader advertisement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub sender: PeerAddr,
    pub term: u64,
    pub leader: Option<PeerAddr>,
}

/// `POST /election/vote`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub candidate: PeerAddr,
    pub term: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub granted: bool,
    pub term: u64,
}

/// `POST /election/leader`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceLeaderRequest {
    pub leader: PeerAddr,
    pub term: u64,
}

/// `POST /inventory/buy_pack`, leader-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyPackRequest {
    pub client_id: ClientId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyPackResponse {
    pub cards: Vec<Card>,
    pub remaining: usize,
}

/// `GET /inventory/status`, leader-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryStatusResponse {
    pub counts: HashMap<Rarity, usize>,
    pub total: usize,
}

/// `POST /matchmaking/request_opponent`: the global matchmaking probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpponentRequest {
    pub solicitor_id: ClientId,
    pub solicitor_name: String,
    pub origin: PeerAddr,
}

/// Positive replies carry the created match; the responder is its Host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpponentResponse {
    pub found: bool,
    pub match_id: Option<MatchId>,
    pub host: Option<PeerAddr>,
    pub opponent_id: Option<ClientId>,
    pub opponent_name: Option<String>,
}

impl OpponentResponse {
    #[must_use]
    pub fn not_found() -> Self {
        Self {
            found: false,
            match_id: None,
            host: None,
            opponent_id: None,
            opponent_name: None,
        }
    }
}

/// `POST /game/event`: Shadow-to-Host command submission.
///
/// `proposed_seq` is the Shadow's optimistic `own_seq + 1`; the Host treats
/// it as an advisory hint, deduplicates on it, and assigns the definitive
/// sequence itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEventRequest {
    pub match_id: MatchId,
    pub proposed_seq: u64,
    pub player_id: ClientId,
    pub command: MatchCommand,
    /// Unix seconds; bound into the signature.
    pub timestamp: i64,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameEventResponse {
    pub accepted: bool,
    /// The Host's sequence after processing.
    pub seq: u64,
    /// On rejection, the Host's current state so the Shadow can re-sync.
    pub state: Option<MatchState>,
    /// Client-safe rejection reason; `None` for silently dropped duplicates.
    pub reason: Option<String>,
}

/// `POST /game/replicate`: Host-to-Shadow state replication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateRequest {
    pub state: MatchState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateResponse {
    pub accepted: bool,
    /// The replica's sequence; a rejected sender with a lower sequence must
    /// step down to Shadow.
    pub current_seq: u64,
}

/// `POST /game/notify_player`: deliver a client event to a remote player
/// over their home server's broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyPlayerRequest {
    pub client_id: ClientId,
    pub event: ClientEvent,
}

/// Typed client for every peer endpoint.
#[async_trait]
pub trait PeerRpc: Send + Sync {
    async fn register(
        &self,
        peer: &PeerAddr,
        req: RegisterRequest,
    ) -> Result<RegisterResponse, DuelError>;

    async fn heartbeat(&self, peer: &PeerAddr, req: HeartbeatRequest) -> Result<(), DuelError>;

    async fn request_vote(
        &self,
        peer: &PeerAddr,
        req: VoteRequest,
    ) -> Result<VoteResponse, DuelError>;

    async fn announce_leader(
        &self,
        peer: &PeerAddr,
        req: AnnounceLeaderRequest,
    ) -> Result<(), DuelError>;

    async fn buy_pack(
        &self,
        peer: &PeerAddr,
        req: BuyPackRequest,
    ) -> Result<BuyPackResponse, DuelError>;

    async fn inventory_status(&self, peer: &PeerAddr)
        -> Result<InventoryStatusResponse, DuelError>;

    async fn request_opponent(
        &self,
        peer: &PeerAddr,
        req: OpponentRequest,
    ) -> Result<OpponentResponse, DuelError>;

    async fn submit_event(
        &self,
        peer: &PeerAddr,
        req: GameEventRequest,
    ) -> Result<GameEventResponse, DuelError>;

    async fn replicate(
        &self,
        peer: &PeerAddr,
        req: ReplicateRequest,
    ) -> Result<ReplicateResponse, DuelError>;

    async fn notify_player(
        &self,
        peer: &PeerAddr,
        req: NotifyPlayerRequest,
    ) -> Result<(), DuelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opponent_response_not_found() {
        let resp = OpponentResponse::not_found();
        assert!(!resp.found);
        assert!(resp.match_id.is_none());
    }

    #[test]
    fn inventory_status_serializes_rarity_keys() {
        let mut counts = HashMap::new();
        counts.insert(Rarity::Common, 42usize);
        counts.insert(Rarity::Legendary, 1usize);
        let resp = InventoryStatusResponse { counts, total: 43 };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["counts"]["C"], 42);
        assert_eq!(json["counts"]["L"], 1);
    }

    #[test]
    fn game_event_request_roundtrip() {
        let req = GameEventRequest {
            match_id: MatchId::new(),
            proposed_seq: 4,
            player_id: ClientId::new(),
            command: MatchCommand::Chat {
                text: "hello".to_string(),
            },
            timestamp: 1_700_000_000,
            signature: "sig".to_string(),
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: GameEventRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.proposed_seq, 4);
        assert_eq!(back.command, req.command);
    }
}
