//! HTTP implementation of [`PeerRpc`].
//!
//! One shared connection pool; every call carries its own deadline (3s for
//! matchmaking probes, 5s for event/replicate, 10s for registration). All
//! POSTs except `/register` and `/heartbeat` carry the bearer token.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::auth::ClusterAuth;
use crate::config::NodeConfig;
use crate::error::DuelError;
use crate::rpc::{
    AnnounceLeaderRequest, BuyPackRequest, BuyPackResponse, GameEventRequest, GameEventResponse,
    HeartbeatRequest, InventoryStatusResponse, NotifyPlayerRequest, OpponentRequest,
    OpponentResponse, PeerRpc, RegisterRequest, RegisterResponse, ReplicateRequest,
    ReplicateResponse, VoteRequest, VoteResponse,
};
use crate::types::PeerAddr;

pub struct HttpPeerRpc {
    client: reqwest::Client,
    auth: ClusterAuth,
    server_id: String,
    probe_timeout: Duration,
    event_timeout: Duration,
    register_timeout: Duration,
}

impl HttpPeerRpc {
    pub fn new(config: &NodeConfig, auth: ClusterAuth) -> Self {
        Self {
            client: reqwest::Client::new(),
            auth,
            server_id: config.server_id.clone(),
            probe_timeout: config.probe_rpc_timeout,
            event_timeout: config.event_rpc_timeout,
            register_timeout: config.register_rpc_timeout,
        }
    }

    fn unavailable(peer: &PeerAddr, e: reqwest::Error) -> DuelError {
        DuelError::PeerUnavailable {
            address: peer.clone(),
            source: Some(Box::new(e)),
        }
    }

    fn check_status(peer: &PeerAddr, status: StatusCode) -> Result<(), DuelError> {
        match status {
            s if s.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED => Err(DuelError::Unauthorized {
                reason: "peer rejected our token".to_string(),
            }),
            StatusCode::SERVICE_UNAVAILABLE => Err(DuelError::LeaderUnknown { term: 0 }),
            s if s.is_client_error() => Err(DuelError::MalformedMessage {
                reason: format!("peer {peer} rejected the request with {s}"),
                source: None,
            }),
            s => Err(DuelError::PeerUnavailable {
                address: peer.clone(),
                source: Some(Box::new(std::io::Error::other(format!(
                    "peer returned {s}"
                )))),
            }),
        }
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        peer: &PeerAddr,
        path: &str,
        body: &B,
        timeout: Duration,
        authed: bool,
    ) -> Result<R, DuelError> {
        let mut request = self
            .client
            .post(format!("{}{path}", peer.http_base()))
            .timeout(timeout)
            .json(body);
        if authed {
            request = request.bearer_auth(self.auth.issue_token(&self.server_id));
        }
        let response = request
            .send()
            .await
            .map_err(|e| Self::unavailable(peer, e))?;
        Self::check_status(peer, response.status())?;
        response
            .json::<R>()
            .await
            .map_err(|e| Self::unavailable(peer, e))
    }

    async fn post_no_response<B: Serialize>(
        &self,
        peer: &PeerAddr,
        path: &str,
        body: &B,
        timeout: Duration,
        authed: bool,
    ) -> Result<(), DuelError> {
        let mut request = self
            .client
            .post(format!("{}{path}", peer.http_base()))
            .timeout(timeout)
            .json(body);
        if authed {
            request = request.bearer_auth(self.auth.issue_token(&self.server_id));
        }
        let response = request
            .send()
            .await
            .map_err(|e| Self::unavailable(peer, e))?;
        Self::check_status(peer, response.status())
    }
}

#[async_trait]
impl PeerRpc for HttpPeerRpc {
    async fn register(
        &self,
        peer: &PeerAddr,
        req: RegisterRequest,
    ) -> Result<RegisterResponse, DuelError> {
        self.post(peer, "/register", &req, self.register_timeout, false)
            .await
    }

    async fn heartbeat(&self, peer: &PeerAddr, req: HeartbeatRequest) -> Result<(), DuelError> {
        self.post_no_response(peer, "/heartbeat", &req, self.probe_timeout, false)
            .await
    }

    async fn request_vote(
        &self,
        peer: &PeerAddr,
        req: VoteRequest,
    ) -> Result<VoteResponse, DuelError> {
        self.post(peer, "/election/vote", &req, self.probe_timeout, true)
            .await
    }

    async fn announce_leader(
        &self,
        peer: &PeerAddr,
        req: AnnounceLeaderRequest,
    ) -> Result<(), DuelError> {
        self.post_no_response(peer, "/election/leader", &req, self.probe_timeout, true)
            .await
    }

    async fn buy_pack(
        &self,
        peer: &PeerAddr,
        req: BuyPackRequest,
    ) -> Result<BuyPackResponse, DuelError> {
        self.post(peer, "/inventory/buy_pack", &req, self.event_timeout, true)
            .await
    }

    async fn inventory_status(
        &self,
        peer: &PeerAddr,
    ) -> Result<InventoryStatusResponse, DuelError> {
        let response = self
            .client
            .get(format!("{}/inventory/status", peer.http_base()))
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| Self::unavailable(peer, e))?;
        Self::check_status(peer, response.status())?;
        response
            .json()
            .await
            .map_err(|e| Self::unavailable(peer, e))
    }

    async fn request_opponent(
        &self,
        peer: &PeerAddr,
        req: OpponentRequest,
    ) -> Result<OpponentResponse, DuelError> {
        self.post(
            peer,
            "/matchmaking/request_opponent",
            &req,
            self.probe_timeout,
            true,
        )
        .await
    }

    async fn submit_event(
        &self,
        peer: &PeerAddr,
        req: GameEventRequest,
    ) -> Result<GameEventResponse, DuelError> {
        let request = self
            .client
            .post(format!("{}/game/event", peer.http_base()))
            .timeout(self.event_timeout)
            .bearer_auth(self.auth.issue_token(&self.server_id))
            .json(&req);
        let response = request
            .send()
            .await
            .map_err(|e| Self::unavailable(peer, e))?;

        // 409 carries a structured rejection with the host's current state
        if response.status() == StatusCode::CONFLICT || response.status().is_success() {
            return response
                .json::<GameEventResponse>()
                .await
                .map_err(|e| Self::unavailable(peer, e));
        }
        Self::check_status(peer, response.status())?;
        unreachable!("non-success statuses are mapped to errors above")
    }

    async fn replicate(
        &self,
        peer: &PeerAddr,
        req: ReplicateRequest,
    ) -> Result<ReplicateResponse, DuelError> {
        self.post(peer, "/game/replicate", &req, self.event_timeout, true)
            .await
    }

    async fn notify_player(
        &self,
        peer: &PeerAddr,
        req: NotifyPlayerRequest,
    ) -> Result<(), DuelError> {
        self.post_no_response(peer, "/game/notify_player", &req, self.event_timeout, true)
            .await
    }
}
