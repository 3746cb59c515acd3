//! Node wiring: long-lived singletons created in dependency order
//! (membership, elector, inventory, match engine), the client command
//! router, and the background task lifecycle.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::auth::ClusterAuth;
use crate::broker::{ClientBus, CommandSink, InboundTopic};
use crate::cluster::{Elector, MembershipTasks, PeerRegistry};
use crate::config::NodeConfig;
use crate::engine::{MatchCommand, MatchEngine};
use crate::error::DuelError;
use crate::inventory::Inventory;
use crate::matchmaking::Matchmaker;
use crate::metrics::NodeMetrics;
use crate::players::PlayerDirectory;
use crate::protocol::{ClientCommand, ClientEvent};
use crate::rpc::{
    AnnounceLeaderRequest, BuyPackRequest, BuyPackResponse, GameEventRequest, GameEventResponse,
    HeartbeatRequest, InventoryStatusResponse, NotifyPlayerRequest, OpponentRequest,
    OpponentResponse, PeerRpc, RegisterRequest, RegisterResponse, ReplicateRequest,
    ReplicateResponse, VoteRequest, VoteResponse,
};
use crate::types::{Card, ClientId, MatchId, PeerAddr};

pub struct Node {
    pub config: NodeConfig,
    pub auth: ClusterAuth,
    pub registry: Arc<PeerRegistry>,
    pub elector: Arc<Elector>,
    pub inventory: Arc<Inventory>,
    pub players: Arc<PlayerDirectory>,
    pub engine: Arc<MatchEngine>,
    pub matchmaker: Arc<Matchmaker>,
    pub rpc: Arc<dyn PeerRpc>,
    pub bus: Arc<dyn ClientBus>,
    pub metrics: Arc<NodeMetrics>,
    cancel: CancellationToken,
}

impl Node {
    pub fn new(
        config: NodeConfig,
        bus: Arc<dyn ClientBus>,
        rpc: Arc<dyn PeerRpc>,
        metrics: Arc<NodeMetrics>,
    ) -> Arc<Self> {
        let auth = ClusterAuth::new(&config.cluster_secret);
        let registry = Arc::new(PeerRegistry::new(config.addr.clone(), Arc::clone(&metrics)));
        let elector = Arc::new(Elector::new(
            config.clone(),
            Arc::clone(&registry),
            Arc::clone(&rpc),
            Arc::clone(&metrics),
        ));
        let inventory = Arc::new(Inventory::new());
        metrics.cards_remaining.set(inventory.remaining() as i64);
        let players = Arc::new(PlayerDirectory::new());
        let engine = Arc::new(MatchEngine::new(
            config.addr.clone(),
            auth.clone(),
            Arc::clone(&players),
            Arc::clone(&bus),
            Arc::clone(&rpc),
            Arc::clone(&metrics),
        ));
        let matchmaker = Arc::new(Matchmaker::new(
            config.clone(),
            Arc::clone(&players),
            Arc::clone(&engine),
            Arc::clone(&registry),
            Arc::clone(&rpc),
            Arc::clone(&bus),
            Arc::clone(&metrics),
        ));

        Arc::new(Self {
            config,
            auth,
            registry,
            elector,
            inventory,
            players,
            engine,
            matchmaker,
            rpc,
            bus,
            metrics,
            cancel: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn every background loop: registration/heartbeat/sweep, the
    /// elector ticker, the matchmaking scanner, and the stale-match sweep.
    pub fn spawn_background(self: &Arc<Self>) {
        let membership = Arc::new(MembershipTasks {
            registry: Arc::clone(&self.registry),
            rpc: Arc::clone(&self.rpc),
            config: self.config.clone(),
            advertiser: Arc::clone(&self.elector) as _,
        });
        membership.spawn(self.cancel.clone());

        tokio::spawn(Arc::clone(&self.elector).run(self.cancel.clone()));
        tokio::spawn(Arc::clone(&self.matchmaker).run(self.cancel.clone()));

        let node = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(node.config.match_sweep_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                let seats = node.engine.expire_stale(node.config.ready_timeout).await;
                if !seats.is_empty() {
                    node.matchmaker.requeue_front(&seats);
                }
            }
        });
    }

    pub fn shutdown(&self) {
        tracing::info!("node shutting down");
        self.cancel.cancel();
    }

    // ---- client command handling ----

    async fn handle_login(&self, temp_id: &str, name: &str) {
        if name.trim().is_empty() {
            let _ = self
                .bus
                .publish_to_client(
                    temp_id,
                    &ClientEvent::Error {
                        message: "Nome de usuário não pode ser vazio.".to_string(),
                    },
                )
                .await;
            return;
        }
        let client_id = self.players.register(name.trim());
        self.metrics.players.set(self.players.len() as i64);
        tracing::info!(client = %client_id, name = name.trim(), "player logged in");
        let _ = self
            .bus
            .publish_to_client(
                temp_id,
                &ClientEvent::LoginOk {
                    client_id,
                    server: self.config.addr.to_string(),
                },
            )
            .await;
    }

    /// Allocate a pack: locally when this node is the Inventory Guardian,
    /// otherwise through the leader with at most one retry on network error.
    async fn allocate_pack(&self, client_id: ClientId) -> Result<(Vec<Card>, usize), DuelError> {
        if self.elector.is_leader() {
            let cards = self.inventory.allocate_pack(self.config.pack_size)?;
            self.metrics.packs_allocated.inc();
            self.metrics
                .cards_remaining
                .set(self.inventory.remaining() as i64);
            return Ok((cards, self.inventory.remaining()));
        }

        let leader = self.elector.leader().ok_or(DuelError::LeaderUnknown {
            term: self.elector.term(),
        })?;
        if leader == self.config.addr {
            // we are listed as leader but lost the flag mid-flight
            return Err(DuelError::LeaderUnknown {
                term: self.elector.term(),
            });
        }
        let req = BuyPackRequest { client_id };
        match self.rpc.buy_pack(&leader, req.clone()).await {
            Ok(resp) => Ok((resp.cards, resp.remaining)),
            Err(DuelError::PeerUnavailable { .. }) => {
                tracing::warn!(leader = %leader, "pack allocation failed, retrying once");
                let resp = self.rpc.buy_pack(&leader, req).await?;
                Ok((resp.cards, resp.remaining))
            }
            Err(e) => Err(e),
        }
    }

    async fn handle_buy_pack(&self, client_id: ClientId) -> Result<(), DuelError> {
        let match_id = self
            .players
            .match_of(client_id)?
            .ok_or(DuelError::PlayerNotFound { client_id })?;

        let (cards, remaining) = self.allocate_pack(client_id).await?;
        self.players.grant_cards(client_id, &cards)?;
        let _ = self
            .bus
            .publish_to_client(
                &client_id.to_string(),
                &ClientEvent::PackResult {
                    cards,
                    remaining_stock: remaining,
                },
            )
            .await;

        // readiness is owned by the Host: seat the purchased hand there
        let hand = self.players.drain_hand(client_id)?;
        let seated = self
            .engine
            .submit(
                match_id,
                client_id,
                MatchCommand::Ready { cards: hand.clone() },
            )
            .await;
        if seated.is_err() {
            // the hand never reached a host; keep the cards with the player
            self.players.grant_cards(client_id, &hand)?;
        }
        seated
    }

    /// Route a match-scoped command. Resolution failures are reported to the
    /// client here; validation failures are reported by the engine (locally
    /// or by the Host through our broker).
    async fn handle_match_command(
        &self,
        client_id: ClientId,
        topic: &InboundTopic,
        command: MatchCommand,
    ) {
        let Some(match_id) = self.resolve_match(client_id, topic) else {
            self.report_error(
                client_id,
                &DuelError::PlayerNotFound { client_id },
            )
            .await;
            return;
        };
        if let Err(e) = self.engine.submit(match_id, client_id, command).await {
            tracing::debug!(client = %client_id, match_id = %match_id, error = %e, "match command rejected");
        }
    }

    async fn report_error(&self, client_id: ClientId, err: &DuelError) {
        let _ = self
            .bus
            .publish_to_client(&client_id.to_string(), &ClientEvent::from_error(err))
            .await;
    }

    // ---- peer RPC handlers (shared by the HTTP surface and the test mesh) ----

    pub fn handle_register(&self, req: RegisterRequest) -> RegisterResponse {
        tracing::info!(peer = %req.addr, "peer registered");
        self.registry.observe(&req.addr);
        let peers = self
            .registry
            .snapshot()
            .into_iter()
            .map(|(addr, _)| addr)
            .collect();
        RegisterResponse { peers }
    }

    pub fn handle_heartbeat(&self, req: HeartbeatRequest) {
        self.registry.observe(&req.sender);
        self.elector.observe_heartbeat(req.term, req.leader.as_ref());
    }

    pub fn handle_vote(&self, req: VoteRequest) -> VoteResponse {
        let (granted, term) = self.elector.handle_vote(&req.candidate, req.term);
        VoteResponse { granted, term }
    }

    pub fn handle_announce(&self, req: AnnounceLeaderRequest) {
        self.elector.handle_announce(&req.leader, req.term);
    }

    /// Leader-only allocation. Followers forward to the current leader and
    /// stream the response back (307-equivalent behaviour).
    pub async fn handle_buy_pack_rpc(
        &self,
        req: BuyPackRequest,
    ) -> Result<BuyPackResponse, DuelError> {
        if self.elector.is_leader() {
            let cards = self.inventory.allocate_pack(self.config.pack_size)?;
            self.metrics.packs_allocated.inc();
            self.metrics
                .cards_remaining
                .set(self.inventory.remaining() as i64);
            return Ok(BuyPackResponse {
                remaining: self.inventory.remaining(),
                cards,
            });
        }
        let leader = self.forwardable_leader()?;
        self.rpc.buy_pack(&leader, req).await
    }

    pub async fn handle_inventory_status(&self) -> Result<InventoryStatusResponse, DuelError> {
        if self.elector.is_leader() {
            let (counts, total) = self.inventory.status();
            return Ok(InventoryStatusResponse { counts, total });
        }
        let leader = self.forwardable_leader()?;
        self.rpc.inventory_status(&leader).await
    }

    fn forwardable_leader(&self) -> Result<PeerAddr, DuelError> {
        let leader = self.elector.leader().ok_or(DuelError::LeaderUnknown {
            term: self.elector.term(),
        })?;
        if leader == self.config.addr {
            return Err(DuelError::LeaderUnknown {
                term: self.elector.term(),
            });
        }
        Ok(leader)
    }

    pub async fn handle_opponent_request(&self, req: OpponentRequest) -> OpponentResponse {
        self.matchmaker.handle_opponent_request(req).await
    }

    pub async fn handle_game_event(
        &self,
        req: GameEventRequest,
    ) -> Result<GameEventResponse, DuelError> {
        self.engine.handle_remote_event(req).await
    }

    pub fn handle_replicate(&self, req: ReplicateRequest) -> ReplicateResponse {
        self.engine.apply_replication(req)
    }

    pub async fn handle_notify_player(&self, req: NotifyPlayerRequest) -> Result<(), DuelError> {
        self.engine.notify_local_player(req).await
    }

    /// Resolve the match a command on `matches/{id}/commands` refers to,
    /// preferring the player's own back-reference.
    fn resolve_match(&self, client_id: ClientId, topic: &InboundTopic) -> Option<MatchId> {
        if let Ok(Some(match_id)) = self.players.match_of(client_id) {
            return Some(match_id);
        }
        match topic {
            InboundTopic::MatchCommands { match_id } => Some(*match_id),
            _ => None,
        }
    }
}

#[async_trait]
impl CommandSink for Node {
    async fn handle_inbound(&self, topic: InboundTopic, command: ClientCommand) {
        match command {
            ClientCommand::Login { name } => {
                let InboundTopic::Login { temp_id } = &topic else {
                    tracing::warn!("LOGIN outside the login topic, dropping");
                    return;
                };
                self.handle_login(temp_id, &name).await;
            }
            ClientCommand::Enqueue { client_id } => {
                if let Err(e) = self.matchmaker.enqueue(client_id).await {
                    tracing::warn!(client = %client_id, error = %e, "enqueue failed");
                    self.report_error(client_id, &e).await;
                }
            }
            ClientCommand::BuyPack { client_id } => {
                if let Err(e) = self.handle_buy_pack(client_id).await {
                    tracing::warn!(client = %client_id, error = %e, "pack purchase failed");
                    self.report_error(client_id, &e).await;
                }
            }
            ClientCommand::PlayCard { client_id, card_id } => {
                self.handle_match_command(client_id, &topic, MatchCommand::PlayCard { card_id })
                    .await;
            }
            ClientCommand::Chat { client_id, text } => {
                self.handle_match_command(client_id, &topic, MatchCommand::Chat { text })
                    .await;
            }
            ClientCommand::Trade {
                client_id,
                target_id,
                offered_card_id,
                desired_card_id,
            } => {
                self.handle_match_command(
                    client_id,
                    &topic,
                    MatchCommand::Trade {
                        target_id,
                        offered_card_id,
                        desired_card_id,
                    },
                )
                .await;
            }
        }
    }
}
