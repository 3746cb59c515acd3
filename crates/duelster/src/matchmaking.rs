//! Matchmaker: local waiting queue plus the cross-server opponent probe.
//!
//! Pairing is race-bounded by atomic dequeues on both sides: the responder
//! dequeues under its queue lock while building the reply, and the solicitor
//! only consumes a positive reply if its own head is still the player it was
//! probing for. A stray positive reply leaves the responder's match in
//! `AwaitingPurchase` until the stale-match sweep reclaims it.

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::broker::ClientBus;
use crate::cluster::PeerRegistry;
use crate::config::NodeConfig;
use crate::engine::{MatchEngine, Seat};
use crate::error::DuelError;
use crate::metrics::NodeMetrics;
use crate::players::PlayerDirectory;
use crate::protocol::ClientEvent;
use crate::rpc::{OpponentRequest, OpponentResponse, PeerRpc};
use crate::types::ClientId;

pub struct Matchmaker {
    config: NodeConfig,
    queue: Mutex<VecDeque<ClientId>>,
    players: Arc<PlayerDirectory>,
    engine: Arc<MatchEngine>,
    registry: Arc<PeerRegistry>,
    rpc: Arc<dyn PeerRpc>,
    bus: Arc<dyn ClientBus>,
    metrics: Arc<NodeMetrics>,
}

impl Matchmaker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: NodeConfig,
        players: Arc<PlayerDirectory>,
        engine: Arc<MatchEngine>,
        registry: Arc<PeerRegistry>,
        rpc: Arc<dyn PeerRpc>,
        bus: Arc<dyn ClientBus>,
        metrics: Arc<NodeMetrics>,
    ) -> Self {
        Self {
            config,
            queue: Mutex::new(VecDeque::new()),
            players,
            engine,
            registry,
            rpc,
            bus,
            metrics,
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.queue.lock().len()
    }

    /// Enqueue a local player: pair immediately with the queue head when one
    /// is waiting, otherwise join the queue.
    pub async fn enqueue(&self, client_id: ClientId) -> Result<(), DuelError> {
        let name = self.players.name_of(client_id)?;

        let opponent = {
            let mut queue = self.queue.lock();
            if queue.iter().any(|id| *id == client_id) {
                None
            } else {
                match queue.front() {
                    Some(head) if *head != client_id => queue.pop_front(),
                    _ => {
                        queue.push_back(client_id);
                        None
                    }
                }
            }
        };
        self.metrics.queue_depth.set(self.depth() as i64);

        match opponent {
            Some(opponent_id) => self.pair_locally(opponent_id, client_id).await,
            None => {
                tracing::info!(client = %client_id, %name, "player waiting for an opponent");
                self.bus
                    .publish_to_client(
                        &client_id.to_string(),
                        &ClientEvent::WaitingOpponent {
                            message: "Procurando oponente em todos os servidores...".to_string(),
                        },
                    )
                    .await
            }
        }
    }

    /// Form a same-server match between two local players.
    async fn pair_locally(&self, a: ClientId, b: ClientId) -> Result<(), DuelError> {
        let name_a = self.players.name_of(a)?;
        let name_b = self.players.name_of(b)?;
        let seats = [
            Seat::new(a, name_a.clone(), self.config.addr.clone()),
            Seat::new(b, name_b.clone(), self.config.addr.clone()),
        ];
        let match_id = self.engine.create_hosted_match(seats, None);
        tracing::info!(match_id = %match_id, player_a = %name_a, player_b = %name_b, "same-server match formed");

        for (player, opponent_id, opponent_name) in
            [(a, b, &name_b), (b, a, &name_a)]
        {
            let _ = self
                .bus
                .publish_to_client(
                    &player.to_string(),
                    &ClientEvent::MatchFound {
                        match_id,
                        opponent_id,
                        opponent_name: opponent_name.clone(),
                    },
                )
                .await;
        }
        Ok(())
    }

    /// Responder side of the global probe. The queue lock is held across the
    /// lookup and the response construction so the dequeued player cannot be
    /// double-paired.
    pub async fn handle_opponent_request(&self, req: OpponentRequest) -> OpponentResponse {
        let (seated, response) = {
            let mut queue = self.queue.lock();
            let Some(local_id) = queue.front().copied() else {
                return OpponentResponse::not_found();
            };
            let Ok(local_name) = self.players.name_of(local_id) else {
                // head player vanished: drop it and report no opponent
                queue.pop_front();
                return OpponentResponse::not_found();
            };
            queue.pop_front();

            let seats = [
                Seat::new(local_id, local_name.clone(), self.config.addr.clone()),
                Seat::new(req.solicitor_id, req.solicitor_name.clone(), req.origin.clone()),
            ];
            let match_id = self
                .engine
                .create_hosted_match(seats, Some(req.origin.clone()));
            tracing::info!(
                match_id = %match_id,
                local = %local_name,
                remote = %req.solicitor_name,
                origin = %req.origin,
                "cross-server match formed (host)"
            );

            (
                (match_id, local_id, req.solicitor_id, req.solicitor_name.clone()),
                OpponentResponse {
                    found: true,
                    match_id: Some(match_id),
                    host: Some(self.config.addr.clone()),
                    opponent_id: Some(local_id),
                    opponent_name: Some(local_name),
                },
            )
        };
        self.metrics.queue_depth.set(self.depth() as i64);

        let (match_id, local_id, opponent_id, opponent_name) = seated;
        let _ = self
            .bus
            .publish_to_client(
                &local_id.to_string(),
                &ClientEvent::MatchFound {
                    match_id,
                    opponent_id,
                    opponent_name,
                },
            )
            .await;
        response
    }

    /// Return players to the front of the queue (stale-match reclamation).
    pub fn requeue_front(&self, seats: &[Seat]) {
        let mut queue = self.queue.lock();
        for seat in seats.iter().rev() {
            if !queue.iter().any(|id| *id == seat.id) {
                queue.push_front(seat.id);
            }
        }
        drop(queue);
        self.metrics.queue_depth.set(self.depth() as i64);
    }

    /// Background scanner: every tick, probe shuffled alive peers for the
    /// queue head without removing it.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.probe_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            self.probe_once().await;
        }
    }

    /// One pass of global matchmaking for the current queue head.
    pub async fn probe_once(&self) {
        let Some(head) = self.queue.lock().front().copied() else {
            return;
        };
        let Ok(name) = self.players.name_of(head) else {
            self.queue.lock().retain(|id| *id != head);
            return;
        };

        let mut peers = self.registry.alive_peers();
        peers.shuffle(&mut rand::thread_rng());
        if peers.is_empty() {
            return;
        }
        tracing::debug!(client = %head, %name, peers = peers.len(), "probing for a remote opponent");

        for peer in peers {
            let req = OpponentRequest {
                solicitor_id: head,
                solicitor_name: name.clone(),
                origin: self.config.addr.clone(),
            };
            let resp = match self.rpc.request_opponent(&peer, req).await {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::debug!(peer = %peer, error = %e, "opponent probe failed");
                    continue;
                }
            };
            if !resp.found {
                continue;
            }
            let (Some(match_id), Some(host), Some(opponent_id), Some(opponent_name)) =
                (resp.match_id, resp.host, resp.opponent_id, resp.opponent_name)
            else {
                tracing::warn!(peer = %peer, "malformed positive probe reply");
                continue;
            };

            // consume our head only if it is still the player we probed for;
            // a stray reply leaves the responder's match to its stale sweep
            let consumed = {
                let mut queue = self.queue.lock();
                if queue.front() == Some(&head) {
                    queue.pop_front();
                    true
                } else {
                    false
                }
            };
            self.metrics.queue_depth.set(self.depth() as i64);
            if !consumed {
                tracing::warn!(client = %head, "player left the queue during the probe, ignoring reply");
                return;
            }

            let seats = [
                Seat::new(opponent_id, opponent_name.clone(), host.clone()),
                Seat::new(head, name.clone(), self.config.addr.clone()),
            ];
            self.engine.adopt_shadow_match(match_id, seats, host.clone());
            tracing::info!(
                match_id = %match_id,
                host = %host,
                local = %name,
                remote = %opponent_name,
                "cross-server match formed (shadow)"
            );

            let _ = self
                .bus
                .publish_to_client(
                    &head.to_string(),
                    &ClientEvent::MatchFound {
                        match_id,
                        opponent_id,
                        opponent_name,
                    },
                )
                .await;
            return;
        }
    }
}
