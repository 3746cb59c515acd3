//! Host/Shadow match engine.
//!
//! Every match has exactly one Host at a time; only the Host mutates match
//! state. Accepted commands are applied atomically under the match lock,
//! appended to the signed event log, and the resulting snapshot is shipped to
//! the Shadow. A Shadow whose Host stops answering promotes itself and
//! re-executes the in-flight command from the last replicated state.
//!
//! The match lock is never held across a peer RPC: every apply produces a
//! snapshot and a list of notices, and all I/O happens after the lock is
//! released. Lock order is matches-map, then match, then player.

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::ClusterAuth;
use crate::broker::ClientBus;
use crate::engine::event::{EventKind, MatchCommand, MatchEvent};
use crate::engine::state::{MatchPhase, MatchState, Seat};
use crate::error::DuelError;
use crate::metrics::NodeMetrics;
use crate::players::PlayerDirectory;
use crate::protocol::ClientEvent;
use crate::rpc::{
    GameEventRequest, GameEventResponse, NotifyPlayerRequest, PeerRpc, ReplicateRequest,
    ReplicateResponse,
};
use crate::types::{compare_cards, CardId, ClientId, MatchId, PeerAddr};

/// A pending notification produced while the match lock was held.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Deliver to one player, relaying through their home server when the
    /// player is not local.
    Client {
        client: ClientId,
        via: Option<PeerAddr>,
        event: ClientEvent,
    },
    /// Publish on the match's events topic.
    Match { match_id: MatchId, event: ClientEvent },
}

struct Applied {
    snapshot: MatchState,
    notices: Vec<Outbound>,
}

pub struct MatchEngine {
    self_addr: PeerAddr,
    auth: ClusterAuth,
    matches: DashMap<MatchId, Arc<Mutex<MatchState>>>,
    players: Arc<PlayerDirectory>,
    bus: Arc<dyn ClientBus>,
    rpc: Arc<dyn PeerRpc>,
    metrics: Arc<NodeMetrics>,
}

impl MatchEngine {
    pub fn new(
        self_addr: PeerAddr,
        auth: ClusterAuth,
        players: Arc<PlayerDirectory>,
        bus: Arc<dyn ClientBus>,
        rpc: Arc<dyn PeerRpc>,
        metrics: Arc<NodeMetrics>,
    ) -> Self {
        Self {
            self_addr,
            auth,
            matches: DashMap::new(),
            players,
            bus,
            rpc,
            metrics,
        }
    }

    /// Create a match with this node as Host. `shadow` is `None` for
    /// same-server matches.
    pub fn create_hosted_match(&self, seats: [Seat; 2], shadow: Option<PeerAddr>) -> MatchId {
        let id = MatchId::new();
        let state = MatchState::new(id, seats.clone(), self.self_addr.clone(), shadow);
        self.matches.insert(id, Arc::new(Mutex::new(state)));
        self.wire_local_players(&seats, Some(id));
        self.metrics.matches.set(self.matches.len() as i64);
        tracing::info!(match_id = %id, "match created (host)");
        id
    }

    /// Mirror a match created by a remote Host; this node is the Shadow.
    pub fn adopt_shadow_match(&self, match_id: MatchId, seats: [Seat; 2], host: PeerAddr) {
        let mut state = MatchState::new(match_id, seats.clone(), host.clone(), None);
        state.shadow = Some(self.self_addr.clone());
        self.matches.insert(match_id, Arc::new(Mutex::new(state)));
        self.wire_local_players(&seats, Some(match_id));
        self.metrics.matches.set(self.matches.len() as i64);
        tracing::info!(match_id = %match_id, host = %host, "match adopted (shadow)");
    }

    fn wire_local_players(&self, seats: &[Seat; 2], match_id: Option<MatchId>) {
        for seat in seats {
            if seat.home == self.self_addr {
                if let Err(e) = self.players.set_match(seat.id, match_id) {
                    tracing::warn!(client = %seat.id, error = %e, "player not found while wiring match");
                }
            }
        }
    }

    /// Current state of a match, if known to this node.
    #[must_use]
    pub fn snapshot(&self, match_id: MatchId) -> Option<MatchState> {
        self.matches
            .get(&match_id)
            .map(|entry| entry.value().lock().clone())
    }

    #[must_use]
    pub fn contains(&self, match_id: MatchId) -> bool {
        self.matches.contains_key(&match_id)
    }

    /// Route a client command into the match: apply locally when this node is
    /// the Host, otherwise forward to the Host and fail over on transport
    /// errors (first error, no retry).
    pub async fn submit(
        &self,
        match_id: MatchId,
        player_id: ClientId,
        command: MatchCommand,
    ) -> Result<(), DuelError> {
        let (host, proposed) = {
            let state = self.state_of(match_id)?;
            let guard = state.lock();
            (guard.host.clone(), guard.event_seq + 1)
        };

        if host == self.self_addr {
            match self.apply_as_host(match_id, player_id, command, None) {
                Ok(applied) => {
                    self.dispatch(applied).await;
                    Ok(())
                }
                Err(e) => {
                    self.notify_command_error(match_id, player_id, &e).await;
                    Err(e)
                }
            }
        } else {
            self.forward_to_host(&host, match_id, player_id, command, proposed)
                .await
        }
    }

    async fn forward_to_host(
        &self,
        host: &PeerAddr,
        match_id: MatchId,
        player_id: ClientId,
        command: MatchCommand,
        proposed: u64,
    ) -> Result<(), DuelError> {
        let timestamp = Utc::now().timestamp();
        let signature =
            self.auth
                .sign_event(proposed, match_id, timestamp, command.tag(), player_id);
        let req = GameEventRequest {
            match_id,
            proposed_seq: proposed,
            player_id,
            command: command.clone(),
            timestamp,
            signature,
        };

        match self.rpc.submit_event(host, req).await {
            Ok(resp) if resp.accepted => Ok(()),
            Ok(resp) => {
                if let Some(state) = resp.state {
                    self.apply_replication(ReplicateRequest { state });
                }
                if let Some(reason) = resp.reason {
                    tracing::warn!(match_id = %match_id, %reason, "host rejected event");
                    self.notify_client(match_id, player_id, ClientEvent::Error { message: reason })
                        .await;
                } else {
                    tracing::debug!(match_id = %match_id, "duplicate event dropped by host");
                }
                Ok(())
            }
            Err(DuelError::PeerUnavailable { address, source }) => {
                tracing::warn!(
                    match_id = %match_id,
                    host = %address,
                    error = ?source,
                    "host unreachable, starting shadow promotion"
                );
                self.promote_and_apply(match_id, player_id, command).await
            }
            Err(e) => Err(e),
        }
    }

    /// Shadow-to-Host promotion: take over the match under its lock, then
    /// re-execute the in-flight command as the new Host.
    async fn promote_and_apply(
        &self,
        match_id: MatchId,
        player_id: ClientId,
        command: MatchCommand,
    ) -> Result<(), DuelError> {
        let migrated = {
            let state = self.state_of(match_id)?;
            let mut guard = state.lock();
            if guard.host == self.self_addr {
                None
            } else {
                let old = std::mem::replace(&mut guard.host, self.self_addr.clone());
                guard.shadow = None;
                Some((old, guard.update("A partida migrou para um servidor reserva.", None)))
            }
        };

        if let Some((old_host, update)) = migrated {
            self.metrics.failovers.inc();
            tracing::warn!(match_id = %match_id, old_host = %old_host, "shadow promoted to host");
            self.deliver(Outbound::Match {
                match_id,
                event: ClientEvent::Update(update),
            })
            .await;
        }

        match self.apply_as_host(match_id, player_id, command, None) {
            Ok(applied) => {
                self.dispatch(applied).await;
                Ok(())
            }
            Err(e) => {
                self.notify_command_error(match_id, player_id, &e).await;
                Err(e)
            }
        }
    }

    /// Host side of `POST /game/event`.
    ///
    /// Rejections reply with the current state so the Shadow can re-sync;
    /// duplicates (`proposed <= own seq`) are dropped silently with no
    /// client-facing reason.
    pub async fn handle_remote_event(
        &self,
        req: GameEventRequest,
    ) -> Result<GameEventResponse, DuelError> {
        self.auth.verify_event(
            req.proposed_seq,
            req.match_id,
            req.timestamp,
            req.command.tag(),
            req.player_id,
            &req.signature,
        )?;

        match self.apply_as_host(req.match_id, req.player_id, req.command, Some(req.proposed_seq)) {
            Ok(applied) => {
                let seq = applied.snapshot.event_seq;
                self.dispatch(applied).await;
                Ok(GameEventResponse {
                    accepted: true,
                    seq,
                    state: None,
                    reason: None,
                })
            }
            Err(e @ DuelError::MatchNotFound { .. }) => Err(e),
            Err(e) => {
                let state = self.snapshot(req.match_id);
                let seq = state.as_ref().map_or(0, |s| s.event_seq);
                let reason = match &e {
                    DuelError::StaleEvent { .. } => None,
                    other => Some(other.client_message()),
                };
                if reason.is_none() {
                    tracing::debug!(match_id = %req.match_id, "dropping duplicate event");
                }
                Ok(GameEventResponse {
                    accepted: false,
                    seq,
                    state,
                    reason,
                })
            }
        }
    }

    /// Shadow side of `POST /game/replicate`: accept iff the snapshot is
    /// strictly newer, otherwise drop it with a log line. Also how a revived
    /// old Host learns it has been superseded.
    pub fn apply_replication(&self, req: ReplicateRequest) -> ReplicateResponse {
        let incoming = req.state;
        let entry = match self.matches.get(&incoming.id) {
            Some(entry) => Arc::clone(entry.value()),
            None => {
                tracing::info!(match_id = %incoming.id, "match learned through replication");
                let id = incoming.id;
                let seq = incoming.event_seq;
                self.matches.insert(id, Arc::new(Mutex::new(incoming)));
                self.metrics.matches.set(self.matches.len() as i64);
                return ReplicateResponse {
                    accepted: true,
                    current_seq: seq,
                };
            }
        };

        let mut state = entry.lock();
        if incoming.event_seq > state.event_seq {
            tracing::debug!(
                match_id = %incoming.id,
                seq = incoming.event_seq,
                "replication accepted"
            );
            *state = incoming;
            ReplicateResponse {
                accepted: true,
                current_seq: state.event_seq,
            }
        } else {
            tracing::info!(
                match_id = %incoming.id,
                incoming = incoming.event_seq,
                current = state.event_seq,
                "dropping stale or duplicate replication"
            );
            ReplicateResponse {
                accepted: false,
                current_seq: state.event_seq,
            }
        }
    }

    /// Abort matches stuck in `AwaitingPurchase` longer than `ttl`. Returns
    /// the local seats to put back in the waiting queue. Seated hands are
    /// returned to their local owners first so no card is lost.
    pub async fn expire_stale(&self, ttl: Duration) -> Vec<Seat> {
        let now = Utc::now();
        let mut expired = Vec::new();
        for entry in self.matches.iter() {
            let state = entry.value().lock();
            let age = now
                .signed_duration_since(state.created_at)
                .to_std()
                .unwrap_or_default();
            if state.phase == MatchPhase::AwaitingPurchase && age > ttl {
                expired.push((state.id, state.seats.clone(), state.hands.clone()));
            }
        }

        let mut requeue = Vec::new();
        for (id, seats, hands) in expired {
            self.matches.remove(&id);
            tracing::warn!(match_id = %id, "aborting match without both pack purchases");
            for seat in seats {
                if seat.home != self.self_addr {
                    continue;
                }
                if let Some(hand) = hands.get(&seat.id) {
                    let _ = self.players.grant_cards(seat.id, hand);
                }
                let _ = self.players.set_match(seat.id, None);
                let _ = self
                    .bus
                    .publish_to_client(
                        &seat.id.to_string(),
                        &ClientEvent::Error {
                            message: "Partida cancelada: o oponente não confirmou. Você voltou para a fila.".to_string(),
                        },
                    )
                    .await;
                requeue.push(seat);
            }
        }
        self.metrics.matches.set(self.matches.len() as i64);
        requeue
    }

    // ---- command application (Host only, lock held) ----

    fn state_of(&self, match_id: MatchId) -> Result<Arc<Mutex<MatchState>>, DuelError> {
        self.matches
            .get(&match_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(DuelError::MatchNotFound { match_id })
    }

    fn apply_as_host(
        &self,
        match_id: MatchId,
        player_id: ClientId,
        command: MatchCommand,
        proposed: Option<u64>,
    ) -> Result<Applied, DuelError> {
        let state = self.state_of(match_id)?;
        let mut state = state.lock();

        if let Some(p) = proposed {
            if p <= state.event_seq {
                return Err(DuelError::StaleEvent {
                    proposed: p,
                    current: state.event_seq,
                });
            }
        }
        state.seat_of(player_id)?;

        let mut notices = Vec::new();
        match command {
            MatchCommand::Ready { cards } => {
                self.apply_ready(&mut state, player_id, cards, &mut notices)?
            }
            MatchCommand::PlayCard { card_id } => {
                self.apply_play(&mut state, player_id, card_id, &mut notices)?
            }
            MatchCommand::Chat { text } => {
                self.apply_chat(&mut state, player_id, text, &mut notices)
            }
            MatchCommand::Trade {
                target_id,
                offered_card_id,
                desired_card_id,
            } => self.apply_trade(
                &mut state,
                player_id,
                target_id,
                offered_card_id,
                desired_card_id,
                &mut notices,
            )?,
        }

        self.metrics.events_applied.inc();
        Ok(Applied {
            snapshot: state.clone(),
            notices,
        })
    }

    fn append_event(&self, state: &mut MatchState, kind: EventKind, player_id: ClientId) {
        state.event_seq += 1;
        let event = MatchEvent::signed(&self.auth, state.event_seq, state.id, kind, player_id);
        state.event_log.push(event);
    }

    fn apply_ready(
        &self,
        state: &mut MatchState,
        player_id: ClientId,
        cards: Vec<crate::types::Card>,
        notices: &mut Vec<Outbound>,
    ) -> Result<(), DuelError> {
        if state.phase != MatchPhase::AwaitingPurchase {
            return Err(DuelError::WrongPhase {
                match_id: state.id,
                phase: state.phase,
            });
        }
        if state.ready.get(&player_id) == Some(&true) {
            // duplicate READY is tolerated
            return Ok(());
        }

        state.hands.insert(player_id, cards);
        state.ready.insert(player_id, true);
        self.append_event(state, EventKind::PlayerReady, player_id);
        tracing::info!(match_id = %state.id, player = %player_id, "player ready");

        if state.all_ready() {
            state.phase = MatchPhase::Playing;
            state.round = 1;
            let starter = &state.seats[rand::thread_rng().gen_range(0..2)];
            state.turn_owner = Some(starter.id);
            let starter_name = starter.name.clone();
            tracing::info!(match_id = %state.id, starter = %starter_name, "match started");

            notices.push(Outbound::Match {
                match_id: state.id,
                event: ClientEvent::MatchStarted {
                    match_id: state.id,
                    turn_owner: starter.id,
                    round: state.round,
                },
            });
            let update = state.update(
                format!("Partida iniciada! É a vez de {starter_name}."),
                None,
            );
            notices.push(Outbound::Match {
                match_id: state.id,
                event: ClientEvent::Update(update),
            });
        }
        Ok(())
    }

    fn apply_play(
        &self,
        state: &mut MatchState,
        player_id: ClientId,
        card_id: CardId,
        notices: &mut Vec<Outbound>,
    ) -> Result<(), DuelError> {
        if state.phase != MatchPhase::Playing {
            return Err(DuelError::WrongPhase {
                match_id: state.id,
                phase: state.phase,
            });
        }
        if state.turn_owner != Some(player_id) {
            return Err(DuelError::OutOfTurn { client_id: player_id });
        }
        let player_name = state.seat_of(player_id)?.name.clone();
        if state.table.contains_key(&player_name) {
            return Err(DuelError::AlreadyPlayed { client_id: player_id });
        }

        let hand = state
            .hands
            .get_mut(&player_id)
            .ok_or(DuelError::CardNotInHand { card_id })?;
        let idx = hand
            .iter()
            .position(|c| c.id == card_id)
            .ok_or(DuelError::CardNotInHand { card_id })?;
        let card = hand.remove(idx);
        tracing::info!(
            match_id = %state.id,
            player = %player_name,
            card = %card.name,
            power = card.power,
            "card played"
        );
        state.table.insert(player_name, card);
        self.append_event(state, EventKind::CardPlayed { card_id }, player_id);

        if state.table.len() == state.seats.len() {
            self.resolve_trick(state, player_id, notices);
        } else {
            let next = state.other_seat(player_id)?;
            let next_id = next.id;
            let next_name = next.name.clone();
            state.turn_owner = Some(next_id);
            let update = state.update(format!("Aguardando jogada de {next_name}..."), None);
            notices.push(Outbound::Match {
                match_id: state.id,
                event: ClientEvent::Update(update),
            });
        }
        Ok(())
    }

    fn resolve_trick(
        &self,
        state: &mut MatchState,
        player_id: ClientId,
        notices: &mut Vec<Outbound>,
    ) {
        let [seat_a, seat_b] = &state.seats;
        let (card_a, card_b) = match (state.table.get(&seat_a.name), state.table.get(&seat_b.name))
        {
            (Some(a), Some(b)) => (a, b),
            _ => return,
        };

        let winner = match compare_cards(card_a, card_b) {
            std::cmp::Ordering::Greater => Some(seat_a.clone()),
            std::cmp::Ordering::Less => Some(seat_b.clone()),
            std::cmp::Ordering::Equal => None,
        };

        let winner_name = winner.as_ref().map(|s| s.name.clone());
        if let Some(seat) = &winner {
            *state.round_points.entry(seat.name.clone()).or_default() += 1;
            state.turn_owner = Some(seat.id);
        }
        // on a draw the previous turn owner keeps the turn; the played cards
        // are retired either way
        state.table.clear();
        self.append_event(
            state,
            EventKind::TrickResolved {
                winner: winner_name.clone(),
            },
            player_id,
        );
        tracing::info!(
            match_id = %state.id,
            winner = winner_name.as_deref().unwrap_or("draw"),
            "trick resolved"
        );

        let finished = state.hands.values().any(Vec::is_empty);
        if finished {
            state.phase = MatchPhase::Finished;
            let final_winner = state.leading_player();
            if let Some(name) = &final_winner {
                *state.match_points.entry(name.clone()).or_default() += 1;
            }
            self.append_event(
                state,
                EventKind::MatchFinished {
                    winner: final_winner.clone(),
                },
                player_id,
            );
            tracing::info!(
                match_id = %state.id,
                winner = final_winner.as_deref().unwrap_or("draw"),
                "match finished"
            );
            for seat in state.seats.clone() {
                if seat.home == self.self_addr {
                    let _ = self.players.set_match(seat.id, None);
                }
            }

            let update = state.update("Fim de partida.", winner_name);
            notices.push(Outbound::Match {
                match_id: state.id,
                event: ClientEvent::Update(update),
            });
            notices.push(Outbound::Match {
                match_id: state.id,
                event: ClientEvent::MatchEnded {
                    match_id: state.id,
                    winner: final_winner,
                },
            });
        } else {
            let message = match (&winner_name, state.turn_owner_name()) {
                (Some(w), Some(next)) => {
                    format!("Vencedor da jogada: {w}. Próximo a jogar: {next}")
                }
                (None, Some(next)) => format!("Empate na jogada. Próximo a jogar: {next}"),
                _ => "Jogada resolvida.".to_string(),
            };
            let update = state.update(message, winner_name);
            notices.push(Outbound::Match {
                match_id: state.id,
                event: ClientEvent::Update(update),
            });
        }
    }

    fn apply_chat(
        &self,
        state: &mut MatchState,
        player_id: ClientId,
        text: String,
        notices: &mut Vec<Outbound>,
    ) {
        let player_name = state
            .seat_of(player_id)
            .map(|s| s.name.clone())
            .unwrap_or_default();
        self.append_event(state, EventKind::ChatSent { text: text.clone() }, player_id);
        notices.push(Outbound::Match {
            match_id: state.id,
            event: ClientEvent::ChatReceived { player_name, text },
        });
    }

    fn apply_trade(
        &self,
        state: &mut MatchState,
        player_id: ClientId,
        target_id: ClientId,
        offered_card_id: CardId,
        desired_card_id: CardId,
        notices: &mut Vec<Outbound>,
    ) -> Result<(), DuelError> {
        state.seat_of(target_id)?;
        if target_id == player_id {
            return Err(DuelError::MalformedMessage {
                reason: "cannot trade with yourself".to_string(),
                source: None,
            });
        }

        let offered_idx = state
            .hands
            .get(&player_id)
            .and_then(|hand| hand.iter().position(|c| c.id == offered_card_id))
            .ok_or(DuelError::CardNotInHand {
                card_id: offered_card_id,
            })?;
        let desired_idx = state
            .hands
            .get(&target_id)
            .and_then(|hand| hand.iter().position(|c| c.id == desired_card_id))
            .ok_or(DuelError::CardNotInHand {
                card_id: desired_card_id,
            })?;

        let offered = state
            .hands
            .get_mut(&player_id)
            .map(|hand| hand.remove(offered_idx))
            .ok_or(DuelError::CardNotInHand {
                card_id: offered_card_id,
            })?;
        let desired = state
            .hands
            .get_mut(&target_id)
            .map(|hand| hand.remove(desired_idx))
            .ok_or(DuelError::CardNotInHand {
                card_id: desired_card_id,
            })?;

        let offered_name = offered.name.clone();
        let desired_name = desired.name.clone();
        if let Some(hand) = state.hands.get_mut(&player_id) {
            hand.push(desired);
        }
        if let Some(hand) = state.hands.get_mut(&target_id) {
            hand.push(offered);
        }
        // trades are sequenced for replication but carry no log entry; the
        // event-log tag set is fixed
        state.event_seq += 1;
        tracing::info!(match_id = %state.id, "trade completed");

        notices.push(self.client_notice(
            state,
            player_id,
            ClientEvent::TradeDone {
                message: format!(
                    "Troca realizada! Você deu '{offered_name}' e recebeu '{desired_name}'."
                ),
            },
        ));
        notices.push(self.client_notice(
            state,
            target_id,
            ClientEvent::TradeDone {
                message: format!(
                    "Troca realizada! Você deu '{desired_name}' e recebeu '{offered_name}'."
                ),
            },
        ));
        Ok(())
    }

    fn client_notice(&self, state: &MatchState, client: ClientId, event: ClientEvent) -> Outbound {
        let via = state
            .seats
            .iter()
            .find(|s| s.id == client)
            .filter(|s| s.home != self.self_addr)
            .map(|s| s.home.clone());
        Outbound::Client { client, via, event }
    }

    // ---- side effects (no locks held) ----

    async fn dispatch(&self, applied: Applied) {
        for notice in applied.notices {
            self.deliver(notice).await;
        }

        let snapshot = applied.snapshot;
        if snapshot.host != self.self_addr {
            return;
        }
        let Some(shadow) = snapshot.shadow.clone() else {
            return;
        };
        let match_id = snapshot.id;
        let seq = snapshot.event_seq;
        match self
            .rpc
            .replicate(&shadow, ReplicateRequest { state: snapshot })
            .await
        {
            Ok(resp) if !resp.accepted && resp.current_seq > seq => {
                // the replica is ahead of us: we are the stale half of a heal
                tracing::warn!(
                    match_id = %match_id,
                    ours = seq,
                    theirs = resp.current_seq,
                    "replica is ahead, stepping down to shadow"
                );
                self.demote(match_id, shadow);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(match_id = %match_id, shadow = %shadow, error = %e, "replication failed");
            }
        }
    }

    fn demote(&self, match_id: MatchId, new_host: PeerAddr) {
        if let Ok(state) = self.state_of(match_id) {
            let mut guard = state.lock();
            guard.host = new_host;
            guard.shadow = Some(self.self_addr.clone());
        }
    }

    async fn notify_command_error(&self, match_id: MatchId, player_id: ClientId, err: &DuelError) {
        self.notify_client(match_id, player_id, ClientEvent::from_error(err))
            .await;
    }

    async fn notify_client(&self, match_id: MatchId, client: ClientId, event: ClientEvent) {
        let notice = match self.snapshot(match_id) {
            Some(state) => self.client_notice(&state, client, event),
            None => Outbound::Client {
                client,
                via: None,
                event,
            },
        };
        self.deliver(notice).await;
    }

    async fn deliver(&self, notice: Outbound) {
        match notice {
            Outbound::Match { match_id, event } => {
                if let Err(e) = self.bus.publish_to_match(match_id, &event).await {
                    tracing::warn!(match_id = %match_id, error = %e, "match publish failed");
                }
            }
            Outbound::Client {
                client,
                via: None,
                event,
            } => {
                if let Err(e) = self.bus.publish_to_client(&client.to_string(), &event).await {
                    tracing::warn!(client = %client, error = %e, "client publish failed");
                }
            }
            Outbound::Client {
                client,
                via: Some(peer),
                event,
            } => {
                let req = NotifyPlayerRequest {
                    client_id: client,
                    event,
                };
                if let Err(e) = self.rpc.notify_player(&peer, req).await {
                    tracing::warn!(client = %client, peer = %peer, error = %e, "remote notify failed");
                }
            }
        }
    }

    /// Deliver an event relayed by the Host for one of our local players
    /// (`POST /game/notify_player`).
    pub async fn notify_local_player(&self, req: NotifyPlayerRequest) -> Result<(), DuelError> {
        if !self.players.is_local(req.client_id) {
            return Err(DuelError::PlayerNotFound {
                client_id: req.client_id,
            });
        }
        self.bus
            .publish_to_client(&req.client_id.to_string(), &req.event)
            .await
    }

    #[must_use]
    pub fn active_matches(&self) -> usize {
        self.matches.len()
    }
}
