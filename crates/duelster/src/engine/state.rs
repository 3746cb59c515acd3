//! Per-match replicated state.
//!
//! `MatchState` is both the Host's authoritative record and the replication
//! payload shipped to the Shadow: a Shadow that accepts a snapshot can take
//! over as Host without any other source of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::engine::event::MatchEvent;
use crate::error::DuelError;
use crate::protocol::GameUpdate;
use crate::types::{Card, ClientId, MatchId, PeerAddr};

/// Match lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    /// Both players must buy a pack before play starts.
    AwaitingPurchase,
    /// Tricks are being played.
    Playing,
    /// Terminal.
    Finished,
}

impl fmt::Display for MatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchPhase::AwaitingPurchase => write!(f, "awaiting_purchase"),
            MatchPhase::Playing => write!(f, "playing"),
            MatchPhase::Finished => write!(f, "finished"),
        }
    }
}

/// One of the two seats in a match. `home` is the player's home server, the
/// address notifications for that player are relayed through when it is not
/// the local node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seat {
    pub id: ClientId,
    pub name: String,
    pub home: PeerAddr,
}

impl Seat {
    #[must_use]
    pub fn new(id: ClientId, name: impl Into<String>, home: PeerAddr) -> Self {
        Self {
            id,
            name: name.into(),
            home,
        }
    }
}

/// Full state of one match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchState {
    pub id: MatchId,
    /// The two seats, ordered for deterministic iteration.
    pub seats: [Seat; 2],
    /// Server currently authoritative for this match.
    pub host: PeerAddr,
    /// Replica server; `None` for same-server matches.
    pub shadow: Option<PeerAddr>,
    pub phase: MatchPhase,
    pub round: u32,
    /// Players that completed their pack purchase.
    pub ready: HashMap<ClientId, bool>,
    /// Authoritative hands, owned by the Host while the match is active.
    pub hands: HashMap<ClientId, Vec<Card>>,
    /// Cards played this trick, keyed by player display name.
    pub table: HashMap<String, Card>,
    /// Trick wins per player display name.
    pub round_points: HashMap<String, u32>,
    /// Match wins per player display name.
    pub match_points: HashMap<String, u32>,
    /// Player whose turn it is; set when the match starts.
    pub turn_owner: Option<ClientId>,
    /// Monotonic event sequence, owned by the Host.
    pub event_seq: u64,
    /// Append-only signed event log.
    pub event_log: Vec<MatchEvent>,
    pub created_at: DateTime<Utc>,
}

impl MatchState {
    /// Create a fresh match in `AwaitingPurchase`.
    #[must_use]
    pub fn new(id: MatchId, seats: [Seat; 2], host: PeerAddr, shadow: Option<PeerAddr>) -> Self {
        Self {
            id,
            seats,
            host,
            shadow,
            phase: MatchPhase::AwaitingPurchase,
            round: 1,
            ready: HashMap::new(),
            hands: HashMap::new(),
            table: HashMap::new(),
            round_points: HashMap::new(),
            match_points: HashMap::new(),
            turn_owner: None,
            event_seq: 0,
            event_log: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn seat_of(&self, id: ClientId) -> Result<&Seat, DuelError> {
        self.seats
            .iter()
            .find(|s| s.id == id)
            .ok_or(DuelError::NotSeated {
                match_id: self.id,
                client_id: id,
            })
    }

    /// The opponent of `id`.
    pub fn other_seat(&self, id: ClientId) -> Result<&Seat, DuelError> {
        self.seats
            .iter()
            .find(|s| s.id != id)
            .ok_or(DuelError::NotSeated {
                match_id: self.id,
                client_id: id,
            })
    }

    #[must_use]
    pub fn all_ready(&self) -> bool {
        self.seats.iter().all(|s| self.ready.get(&s.id) == Some(&true))
    }

    /// Hand sizes keyed by display name.
    #[must_use]
    pub fn hand_counts(&self) -> HashMap<String, usize> {
        self.seats
            .iter()
            .map(|s| {
                (
                    s.name.clone(),
                    self.hands.get(&s.id).map_or(0, Vec::len),
                )
            })
            .collect()
    }

    /// Display name of the current turn owner, if any.
    #[must_use]
    pub fn turn_owner_name(&self) -> Option<&str> {
        let owner = self.turn_owner?;
        self.seats
            .iter()
            .find(|s| s.id == owner)
            .map(|s| s.name.as_str())
    }

    /// Winner by round points; `None` is a draw.
    #[must_use]
    pub fn leading_player(&self) -> Option<String> {
        let a = &self.seats[0];
        let b = &self.seats[1];
        let pa = self.round_points.get(&a.name).copied().unwrap_or(0);
        let pb = self.round_points.get(&b.name).copied().unwrap_or(0);
        match pa.cmp(&pb) {
            std::cmp::Ordering::Greater => Some(a.name.clone()),
            std::cmp::Ordering::Less => Some(b.name.clone()),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Build the client-facing UPDATE payload.
    #[must_use]
    pub fn update(&self, message: impl Into<String>, last_trick_winner: Option<String>) -> GameUpdate {
        GameUpdate {
            match_id: Some(self.id),
            round: self.round,
            hand_counts: self.hand_counts(),
            table: self.table.clone(),
            last_trick_winner,
            scores: self.round_points.clone(),
            turn_owner: self.turn_owner,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Rarity, Suit};

    fn two_seats() -> [Seat; 2] {
        [
            Seat::new(ClientId::new(), "alice", PeerAddr::new("s1", 8080)),
            Seat::new(ClientId::new(), "bob", PeerAddr::new("s2", 8080)),
        ]
    }

    #[test]
    fn fresh_match_awaits_purchase() {
        let state = MatchState::new(
            MatchId::new(),
            two_seats(),
            PeerAddr::new("s1", 8080),
            Some(PeerAddr::new("s2", 8080)),
        );
        assert_eq!(state.phase, MatchPhase::AwaitingPurchase);
        assert_eq!(state.event_seq, 0);
        assert_eq!(state.round, 1);
        assert!(!state.all_ready());
    }

    #[test]
    fn seat_lookup() {
        let seats = two_seats();
        let alice = seats[0].id;
        let bob = seats[1].id;
        let state = MatchState::new(MatchId::new(), seats, PeerAddr::new("s1", 8080), None);

        assert_eq!(state.seat_of(alice).unwrap().name, "alice");
        assert_eq!(state.other_seat(alice).unwrap().id, bob);
        assert!(state.seat_of(ClientId::new()).is_err());
    }

    #[test]
    fn all_ready_requires_both() {
        let seats = two_seats();
        let alice = seats[0].id;
        let bob = seats[1].id;
        let mut state = MatchState::new(MatchId::new(), seats, PeerAddr::new("s1", 8080), None);

        state.ready.insert(alice, true);
        assert!(!state.all_ready());
        state.ready.insert(bob, true);
        assert!(state.all_ready());
    }

    #[test]
    fn leading_player_by_round_points() {
        let seats = two_seats();
        let mut state = MatchState::new(MatchId::new(), seats, PeerAddr::new("s1", 8080), None);

        assert_eq!(state.leading_player(), None);
        *state.round_points.entry("alice".to_string()).or_default() += 2;
        *state.round_points.entry("bob".to_string()).or_default() += 1;
        assert_eq!(state.leading_player(), Some("alice".to_string()));
    }

    #[test]
    fn update_reflects_state() {
        let seats = two_seats();
        let alice = seats[0].id;
        let mut state = MatchState::new(MatchId::new(), seats, PeerAddr::new("s1", 8080), None);
        state.hands.insert(alice, vec![Card::new("Grifo", Suit::Clubs, 7, Rarity::Common)]);
        state.turn_owner = Some(alice);

        let update = state.update("test", None);
        assert_eq!(update.hand_counts["alice"], 1);
        assert_eq!(update.hand_counts["bob"], 0);
        assert_eq!(update.turn_owner, Some(alice));
        assert_eq!(update.round, 1);
    }

    #[test]
    fn snapshot_roundtrips_through_json() {
        let state = MatchState::new(
            MatchId::new(),
            two_seats(),
            PeerAddr::new("s1", 8080),
            Some(PeerAddr::new("s2", 8080)),
        );
        let json = serde_json::to_string(&state).unwrap();
        let back: MatchState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
