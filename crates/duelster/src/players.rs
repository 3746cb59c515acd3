//! Server-local view of connected players.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::DuelError;
use crate::types::{Card, CardId, ClientId, MatchId};

/// A connected human, as seen by their home server.
///
/// Hand contents are mutated only by this server outside a match; while a
/// match is active the match's Host owns the authoritative hands and this
/// record keeps the `match_id` back-reference.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: ClientId,
    pub name: String,
    pub hand: Vec<Card>,
    pub match_id: Option<MatchId>,
}

impl Player {
    #[must_use]
    pub fn new(id: ClientId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            hand: Vec::new(),
            match_id: None,
        }
    }

    /// Remove and return a card by ID.
    pub fn take_card(&mut self, card_id: CardId) -> Option<Card> {
        let idx = self.hand.iter().position(|c| c.id == card_id)?;
        Some(self.hand.remove(idx))
    }
}

/// Registry of players whose home server is this node.
///
/// Matches and queues hold `ClientId`s and resolve them here; the map owns
/// the player records (no owned cross-references).
#[derive(Default)]
pub struct PlayerDirectory {
    players: DashMap<ClientId, Arc<Mutex<Player>>>,
}

impl PlayerDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly logged-in player.
    pub fn register(&self, name: impl Into<String>) -> ClientId {
        let id = ClientId::new();
        self.players
            .insert(id, Arc::new(Mutex::new(Player::new(id, name))));
        id
    }

    pub fn get(&self, id: ClientId) -> Result<Arc<Mutex<Player>>, DuelError> {
        self.players
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(DuelError::PlayerNotFound { client_id: id })
    }

    /// Whether this node is the player's home server.
    #[must_use]
    pub fn is_local(&self, id: ClientId) -> bool {
        self.players.contains_key(&id)
    }

    pub fn name_of(&self, id: ClientId) -> Result<String, DuelError> {
        Ok(self.get(id)?.lock().name.clone())
    }

    /// Drain the player's hand, transferring ownership of the cards to the
    /// caller (used when seating a hand at the match Host).
    pub fn drain_hand(&self, id: ClientId) -> Result<Vec<Card>, DuelError> {
        let player = self.get(id)?;
        let mut guard = player.lock();
        Ok(std::mem::take(&mut guard.hand))
    }

    /// Append allocated cards to the player's hand.
    pub fn grant_cards(&self, id: ClientId, cards: &[Card]) -> Result<(), DuelError> {
        let player = self.get(id)?;
        player.lock().hand.extend_from_slice(cards);
        Ok(())
    }

    pub fn set_match(&self, id: ClientId, match_id: Option<MatchId>) -> Result<(), DuelError> {
        let player = self.get(id)?;
        player.lock().match_id = match_id;
        Ok(())
    }

    pub fn match_of(&self, id: ClientId) -> Result<Option<MatchId>, DuelError> {
        Ok(self.get(id)?.lock().match_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.players.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Rarity, Suit};

    #[test]
    fn register_and_lookup() {
        let dir = PlayerDirectory::new();
        let id = dir.register("alice");
        assert!(dir.is_local(id));
        assert_eq!(dir.name_of(id).unwrap(), "alice");
        assert!(!dir.is_local(ClientId::new()));
    }

    #[test]
    fn missing_player_errors() {
        let dir = PlayerDirectory::new();
        let err = dir.name_of(ClientId::new()).unwrap_err();
        assert!(matches!(err, DuelError::PlayerNotFound { .. }));
    }

    #[test]
    fn grant_and_drain_hand() {
        let dir = PlayerDirectory::new();
        let id = dir.register("bob");
        let cards = vec![
            Card::new("Guerreiro", Suit::Clubs, 10, Rarity::Common),
            Card::new("Mago", Suit::Hearts, 60, Rarity::Uncommon),
        ];
        dir.grant_cards(id, &cards).unwrap();

        let drained = dir.drain_hand(id).unwrap();
        assert_eq!(drained.len(), 2);
        assert!(dir.drain_hand(id).unwrap().is_empty());
    }

    #[test]
    fn take_card_removes_exactly_one() {
        let mut player = Player::new(ClientId::new(), "carol");
        let card = Card::new("Anjo", Suit::Spades, 90, Rarity::Rare);
        let card_id = card.id;
        player.hand.push(card);

        assert!(player.take_card(card_id).is_some());
        assert!(player.take_card(card_id).is_none());
        assert!(player.hand.is_empty());
    }

    #[test]
    fn match_back_reference() {
        let dir = PlayerDirectory::new();
        let id = dir.register("dave");
        assert_eq!(dir.match_of(id).unwrap(), None);

        let match_id = MatchId::new();
        dir.set_match(id, Some(match_id)).unwrap();
        assert_eq!(dir.match_of(id).unwrap(), Some(match_id));
    }
}
