//! Card domain types.
//!
//! A [`Card`] is immutable once minted: identity, display name, suit, power
//! and rarity never change. Suits carry a fixed rank used to break power ties
//! when a trick is resolved.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a card. A card ID exists in at most one place in the
/// cluster at any time: the leader's inventory, a player's hand, or a match
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CardId(Uuid);

impl CardId {
    /// Mint a fresh card ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CardId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CardId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Card suit. The numeric rank breaks ties between cards of equal power:
/// spades beat hearts beat diamonds beat clubs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Suit {
    #[serde(rename = "♠")]
    Spades,
    #[serde(rename = "♥")]
    Hearts,
    #[serde(rename = "♦")]
    Diamonds,
    #[serde(rename = "♣")]
    Clubs,
}

impl Suit {
    /// All suits, in rank order (highest first).
    pub const ALL: [Suit; 4] = [Suit::Spades, Suit::Hearts, Suit::Diamonds, Suit::Clubs];

    /// Tie-break rank: ♠4, ♥3, ♦2, ♣1.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Suit::Spades => 4,
            Suit::Hearts => 3,
            Suit::Diamonds => 2,
            Suit::Clubs => 1,
        }
    }

    /// The unicode symbol used on the wire.
    #[must_use]
    pub const fn symbol(&self) -> &'static str {
        match self {
            Suit::Spades => "♠",
            Suit::Hearts => "♥",
            Suit::Diamonds => "♦",
            Suit::Clubs => "♣",
        }
    }
}

impl fmt::Display for Suit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Card rarity tier. Wire encoding matches the client protocol ("C", "U",
/// "R", "L").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rarity {
    #[serde(rename = "C")]
    Common,
    #[serde(rename = "U")]
    Uncommon,
    #[serde(rename = "R")]
    Rare,
    #[serde(rename = "L")]
    Legendary,
}

impl Rarity {
    /// All rarities, most common first.
    pub const ALL: [Rarity; 4] = [
        Rarity::Common,
        Rarity::Uncommon,
        Rarity::Rare,
        Rarity::Legendary,
    ];

    /// Downgrade order on pool exhaustion: L, then R, then U, then C.
    #[must_use]
    pub const fn downgrade(&self) -> Option<Rarity> {
        match self {
            Rarity::Legendary => Some(Rarity::Rare),
            Rarity::Rare => Some(Rarity::Uncommon),
            Rarity::Uncommon => Some(Rarity::Common),
            Rarity::Common => None,
        }
    }
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Rarity::Common => "C",
            Rarity::Uncommon => "U",
            Rarity::Rare => "R",
            Rarity::Legendary => "L",
        };
        write!(f, "{s}")
    }
}

/// A playable card. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Card {
    /// Unique identity.
    pub id: CardId,
    /// Display name.
    #[serde(rename = "nome")]
    pub name: String,
    /// Suit, used for tie-breaks.
    #[serde(rename = "naipe")]
    pub suit: Suit,
    /// Power value compared first when resolving a trick.
    #[serde(rename = "valor")]
    pub power: i32,
    /// Rarity tier.
    #[serde(rename = "raridade")]
    pub rarity: Rarity,
}

impl Card {
    /// Create a card with a fresh identity.
    #[must_use]
    pub fn new(name: impl Into<String>, suit: Suit, power: i32, rarity: Rarity) -> Self {
        Self {
            id: CardId::new(),
            name: name.into(),
            suit,
            power,
            rarity,
        }
    }
}

/// Compare two cards for trick resolution.
///
/// Higher power wins; equal power falls through to suit rank. Returns
/// `Ordering::Equal` only for byte-equal `(power, suit)` pairs, which is a
/// drawn trick. Pure in `(power, suit)` and antisymmetric.
#[must_use]
pub fn compare_cards(a: &Card, b: &Card) -> std::cmp::Ordering {
    a.power
        .cmp(&b.power)
        .then_with(|| a.suit.rank().cmp(&b.suit.rank()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    fn card(power: i32, suit: Suit) -> Card {
        Card::new("Test", suit, power, Rarity::Common)
    }

    #[test]
    fn higher_power_wins() {
        let a = card(100, Suit::Clubs);
        let b = card(50, Suit::Spades);
        assert_eq!(compare_cards(&a, &b), Ordering::Greater);
        assert_eq!(compare_cards(&b, &a), Ordering::Less);
    }

    #[test]
    fn suit_breaks_power_ties() {
        let hearts = card(60, Suit::Hearts);
        let diamonds = card(60, Suit::Diamonds);
        assert_eq!(compare_cards(&hearts, &diamonds), Ordering::Greater);

        let spades = card(60, Suit::Spades);
        assert_eq!(compare_cards(&spades, &hearts), Ordering::Greater);
    }

    #[test]
    fn equal_power_and_suit_is_a_draw() {
        let a = card(90, Suit::Spades);
        let b = card(90, Suit::Spades);
        assert_eq!(compare_cards(&a, &b), Ordering::Equal);
    }

    #[test]
    fn comparison_is_antisymmetric() {
        let suits = Suit::ALL;
        for &sa in &suits {
            for &sb in &suits {
                for (pa, pb) in [(1, 1), (1, 2), (50, 49)] {
                    let a = card(pa, sa);
                    let b = card(pb, sb);
                    assert_eq!(compare_cards(&a, &b), compare_cards(&b, &a).reverse());
                }
            }
        }
    }

    #[test]
    fn suit_ranks() {
        assert_eq!(Suit::Spades.rank(), 4);
        assert_eq!(Suit::Hearts.rank(), 3);
        assert_eq!(Suit::Diamonds.rank(), 2);
        assert_eq!(Suit::Clubs.rank(), 1);
    }

    #[test]
    fn rarity_downgrade_chain() {
        assert_eq!(Rarity::Legendary.downgrade(), Some(Rarity::Rare));
        assert_eq!(Rarity::Rare.downgrade(), Some(Rarity::Uncommon));
        assert_eq!(Rarity::Uncommon.downgrade(), Some(Rarity::Common));
        assert_eq!(Rarity::Common.downgrade(), None);
    }

    #[test]
    fn card_wire_format() {
        let c = Card::new("Dragão", Suit::Spades, 100, Rarity::Legendary);
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["nome"], "Dragão");
        assert_eq!(json["naipe"], "♠");
        assert_eq!(json["valor"], 100);
        assert_eq!(json["raridade"], "L");
    }
}
