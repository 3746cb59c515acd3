//! Shared card inventory.
//!
//! Every node builds the same initial pool at startup, but only the elected
//! leader's copy is authoritative: followers forward allocation requests and
//! treat their own pool as an ignored shadow. The pool is partitioned by
//! rarity and guarded by a single mutex; allocations serialize and each card
//! leaves the pool before the response is composed.

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;

use crate::error::DuelError;
use crate::types::{Card, Rarity, Suit};

/// The sixteen canonical card names.
const CARD_NAMES: [&str; 16] = [
    "Dragão",
    "Mago",
    "Guerreiro",
    "Arqueiro",
    "Cavaleiro",
    "Paladino",
    "Bárbaro",
    "Ladino",
    "Anjo",
    "Demônio",
    "Feiticeira",
    "Golem",
    "Grifo",
    "Hidra",
    "Vampiro",
    "Titã",
];

/// Copies seeded per name, and the power range for each rarity.
const SEED_PLAN: [(Rarity, usize, std::ops::RangeInclusive<i32>); 4] = [
    (Rarity::Common, 100, 1..=50),
    (Rarity::Uncommon, 50, 51..=80),
    (Rarity::Rare, 20, 81..=100),
    (Rarity::Legendary, 5, 101..=120),
];

/// Pack rarity distribution: C 70%, U 20%, R 9%, L 1%.
const RARITY_WEIGHTS: [(Rarity, f64); 4] = [
    (Rarity::Common, 0.70),
    (Rarity::Uncommon, 0.20),
    (Rarity::Rare, 0.09),
    (Rarity::Legendary, 0.01),
];

/// Rarity-partitioned card pool.
pub struct Inventory {
    pools: Mutex<HashMap<Rarity, Vec<Card>>>,
}

impl Inventory {
    /// Build the initial pool.
    #[must_use]
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let mut pools: HashMap<Rarity, Vec<Card>> = HashMap::new();
        for name in CARD_NAMES {
            for (rarity, count, power_range) in SEED_PLAN {
                let pool = pools.entry(rarity).or_default();
                for _ in 0..count {
                    let suit = *Suit::ALL.choose(&mut rng).expect("non-empty suit list");
                    let power = rng.gen_range(power_range.clone());
                    pool.push(Card::new(name, suit, power, rarity));
                }
            }
        }
        Self {
            pools: Mutex::new(pools),
        }
    }

    /// Sample a rarity from the fixed pack distribution.
    fn sample_rarity(rng: &mut impl Rng) -> Rarity {
        let roll: f64 = rng.gen();
        let mut cumulative = 0.0;
        for (rarity, weight) in RARITY_WEIGHTS {
            cumulative += weight;
            if roll < cumulative {
                return rarity;
            }
        }
        Rarity::Common
    }

    /// Allocate a pack of `size` cards.
    ///
    /// For each slot a rarity is sampled; an exhausted rarity downgrades
    /// L to R to U to C. If every pool is empty the whole allocation fails with
    /// [`DuelError::InventoryExhausted`] and any cards already drawn for the
    /// pack are returned to the pool.
    pub fn allocate_pack(&self, size: usize) -> Result<Vec<Card>, DuelError> {
        let mut rng = rand::thread_rng();
        let mut pools = self.pools.lock();
        let mut pack = Vec::with_capacity(size);

        for _ in 0..size {
            let mut rarity = Some(Self::sample_rarity(&mut rng));
            let card = loop {
                let Some(current) = rarity else { break None };
                match pools.get_mut(&current) {
                    Some(pool) if !pool.is_empty() => {
                        let idx = rng.gen_range(0..pool.len());
                        break Some(pool.swap_remove(idx));
                    }
                    _ => rarity = current.downgrade(),
                }
            };
            match card {
                Some(card) => pack.push(card),
                None => {
                    // restore the partial pack so no card is lost
                    for card in pack {
                        pools.entry(card.rarity).or_default().push(card);
                    }
                    return Err(DuelError::InventoryExhausted);
                }
            }
        }
        Ok(pack)
    }

    /// Per-rarity pool sizes and the overall total.
    #[must_use]
    pub fn status(&self) -> (HashMap<Rarity, usize>, usize) {
        let pools = self.pools.lock();
        let counts: HashMap<Rarity, usize> =
            pools.iter().map(|(r, pool)| (*r, pool.len())).collect();
        let total = counts.values().sum();
        (counts, total)
    }

    /// Total cards remaining.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.status().1
    }
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}
