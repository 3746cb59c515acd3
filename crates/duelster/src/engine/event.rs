//! Sequenced, signed match events and the commands that produce them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::ClusterAuth;
use crate::error::DuelError;
use crate::types::{Card, CardId, ClientId, MatchId};

/// A client command addressed to a match, as carried between servers.
///
/// The home server wraps these and either applies them locally (when it is
/// the Host) or forwards them over `/game/event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MatchCommand {
    /// Player finished their pack purchase; `cards` is the hand being seated
    /// at the Host.
    #[serde(rename = "PLAYER_READY")]
    Ready { cards: Vec<Card> },
    #[serde(rename = "CARD_PLAYED")]
    PlayCard { card_id: CardId },
    #[serde(rename = "CHAT")]
    Chat { text: String },
    #[serde(rename = "TRADE")]
    Trade {
        target_id: ClientId,
        offered_card_id: CardId,
        desired_card_id: CardId,
    },
}

impl MatchCommand {
    /// Wire tag, also bound into the request signature.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            MatchCommand::Ready { .. } => "PLAYER_READY",
            MatchCommand::PlayCard { .. } => "CARD_PLAYED",
            MatchCommand::Chat { .. } => "CHAT",
            MatchCommand::Trade { .. } => "TRADE",
        }
    }
}

/// Type-specific payload of a logged event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventKind {
    #[serde(rename = "PLAYER_READY")]
    PlayerReady,
    #[serde(rename = "CARD_PLAYED")]
    CardPlayed { card_id: CardId },
    #[serde(rename = "TRICK_RESOLVED")]
    TrickResolved { winner: Option<String> },
    #[serde(rename = "CHAT_SENT")]
    ChatSent { text: String },
    #[serde(rename = "MATCH_FINISHED")]
    MatchFinished { winner: Option<String> },
}

impl EventKind {
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            EventKind::PlayerReady => "PLAYER_READY",
            EventKind::CardPlayed { .. } => "CARD_PLAYED",
            EventKind::TrickResolved { .. } => "TRICK_RESOLVED",
            EventKind::ChatSent { .. } => "CHAT_SENT",
            EventKind::MatchFinished { .. } => "MATCH_FINISHED",
        }
    }
}

/// One entry in a match's append-only event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchEvent {
    pub seq: u64,
    pub match_id: MatchId,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub player_id: ClientId,
    /// HMAC over `seq|matchId|timestamp|type|playerId`.
    pub signature: String,
}

impl MatchEvent {
    /// Build a signed event.
    #[must_use]
    pub fn signed(
        auth: &ClusterAuth,
        seq: u64,
        match_id: MatchId,
        kind: EventKind,
        player_id: ClientId,
    ) -> Self {
        let timestamp = Utc::now();
        let signature = auth.sign_event(seq, match_id, timestamp.timestamp(), kind.tag(), player_id);
        Self {
            seq,
            match_id,
            timestamp,
            kind,
            player_id,
            signature,
        }
    }

    /// Verify the integrity tag.
    pub fn verify(&self, auth: &ClusterAuth) -> Result<(), DuelError> {
        auth.verify_event(
            self.seq,
            self.match_id,
            self.timestamp.timestamp(),
            self.kind.tag(),
            self.player_id,
            &self.signature,
        )
    }
}
