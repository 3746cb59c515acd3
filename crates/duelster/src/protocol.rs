//! Client wire protocol.
//!
//! Everything a client sends or receives is a `{ "comando": ..., "dados": ... }`
//! envelope. Commands and events are adjacently-tagged serde enums so the
//! payload is parsed once into a variant and every later dispatch is
//! exhaustive.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{Card, CardId, ClientId, MatchId};

/// Inbound client command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "comando", content = "dados")]
pub enum ClientCommand {
    #[serde(rename = "LOGIN")]
    Login {
        #[serde(rename = "nome")]
        name: String,
    },
    #[serde(rename = "ENQUEUE")]
    Enqueue {
        #[serde(rename = "cliente_id")]
        client_id: ClientId,
    },
    #[serde(rename = "BUY_PACK")]
    BuyPack {
        #[serde(rename = "cliente_id")]
        client_id: ClientId,
    },
    #[serde(rename = "PLAY_CARD")]
    PlayCard {
        #[serde(rename = "cliente_id")]
        client_id: ClientId,
        #[serde(rename = "carta_id")]
        card_id: CardId,
    },
    #[serde(rename = "CHAT")]
    Chat {
        #[serde(rename = "cliente_id")]
        client_id: ClientId,
        #[serde(rename = "texto")]
        text: String,
    },
    #[serde(rename = "TRADE")]
    Trade {
        #[serde(rename = "cliente_id")]
        client_id: ClientId,
        #[serde(rename = "alvo_id")]
        target_id: ClientId,
        #[serde(rename = "minha_carta_id")]
        offered_card_id: CardId,
        #[serde(rename = "carta_desejada_id")]
        desired_card_id: CardId,
    },
}

impl ClientCommand {
    /// The client the command claims to originate from, when it carries one.
    #[must_use]
    pub fn client_id(&self) -> Option<ClientId> {
        match self {
            ClientCommand::Login { .. } => None,
            ClientCommand::Enqueue { client_id }
            | ClientCommand::BuyPack { client_id }
            | ClientCommand::PlayCard { client_id, .. }
            | ClientCommand::Chat { client_id, .. }
            | ClientCommand::Trade { client_id, .. } => Some(*client_id),
        }
    }
}

/// Snapshot of the visible game state pushed to clients on every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameUpdate {
    #[serde(rename = "partida_id")]
    pub match_id: Option<MatchId>,
    #[serde(rename = "rodada")]
    pub round: u32,
    /// Hand sizes keyed by player display name.
    #[serde(rename = "contagem_cartas")]
    pub hand_counts: HashMap<String, usize>,
    /// Cards currently on the table, keyed by player display name.
    #[serde(rename = "mesa")]
    pub table: HashMap<String, Card>,
    /// Winner of the last resolved trick, if any.
    #[serde(rename = "vencedor_jogada")]
    pub last_trick_winner: Option<String>,
    /// Running round points, keyed by player display name.
    #[serde(rename = "pontos")]
    pub scores: HashMap<String, u32>,
    #[serde(rename = "turno_de")]
    pub turn_owner: Option<ClientId>,
    #[serde(rename = "mensagem")]
    pub message: String,
}

/// Outbound client event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "comando", content = "dados")]
pub enum ClientEvent {
    #[serde(rename = "LOGIN_OK")]
    LoginOk {
        #[serde(rename = "cliente_id")]
        client_id: ClientId,
        #[serde(rename = "servidor")]
        server: String,
    },
    #[serde(rename = "WAITING_OPPONENT")]
    WaitingOpponent {
        #[serde(rename = "mensagem")]
        message: String,
    },
    #[serde(rename = "MATCH_FOUND")]
    MatchFound {
        #[serde(rename = "partida_id")]
        match_id: MatchId,
        #[serde(rename = "oponente_id")]
        opponent_id: ClientId,
        #[serde(rename = "oponente_nome")]
        opponent_name: String,
    },
    #[serde(rename = "MATCH_STARTED")]
    MatchStarted {
        #[serde(rename = "partida_id")]
        match_id: MatchId,
        #[serde(rename = "turno_de")]
        turn_owner: ClientId,
        #[serde(rename = "rodada")]
        round: u32,
    },
    #[serde(rename = "UPDATE")]
    Update(GameUpdate),
    #[serde(rename = "MATCH_ENDED")]
    MatchEnded {
        #[serde(rename = "partida_id")]
        match_id: MatchId,
        /// Winner's display name; `None` is a draw.
        #[serde(rename = "vencedor")]
        winner: Option<String>,
    },
    #[serde(rename = "CHAT_RECEIVED")]
    ChatReceived {
        #[serde(rename = "nome_jogador")]
        player_name: String,
        #[serde(rename = "texto")]
        text: String,
    },
    #[serde(rename = "PACK_RESULT")]
    PackResult {
        #[serde(rename = "cartas")]
        cards: Vec<Card>,
        #[serde(rename = "estoque_restante")]
        remaining_stock: usize,
    },
    #[serde(rename = "TRADE_DONE")]
    TradeDone {
        #[serde(rename = "mensagem")]
        message: String,
    },
    #[serde(rename = "ERROR")]
    Error {
        #[serde(rename = "mensagem")]
        message: String,
    },
}

impl ClientEvent {
    /// Build an ERROR event from an internal failure without leaking
    /// cluster internals.
    #[must_use]
    pub fn from_error(err: &crate::error::DuelError) -> Self {
        ClientEvent::Error {
            message: err.client_message(),
        }
    }
}

/// Decode an inbound envelope.
pub fn parse_command(payload: &[u8]) -> Result<ClientCommand, crate::error::DuelError> {
    serde_json::from_slice(payload).map_err(|e| crate::error::DuelError::MalformedMessage {
        reason: format!("bad client envelope: {e}"),
        source: Some(Box::new(e)),
    })
}
