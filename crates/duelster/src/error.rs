use crate::engine::state::MatchPhase;
use crate::types::{CardId, ClientId, MatchId, PeerAddr};

/// Errors that can occur in the duel cluster.
#[derive(Debug, thiserror::Error)]
pub enum DuelError {
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("malformed message: {reason}")]
    MalformedMessage {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("peer unavailable: {address}")]
    PeerUnavailable {
        address: PeerAddr,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("broker unavailable")]
    BrokerUnavailable {
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("no leader known for term {term}")]
    LeaderUnknown { term: u64 },

    #[error("not the leader; current leader is {leader:?}")]
    NotLeader { leader: Option<PeerAddr> },

    #[error("inventory exhausted")]
    InventoryExhausted,

    #[error("match {match_id} not found")]
    MatchNotFound { match_id: MatchId },

    #[error("player {client_id} not found")]
    PlayerNotFound { client_id: ClientId },

    #[error("player {client_id} is not seated in match {match_id}")]
    NotSeated {
        match_id: MatchId,
        client_id: ClientId,
    },

    #[error("match {match_id} is in phase {phase}, command not allowed")]
    WrongPhase {
        match_id: MatchId,
        phase: MatchPhase,
    },

    #[error("it is not {client_id}'s turn")]
    OutOfTurn { client_id: ClientId },

    #[error("player {client_id} already has a card on the table this trick")]
    AlreadyPlayed { client_id: ClientId },

    #[error("card {card_id} is not in the player's hand")]
    CardNotInHand { card_id: CardId },

    #[error("stale event: proposed seq {proposed} <= current seq {current}")]
    StaleEvent { proposed: u64, current: u64 },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("node is shutting down")]
    ShuttingDown,
}

impl DuelError {
    /// True for failures the caller may retry against the same or another
    /// peer: transport-level errors and missing-leader windows.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DuelError::PeerUnavailable { .. } | DuelError::LeaderUnknown { .. }
        )
    }

    /// Message safe to surface to a client. Never leaks peer addresses or
    /// internal state.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            DuelError::InventoryExhausted => "inventory_exhausted".to_string(),
            DuelError::OutOfTurn { .. } => "Não é sua vez de jogar.".to_string(),
            DuelError::AlreadyPlayed { .. } => "Você já jogou nesta rodada.".to_string(),
            DuelError::CardNotInHand { .. } => "Carta não encontrada na sua mão.".to_string(),
            DuelError::WrongPhase { .. } => "A partida não está em andamento.".to_string(),
            DuelError::PeerUnavailable { .. } | DuelError::LeaderUnknown { .. } => {
                "Serviço temporariamente indisponível. Tente novamente.".to_string()
            }
            _ => "Comando rejeitado.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = DuelError::InvalidConfig {
            reason: "SERVER_ID missing".into(),
        };
        assert_eq!(err.to_string(), "invalid configuration: SERVER_ID missing");

        let err = DuelError::StaleEvent {
            proposed: 3,
            current: 7,
        };
        assert_eq!(err.to_string(), "stale event: proposed seq 3 <= current seq 7");
    }

    #[test]
    fn retryable_classification() {
        assert!(DuelError::PeerUnavailable {
            address: PeerAddr::new("s1", 8080),
            source: None,
        }
        .is_retryable());
        assert!(DuelError::LeaderUnknown { term: 2 }.is_retryable());
        assert!(!DuelError::InventoryExhausted.is_retryable());
    }

    #[test]
    fn client_messages_never_leak_addresses() {
        let err = DuelError::PeerUnavailable {
            address: PeerAddr::new("internal-host", 8080),
            source: None,
        };
        assert!(!err.client_message().contains("internal-host"));
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DuelError>();
    }
}
