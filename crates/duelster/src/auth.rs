//! Peer authentication and event integrity.
//!
//! Peer tokens bind the calling server's identity to the cluster secret:
//! `base64url(json claims).base64url(hmac_sha256(claims))`. Match events carry
//! an HMAC tag over their identifying fields so a replica can reject tampered
//! or cross-match payloads.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::DuelError;
use crate::types::{ClientId, MatchId};

type HmacSha256 = Hmac<Sha256>;

/// Token lifetime in seconds.
const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

#[derive(Serialize, Deserialize)]
struct Claims {
    /// Calling server's identity.
    sub: String,
    /// Issued-at, unix seconds.
    iat: i64,
}

/// Signs and verifies peer tokens and event tags with the cluster secret.
#[derive(Clone)]
pub struct ClusterAuth {
    secret: Vec<u8>,
}

impl ClusterAuth {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Issue a bearer token for this server.
    pub fn issue_token(&self, server_id: &str) -> String {
        let claims = Claims {
            sub: server_id.to_string(),
            iat: Utc::now().timestamp(),
        };
        // serializing a two-field struct cannot fail
        let payload = serde_json::to_vec(&claims).unwrap_or_default();
        let sig = self.mac(&payload);
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(sig)
        )
    }

    /// Verify a bearer token, returning the calling server's identity.
    pub fn verify_token(&self, token: &str) -> Result<String, DuelError> {
        let mut parts = token.split('.');
        let (p1, p2) = match (parts.next(), parts.next(), parts.next()) {
            (Some(p1), Some(p2), None) => (p1, p2),
            _ => {
                return Err(DuelError::Unauthorized {
                    reason: "malformed token".to_string(),
                })
            }
        };
        let payload = URL_SAFE_NO_PAD
            .decode(p1)
            .map_err(|_| DuelError::Unauthorized {
                reason: "malformed token payload".to_string(),
            })?;
        let sig = URL_SAFE_NO_PAD
            .decode(p2)
            .map_err(|_| DuelError::Unauthorized {
                reason: "malformed token signature".to_string(),
            })?;
        if sig != self.mac(&payload) {
            return Err(DuelError::Unauthorized {
                reason: "bad token signature".to_string(),
            });
        }
        let claims: Claims =
            serde_json::from_slice(&payload).map_err(|_| DuelError::Unauthorized {
                reason: "bad token claims".to_string(),
            })?;
        let age = Utc::now().timestamp() - claims.iat;
        if age > TOKEN_TTL_SECS {
            return Err(DuelError::Unauthorized {
                reason: "token expired".to_string(),
            });
        }
        Ok(claims.sub)
    }

    /// Integrity tag over an event's identifying fields:
    /// `seq|matchId|timestamp|type|playerId`.
    pub fn sign_event(
        &self,
        seq: u64,
        match_id: MatchId,
        timestamp_unix: i64,
        event_type: &str,
        player_id: ClientId,
    ) -> String {
        let data = format!("{seq}|{match_id}|{timestamp_unix}|{event_type}|{player_id}");
        URL_SAFE_NO_PAD.encode(self.mac(data.as_bytes()))
    }

    /// Check an event tag.
    pub fn verify_event(
        &self,
        seq: u64,
        match_id: MatchId,
        timestamp_unix: i64,
        event_type: &str,
        player_id: ClientId,
        signature: &str,
    ) -> Result<(), DuelError> {
        let expected = self.sign_event(seq, match_id, timestamp_unix, event_type, player_id);
        if expected == signature {
            Ok(())
        } else {
            Err(DuelError::InvalidSignature)
        }
    }

    fn mac(&self, data: &[u8]) -> [u8; 32] {
        // new_from_slice accepts any key length for HMAC
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key size");
        mac.update(data);
        mac.finalize().into_bytes().into()
    }
}
