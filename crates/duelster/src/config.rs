use crate::error::DuelError;
use crate::types::PeerAddr;
use std::time::Duration;

/// Configuration for a cluster node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Stable identifier used in logs and peer tokens.
    pub server_id: String,
    /// Address this node advertises to peers and binds the RPC surface to.
    pub addr: PeerAddr,
    /// MQTT broker endpoint, e.g. `tcp://broker1:1883`.
    pub broker_url: String,
    /// Static peer list (excluding this node).
    pub peers: Vec<PeerAddr>,
    /// Shared cluster secret for peer tokens and event signatures.
    pub cluster_secret: String,
    /// How often each node heartbeats every known peer. Default: 5s.
    pub heartbeat_interval: Duration,
    /// How often the staleness sweep runs. Default: 10s.
    pub sweep_interval: Duration,
    /// Silence threshold after which a peer is marked not-alive. Default: 15s.
    pub peer_stale_after: Duration,
    /// Base election timeout; must exceed worst-case heartbeat jitter by >= 5x.
    /// Default: 30s. Each timeout check applies +/-20% random jitter.
    pub election_timeout: Duration,
    /// Interval between global matchmaking probes. Default: 5s.
    pub probe_interval: Duration,
    /// Interval between stale-match sweeps. Default: 5s.
    pub match_sweep_interval: Duration,
    /// A match still awaiting both packs after this long is aborted and its
    /// seated players are returned to the queue. Default: 30s.
    pub ready_timeout: Duration,
    /// Deadline for matchmaking probe RPCs. Default: 3s.
    pub probe_rpc_timeout: Duration,
    /// Deadline for event submission and replication RPCs. Default: 5s.
    pub event_rpc_timeout: Duration,
    /// Deadline for cluster registration RPCs. Default: 10s.
    pub register_rpc_timeout: Duration,
    /// Cards per allocated pack. Default: 5.
    pub pack_size: usize,
}

impl NodeConfig {
    /// Read configuration from the environment.
    ///
    /// `SERVER_ID`, `ADDR` and `BROKER` are required; `PEERS` is a
    /// comma-separated peer list and may be empty for a single-node cluster.
    /// `CLUSTER_SECRET` overrides the development default.
    pub fn from_env() -> Result<Self, DuelError> {
        let server_id = require_env("SERVER_ID")?;
        let addr: PeerAddr = require_env("ADDR")?
            .parse()
            .map_err(|reason| DuelError::InvalidConfig { reason })?;
        let broker_url = require_env("BROKER")?;

        let mut peers = Vec::new();
        if let Ok(raw) = std::env::var("PEERS") {
            for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let peer: PeerAddr = part
                    .parse()
                    .map_err(|reason| DuelError::InvalidConfig { reason })?;
                if peer != addr {
                    peers.push(peer);
                }
            }
        }

        let cluster_secret = std::env::var("CLUSTER_SECRET")
            .unwrap_or_else(|_| "duelster_dev_secret".to_string());

        let config = Self {
            server_id,
            addr,
            broker_url,
            peers,
            cluster_secret,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), DuelError> {
        if self.server_id.is_empty() {
            return Err(DuelError::InvalidConfig {
                reason: "server_id must not be empty".to_string(),
            });
        }
        if self.broker_url.is_empty() {
            return Err(DuelError::InvalidConfig {
                reason: "broker_url must not be empty".to_string(),
            });
        }
        if self.cluster_secret.is_empty() {
            return Err(DuelError::InvalidConfig {
                reason: "cluster_secret must not be empty".to_string(),
            });
        }
        if self.pack_size == 0 {
            return Err(DuelError::InvalidConfig {
                reason: "pack_size must be >= 1".to_string(),
            });
        }
        if self.heartbeat_interval.is_zero() {
            return Err(DuelError::InvalidConfig {
                reason: "heartbeat_interval must be > 0".to_string(),
            });
        }
        if self.election_timeout < self.heartbeat_interval * 5 {
            return Err(DuelError::InvalidConfig {
                reason: format!(
                    "election_timeout ({:?}) must be at least 5x heartbeat_interval ({:?})",
                    self.election_timeout, self.heartbeat_interval
                ),
            });
        }
        if self.peer_stale_after <= self.heartbeat_interval {
            return Err(DuelError::InvalidConfig {
                reason: "peer_stale_after must exceed heartbeat_interval".to_string(),
            });
        }
        if self.ready_timeout.is_zero() || self.match_sweep_interval.is_zero() {
            return Err(DuelError::InvalidConfig {
                reason: "match sweep durations must be > 0".to_string(),
            });
        }
        Ok(())
    }

    /// Total number of configured cluster members, including this node.
    /// Elections require a strict majority of this count.
    #[must_use]
    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }
}

fn require_env(key: &str) -> Result<String, DuelError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(DuelError::InvalidConfig {
            reason: format!("environment variable {key} is required"),
        }),
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            server_id: "server".to_string(),
            addr: PeerAddr::new("127.0.0.1", 8080),
            broker_url: "tcp://127.0.0.1:1883".to_string(),
            peers: Vec::new(),
            cluster_secret: "duelster_dev_secret".to_string(),
            heartbeat_interval: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(10),
            peer_stale_after: Duration::from_secs(15),
            election_timeout: Duration::from_secs(30),
            probe_interval: Duration::from_secs(5),
            match_sweep_interval: Duration::from_secs(5),
            ready_timeout: Duration::from_secs(30),
            probe_rpc_timeout: Duration::from_secs(3),
            event_rpc_timeout: Duration::from_secs(5),
            register_rpc_timeout: Duration::from_secs(10),
            pack_size: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = NodeConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.sweep_interval, Duration::from_secs(10));
        assert_eq!(config.peer_stale_after, Duration::from_secs(15));
        assert_eq!(config.election_timeout, Duration::from_secs(30));
        assert_eq!(config.pack_size, 5);
        assert_eq!(config.cluster_size(), 1);
    }

    #[test]
    fn default_config_is_valid() {
        NodeConfig::default().validate().unwrap();
    }

    #[test]
    fn validate_empty_server_id() {
        let config = NodeConfig {
            server_id: String::new(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server_id"), "got: {err}");
    }

    #[test]
    fn validate_election_timeout_bound() {
        let config = NodeConfig {
            election_timeout: Duration::from_secs(10),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("election_timeout"), "got: {err}");
    }

    #[test]
    fn validate_zero_pack_size() {
        let config = NodeConfig {
            pack_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn cluster_size_counts_self() {
        let config = NodeConfig {
            peers: vec![PeerAddr::new("s2", 8080), PeerAddr::new("s3", 8080)],
            ..Default::default()
        };
        assert_eq!(config.cluster_size(), 3);
    }
}
