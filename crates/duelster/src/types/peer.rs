use serde::{Deserialize, Serialize};
use std::fmt;

/// Network address of a cluster peer (host:port).
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Base URL for the peer's HTTP RPC surface.
    #[must_use]
    pub fn http_base(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl std::str::FromStr for PeerAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("peer address '{s}' is missing a port"))?;
        if host.is_empty() {
            return Err(format!("peer address '{s}' is missing a host"));
        }
        let port: u16 = port
            .parse()
            .map_err(|e| format!("peer address '{s}' has an invalid port: {e}"))?;
        Ok(Self::new(host, port))
    }
}
