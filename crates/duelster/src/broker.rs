//! Broker adapter: the bridge between clients and their home server.
//!
//! Clients publish commands on `clients/{id}/login`, `clients/{id}/enqueue`
//! and `matches/{id}/commands`; the server pushes events on
//! `clients/{id}/events` and `matches/{id}/events`. Delivery is at-most-once
//! and FIFO per publisher/topic; duplicates are tolerated upstream.
//!
//! Outbound publishing goes through the [`ClientBus`] trait so tests can
//! capture traffic with an in-memory bus.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::DuelError;
use crate::protocol::{parse_command, ClientCommand, ClientEvent};
use crate::types::MatchId;

/// Where an inbound client message arrived.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundTopic {
    /// `clients/{temp_id}/login`; the id is the client's pre-login topic key.
    Login { temp_id: String },
    /// `clients/{id}/enqueue`.
    Enqueue,
    /// `matches/{id}/commands`.
    MatchCommands { match_id: MatchId },
}

/// Receiver for inbound client commands, implemented by the node.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn handle_inbound(&self, topic: InboundTopic, command: ClientCommand);
}

/// Outbound client channel.
#[async_trait]
pub trait ClientBus: Send + Sync {
    /// Publish to `clients/{client}/events`. The key is a string because
    /// pre-login clients are addressed by a temporary topic id.
    async fn publish_to_client(&self, client: &str, event: &ClientEvent) -> Result<(), DuelError>;

    /// Publish to `matches/{id}/events`.
    async fn publish_to_match(
        &self,
        match_id: MatchId,
        event: &ClientEvent,
    ) -> Result<(), DuelError>;
}

const SUBSCRIPTIONS: [&str; 3] = [
    "clients/+/login",
    "clients/+/enqueue",
    "matches/+/commands",
];

/// MQTT-backed [`ClientBus`].
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
}

#[async_trait]
impl ClientBus for MqttBus {
    async fn publish_to_client(&self, client: &str, event: &ClientEvent) -> Result<(), DuelError> {
        self.publish(&format!("clients/{client}/events"), event).await
    }

    async fn publish_to_match(
        &self,
        match_id: MatchId,
        event: &ClientEvent,
    ) -> Result<(), DuelError> {
        self.publish(&format!("matches/{match_id}/events"), event)
            .await
    }
}

impl MqttBus {
    async fn publish(&self, topic: &str, event: &ClientEvent) -> Result<(), DuelError> {
        let payload = serde_json::to_vec(event).map_err(|e| DuelError::MalformedMessage {
            reason: format!("unserializable event: {e}"),
            source: Some(Box::new(e)),
        })?;
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| DuelError::BrokerUnavailable {
                source: Some(Box::new(e)),
            })
    }
}

/// Connection to the broker: the publish half plus the event loop to drive.
pub struct BrokerConnection {
    pub bus: MqttBus,
    event_loop: EventLoop,
}

impl BrokerConnection {
    /// Connect and wait for the broker's ConnAck. Fails fast when the broker
    /// is unreachable so startup can abort with a fatal error.
    pub async fn connect(
        server_id: &str,
        broker_url: &str,
        timeout: Duration,
    ) -> Result<Self, DuelError> {
        let (host, port) = parse_broker_url(broker_url)?;
        let mut options = MqttOptions::new(format!("duelster-{server_id}"), host, port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut event_loop) = AsyncClient::new(options, 64);

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let event = tokio::time::timeout_at(deadline, event_loop.poll())
                .await
                .map_err(|_| DuelError::BrokerUnavailable { source: None })?
                .map_err(|e| DuelError::BrokerUnavailable {
                    source: Some(Box::new(e)),
                })?;
            if matches!(event, Event::Incoming(Packet::ConnAck(_))) {
                break;
            }
        }

        Ok(Self {
            bus: MqttBus { client },
            event_loop,
        })
    }

    /// Drive the broker loop: subscribe on every (re)connect, fan inbound
    /// messages into the sink, stop on cancellation.
    pub async fn run(mut self, sink: std::sync::Arc<dyn CommandSink>, cancel: CancellationToken) {
        // The ConnAck consumed in connect() never reaches this loop, so the
        // initial subscriptions are issued up front.
        Self::subscribe_all(&self.bus).await;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("broker loop stopping");
                    return;
                }
                event = self.event_loop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("broker (re)connected, subscribing");
                    Self::subscribe_all(&self.bus).await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    match decode_inbound(&publish.topic, &publish.payload) {
                        Ok((topic, command)) => sink.handle_inbound(topic, command).await,
                        Err(e) => {
                            tracing::warn!(topic = %publish.topic, error = %e, "dropping inbound message");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "broker connection error, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    async fn subscribe_all(bus: &MqttBus) {
        for topic in SUBSCRIPTIONS {
            if let Err(e) = bus.client.subscribe(topic, QoS::AtMostOnce).await {
                tracing::warn!(topic, error = %e, "subscribe failed");
            }
        }
    }
}

/// Parse `tcp://host:port` (scheme optional) into host and port.
fn parse_broker_url(url: &str) -> Result<(String, u16), DuelError> {
    let stripped = url
        .strip_prefix("tcp://")
        .or_else(|| url.strip_prefix("mqtt://"))
        .unwrap_or(url);
    let (host, port) = stripped
        .rsplit_once(':')
        .ok_or_else(|| DuelError::InvalidConfig {
            reason: format!("broker url '{url}' is missing a port"),
        })?;
    let port: u16 = port.parse().map_err(|_| DuelError::InvalidConfig {
        reason: format!("broker url '{url}' has an invalid port"),
    })?;
    Ok((host.to_string(), port))
}

/// Decode a publish into its routing topic and parsed command.
fn decode_inbound(topic: &str, payload: &[u8]) -> Result<(InboundTopic, ClientCommand), DuelError> {
    let segments: Vec<&str> = topic.split('/').collect();
    let inbound = match segments.as_slice() {
        ["clients", temp_id, "login"] => InboundTopic::Login {
            temp_id: (*temp_id).to_string(),
        },
        ["clients", _, "enqueue"] => InboundTopic::Enqueue,
        ["matches", match_id, "commands"] => InboundTopic::MatchCommands {
            match_id: match_id.parse().map_err(|e| DuelError::MalformedMessage {
                reason: format!("bad match id in topic '{topic}': {e}"),
                source: None,
            })?,
        },
        _ => {
            return Err(DuelError::MalformedMessage {
                reason: format!("unroutable topic '{topic}'"),
                source: None,
            })
        }
    };
    Ok((inbound, parse_command(payload)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_url_forms() {
        assert_eq!(
            parse_broker_url("tcp://broker1:1883").unwrap(),
            ("broker1".to_string(), 1883)
        );
        assert_eq!(
            parse_broker_url("broker1:1883").unwrap(),
            ("broker1".to_string(), 1883)
        );
        assert!(parse_broker_url("broker1").is_err());
    }

    #[test]
    fn decode_login_topic() {
        let payload = br#"{"comando":"LOGIN","dados":{"nome":"alice"}}"#;
        let (topic, command) = decode_inbound("clients/tmp-1/login", payload).unwrap();
        assert_eq!(
            topic,
            InboundTopic::Login {
                temp_id: "tmp-1".to_string()
            }
        );
        assert!(matches!(command, ClientCommand::Login { .. }));
    }

    #[test]
    fn decode_match_topic() {
        let match_id = MatchId::new();
        let client_id = crate::types::ClientId::new();
        let payload = format!(
            r#"{{"comando":"CHAT","dados":{{"cliente_id":"{client_id}","texto":"oi"}}}}"#
        );
        let (topic, _) =
            decode_inbound(&format!("matches/{match_id}/commands"), payload.as_bytes()).unwrap();
        assert_eq!(topic, InboundTopic::MatchCommands { match_id });
    }

    #[test]
    fn unroutable_topics_rejected() {
        let payload = br#"{"comando":"LOGIN","dados":{"nome":"x"}}"#;
        assert!(decode_inbound("other/topic", payload).is_err());
        assert!(decode_inbound("matches/not-a-uuid/commands", payload).is_err());
    }
}
