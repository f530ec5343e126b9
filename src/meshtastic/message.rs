//! Decoded mesh traffic as published on the event bus.

use crate::meshtastic::node::{DeviceMetrics, Node, NodeHandle, Position};
use crate::meshtastic::node_list::NodeList;
use crate::meshtastic::session::{ConnectedNode, DeliveryStatus, SessionError};
use crate::protobuf::meshtastic_generated as proto;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Default wait for a delivery acknowledgment.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    NodeInfo,
    Position,
    NeighborInfo,
    Routing,
    Traceroute,
    DeviceTelemetry,
    EnvironmentTelemetry,
    HealthTelemetry,
    AirQualityTelemetry,
    PowerTelemetry,
    LocalStatsTelemetry,
    Other,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text message",
            MessageType::NodeInfo => "node info",
            MessageType::Position => "position",
            MessageType::NeighborInfo => "neighbor info",
            MessageType::Routing => "routing",
            MessageType::Traceroute => "traceroute",
            MessageType::DeviceTelemetry => "device telemetry",
            MessageType::EnvironmentTelemetry => "environment telemetry",
            MessageType::HealthTelemetry => "health telemetry",
            MessageType::AirQualityTelemetry => "air quality telemetry",
            MessageType::PowerTelemetry => "power telemetry",
            MessageType::LocalStatsTelemetry => "local stats telemetry",
            MessageType::Other => "other",
        }
    }

    pub fn is_telemetry(&self) -> bool {
        matches!(
            self,
            MessageType::DeviceTelemetry
                | MessageType::EnvironmentTelemetry
                | MessageType::HealthTelemetry
                | MessageType::AirQualityTelemetry
                | MessageType::PowerTelemetry
                | MessageType::LocalStatsTelemetry
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded content of a mesh packet. The variant determines the [`MessageType`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    NodeInfo(proto::User),
    Position(Position),
    NeighborInfo(proto::NeighborInfo),
    Routing(proto::Routing),
    Traceroute(proto::RouteDiscovery),
    DeviceTelemetry(DeviceMetrics),
    EnvironmentTelemetry(proto::EnvironmentMetrics),
    HealthTelemetry(proto::HealthMetrics),
    AirQualityTelemetry(proto::AirQualityMetrics),
    PowerTelemetry(proto::PowerMetrics),
    LocalStatsTelemetry(proto::LocalStats),
    Other { port: i32, raw: Bytes },
}

impl Payload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Payload::Text(_) => MessageType::Text,
            Payload::NodeInfo(_) => MessageType::NodeInfo,
            Payload::Position(_) => MessageType::Position,
            Payload::NeighborInfo(_) => MessageType::NeighborInfo,
            Payload::Routing(_) => MessageType::Routing,
            Payload::Traceroute(_) => MessageType::Traceroute,
            Payload::DeviceTelemetry(_) => MessageType::DeviceTelemetry,
            Payload::EnvironmentTelemetry(_) => MessageType::EnvironmentTelemetry,
            Payload::HealthTelemetry(_) => MessageType::HealthTelemetry,
            Payload::AirQualityTelemetry(_) => MessageType::AirQualityTelemetry,
            Payload::PowerTelemetry(_) => MessageType::PowerTelemetry,
            Payload::LocalStatsTelemetry(_) => MessageType::LocalStatsTelemetry,
            Payload::Other { .. } => MessageType::Other,
        }
    }

    /// One-line description used for the sender's message log and console output.
    pub fn summary(&self) -> String {
        match self {
            Payload::Text(text) => text.clone(),
            Payload::NodeInfo(user) => format!("node info: {} ({})", user.long_name, user.short_name),
            Payload::Position(p) => format!("position: {}", p),
            Payload::NeighborInfo(info) => format!("neighbor info: {} neighbors", info.neighbors.len()),
            Payload::Routing(r) => match &r.variant {
                Some(proto::routing::Variant::ErrorReason(e)) => {
                    let reason = proto::routing::Error::try_from(*e)
                        .map(|e| e.as_str_name())
                        .unwrap_or("UNKNOWN");
                    format!("routing: {}", reason)
                }
                _ => "routing".to_string(),
            },
            Payload::Traceroute(route) => {
                let hops: Vec<String> = route.route.iter().map(|id| format!("!{:08x}", id)).collect();
                if hops.is_empty() {
                    "traceroute: direct".to_string()
                } else {
                    format!("traceroute via {}", hops.join(" > "))
                }
            }
            Payload::DeviceTelemetry(m) => {
                let mut parts = Vec::new();
                if let Some(b) = m.battery_level {
                    parts.push(format!("battery {}%", b));
                }
                if let Some(v) = m.voltage {
                    parts.push(format!("{:.2}V", v));
                }
                if let Some(u) = m.channel_utilization {
                    parts.push(format!("chutil {:.1}%", u));
                }
                format!("device telemetry: {}", parts.join(", "))
            }
            Payload::Other { port, raw } => {
                let name = proto::PortNum::try_from(*port)
                    .map(|p| p.as_str_name())
                    .unwrap_or("UNKNOWN_APP");
                format!("{} ({} bytes)", name, raw.len())
            }
            other => other.message_type().as_str().to_string(),
        }
    }
}

/// A decoded mesh packet together with the nodes it travelled between.
#[derive(Clone)]
pub struct Message {
    pub from: NodeHandle,
    pub to: NodeHandle,
    /// Session that received this message; `None` for messages built locally.
    pub receiving: Option<ConnectedNode>,
    pub timestamp: DateTime<Utc>,
    pub snr: f32,
    pub hops_away: u32,
    pub channel: u32,
    pub packet_id: u32,
    pub payload: Payload,
}

impl Message {
    /// A message that did not come off a radio. Replies on it fail with `Detached`.
    pub fn synthetic(from: NodeHandle, to: NodeHandle, payload: Payload) -> Self {
        Self {
            from,
            to,
            receiving: None,
            timestamp: Utc::now(),
            snr: 0.0,
            hops_away: 0,
            channel: 0,
            packet_id: 0,
            payload,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }

    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Addressed to our own radio rather than broadcast or another node.
    pub fn is_private(&self) -> bool {
        self.to.read().connected
    }

    fn session(&self) -> Result<&ConnectedNode, SessionError> {
        self.receiving.as_ref().ok_or(SessionError::Detached)
    }

    /// Node table of the session that received this message.
    pub fn node_list(&self) -> Result<&NodeList, SessionError> {
        Ok(self.session()?.node_list())
    }

    /// Send `text` back to the sender without waiting for delivery. Returns the packet id.
    pub async fn reply(&self, text: &str) -> Result<u32, SessionError> {
        self.session()?.reply(self, text).await
    }

    /// Send `text` back to the sender and wait for the mesh to confirm delivery.
    pub async fn reply_blocking(
        &self,
        text: &str,
        timeout: Duration,
    ) -> Result<DeliveryStatus, SessionError> {
        let pending = self.session()?.reply_blocking(self, text, timeout).await?;
        Ok(pending.wait().await)
    }

    fn radio_metrics(&self, from: &Node) -> String {
        if from.connected {
            return String::new();
        }
        let snr = if self.snr != 0.0 {
            format!("SNR {:.2}, ", self.snr)
        } else {
            String::new()
        };
        let unit = if self.hops_away == 1 { "hop" } else { "hops" };
        format!(" ({}{} {} away)", snr, self.hops_away, unit)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let from = self.from.snapshot();
        let content = match &self.payload {
            Payload::Text(text) => text.clone(),
            other => format!("[{}]", other.summary()),
        };
        write!(
            f,
            "{} -> {}: {}{}",
            from,
            self.to,
            content,
            self.radio_metrics(&from)
        )
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("attached", &self.receiving.is_some())
            .field("timestamp", &self.timestamp)
            .field("snr", &self.snr)
            .field("hops_away", &self.hops_away)
            .field("channel", &self.channel)
            .field("packet_id", &self.packet_id)
            .field("payload", &self.payload)
            .finish()
    }
}
