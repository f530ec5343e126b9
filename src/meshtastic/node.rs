//! Nodes seen on the mesh and their history.

use crate::meshtastic::message::MessageType;
use crate::protobuf::meshtastic_generated as proto;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

pub const BROADCAST_ID: u32 = 0xFFFF_FFFF;
pub const UNKNOWN_ID: u32 = 0;

pub const DEFAULT_SHORT_NAME: &str = "UNKN";
pub const DEFAULT_LONG_NAME: &str = "Unknown node";

/// Convert a firmware epoch-seconds field, where 0 means "not set".
pub(crate) fn epoch(secs: u32) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    Utc.timestamp_opt(secs as i64, 0).single()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Position {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Metres above mean sea level.
    pub altitude: Option<i32>,
    pub time: Option<DateTime<Utc>>,
    pub sats_in_view: u32,
    pub precision_bits: u32,
}

impl Position {
    pub fn from_proto(p: &proto::Position) -> Self {
        let degrees = |v: Option<i32>| v.filter(|v| *v != 0).map(|v| v as f64 * 1e-7);
        Self {
            latitude: degrees(p.latitude_i),
            longitude: degrees(p.longitude_i),
            altitude: p.altitude.filter(|a| *a != 0),
            time: epoch(p.time).or_else(|| epoch(p.timestamp)),
            sats_in_view: p.sats_in_view,
            precision_bits: p.precision_bits,
        }
    }

    /// True when the report carries no location at all.
    pub fn is_empty(&self) -> bool {
        self.latitude.is_none() && self.longitude.is_none() && self.altitude.is_none()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => write!(f, "{:.5}, {:.5}", lat, lon)?,
            _ => write!(f, "no fix")?,
        }
        if let Some(alt) = self.altitude {
            write!(f, " @ {}m", alt)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceMetrics {
    pub battery_level: Option<u32>,
    pub voltage: Option<f32>,
    pub channel_utilization: Option<f32>,
    pub air_util_tx: Option<f32>,
    pub uptime_seconds: Option<u32>,
    pub recorded_at: DateTime<Utc>,
}

impl DeviceMetrics {
    pub fn from_proto(m: &proto::DeviceMetrics, recorded_at: DateTime<Utc>) -> Self {
        Self {
            battery_level: m.battery_level,
            voltage: m.voltage,
            channel_utilization: m.channel_utilization,
            air_util_tx: m.air_util_tx,
            uptime_seconds: m.uptime_seconds,
            recorded_at,
        }
    }
}

/// One entry of a node's reported neighbor list.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub id: u32,
    pub node: WeakNode,
    pub snr: f32,
    pub reported_at: Option<DateTime<Utc>>,
}

/// What a node sent us, kept on the sender.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub timestamp: DateTime<Utc>,
    pub to: u32,
    pub message_type: MessageType,
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: u32,
    pub short_name: String,
    pub long_name: String,
    pub hw_model: i32,
    pub role: i32,
    pub snr: f32,
    pub last_heard: Option<DateTime<Utc>>,
    pub hops_away: u32,
    pub is_licensed: bool,
    pub public_key: Option<Bytes>,
    pub positions: Vec<Position>,
    pub device_metrics: Vec<DeviceMetrics>,
    pub neighbors: Vec<Neighbor>,
    pub connected: bool,
    pub messages: Vec<MessageRecord>,
}

impl Node {
    pub fn new(id: u32) -> Self {
        Self::named(id, DEFAULT_SHORT_NAME, DEFAULT_LONG_NAME)
    }

    pub fn named(id: u32, short_name: &str, long_name: &str) -> Self {
        Self {
            id,
            short_name: short_name.to_string(),
            long_name: long_name.to_string(),
            hw_model: 0,
            role: 0,
            snr: 0.0,
            last_heard: None,
            hops_away: 0,
            is_licensed: false,
            public_key: None,
            positions: Vec::new(),
            device_metrics: Vec::new(),
            neighbors: Vec::new(),
            connected: false,
            messages: Vec::new(),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.id == BROADCAST_ID || self.id == UNKNOWN_ID
    }

    /// Merge a full node database entry from the radio.
    pub fn apply_info(&mut self, info: &proto::NodeInfo) {
        if let Some(user) = &info.user {
            self.apply_user(user);
        }
        if let Some(position) = &info.position {
            self.push_position(Position::from_proto(position));
        }
        let heard = epoch(info.last_heard);
        if let Some(metrics) = &info.device_metrics {
            let at = heard.unwrap_or_else(Utc::now);
            self.device_metrics.push(DeviceMetrics::from_proto(metrics, at));
        }
        self.snr = info.snr;
        if let Some(hops) = info.hops_away {
            self.hops_away = hops;
        }
        if heard.is_some() {
            self.last_heard = heard;
        }
    }

    /// Merge user identity. Empty strings and unset enums never clobber known values; the
    /// licensed flag is always taken as sent.
    pub fn apply_user(&mut self, user: &proto::User) {
        if !user.short_name.trim().is_empty() {
            self.short_name = user.short_name.trim().to_string();
        }
        if !user.long_name.trim().is_empty() {
            self.long_name = user.long_name.trim().to_string();
        }
        if user.hw_model != 0 {
            self.hw_model = user.hw_model;
        }
        if user.role != 0 {
            self.role = user.role;
        }
        self.is_licensed = user.is_licensed;
        if !user.public_key.is_empty() {
            self.public_key = Some(user.public_key.clone());
        }
    }

    /// Append to the position history; empty reports are dropped. Returns whether it was kept.
    pub fn push_position(&mut self, position: Position) -> bool {
        if position.is_empty() {
            return false;
        }
        self.positions.push(position);
        true
    }

    pub fn latest_position(&self) -> Option<&Position> {
        self.positions.last()
    }

    pub fn latest_device_metrics(&self) -> Option<&DeviceMetrics> {
        self.device_metrics.last()
    }

    pub fn hw_model_name(&self) -> &'static str {
        proto::HardwareModel::try_from(self.hw_model)
            .map(|m| m.as_str_name())
            .unwrap_or("UNKNOWN")
    }

    pub fn role_name(&self) -> &'static str {
        proto::config::device_config::Role::try_from(self.role)
            .map(|r| r.as_str_name())
            .unwrap_or("UNKNOWN")
    }

    /// `!xxxxxxxx`, the id notation used by Meshtastic apps.
    pub fn id_expression(&self) -> String {
        format!("!{:08x}", self.id)
    }
}

/// Flat, serializable view of a node for JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub id: String,
    pub short_name: String,
    pub long_name: String,
    pub hw_model: &'static str,
    pub role: &'static str,
    pub hops_away: u32,
    pub snr: f32,
    pub last_heard: Option<DateTime<Utc>>,
    pub connected: bool,
    pub position: Option<Position>,
    pub device_metrics: Option<DeviceMetrics>,
    pub neighbors: Vec<String>,
    pub messages_seen: usize,
}

impl From<&Node> for NodeSummary {
    fn from(n: &Node) -> Self {
        Self {
            id: n.id_expression(),
            short_name: n.short_name.clone(),
            long_name: n.long_name.clone(),
            hw_model: n.hw_model_name(),
            role: n.role_name(),
            hops_away: n.hops_away,
            snr: n.snr,
            last_heard: n.last_heard,
            connected: n.connected,
            position: n.latest_position().cloned(),
            device_metrics: n.latest_device_metrics().cloned(),
            neighbors: n.neighbors.iter().map(|nb| format!("!{:08x}", nb.id)).collect(),
            messages_seen: n.messages.len(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:<4}] {} ({})", self.short_name, self.long_name, self.id_expression())
    }
}

/// Human readable age of a timestamp, e.g. "5 minutes".
pub fn time_ago(at: DateTime<Utc>) -> String {
    let seconds = (Utc::now() - at).num_seconds().max(0);
    let plural = |n: i64, unit: &str| {
        if n == 1 {
            format!("one {}", unit)
        } else {
            format!("{} {}s", n, unit)
        }
    };
    if seconds < 60 {
        return plural(seconds, "second");
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return plural(minutes, "minute");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return plural(hours, "hour");
    }
    plural(hours / 24, "day")
}

/// Shared reference to a node. Cloning shares identity; updates are visible to every holder.
#[derive(Clone)]
pub struct NodeHandle {
    id: u32,
    inner: Arc<RwLock<Node>>,
}

impl NodeHandle {
    pub fn new(node: Node) -> Self {
        Self {
            id: node.id,
            inner: Arc::new(RwLock::new(node)),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Node> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Node> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn snapshot(&self) -> Node {
        self.read().clone()
    }

    pub fn downgrade(&self) -> WeakNode {
        WeakNode {
            id: self.id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &NodeHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHandle(!{:08x})", self.id)
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.read(), f)
    }
}

/// Non-owning node reference, used where nodes point at each other.
#[derive(Clone)]
pub struct WeakNode {
    id: u32,
    inner: Weak<RwLock<Node>>,
}

impl WeakNode {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn upgrade(&self) -> Option<NodeHandle> {
        self.inner.upgrade().map(|inner| NodeHandle { id: self.id, inner })
    }
}

impl fmt::Debug for WeakNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakNode(!{:08x})", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(short: &str, long: &str) -> proto::User {
        proto::User {
            short_name: short.into(),
            long_name: long.into(),
            hw_model: proto::HardwareModel::HeltecV3 as i32,
            role: proto::config::device_config::Role::Router as i32,
            ..Default::default()
        }
    }

    #[test]
    fn new_node_has_defaults() {
        let n = Node::new(0x1234);
        assert_eq!(n.short_name, "UNKN");
        assert_eq!(n.long_name, "Unknown node");
        assert_eq!(n.hops_away, 0);
        assert!(!n.is_licensed);
        assert!(!n.connected);
        assert_eq!(n.to_string(), "[UNKN] Unknown node (!00001234)");
    }

    #[test]
    fn empty_user_fields_do_not_overwrite() {
        let mut n = Node::new(1);
        n.apply_user(&user("ABCD", "Alpha"));
        n.apply_user(&proto::User::default());
        assert_eq!(n.short_name, "ABCD");
        assert_eq!(n.long_name, "Alpha");
        assert_eq!(n.hw_model_name(), "HELTEC_V3");
        assert_eq!(n.role_name(), "ROUTER");
    }

    #[test]
    fn licensed_flag_follows_latest_user() {
        let mut n = Node::new(1);
        n.apply_user(&proto::User {
            is_licensed: true,
            ..user("HAM", "Licensed")
        });
        assert!(n.is_licensed);
        n.apply_user(&user("HAM", "Licensed"));
        assert!(!n.is_licensed);
        assert_eq!(n.short_name, "HAM");
    }

    #[test]
    fn position_scaling_and_emptiness() {
        let p = Position::from_proto(&proto::Position {
            latitude_i: Some(523_000_000),
            longitude_i: Some(49_000_000),
            altitude: Some(12),
            ..Default::default()
        });
        assert!((p.latitude.unwrap() - 52.3).abs() < 1e-9);
        assert!((p.longitude.unwrap() - 4.9).abs() < 1e-9);
        assert!(!p.is_empty());

        let empty = Position::from_proto(&proto::Position::default());
        assert!(empty.is_empty());
        let mut n = Node::new(1);
        assert!(!n.push_position(empty));
        assert!(n.push_position(p));
        assert_eq!(n.positions.len(), 1);
    }

    #[test]
    fn apply_info_appends_history_and_overwrites_scalars() {
        let info = proto::NodeInfo {
            num: 7,
            user: Some(user("SEVN", "Seven")),
            position: Some(proto::Position {
                latitude_i: Some(1),
                longitude_i: Some(2),
                ..Default::default()
            }),
            snr: 6.5,
            last_heard: 1_700_000_000,
            device_metrics: Some(proto::DeviceMetrics {
                battery_level: Some(80),
                ..Default::default()
            }),
            hops_away: Some(2),
            ..Default::default()
        };
        let mut n = Node::new(7);
        n.apply_info(&info);
        let after_first = (n.short_name.clone(), n.role, n.hw_model);
        n.apply_info(&info);
        assert_eq!((n.short_name.clone(), n.role, n.hw_model), after_first);
        assert_eq!(n.positions.len(), 2);
        assert_eq!(n.device_metrics.len(), 2);
        assert_eq!(n.hops_away, 2);
        assert_eq!(n.snr, 6.5);
        assert_eq!(n.last_heard, epoch(1_700_000_000));
    }

    #[test]
    fn handles_share_identity() {
        let a = NodeHandle::new(Node::new(5));
        let b = a.clone();
        b.write().long_name = "Changed".into();
        assert_eq!(a.read().long_name, "Changed");
        assert!(a.ptr_eq(&b));

        let weak = a.downgrade();
        assert!(weak.upgrade().is_some());
        drop(a);
        drop(b);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn summary_serializes_latest_state() {
        let mut n = Node::named(0xabc, "ABC", "Alpha Bravo");
        n.apply_user(&user("ABC", "Alpha Bravo"));
        n.push_position(Position {
            latitude: Some(1.0),
            longitude: Some(2.0),
            ..Default::default()
        });
        n.push_position(Position {
            latitude: Some(3.0),
            longitude: Some(4.0),
            ..Default::default()
        });
        let json = serde_json::to_value(NodeSummary::from(&n)).unwrap();
        assert_eq!(json["id"], "!00000abc");
        assert_eq!(json["hw_model"], "HELTEC_V3");
        assert_eq!(json["role"], "ROUTER");
        assert_eq!(json["position"]["latitude"], 3.0);
        assert!(json["device_metrics"].is_null());
    }

    #[test]
    fn time_ago_buckets() {
        let now = Utc::now();
        assert_eq!(time_ago(now - chrono::Duration::seconds(1)), "one second");
        assert_eq!(time_ago(now - chrono::Duration::minutes(5)), "5 minutes");
        assert_eq!(time_ago(now - chrono::Duration::hours(1)), "one hour");
        assert_eq!(time_ago(now - chrono::Duration::days(3)), "3 days");
    }
}
