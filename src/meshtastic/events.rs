//! Typed publish/subscribe between the session read loop and its consumers.
//!
//! `publish` never waits on a handler: each invocation runs on its own tokio task, so a slow
//! or failing subscriber cannot stall packet ingestion.

use crate::meshtastic::message::{Message, MessageType};
use crate::meshtastic::node::NodeHandle;
use crate::meshtastic::session::ConnectedNode;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    // Connection
    Connected,
    Disconnected,

    // Messages
    AnyMessage,
    TextMessage,
    NodeInfo,
    Position,
    Telemetry,
    NeighborInfo,
    Routing,
    TraceRoute,
    DeviceTelemetry,
    EnvironmentTelemetry,
    HealthTelemetry,
    AirQualityTelemetry,
    PowerTelemetry,
    LocalStatsTelemetry,

    // Nodes
    NodeDiscovered,
    NodeUpdated,
}

impl Topic {
    /// The type-specific topic for a message, if it has one.
    pub fn for_message(t: MessageType) -> Option<Topic> {
        Some(match t {
            MessageType::Text => Topic::TextMessage,
            MessageType::NodeInfo => Topic::NodeInfo,
            MessageType::Position => Topic::Position,
            MessageType::NeighborInfo => Topic::NeighborInfo,
            MessageType::Routing => Topic::Routing,
            MessageType::Traceroute => Topic::TraceRoute,
            MessageType::DeviceTelemetry => Topic::DeviceTelemetry,
            MessageType::EnvironmentTelemetry => Topic::EnvironmentTelemetry,
            MessageType::HealthTelemetry => Topic::HealthTelemetry,
            MessageType::AirQualityTelemetry => Topic::AirQualityTelemetry,
            MessageType::PowerTelemetry => Topic::PowerTelemetry,
            MessageType::LocalStatsTelemetry => Topic::LocalStatsTelemetry,
            MessageType::Other => return None,
        })
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
type Handler<T> = Arc<dyn Fn(T) -> HandlerFuture + Send + Sync>;

pub struct EventBus<T> {
    handlers: RwLock<HashMap<Topic, Vec<Handler<T>>>>,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    pub fn subscribe<F, Fut>(&self, topic: Topic, handler: F)
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: Handler<T> = Arc::new(move |value| Box::pin(handler(value)));
        self.handlers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .entry(topic)
            .or_default()
            .push(handler);
    }

    /// Spawn every handler registered for `topic`. Returns how many were started.
    /// Must be called from within a tokio runtime.
    pub fn publish(&self, topic: Topic, value: T) -> usize {
        // Clone the list so handlers can subscribe without deadlocking on the registry.
        let handlers: Vec<Handler<T>> = self
            .handlers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&topic)
            .cloned()
            .unwrap_or_default();
        for handler in &handlers {
            tokio::spawn(handler(value.clone()));
        }
        handlers.len()
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&topic)
            .map_or(0, Vec::len)
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The three buses a session publishes on.
#[derive(Default)]
pub struct Events {
    pub connection: EventBus<ConnectedNode>,
    pub messages: EventBus<Message>,
    pub nodes: EventBus<NodeHandle>,
}

impl Events {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}
