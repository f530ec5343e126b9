//! Plugin and command definitions, independent of the technology that produced them.
//!
//! A [`Plugin`] groups [`Command`]s. Each command names the conversation [`State`] it is
//! valid in, what text (or event) [`Trigger`]s it, and the [`CommandHandler`] to run.
//! Handlers return the state the conversation moves to next.

use crate::meshtastic::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("failed to load plugin: {0}")]
    Load(String),
    #[error("command handler failed: {0}")]
    Handler(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Name of a conversation state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(String);

impl State {
    pub const MAIN: &'static str = "MAIN";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn main() -> Self {
        Self(Self::MAIN.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_main(&self) -> bool {
        self.0 == Self::MAIN
    }
}

impl Default for State {
    fn default() -> Self {
        Self::main()
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for State {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for State {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// What makes a command eligible for a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Whole message equals this text (trimmed, case-insensitive).
    Literal(String),
    /// Message starts with this text (trimmed, case-insensitive).
    Prefix(String),
    /// Any non-text message.
    CatchAllEvents,
    /// Any text message no specific command matched.
    CatchAllText,
}

impl Trigger {
    /// Specific match against message text. Catch-all triggers never match here.
    pub fn matches_text(&self, text: &str) -> bool {
        let text = text.trim().to_lowercase();
        match self {
            Trigger::Literal(lit) => text == lit.trim().to_lowercase(),
            Trigger::Prefix(prefix) => text.starts_with(&prefix.trim().to_lowercase()),
            Trigger::CatchAllEvents | Trigger::CatchAllText => false,
        }
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<State, PluginError>;
}

/// Adapts an async closure into a [`CommandHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> CommandHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<State, PluginError>> + Send,
{
    async fn handle(&self, message: &Message) -> Result<State, PluginError> {
        (self.0)(message.clone()).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn CommandHandler>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<State, PluginError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[derive(Clone)]
pub struct Command {
    pub state: State,
    pub triggers: Vec<Trigger>,
    pub description: String,
    /// Respond to direct messages.
    pub private: bool,
    /// Respond to channel (non-direct) messages.
    pub channel: bool,
    pub hidden: bool,
    pub handler: Arc<dyn CommandHandler>,
}

impl Command {
    /// A command in `MAIN` that answers direct messages only.
    pub fn new(triggers: Vec<Trigger>, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            state: State::main(),
            triggers,
            description: String::new(),
            private: true,
            channel: false,
            hidden: false,
            handler,
        }
    }

    pub fn in_state(mut self, state: impl Into<State>) -> Self {
        self.state = state.into();
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn on_channel(mut self, channel: bool) -> Self {
        self.channel = channel;
        self
    }

    pub fn on_private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    pub fn hide(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Valid in `state` for a message of the given privacy.
    pub fn accepts(&self, state: &State, is_private: bool) -> bool {
        self.state == *state && (self.private == is_private || self.channel == !is_private)
    }

    pub fn matches_text(&self, text: &str) -> bool {
        self.triggers.iter().any(|t| t.matches_text(text))
    }

    pub fn catches_events(&self) -> bool {
        self.triggers.contains(&Trigger::CatchAllEvents)
    }

    pub fn catches_text(&self) -> bool {
        self.triggers.contains(&Trigger::CatchAllText)
    }

    /// Keywords for help output: literals if any, otherwise prefixes.
    pub fn keywords(&self) -> Vec<&str> {
        let literals: Vec<&str> = self
            .triggers
            .iter()
            .filter_map(|t| match t {
                Trigger::Literal(s) => Some(s.as_str()),
                _ => None,
            })
            .collect();
        if !literals.is_empty() {
            return literals;
        }
        self.triggers
            .iter()
            .filter_map(|t| match t {
                Trigger::Prefix(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("state", &self.state)
            .field("triggers", &self.triggers)
            .field("description", &self.description)
            .field("private", &self.private)
            .field("channel", &self.channel)
            .field("hidden", &self.hidden)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Plugin {
    pub name: String,
    pub description: String,
    pub version: String,
    pub hidden: bool,
    pub states: Vec<State>,
    pub commands: Vec<Command>,
}

/// Produces a complete plugin set. Implementations must not return a partial set.
#[async_trait]
pub trait PluginLoader: Send + Sync {
    async fn load(&self) -> Result<Vec<Plugin>, PluginError>;
}
