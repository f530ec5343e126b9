//! Routes incoming messages to plugin commands and tracks the conversation state.

use crate::bot::plugin::{Command, Plugin, PluginError, PluginLoader, State};
use crate::logutil::escape_log;
use crate::meshtastic::events::{Events, Topic};
use crate::meshtastic::message::Message;
use crate::metrics;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

pub const HELP_GREETING: &str = "🤖👋 Hey there! I understand these commands:\n";

/// Whose conversation a state belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationScope {
    /// One state shared by everybody talking to the bot.
    #[default]
    Global,
    /// A separate state per sending node.
    PerNode,
}

#[derive(Debug)]
struct StateStore {
    scope: ConversationScope,
    global: State,
    per_node: HashMap<u32, State>,
}

impl StateStore {
    fn get(&self, node: u32) -> State {
        match self.scope {
            ConversationScope::Global => self.global.clone(),
            ConversationScope::PerNode => self.per_node.get(&node).cloned().unwrap_or_default(),
        }
    }

    fn set(&mut self, node: u32, state: State) {
        match self.scope {
            ConversationScope::Global => self.global = state,
            ConversationScope::PerNode => {
                if state.is_main() {
                    self.per_node.remove(&node);
                } else {
                    self.per_node.insert(node, state);
                }
            }
        }
    }
}

pub struct Chatbot {
    plugins: RwLock<Arc<Vec<Plugin>>>,
    states: Mutex<StateStore>,
}

impl Chatbot {
    pub fn new(scope: ConversationScope) -> Self {
        Self {
            plugins: RwLock::new(Arc::new(Vec::new())),
            states: Mutex::new(StateStore {
                scope,
                global: State::main(),
                per_node: HashMap::new(),
            }),
        }
    }

    fn store(&self) -> MutexGuard<'_, StateStore> {
        self.states.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// The plugin set currently in use.
    pub fn plugins(&self) -> Arc<Vec<Plugin>> {
        self.plugins.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn set_plugins(&self, plugins: Vec<Plugin>) {
        *self.plugins.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(plugins);
    }

    /// Load a fresh plugin set and swap it in. On error the current set stays.
    pub async fn reload(&self, loader: &dyn PluginLoader) -> Result<usize, PluginError> {
        let plugins = loader.load().await?;
        let count = plugins.len();
        self.set_plugins(plugins);
        info!("Loaded {} plugins", count);
        Ok(count)
    }

    /// Conversation state for messages from `node` (ignored in global scope).
    pub fn current_state(&self, node: u32) -> State {
        self.store().get(node)
    }

    pub fn set_state(&self, node: u32, state: State) {
        self.store().set(node, state);
    }

    /// Human-readable list of the visible plugins and commands.
    pub fn describe(&self) -> String {
        let mut out = String::from(HELP_GREETING);
        for plugin in self.plugins().iter().filter(|p| !p.hidden) {
            match (plugin.name.is_empty(), plugin.description.is_empty()) {
                (false, false) => out.push_str(&format!("\n{} - {}\n", plugin.name, plugin.description)),
                (false, true) => out.push_str(&format!("\n{}\n", plugin.name)),
                _ => {}
            }
            for command in plugin.commands.iter().filter(|c| !c.hidden) {
                let keywords = command.keywords();
                if keywords.is_empty() {
                    continue;
                }
                if command.description.is_empty() {
                    out.push_str(&format!("- {}\n", keywords.join(", ")));
                } else {
                    out.push_str(&format!("- {}: {}\n", keywords.join(", "), command.description));
                }
            }
        }
        out
    }

    /// Run every matching command for `message`. Returns how many handlers ran.
    pub async fn handle_message(&self, message: &Message) -> usize {
        let plugins = self.plugins();
        let sender = message.from.id();
        let state = self.current_state(sender);
        let is_private = message.is_private();

        let selected = match message.text() {
            None => eligible(&plugins, &state, is_private, |c| c.catches_events()),
            Some(text) => {
                let specific = eligible(&plugins, &state, is_private, |c| c.matches_text(text));
                if specific.is_empty() {
                    eligible(&plugins, &state, is_private, |c| c.catches_text())
                } else {
                    specific
                }
            }
        };

        for (plugin, command) in &selected {
            match command.handler.handle(message).await {
                Ok(next) => {
                    debug!("{} moved conversation from {} to {}", plugin.name, state, next);
                    self.set_state(sender, next);
                }
                Err(e) => {
                    metrics::inc_handler_errors();
                    warn!(
                        "Plugin {} failed on {:?}: {}",
                        plugin.name,
                        message.text().map(escape_log),
                        e
                    );
                }
            }
        }
        selected.len()
    }

    /// Feed every message published on `events` into this bot.
    pub fn attach(self: &Arc<Self>, events: &Events) {
        let bot = Arc::clone(self);
        events.messages.subscribe(Topic::AnyMessage, move |message: Message| {
            let bot = bot.clone();
            async move {
                bot.handle_message(&message).await;
            }
        });
    }
}

/// Commands valid for this state and privacy that `pick` accepts, in plugin then command order.
fn eligible<'a>(
    plugins: &'a [Plugin],
    state: &State,
    is_private: bool,
    pick: impl Fn(&Command) -> bool,
) -> Vec<(&'a Plugin, &'a Command)> {
    plugins
        .iter()
        .flat_map(|p| p.commands.iter().map(move |c| (p, c)))
        .filter(|(_, c)| c.accepts(state, is_private) && pick(c))
        .collect()
}

impl Default for Chatbot {
    fn default() -> Self {
        Self::new(ConversationScope::Global)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::plugin::{handler_fn, Trigger};
    use crate::meshtastic::message::Payload;
    use crate::meshtastic::node::{Node, NodeHandle, BROADCAST_ID};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn direct(text: &str) -> Message {
        let from = NodeHandle::new(Node::named(0x10, "ALFA", "Alpha"));
        let mut me = Node::named(0x20, "ME", "Local");
        me.connected = true;
        Message::synthetic(from, NodeHandle::new(me), Payload::Text(text.into()))
    }

    fn from_node(id: u32, text: &str) -> Message {
        let mut msg = direct(text);
        msg.from = NodeHandle::new(Node::new(id));
        msg
    }

    fn on_channel(text: &str) -> Message {
        let mut msg = direct(text);
        msg.to = NodeHandle::new(Node::named(BROADCAST_ID, "CAST", "Everyone"));
        msg
    }

    fn counting(counter: &Arc<AtomicUsize>, next: &'static str) -> Arc<dyn crate::bot::plugin::CommandHandler> {
        let counter = counter.clone();
        handler_fn(move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(State::new(next))
            }
        })
    }

    fn plugin(commands: Vec<Command>) -> Plugin {
        Plugin {
            name: "test".into(),
            commands,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn specific_match_wins_over_catch_all_text() {
        let hits = Arc::new(AtomicUsize::new(0));
        let fallback = Arc::new(AtomicUsize::new(0));
        let bot = Chatbot::default();
        bot.set_plugins(vec![plugin(vec![
            Command::new(vec![Trigger::Literal("/ping".into())], counting(&hits, "MAIN")),
            Command::new(vec![Trigger::CatchAllText], counting(&fallback, "MAIN")),
        ])]);

        assert_eq!(bot.handle_message(&direct(" /PING ")).await, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(fallback.load(Ordering::SeqCst), 0);

        assert_eq!(bot.handle_message(&direct("hello")).await, 1);
        assert_eq!(fallback.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_text_only_reaches_catch_all_events() {
        let events = Arc::new(AtomicUsize::new(0));
        let text = Arc::new(AtomicUsize::new(0));
        let bot = Chatbot::default();
        bot.set_plugins(vec![plugin(vec![
            Command::new(vec![Trigger::CatchAllEvents], counting(&events, "MAIN")),
            Command::new(vec![Trigger::CatchAllText], counting(&text, "MAIN")),
        ])]);
        let mut msg = direct("");
        msg.payload = Payload::Position(Default::default());
        assert_eq!(bot.handle_message(&msg).await, 1);
        assert_eq!(events.load(Ordering::SeqCst), 1);
        assert_eq!(text.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn state_transitions_gate_commands() {
        let start = Arc::new(AtomicUsize::new(0));
        let guess = Arc::new(AtomicUsize::new(0));
        let bot = Chatbot::default();
        bot.set_plugins(vec![plugin(vec![
            Command::new(vec![Trigger::Literal("/game".into())], counting(&start, "GAME")),
            Command::new(vec![Trigger::CatchAllText], counting(&guess, "MAIN")).in_state("GAME"),
        ])]);

        assert_eq!(bot.handle_message(&direct("42")).await, 0);
        bot.handle_message(&direct("/game")).await;
        assert_eq!(bot.current_state(0x10), State::new("GAME"));
        bot.handle_message(&direct("42")).await;
        assert_eq!(guess.load(Ordering::SeqCst), 1);
        assert!(bot.current_state(0x10).is_main());
    }

    #[tokio::test]
    async fn privacy_filter_applies() {
        let hits = Arc::new(AtomicUsize::new(0));
        let bot = Chatbot::default();
        bot.set_plugins(vec![plugin(vec![Command::new(
            vec![Trigger::Literal("/help".into())],
            counting(&hits, "MAIN"),
        )])]);
        assert_eq!(bot.handle_message(&on_channel("/help")).await, 0);
        assert_eq!(bot.handle_message(&direct("/help")).await, 1);
    }

    #[tokio::test]
    async fn every_match_runs_and_last_success_wins() {
        let a = Arc::new(AtomicUsize::new(0));
        let bot = Chatbot::default();
        let failing = handler_fn(|_| async { Err::<State, _>(PluginError::Handler("boom".into())) });
        bot.set_plugins(vec![
            plugin(vec![Command::new(vec![Trigger::Prefix("/x".into())], counting(&a, "FIRST"))]),
            plugin(vec![
                Command::new(vec![Trigger::Literal("/x".into())], counting(&a, "SECOND")),
                Command::new(vec![Trigger::Literal("/x".into())], failing),
            ]),
        ]);
        assert_eq!(bot.handle_message(&direct("/x")).await, 3);
        assert_eq!(a.load(Ordering::SeqCst), 2);
        assert_eq!(bot.current_state(0), State::new("SECOND"));
    }

    #[tokio::test]
    async fn per_node_scope_keeps_conversations_apart() {
        let hits = Arc::new(AtomicUsize::new(0));
        let bot = Chatbot::new(ConversationScope::PerNode);
        bot.set_plugins(vec![plugin(vec![Command::new(
            vec![Trigger::Literal("/game".into())],
            counting(&hits, "GAME"),
        )])]);
        bot.handle_message(&from_node(1, "/game")).await;
        assert_eq!(bot.current_state(1), State::new("GAME"));
        assert!(bot.current_state(2).is_main());
    }

    #[test]
    fn describe_lists_visible_commands() {
        let noop = || handler_fn(|_| async { Ok(State::main()) });
        let bot = Chatbot::default();
        bot.set_plugins(vec![
            Plugin {
                name: "Ping".into(),
                description: "Connectivity checks".into(),
                commands: vec![
                    Command::new(
                        vec![Trigger::Literal("/ping".into()), Trigger::Literal("/p".into())],
                        noop(),
                    )
                    .describe("Replies pong"),
                    Command::new(vec![Trigger::Literal("/secret".into())], noop()).hide(),
                    Command::new(vec![Trigger::Prefix("/echo".into())], noop()),
                    Command::new(vec![Trigger::CatchAllText], noop()).describe("fallback"),
                ],
                ..Default::default()
            },
            Plugin {
                name: "Hidden".into(),
                hidden: true,
                commands: vec![Command::new(vec![Trigger::Literal("/h".into())], noop())],
                ..Default::default()
            },
            Plugin {
                name: "Bare".into(),
                ..Default::default()
            },
        ]);
        assert_eq!(
            bot.describe(),
            "🤖👋 Hey there! I understand these commands:\n\
             \nPing - Connectivity checks\n\
             - /ping, /p: Replies pong\n\
             - /echo\n\
             \nBare\n"
        );
    }
}
