//! # Chat Bot
//!
//! Turns mesh messages into plugin command invocations.
//!
//! - [`plugin`]: the plugin/command model and the [`CommandHandler`] / [`PluginLoader`] seams
//! - [`chatbot`]: the [`Chatbot`] dispatcher and its conversation state
//! - [`lua`]: loading plugins from a directory of Lua scripts
//!
//! ## Routing
//!
//! A text message first goes to every command whose literal or prefix matches it; only when
//! none match do `CATCH_ALL_TEXT` commands get it. Non-text messages only reach
//! `CATCH_ALL_EVENTS` commands. In every case a command must be valid in the current
//! conversation state and accept the message's privacy (direct vs. channel).

pub mod chatbot;
pub mod lua;
pub mod plugin;

pub use chatbot::{Chatbot, ConversationScope};
pub use lua::LuaPluginLoader;
pub use plugin::{Command, CommandHandler, Plugin, PluginError, PluginLoader, State, Trigger};
