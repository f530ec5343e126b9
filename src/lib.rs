//! # Meshbot - Scriptable Chat Bot for Meshtastic Networks
//!
//! Meshbot connects to a Meshtastic radio over USB serial or TCP, keeps a live model of the
//! mesh (nodes, positions, telemetry, neighbors, channels) and answers text messages through
//! plugins written in Lua.
//!
//! ## Features
//!
//! - **Meshtastic Client API**: framed protobuf over serial or TCP, tolerant of device console
//!   noise interleaved with frames
//! - **Mesh Model**: nodes with hop counts, SNR, position and telemetry history, neighbor graphs
//! - **Delivery Tracking**: replies can wait for the mesh's routing acknowledgment
//! - **Event Bus**: typed topics for connection, message and node events
//! - **Lua Plugins**: commands, prefixes, catch-alls and conversation states defined in scripts
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshbot::bot::{Chatbot, ConversationScope, LuaPluginLoader};
//! use meshbot::meshtastic::{transport, ConnectedNode, Events, SessionOptions};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let events = Events::new();
//!     let bot = Arc::new(Chatbot::new(ConversationScope::Global));
//!     bot.reload(&LuaPluginLoader::new("plugins")).await?;
//!     bot.attach(&events);
//!
//!     let stream = transport::connect_tcp("meshtastic.local").await?;
//!     let session = ConnectedNode::open(stream, events, SessionOptions::default()).await?;
//!     tokio::signal::ctrl_c().await?;
//!     session.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`meshtastic`] - framing, transports, the connected-node session and the mesh model
//! - [`bot`] - command dispatch, conversation state and the Lua plugin loader
//! - [`config`] - TOML configuration
//! - [`protobuf`] - generated Meshtastic protobuf types
//! - [`metrics`] - process-wide link and dispatch counters
//! - [`logutil`] - helpers for log-safe text
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Chatbot +     │ ← Command routing, Lua plugins
//! │   Plugins       │
//! └─────────────────┘
//!          │ events (AnyMessage, Connected, ...)
//! ┌─────────────────┐
//! │ ConnectedNode   │ ← Handshake, read loop, mesh model, ack table
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │ Framing +       │ ← 0x94 0xC3 frames over serial or TCP
//! │ Transport       │
//! └─────────────────┘
//! ```

pub mod bot;
pub mod config;
pub mod logutil;
pub mod meshtastic;
pub mod metrics;
pub mod protobuf;
