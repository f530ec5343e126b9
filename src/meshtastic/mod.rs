//! # Meshtastic Device Communication Module
//!
//! Talks to a Meshtastic radio over its client API (USB serial or TCP) and keeps a live model
//! of the mesh as seen from that radio.
//!
//! ## Layers
//!
//! - **[`framing`]**: `0x94 0xC3 len_hi len_lo` frame codec with resynchronization over
//!   device console noise
//! - **[`transport`]**: opening the byte stream (TCP socket or serial port)
//! - **[`session`]**: [`ConnectedNode`], the handshake, read loop, replies and ack tracking
//! - **[`node`] / [`node_list`] / [`channel`]**: the mesh model mutated by the read loop
//! - **[`message`]**: decoded packets handed to consumers
//! - **[`events`]**: typed publish/subscribe between the session and its consumers
//!
//! ## Usage
//!
//! ```rust,no_run
//! use meshbot::meshtastic::{transport, ConnectedNode, Events, SessionOptions, Topic};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let events = Events::new();
//!     events.messages.subscribe(Topic::TextMessage, |msg| async move {
//!         println!("{}", msg);
//!     });
//!     let stream = transport::connect_tcp("meshtastic.local").await?;
//!     let session = ConnectedNode::open(stream, events, SessionOptions::default()).await?;
//!     tokio::signal::ctrl_c().await?;
//!     session.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency
//!
//! Only the session read loop mutates the model. Nodes are shared as [`NodeHandle`]s
//! (`Arc<RwLock<Node>>`) so event handlers can read them while the loop keeps running.

pub mod channel;
pub mod events;
pub mod framing;
pub mod message;
pub mod node;
pub mod node_list;
pub mod session;
pub mod transport;

pub use channel::{Channel, ChannelRole};
pub use events::{EventBus, Events, Topic};
pub use framing::{FrameError, FrameLog, FrameReader};
pub use message::{Message, MessageType, Payload, DEFAULT_REPLY_TIMEOUT};
pub use node::{Node, NodeHandle, Position, BROADCAST_ID, UNKNOWN_ID};
pub use node_list::NodeList;
pub use session::{ConnectedNode, DeliveryStatus, PendingDelivery, SessionError, SessionOptions};
