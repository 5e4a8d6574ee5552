//! WAMP Transport Layer
//!
//! This crate provides the message-oriented transports the router runs on:
//! - WebSocket (primary, `wamp.2.json` subprotocol)
//! - In-memory channels (embedding and tests)
//!
//! A transport delivers [`TransportEvent`]s per connection and accepts
//! `send`/`close` through a [`TransportSender`].

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use error::{Result, TransportError};
pub use memory::{MemoryConnector, MemoryReceiver, MemorySender, MemoryServer};
pub use traits::{Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketServer, WebSocketTransport};
