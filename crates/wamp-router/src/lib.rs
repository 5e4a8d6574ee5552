//! WAMP Router
//!
//! The router is the hub WAMP clients attach to:
//! - Attaches sessions to realms (HELLO / WELCOME / ABORT)
//! - Broker: routes PUBLISH to subscribers as EVENT
//! - Dealer: routes CALL to the registered callee and YIELD back as RESULT
//! - Shuts down gracefully within a bounded time
//!
//! # Transport Support
//!
//! The router is transport-agnostic and can accept connections from:
//! - **WebSocket** (default): `wamp.2.json` subprotocol
//! - **In-memory** channels, for embedding and tests
//!
//! # Example
//!
//! ```no_run
//! use wamp_router::{Router, RouterConfig};
//! use wamp_transport::WebSocketConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let router = Router::new(RouterConfig::default())?;
//!     router
//!         .serve_websocket("0.0.0.0:8080", WebSocketConfig::default())
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod error;
mod handler;
pub mod id;
mod outbox;
pub mod realm;
pub mod router;
pub mod session;

pub use error::{Result, RouterError};
pub use handler::{GOODBYE_CLOSE_REALM, GOODBYE_SYSTEM_SHUTDOWN};
pub use id::IdAllocator;
pub use realm::{
    Invocation, PendingCall, Procedure, Realm, RealmConfig, Topic, TopicKey, TopicPolicy,
};
pub use router::{Router, RouterConfig};
pub use session::{Roles, Session, SessionState};
