//! WAMP Core
//!
//! Core types and encoding for the WAMP v2 basic profile.
//!
//! This crate provides:
//! - Protocol message types ([`Message`], [`MessageType`])
//! - The JSON array codec with per-kind field tables ([`Codec`])
//! - URI and dict-key validation rules ([`UriMatchingRule`])
//! - Protocol error kinds and their error URIs ([`Error`])

pub mod codec;
pub mod error;
pub mod types;
pub mod uri;

pub use codec::{Codec, CodecConfig, Field, FieldKind};
pub use error::{Error, Result};
pub use types::*;
pub use uri::{DictKeyRules, UriMatcher, UriMatchingRule};

/// WebSocket subprotocol identifier
pub const WS_SUBPROTOCOL: &str = "wamp.2.json";

/// Default WebSocket port
pub const DEFAULT_PORT: u16 = 8080;

/// Default WebSocket request path
pub const DEFAULT_PATH: &str = "/ws";
