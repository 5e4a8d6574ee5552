//! Session management

use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use wamp_core::{Codec, Dict, Id, Message};
use wamp_transport::{TransportError, TransportSender};

use crate::error::Result;

/// Protocol state of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport is up, waiting for HELLO
    Connecting,
    /// HELLO received, attaching to the realm
    Establishing,
    /// WELCOME sent; requests are routed
    Established,
    /// Detaching from the realm
    Closing,
    Closed,
}

impl SessionState {
    /// Whether the state machine may move from `self` to `next`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Establishing)
                | (Connecting, Closed)
                | (Establishing, Established)
                | (Establishing, Closed)
                | (Established, Closing)
                | (Closing, Closed)
        )
    }
}

/// Role capability flags advertised by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Roles {
    /// Pub/sub routing
    pub broker: bool,
    /// RPC routing
    pub dealer: bool,
}

impl Default for Roles {
    fn default() -> Self {
        Self {
            broker: true,
            dealer: true,
        }
    }
}

impl Roles {
    /// The `roles` dict sent in WELCOME details
    pub fn details(&self) -> Dict {
        let mut roles = Dict::new();
        if self.broker {
            roles.insert(
                "broker".into(),
                json!({
                    "features": {
                        "publisher_exclusion": true,
                        "publisher_identification": true,
                        "subscriber_blackwhite_listing": true,
                    }
                }),
            );
        }
        if self.dealer {
            roles.insert(
                "dealer".into(),
                json!({
                    "features": {
                        "caller_identification": true,
                    }
                }),
            );
        }
        roles
    }
}

/// A client attached to a realm
pub struct Session {
    /// Router-wide session id
    pub id: Id,
    /// Realm the session is attached to
    pub realm: String,
    /// Roles negotiated at WELCOME
    pub roles: Roles,
    /// Peer address
    pub addr: SocketAddr,
    sender: Arc<dyn TransportSender>,
    codec: Arc<Codec>,
}

impl Session {
    pub fn new(
        id: Id,
        realm: String,
        roles: Roles,
        addr: SocketAddr,
        sender: Arc<dyn TransportSender>,
        codec: Arc<Codec>,
    ) -> Self {
        Self {
            id,
            realm,
            roles,
            addr,
            sender,
            codec,
        }
    }

    /// Send an already encoded frame
    pub async fn send(&self, data: Bytes) -> std::result::Result<(), TransportError> {
        self.sender.send(data).await
    }

    /// Encode and send a message
    pub async fn send_message(&self, message: &Message) -> Result<()> {
        let data = self.codec.encode_frame(message)?;
        self.send(data).await?;
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("realm", &self.realm)
            .field("roles", &self.roles)
            .field("addr", &self.addr)
            .finish()
    }
}
