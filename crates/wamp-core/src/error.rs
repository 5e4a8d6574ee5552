//! Error types for WAMP routing

use thiserror::Error;

use crate::types::{Id, MessageType};

/// Result type alias for WAMP operations
pub type Result<T> = std::result::Result<T, Error>;

/// WAMP protocol error kinds
///
/// Every kind maps to a `wamp.error.*` URI (see [`Error::uri`]) which is what
/// peers see in ERROR and ABORT messages.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A `uri` field failed the active URI matching rule
    #[error("invalid uri: {0:?}")]
    InvalidUri(String),

    /// A `dict` key matched none of the configured key rules
    #[error("invalid dict key: {0:?}")]
    InvalidDictKey(String),

    /// A field has the wrong JSON kind or an out-of-range value
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Structurally valid JSON that is not a WAMP message
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Input is not parseable JSON
    #[error("invalid json: {0}")]
    InvalidJson(String),

    /// Unrecognized message type tag, as its JSON text
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// Advanced profile message kinds
    #[error("{kind} messages are not implemented")]
    NotImplemented {
        kind: MessageType,
        request_id: Option<Id>,
    },

    #[error("no such realm: {0}")]
    NoSuchRealm(String),

    #[error("realm already exists: {0}")]
    RealmAlreadyExists(String),

    #[error("no such subscription")]
    NoSuchSubscription,

    #[error("session {0} is already subscribed")]
    AlreadySubscribed(Id),

    #[error("no such registration")]
    NoSuchRegistration,

    #[error("no such invocation: {0}")]
    NoSuchInvocation(Id),

    #[error("procedure already exists: {0}")]
    ProcedureAlreadyExists(String),

    #[error("session already exists: {0}")]
    SessionAlreadyExists(Id),

    #[error("no such session: {0}")]
    NoSuchSession(Id),

    /// An option the target does not allow (e.g. `disclose_me`)
    #[error("option disallowed: {0}")]
    OptionDisallowed(String),

    /// Pending call dropped because its callee went away
    #[error("call canceled: {0}")]
    Canceled(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

impl Error {
    /// The error URI sent to peers
    pub fn uri(&self) -> &'static str {
        match self {
            Error::InvalidUri(_) => "wamp.error.invalid_uri",
            Error::InvalidDictKey(_) => "wamp.error.invalid_dict_key",
            Error::InvalidArgument(_) => "wamp.error.invalid_argument",
            Error::InvalidMessage(_) => "wamp.error.invalid_message",
            Error::InvalidJson(_) => "wamp.error.invalid_json",
            Error::UnknownMessageType(_) => "wamp.error.no_such_message_type",
            Error::NotImplemented { .. } => "wamp.error.not_implemented",
            Error::NoSuchRealm(_) => "wamp.error.no_such_realm",
            Error::RealmAlreadyExists(_) => "wamp.error.realm_already_exists",
            Error::NoSuchSubscription => "wamp.error.no_such_subscription",
            Error::AlreadySubscribed(_) => "wamp.error.topic_already_subscribed",
            Error::NoSuchRegistration => "wamp.error.no_such_registration",
            Error::NoSuchInvocation(_) => "wamp.error.no_such_invocation",
            Error::ProcedureAlreadyExists(_) => "wamp.error.procedure_already_exists",
            Error::SessionAlreadyExists(_) => "wamp.error.session_already_exists",
            Error::NoSuchSession(_) => "wamp.error.no_such_session",
            Error::OptionDisallowed(_) => "wamp.error.option_disallowed",
            Error::Canceled(_) => "wamp.error.canceled",
            Error::ProtocolViolation(_) => "wamp.error.protocol_violation",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidJson(e.to_string())
    }
}
