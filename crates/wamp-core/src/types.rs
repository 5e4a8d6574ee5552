//! Protocol types and message definitions

use std::fmt;

pub use serde_json::Value;

/// WAMP id: an opaque integer in `[0, 2^53)`
pub type Id = u64;

/// Exclusive upper bound for [`Id`] values
pub const MAX_ID: Id = 1 << 53;

/// String-keyed mapping (`dict` fields)
pub type Dict = serde_json::Map<String, Value>;

/// Positional arguments (`list` fields)
pub type List = Vec<Value>;

/// Message type tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Hello = 1,
    Welcome = 2,
    Abort = 3,
    Challenge = 4,
    Authenticate = 5,
    Goodbye = 6,
    Heartbeat = 7,
    Error = 8,
    Publish = 16,
    Published = 17,
    Subscribe = 32,
    Subscribed = 33,
    Unsubscribe = 34,
    Unsubscribed = 35,
    Event = 36,
    Call = 48,
    Cancel = 49,
    Result = 50,
    Register = 64,
    Registered = 65,
    Unregister = 66,
    Unregistered = 67,
    Invocation = 68,
    Interrupt = 69,
    Yield = 70,
}

impl MessageType {
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            1 => Some(MessageType::Hello),
            2 => Some(MessageType::Welcome),
            3 => Some(MessageType::Abort),
            4 => Some(MessageType::Challenge),
            5 => Some(MessageType::Authenticate),
            6 => Some(MessageType::Goodbye),
            7 => Some(MessageType::Heartbeat),
            8 => Some(MessageType::Error),
            16 => Some(MessageType::Publish),
            17 => Some(MessageType::Published),
            32 => Some(MessageType::Subscribe),
            33 => Some(MessageType::Subscribed),
            34 => Some(MessageType::Unsubscribe),
            35 => Some(MessageType::Unsubscribed),
            36 => Some(MessageType::Event),
            48 => Some(MessageType::Call),
            49 => Some(MessageType::Cancel),
            50 => Some(MessageType::Result),
            64 => Some(MessageType::Register),
            65 => Some(MessageType::Registered),
            66 => Some(MessageType::Unregister),
            67 => Some(MessageType::Unregistered),
            68 => Some(MessageType::Invocation),
            69 => Some(MessageType::Interrupt),
            70 => Some(MessageType::Yield),
            _ => None,
        }
    }

    /// Integer tag used on the wire
    pub fn code(self) -> u64 {
        self as u64
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::Hello => "HELLO",
            MessageType::Welcome => "WELCOME",
            MessageType::Abort => "ABORT",
            MessageType::Challenge => "CHALLENGE",
            MessageType::Authenticate => "AUTHENTICATE",
            MessageType::Goodbye => "GOODBYE",
            MessageType::Heartbeat => "HEARTBEAT",
            MessageType::Error => "ERROR",
            MessageType::Publish => "PUBLISH",
            MessageType::Published => "PUBLISHED",
            MessageType::Subscribe => "SUBSCRIBE",
            MessageType::Subscribed => "SUBSCRIBED",
            MessageType::Unsubscribe => "UNSUBSCRIBE",
            MessageType::Unsubscribed => "UNSUBSCRIBED",
            MessageType::Event => "EVENT",
            MessageType::Call => "CALL",
            MessageType::Cancel => "CANCEL",
            MessageType::Result => "RESULT",
            MessageType::Register => "REGISTER",
            MessageType::Registered => "REGISTERED",
            MessageType::Unregister => "UNREGISTER",
            MessageType::Unregistered => "UNREGISTERED",
            MessageType::Invocation => "INVOCATION",
            MessageType::Interrupt => "INTERRUPT",
            MessageType::Yield => "YIELD",
        }
    }

    /// Advanced profile kinds are recognized but have no codec support
    pub fn is_advanced(self) -> bool {
        matches!(
            self,
            MessageType::Challenge
                | MessageType::Authenticate
                | MessageType::Heartbeat
                | MessageType::Cancel
                | MessageType::Interrupt
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// All protocol messages
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello(HelloMessage),
    Welcome(WelcomeMessage),
    Abort(AbortMessage),
    Goodbye(GoodbyeMessage),
    Error(ErrorMessage),
    Publish(PublishMessage),
    Published(PublishedMessage),
    Subscribe(SubscribeMessage),
    Subscribed(SubscribedMessage),
    Unsubscribe(UnsubscribeMessage),
    Unsubscribed(UnsubscribedMessage),
    Event(EventMessage),
    Call(CallMessage),
    Result(ResultMessage),
    Register(RegisterMessage),
    Registered(RegisteredMessage),
    Unregister(UnregisterMessage),
    Unregistered(UnregisteredMessage),
    Invocation(InvocationMessage),
    Yield(YieldMessage),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Hello(_) => MessageType::Hello,
            Message::Welcome(_) => MessageType::Welcome,
            Message::Abort(_) => MessageType::Abort,
            Message::Goodbye(_) => MessageType::Goodbye,
            Message::Error(_) => MessageType::Error,
            Message::Publish(_) => MessageType::Publish,
            Message::Published(_) => MessageType::Published,
            Message::Subscribe(_) => MessageType::Subscribe,
            Message::Subscribed(_) => MessageType::Subscribed,
            Message::Unsubscribe(_) => MessageType::Unsubscribe,
            Message::Unsubscribed(_) => MessageType::Unsubscribed,
            Message::Event(_) => MessageType::Event,
            Message::Call(_) => MessageType::Call,
            Message::Result(_) => MessageType::Result,
            Message::Register(_) => MessageType::Register,
            Message::Registered(_) => MessageType::Registered,
            Message::Unregister(_) => MessageType::Unregister,
            Message::Unregistered(_) => MessageType::Unregistered,
            Message::Invocation(_) => MessageType::Invocation,
            Message::Yield(_) => MessageType::Yield,
        }
    }

    /// Request id of client-initiated requests
    pub fn request_id(&self) -> Option<Id> {
        match self {
            Message::Publish(m) => Some(m.request_id),
            Message::Subscribe(m) => Some(m.request_id),
            Message::Unsubscribe(m) => Some(m.request_id),
            Message::Call(m) => Some(m.request_id),
            Message::Register(m) => Some(m.request_id),
            Message::Unregister(m) => Some(m.request_id),
            Message::Yield(m) => Some(m.request_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HelloMessage {
    pub realm: String,
    pub details: Dict,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WelcomeMessage {
    pub session: Id,
    pub details: Dict,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AbortMessage {
    pub details: Dict,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GoodbyeMessage {
    pub details: Dict,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMessage {
    pub request_type: MessageType,
    pub request_id: Id,
    pub details: Dict,
    pub error: String,
    pub args: List,
    pub kwargs: Dict,
}

impl ErrorMessage {
    pub fn new(request_type: MessageType, request_id: Id, error: impl Into<String>) -> Self {
        Self {
            request_type,
            request_id,
            details: Dict::new(),
            error: error.into(),
            args: List::new(),
            kwargs: Dict::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PublishMessage {
    pub request_id: Id,
    pub options: Dict,
    pub topic: String,
    pub args: List,
    pub kwargs: Dict,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PublishedMessage {
    pub request_id: Id,
    pub publication_id: Id,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubscribeMessage {
    pub request_id: Id,
    pub options: Dict,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubscribedMessage {
    pub request_id: Id,
    pub subscription_id: Id,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnsubscribeMessage {
    pub request_id: Id,
    pub subscription_id: Id,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnsubscribedMessage {
    pub request_id: Id,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventMessage {
    pub subscription_id: Id,
    pub publication_id: Id,
    pub details: Dict,
    pub args: List,
    pub kwargs: Dict,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallMessage {
    pub request_id: Id,
    pub options: Dict,
    pub procedure: String,
    pub args: List,
    pub kwargs: Dict,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultMessage {
    pub request_id: Id,
    pub options: Dict,
    pub args: List,
    pub kwargs: Dict,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegisterMessage {
    pub request_id: Id,
    pub options: Dict,
    pub procedure: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegisteredMessage {
    pub request_id: Id,
    pub registration_id: Id,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnregisterMessage {
    pub request_id: Id,
    pub registration_id: Id,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnregisteredMessage {
    pub request_id: Id,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InvocationMessage {
    pub request_id: Id,
    pub registration_id: Id,
    pub details: Dict,
    pub args: List,
    pub kwargs: Dict,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct YieldMessage {
    pub request_id: Id,
    pub options: Dict,
    pub args: List,
    pub kwargs: Dict,
}
