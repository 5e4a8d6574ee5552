//! WAMP JSON Codec
//!
//! Every message kind is described by an ordered field table. One generic
//! routine validates and encodes a positional field list against that table,
//! and one decodes a wire array back into it:
//!
//! ```text
//! [16, 1, {"acknowledge": true}, "com.example.topic", ["hi"]]
//!  ^   ^  ^                      ^                    ^
//!  tag id dict                   uri                  list (optional)
//! ```
//!
//! Optional fields are trailing `args`/`kwargs`. Encoding drops a trailing run
//! of empty optional fields; decoding fills missing ones with `[]`/`{}`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::*;
use crate::uri::{DictKeyRules, UriMatcher, UriMatchingRule, DEFAULT_DICT_KEY_RULES};
use crate::{Error, Result};

/// Field value kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Uri,
    Dict,
    List,
    Id,
    /// A message type, encoded as its integer tag
    Type,
}

/// One positional field of a message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub optional: bool,
}

const fn req(name: &'static str, kind: FieldKind) -> Field {
    Field {
        name,
        kind,
        optional: false,
    }
}

const fn opt(name: &'static str, kind: FieldKind) -> Field {
    Field {
        name,
        kind,
        optional: true,
    }
}

use FieldKind::{Dict as D, Id as I, List as L, Type as T, Uri as U};

const HELLO: &[Field] = &[req("realm", U), req("details", D)];
const WELCOME: &[Field] = &[req("session", I), req("details", D)];
const ABORT: &[Field] = &[req("details", D), req("reason", U)];
const GOODBYE: &[Field] = &[req("details", D), req("reason", U)];
const ERROR: &[Field] = &[
    req("request_type", T),
    req("request_id", I),
    req("details", D),
    req("error", U),
    opt("args", L),
    opt("kwargs", D),
];
const PUBLISH: &[Field] = &[
    req("request_id", I),
    req("options", D),
    req("topic", U),
    opt("args", L),
    opt("kwargs", D),
];
const PUBLISHED: &[Field] = &[req("request_id", I), req("publication_id", I)];
const SUBSCRIBE: &[Field] = &[req("request_id", I), req("options", D), req("topic", U)];
const SUBSCRIBED: &[Field] = &[req("request_id", I), req("subscription_id", I)];
const UNSUBSCRIBE: &[Field] = &[req("request_id", I), req("subscription_id", I)];
const UNSUBSCRIBED: &[Field] = &[req("request_id", I)];
const EVENT: &[Field] = &[
    req("subscription_id", I),
    req("publication_id", I),
    req("details", D),
    opt("args", L),
    opt("kwargs", D),
];
const CALL: &[Field] = &[
    req("request_id", I),
    req("options", D),
    req("procedure", U),
    opt("args", L),
    opt("kwargs", D),
];
const RESULT: &[Field] = &[
    req("request_id", I),
    req("options", D),
    opt("args", L),
    opt("kwargs", D),
];
const REGISTER: &[Field] = &[req("request_id", I), req("options", D), req("procedure", U)];
const REGISTERED: &[Field] = &[req("request_id", I), req("registration_id", I)];
const UNREGISTER: &[Field] = &[req("request_id", I), req("registration_id", I)];
const UNREGISTERED: &[Field] = &[req("request_id", I)];
const INVOCATION: &[Field] = &[
    req("request_id", I),
    req("registration_id", I),
    req("details", D),
    opt("args", L),
    opt("kwargs", D),
];
const YIELD: &[Field] = &[
    req("request_id", I),
    req("options", D),
    opt("args", L),
    opt("kwargs", D),
];

/// Field table for a message kind; `None` for advanced profile kinds
pub fn fields(kind: MessageType) -> Option<&'static [Field]> {
    let table = match kind {
        MessageType::Hello => HELLO,
        MessageType::Welcome => WELCOME,
        MessageType::Abort => ABORT,
        MessageType::Goodbye => GOODBYE,
        MessageType::Error => ERROR,
        MessageType::Publish => PUBLISH,
        MessageType::Published => PUBLISHED,
        MessageType::Subscribe => SUBSCRIBE,
        MessageType::Subscribed => SUBSCRIBED,
        MessageType::Unsubscribe => UNSUBSCRIBE,
        MessageType::Unsubscribed => UNSUBSCRIBED,
        MessageType::Event => EVENT,
        MessageType::Call => CALL,
        MessageType::Result => RESULT,
        MessageType::Register => REGISTER,
        MessageType::Registered => REGISTERED,
        MessageType::Unregister => UNREGISTER,
        MessageType::Unregistered => UNREGISTERED,
        MessageType::Invocation => INVOCATION,
        MessageType::Yield => YIELD,
        MessageType::Challenge
        | MessageType::Authenticate
        | MessageType::Heartbeat
        | MessageType::Cancel
        | MessageType::Interrupt => return None,
    };
    Some(table)
}

/// Codec settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Active URI rule
    pub uri_rule: UriMatchingRule,
    /// Dict-key patterns; a key must match at least one
    pub dict_key_rules: Vec<String>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            uri_rule: UriMatchingRule::default(),
            dict_key_rules: DEFAULT_DICT_KEY_RULES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Translates between wire text and [`Message`]s
#[derive(Debug, Clone)]
pub struct Codec {
    uris: UriMatcher,
    dict_keys: DictKeyRules,
}

impl Codec {
    pub fn new(config: &CodecConfig) -> Result<Self> {
        Ok(Self {
            uris: UriMatcher::new(config.uri_rule)?,
            dict_keys: DictKeyRules::new(&config.dict_key_rules)?,
        })
    }

    pub fn uri_rule(&self) -> UriMatchingRule {
        self.uris.rule()
    }

    pub fn is_uri(&self, uri: &str) -> bool {
        self.uris.is_match(uri)
    }

    // ------------------------------------------------------------------------
    // Positional fields
    // ------------------------------------------------------------------------

    /// Encode a positional field list (without the type tag) as wire text
    pub fn encode_fields(&self, kind: MessageType, mut values: Vec<Value>) -> Result<String> {
        let table = fields(kind).ok_or(Error::NotImplemented {
            kind,
            request_id: None,
        })?;

        if values.len() > table.len() {
            return Err(Error::InvalidArgument(format!(
                "{} takes at most {} fields, got {}",
                kind,
                table.len(),
                values.len()
            )));
        }
        if let Some(missing) = table[values.len()..].iter().find(|f| !f.optional) {
            return Err(Error::InvalidArgument(format!(
                "{} is missing field {}",
                kind, missing.name
            )));
        }

        for (field, value) in table.iter().zip(values.iter()) {
            self.validate(field, value)?;
        }

        while values.len() > required_len(table) && values.last().is_some_and(is_empty) {
            values.pop();
        }

        let mut wire = Vec::with_capacity(values.len() + 1);
        wire.push(Value::from(kind.code()));
        wire.extend(values);
        Ok(serde_json::to_string(&Value::Array(wire))?)
    }

    /// Decode wire text into its kind and a full positional field list
    pub fn decode_fields(&self, text: &str) -> Result<(MessageType, Vec<Value>)> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Array(mut wire) = value else {
            return Err(Error::InvalidMessage("top-level value is not an array".into()));
        };
        if wire.is_empty() {
            return Err(Error::InvalidMessage("empty message".into()));
        }

        let kind = tag(&wire[0])?;

        let Some(table) = fields(kind) else {
            return Err(Error::NotImplemented {
                kind,
                request_id: wire.get(1).and_then(as_id),
            });
        };

        let mut values = wire.split_off(1);
        if values.len() < required_len(table) || values.len() > table.len() {
            return Err(Error::InvalidMessage(format!(
                "{} expects {} to {} fields, got {}",
                kind,
                required_len(table),
                table.len(),
                values.len()
            )));
        }

        for (field, value) in table.iter().zip(values.iter()) {
            self.validate(field, value)?;
        }

        for field in &table[values.len()..] {
            values.push(empty_value(field.kind));
        }

        Ok((kind, values))
    }

    fn validate(&self, field: &Field, value: &Value) -> Result<()> {
        match field.kind {
            FieldKind::Uri => {
                let uri = value.as_str().ok_or_else(|| wrong_kind(field, "a string"))?;
                self.uris.validate(uri)
            }
            FieldKind::Dict => {
                let dict = value.as_object().ok_or_else(|| wrong_kind(field, "a dict"))?;
                dict.keys().try_for_each(|key| self.dict_keys.validate(key))
            }
            FieldKind::List => {
                if value.is_array() {
                    Ok(())
                } else {
                    Err(wrong_kind(field, "a list"))
                }
            }
            FieldKind::Id => as_id(value)
                .map(|_| ())
                .ok_or_else(|| wrong_kind(field, "an integer in [0, 2^53)")),
            FieldKind::Type => tag(value).map(|_| ()),
        }
    }

    // ------------------------------------------------------------------------
    // Typed messages
    // ------------------------------------------------------------------------

    /// Encode a message to wire text
    pub fn encode(&self, message: &Message) -> Result<String> {
        self.encode_fields(message.message_type(), to_fields(message))
    }

    /// Encode a message into a transport frame
    pub fn encode_frame(&self, message: &Message) -> Result<Bytes> {
        self.encode(message).map(Bytes::from)
    }

    /// Decode wire text into a message
    pub fn decode(&self, text: &str) -> Result<Message> {
        let (kind, values) = self.decode_fields(text)?;
        from_fields(kind, values)
    }

    /// Decode a transport frame into a message
    pub fn decode_frame(&self, data: &[u8]) -> Result<Message> {
        let text = std::str::from_utf8(data).map_err(|e| Error::InvalidJson(e.to_string()))?;
        self.decode(text)
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(&CodecConfig::default()).expect("built-in codec rules compile")
    }
}

fn required_len(table: &[Field]) -> usize {
    table.iter().take_while(|f| !f.optional).count()
}

fn as_id(value: &Value) -> Option<Id> {
    value.as_u64().filter(|id| *id < MAX_ID)
}

/// Message kind for a type tag; anything but a known code is unknown
fn tag(value: &Value) -> Result<MessageType> {
    value
        .as_u64()
        .and_then(MessageType::from_code)
        .ok_or_else(|| Error::UnknownMessageType(value.to_string()))
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Array(list) => list.is_empty(),
        Value::Object(dict) => dict.is_empty(),
        _ => false,
    }
}

fn empty_value(kind: FieldKind) -> Value {
    match kind {
        FieldKind::List => Value::Array(List::new()),
        _ => Value::Object(Dict::new()),
    }
}

fn wrong_kind(field: &Field, expected: &str) -> Error {
    Error::InvalidArgument(format!("{} must be {}", field.name, expected))
}

// ============================================================================
// Typed message <-> positional fields
// ============================================================================

fn to_fields(message: &Message) -> Vec<Value> {
    fn id(v: Id) -> Value {
        Value::from(v)
    }
    fn uri(v: &str) -> Value {
        Value::String(v.to_string())
    }
    fn dict(v: &Dict) -> Value {
        Value::Object(v.clone())
    }
    fn list(v: &List) -> Value {
        Value::Array(v.clone())
    }

    match message {
        Message::Hello(m) => vec![uri(&m.realm), dict(&m.details)],
        Message::Welcome(m) => vec![id(m.session), dict(&m.details)],
        Message::Abort(m) => vec![dict(&m.details), uri(&m.reason)],
        Message::Goodbye(m) => vec![dict(&m.details), uri(&m.reason)],
        Message::Error(m) => vec![
            Value::from(m.request_type.code()),
            id(m.request_id),
            dict(&m.details),
            uri(&m.error),
            list(&m.args),
            dict(&m.kwargs),
        ],
        Message::Publish(m) => vec![
            id(m.request_id),
            dict(&m.options),
            uri(&m.topic),
            list(&m.args),
            dict(&m.kwargs),
        ],
        Message::Published(m) => vec![id(m.request_id), id(m.publication_id)],
        Message::Subscribe(m) => vec![id(m.request_id), dict(&m.options), uri(&m.topic)],
        Message::Subscribed(m) => vec![id(m.request_id), id(m.subscription_id)],
        Message::Unsubscribe(m) => vec![id(m.request_id), id(m.subscription_id)],
        Message::Unsubscribed(m) => vec![id(m.request_id)],
        Message::Event(m) => vec![
            id(m.subscription_id),
            id(m.publication_id),
            dict(&m.details),
            list(&m.args),
            dict(&m.kwargs),
        ],
        Message::Call(m) => vec![
            id(m.request_id),
            dict(&m.options),
            uri(&m.procedure),
            list(&m.args),
            dict(&m.kwargs),
        ],
        Message::Result(m) => vec![
            id(m.request_id),
            dict(&m.options),
            list(&m.args),
            dict(&m.kwargs),
        ],
        Message::Register(m) => vec![id(m.request_id), dict(&m.options), uri(&m.procedure)],
        Message::Registered(m) => vec![id(m.request_id), id(m.registration_id)],
        Message::Unregister(m) => vec![id(m.request_id), id(m.registration_id)],
        Message::Unregistered(m) => vec![id(m.request_id)],
        Message::Invocation(m) => vec![
            id(m.request_id),
            id(m.registration_id),
            dict(&m.details),
            list(&m.args),
            dict(&m.kwargs),
        ],
        Message::Yield(m) => vec![
            id(m.request_id),
            dict(&m.options),
            list(&m.args),
            dict(&m.kwargs),
        ],
    }
}

/// Reads already-validated fields in table order
struct FieldReader {
    values: std::vec::IntoIter<Value>,
}

impl FieldReader {
    fn next(&mut self) -> Result<Value> {
        self.values
            .next()
            .ok_or_else(|| Error::InvalidMessage("missing field".into()))
    }

    fn id(&mut self) -> Result<Id> {
        as_id(&self.next()?).ok_or_else(|| Error::InvalidArgument("expected an id".into()))
    }

    fn uri(&mut self) -> Result<String> {
        match self.next()? {
            Value::String(s) => Ok(s),
            _ => Err(Error::InvalidArgument("expected a uri".into())),
        }
    }

    fn dict(&mut self) -> Result<Dict> {
        match self.next()? {
            Value::Object(d) => Ok(d),
            _ => Err(Error::InvalidArgument("expected a dict".into())),
        }
    }

    fn list(&mut self) -> Result<List> {
        match self.next()? {
            Value::Array(l) => Ok(l),
            _ => Err(Error::InvalidArgument("expected a list".into())),
        }
    }

    fn message_type(&mut self) -> Result<MessageType> {
        tag(&self.next()?)
    }
}

fn from_fields(kind: MessageType, values: Vec<Value>) -> Result<Message> {
    let mut r = FieldReader {
        values: values.into_iter(),
    };

    let message = match kind {
        MessageType::Hello => Message::Hello(HelloMessage {
            realm: r.uri()?,
            details: r.dict()?,
        }),
        MessageType::Welcome => Message::Welcome(WelcomeMessage {
            session: r.id()?,
            details: r.dict()?,
        }),
        MessageType::Abort => Message::Abort(AbortMessage {
            details: r.dict()?,
            reason: r.uri()?,
        }),
        MessageType::Goodbye => Message::Goodbye(GoodbyeMessage {
            details: r.dict()?,
            reason: r.uri()?,
        }),
        MessageType::Error => Message::Error(ErrorMessage {
            request_type: r.message_type()?,
            request_id: r.id()?,
            details: r.dict()?,
            error: r.uri()?,
            args: r.list()?,
            kwargs: r.dict()?,
        }),
        MessageType::Publish => Message::Publish(PublishMessage {
            request_id: r.id()?,
            options: r.dict()?,
            topic: r.uri()?,
            args: r.list()?,
            kwargs: r.dict()?,
        }),
        MessageType::Published => Message::Published(PublishedMessage {
            request_id: r.id()?,
            publication_id: r.id()?,
        }),
        MessageType::Subscribe => Message::Subscribe(SubscribeMessage {
            request_id: r.id()?,
            options: r.dict()?,
            topic: r.uri()?,
        }),
        MessageType::Subscribed => Message::Subscribed(SubscribedMessage {
            request_id: r.id()?,
            subscription_id: r.id()?,
        }),
        MessageType::Unsubscribe => Message::Unsubscribe(UnsubscribeMessage {
            request_id: r.id()?,
            subscription_id: r.id()?,
        }),
        MessageType::Unsubscribed => Message::Unsubscribed(UnsubscribedMessage {
            request_id: r.id()?,
        }),
        MessageType::Event => Message::Event(EventMessage {
            subscription_id: r.id()?,
            publication_id: r.id()?,
            details: r.dict()?,
            args: r.list()?,
            kwargs: r.dict()?,
        }),
        MessageType::Call => Message::Call(CallMessage {
            request_id: r.id()?,
            options: r.dict()?,
            procedure: r.uri()?,
            args: r.list()?,
            kwargs: r.dict()?,
        }),
        MessageType::Result => Message::Result(ResultMessage {
            request_id: r.id()?,
            options: r.dict()?,
            args: r.list()?,
            kwargs: r.dict()?,
        }),
        MessageType::Register => Message::Register(RegisterMessage {
            request_id: r.id()?,
            options: r.dict()?,
            procedure: r.uri()?,
        }),
        MessageType::Registered => Message::Registered(RegisteredMessage {
            request_id: r.id()?,
            registration_id: r.id()?,
        }),
        MessageType::Unregister => Message::Unregister(UnregisterMessage {
            request_id: r.id()?,
            registration_id: r.id()?,
        }),
        MessageType::Unregistered => Message::Unregistered(UnregisteredMessage {
            request_id: r.id()?,
        }),
        MessageType::Invocation => Message::Invocation(InvocationMessage {
            request_id: r.id()?,
            registration_id: r.id()?,
            details: r.dict()?,
            args: r.list()?,
            kwargs: r.dict()?,
        }),
        MessageType::Yield => Message::Yield(YieldMessage {
            request_id: r.id()?,
            options: r.dict()?,
            args: r.list()?,
            kwargs: r.dict()?,
        }),
        MessageType::Challenge
        | MessageType::Authenticate
        | MessageType::Heartbeat
        | MessageType::Cancel
        | MessageType::Interrupt => {
            return Err(Error::NotImplemented {
                kind,
                request_id: None,
            })
        }
    };

    Ok(message)
}
