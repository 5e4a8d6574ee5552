//! Per-connection protocol handling
//!
//! A [`SessionHandler`] drives one connection through the session state
//! machine and turns each inbound request into realm operations and
//! outbound replies.

use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use wamp_core::{
    AbortMessage, CallMessage, Dict, Error, ErrorMessage, EventMessage, GoodbyeMessage,
    HelloMessage, Id, InvocationMessage, Message, MessageType, PublishMessage,
    PublishedMessage, RegisterMessage, RegisteredMessage, Result, ResultMessage,
    SubscribeMessage, SubscribedMessage, UnregisterMessage, UnregisteredMessage,
    UnsubscribeMessage, UnsubscribedMessage, WelcomeMessage, YieldMessage,
};
use wamp_transport::TransportSender;

use crate::realm::{PendingCall, Realm};
use crate::router::RouterContext;
use crate::session::{Session, SessionState};

/// GOODBYE reason when the router shuts down
pub const GOODBYE_SYSTEM_SHUTDOWN: &str = "wamp.close.system_shutdown";
/// GOODBYE reason for every other router-initiated close
pub const GOODBYE_CLOSE_REALM: &str = "wamp.close.close_realm";

/// Read a boolean option, `false` when absent
fn flag(options: &Dict, key: &str) -> bool {
    options.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn id_list(options: &Dict, key: &str) -> Result<Option<HashSet<Id>>> {
    let Some(value) = options.get(key) else {
        return Ok(None);
    };
    let invalid = || Error::InvalidArgument(format!("{} must be a list of session ids", key));
    value
        .as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|v| v.as_u64().ok_or_else(invalid))
        .collect::<Result<HashSet<Id>>>()
        .map(Some)
}

/// PUBLISH recipient rules
#[derive(Debug)]
pub(crate) struct PublishFilter {
    publisher: Id,
    exclude_me: bool,
    exclude: HashSet<Id>,
    eligible: Option<HashSet<Id>>,
}

impl PublishFilter {
    pub(crate) fn from_options(publisher: Id, options: &Dict) -> Result<Self> {
        Ok(Self {
            publisher,
            exclude_me: options
                .get("exclude_me")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            exclude: id_list(options, "exclude")?.unwrap_or_default(),
            eligible: id_list(options, "eligible")?,
        })
    }

    /// Exclusion always beats eligibility
    pub(crate) fn admits(&self, session_id: Id) -> bool {
        if self.exclude_me && session_id == self.publisher {
            return false;
        }
        if self.exclude.contains(&session_id) {
            return false;
        }
        self.eligible
            .as_ref()
            .map_or(true, |eligible| eligible.contains(&session_id))
    }
}

/// Answer callers whose invocation can no longer complete
async fn cancel_calls(calls: Vec<PendingCall>, why: &str) {
    let canceled = Error::Canceled(why.to_string()).uri();
    let sends = calls.into_iter().filter_map(|call| {
        let caller = call.caller?;
        let error = ErrorMessage::new(MessageType::Call, call.request_id, canceled);
        Some(async move {
            debug!("Canceling call {} of session {}: {}", call.request_id, caller.id, why);
            if let Err(e) = caller.send_message(&Message::Error(error)).await {
                debug!("Cancel to session {} not delivered: {}", caller.id, e);
            }
        })
    });
    join_all(sends).await;
}

/// Protocol state machine for one connection
pub(crate) struct SessionHandler {
    ctx: Arc<RouterContext>,
    sender: Arc<dyn TransportSender>,
    addr: SocketAddr,
    state: SessionState,
    attached: Option<(Arc<Session>, Arc<Realm>)>,
}

impl SessionHandler {
    pub(crate) fn new(
        ctx: Arc<RouterContext>,
        sender: Arc<dyn TransportSender>,
        addr: SocketAddr,
    ) -> Self {
        Self {
            ctx,
            sender,
            addr,
            state: SessionState::Connecting,
            attached: None,
        }
    }

    fn set_state(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            warn!(
                "Unexpected session transition {:?} -> {:?} for {}",
                self.state, next, self.addr
            );
        }
        debug!("Session {} {:?} -> {:?}", self.addr, self.state, next);
        self.state = next;
    }

    /// Process one inbound frame
    pub(crate) async fn handle_data(&mut self, data: &[u8]) -> ControlFlow<()> {
        let decoded = self.ctx.codec.decode_frame(data);

        match self.state {
            SessionState::Connecting => match decoded {
                Ok(Message::Hello(hello)) => self.attach(hello).await,
                Ok(other) => {
                    warn!(
                        "{} sent {} before HELLO; closing",
                        self.addr,
                        other.message_type()
                    );
                    self.close(None).await;
                    ControlFlow::Break(())
                }
                Err(e) => {
                    warn!("Malformed handshake from {}: {}", self.addr, e);
                    self.close(None).await;
                    ControlFlow::Break(())
                }
            },
            SessionState::Established => match decoded {
                Ok(message) => self.dispatch(message).await,
                Err(Error::NotImplemented { kind, request_id }) => {
                    if let Some((session, _)) = &self.attached {
                        let e = Error::NotImplemented { kind, request_id };
                        reply(session, kind, request_id.unwrap_or(0), Err(e)).await;
                    }
                    ControlFlow::Continue(())
                }
                Err(e) => {
                    warn!("Malformed message from {}: {}", self.addr, e);
                    self.close(Some(GOODBYE_CLOSE_REALM)).await;
                    ControlFlow::Break(())
                }
            },
            _ => ControlFlow::Break(()),
        }
    }

    async fn attach(&mut self, hello: HelloMessage) -> ControlFlow<()> {
        self.set_state(SessionState::Establishing);

        let realm = match self.ctx.realm(&hello.realm) {
            Ok(realm) => realm,
            Err(e) => return self.abort(&e).await,
        };

        let id = self.ctx.session_ids.next();
        let session = Arc::new(Session::new(
            id,
            realm.name().to_string(),
            self.ctx.config.roles,
            self.addr,
            self.sender.clone(),
            self.ctx.codec.clone(),
        ));
        if let Err(e) = realm.add_session(session.clone()) {
            return self.abort(&e).await;
        }
        self.attached = Some((session.clone(), realm));
        self.set_state(SessionState::Established);

        let mut details = Dict::new();
        details.insert("agent".into(), json!(self.ctx.config.agent));
        details.insert("roles".into(), Value::Object(self.ctx.config.roles.details()));
        let welcome = Message::Welcome(WelcomeMessage {
            session: id,
            details,
        });
        if let Err(e) = session.send_message(&welcome).await {
            warn!("WELCOME to {} failed: {}", self.addr, e);
            self.close(None).await;
            return ControlFlow::Break(());
        }

        info!(
            "Session {} attached to realm {} from {}",
            id, hello.realm, self.addr
        );
        ControlFlow::Continue(())
    }

    /// Send ABORT and close
    async fn abort(&mut self, error: &Error) -> ControlFlow<()> {
        warn!("Aborting session from {}: {}", self.addr, error);

        let mut details = Dict::new();
        details.insert("message".into(), json!(error.to_string()));
        let abort = Message::Abort(AbortMessage {
            details,
            reason: error.uri().to_string(),
        });
        match self.ctx.codec.encode_frame(&abort) {
            Ok(data) => {
                if let Err(e) = self.sender.send(data).await {
                    debug!("ABORT to {} not delivered: {}", self.addr, e);
                }
            }
            Err(e) => error!("Cannot encode ABORT: {}", e),
        }

        // ABORT replaces GOODBYE
        self.close(None).await;
        ControlFlow::Break(())
    }

    /// Detach from the realm and close the transport.
    ///
    /// `goodbye` is sent first, best effort, when the session was established.
    pub(crate) async fn close(&mut self, goodbye: Option<&str>) {
        if self.state == SessionState::Closed {
            return;
        }

        if let Some((session, realm)) = self.attached.take() {
            self.set_state(SessionState::Closing);

            if let Some(reason) = goodbye {
                let mut details = Dict::new();
                details.insert("message".into(), json!("Close connection"));
                let goodbye = Message::Goodbye(GoodbyeMessage {
                    details,
                    reason: reason.to_string(),
                });
                if let Err(e) = session.send_message(&goodbye).await {
                    debug!("GOODBYE to session {} not delivered: {}", session.id, e);
                }
            }

            match realm.remove_session(session.id) {
                Ok(orphans) => cancel_calls(orphans, "callee left the realm").await,
                Err(e) => warn!("Detaching session {}: {}", session.id, e),
            }
            info!("Session {} left realm {}", session.id, realm.name());
        }

        if let Err(e) = self.sender.close().await {
            debug!("Closing transport to {}: {}", self.addr, e);
        }
        self.set_state(SessionState::Closed);
    }

    async fn dispatch(&mut self, message: Message) -> ControlFlow<()> {
        let Some((session, realm)) = self.attached.clone() else {
            return ControlFlow::Break(());
        };

        match message {
            Message::Hello(_) => {
                self.abort(&Error::ProtocolViolation(
                    "HELLO on an established session".into(),
                ))
                .await
            }
            Message::Goodbye(GoodbyeMessage { reason, .. })
            | Message::Abort(AbortMessage { reason, .. }) => {
                info!("Session {} closing: {}", session.id, reason);
                self.close(None).await;
                ControlFlow::Break(())
            }
            Message::Subscribe(m) => {
                self.subscribe(&session, &realm, m).await;
                ControlFlow::Continue(())
            }
            Message::Unsubscribe(m) => {
                self.unsubscribe(&session, &realm, m).await;
                ControlFlow::Continue(())
            }
            Message::Publish(m) => {
                self.publish(&session, &realm, m).await;
                ControlFlow::Continue(())
            }
            Message::Register(m) => {
                self.register(&session, &realm, m).await;
                ControlFlow::Continue(())
            }
            Message::Unregister(m) => {
                self.unregister(&session, &realm, m).await;
                ControlFlow::Continue(())
            }
            Message::Call(m) => {
                self.call(&session, &realm, m).await;
                ControlFlow::Continue(())
            }
            Message::Yield(m) => {
                self.yield_result(&session, &realm, m).await;
                ControlFlow::Continue(())
            }
            Message::Error(m) if m.request_type == MessageType::Invocation => {
                self.invocation_error(&session, &realm, m).await;
                ControlFlow::Continue(())
            }
            Message::Error(m) => {
                warn!(
                    "Session {} sent ERROR for {}; dropped",
                    session.id, m.request_type
                );
                ControlFlow::Continue(())
            }
            other => {
                self.abort(&Error::ProtocolViolation(format!(
                    "{} is not sent by clients",
                    other.message_type()
                )))
                .await
            }
        }
    }

    fn require_broker(&self, kind: MessageType, request_id: Id) -> Result<()> {
        if self.ctx.config.roles.broker {
            Ok(())
        } else {
            Err(Error::NotImplemented {
                kind,
                request_id: Some(request_id),
            })
        }
    }

    fn require_dealer(&self, kind: MessageType, request_id: Id) -> Result<()> {
        if self.ctx.config.roles.dealer {
            Ok(())
        } else {
            Err(Error::NotImplemented {
                kind,
                request_id: Some(request_id),
            })
        }
    }

    // =========================================================================
    // Broker
    // =========================================================================

    async fn subscribe(&self, session: &Session, realm: &Realm, m: SubscribeMessage) {
        let kind = MessageType::Subscribe;
        let outcome = self
            .require_broker(kind, m.request_id)
            .and_then(|_| realm.subscribe(&m.topic, session.id))
            .map(|subscription_id| {
                debug!("Session {} subscribed to {}", session.id, m.topic);
                Message::Subscribed(SubscribedMessage {
                    request_id: m.request_id,
                    subscription_id,
                })
            });
        reply(session, kind, m.request_id, outcome).await;
    }

    async fn unsubscribe(&self, session: &Session, realm: &Realm, m: UnsubscribeMessage) {
        let kind = MessageType::Unsubscribe;
        let outcome = self
            .require_broker(kind, m.request_id)
            .and_then(|_| realm.unsubscribe(m.subscription_id, session.id))
            .map(|_| {
                Message::Unsubscribed(UnsubscribedMessage {
                    request_id: m.request_id,
                })
            });
        reply(session, kind, m.request_id, outcome).await;
    }

    async fn publish(&self, session: &Session, realm: &Realm, m: PublishMessage) {
        let kind = MessageType::Publish;
        let request_id = m.request_id;

        let prepared = self.require_broker(kind, request_id).and_then(|_| {
            let filter = PublishFilter::from_options(session.id, &m.options)?;
            let topic = realm.topic(m.topic.as_str())?;
            let disclose_me = flag(&m.options, "disclose_me");
            if disclose_me && topic.disallow_disclose_me {
                return Err(Error::OptionDisallowed("disclose_me".into()));
            }
            Ok((filter, topic, disclose_me))
        });
        let (filter, topic, disclose_me) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return reply(session, kind, request_id, Err(e)).await,
        };

        let publication_id = realm.next_id();
        if flag(&m.options, "acknowledge") {
            let published = Message::Published(PublishedMessage {
                request_id,
                publication_id,
            });
            reply(session, kind, request_id, Ok(published)).await;
        }

        let mut details = Dict::new();
        if disclose_me || topic.auto_disclose {
            details.insert("publisher".into(), json!(session.id));
        }
        let event = Message::Event(EventMessage {
            subscription_id: topic.id,
            publication_id,
            details,
            args: m.args,
            kwargs: m.kwargs,
        });
        let data = match self.ctx.codec.encode_frame(&event) {
            Ok(data) => data,
            Err(e) => {
                error!("Cannot encode EVENT for {}: {}", topic.uri, e);
                return;
            }
        };

        let recipients: Vec<_> = topic
            .subscribers
            .into_iter()
            .filter(|s| filter.admits(s.id))
            .collect();
        debug!(
            "Publication {} on {} to {} subscribers",
            publication_id,
            topic.uri,
            recipients.len()
        );

        // sends only queue the frame on each subscriber's outbox
        for subscriber in &recipients {
            if let Err(e) = subscriber.send(data.clone()).await {
                warn!("EVENT to session {} dropped: {}", subscriber.id, e);
            }
        }
    }

    // =========================================================================
    // Dealer
    // =========================================================================

    async fn register(&self, session: &Session, realm: &Realm, m: RegisterMessage) {
        let kind = MessageType::Register;
        let outcome = self
            .require_dealer(kind, m.request_id)
            .and_then(|_| realm.register(&m.procedure, session.id))
            .map(|registration_id| {
                Message::Registered(RegisteredMessage {
                    request_id: m.request_id,
                    registration_id,
                })
            });
        reply(session, kind, m.request_id, outcome).await;
    }

    async fn unregister(&self, session: &Session, realm: &Realm, m: UnregisterMessage) {
        let kind = MessageType::Unregister;
        let outcome = self
            .require_dealer(kind, m.request_id)
            .and_then(|_| realm.unregister(m.registration_id, session.id));

        match outcome {
            Ok(orphans) => {
                let done = Message::Unregistered(UnregisteredMessage {
                    request_id: m.request_id,
                });
                reply(session, kind, m.request_id, Ok(done)).await;
                cancel_calls(orphans, "procedure unregistered").await;
            }
            Err(e) => reply(session, kind, m.request_id, Err(e)).await,
        }
    }

    async fn call(&self, session: &Session, realm: &Realm, m: CallMessage) {
        let kind = MessageType::Call;
        let invocation = match self
            .require_dealer(kind, m.request_id)
            .and_then(|_| realm.invoke(&m.procedure, session.id, m.request_id))
        {
            Ok(invocation) => invocation,
            Err(e) => return reply(session, kind, m.request_id, Err(e)).await,
        };

        let mut details = Dict::new();
        if flag(&m.options, "disclose_me") {
            details.insert("caller".into(), json!(session.id));
        }
        let message = Message::Invocation(InvocationMessage {
            request_id: invocation.id,
            registration_id: invocation.registration_id,
            details,
            args: m.args,
            kwargs: m.kwargs,
        });

        if let Err(e) = invocation.callee.send_message(&message).await {
            warn!(
                "INVOCATION to session {} failed: {}",
                invocation.callee.id, e
            );
            if let Ok(pending) = realm.resolve_invocation(invocation.id, invocation.callee.id) {
                cancel_calls(vec![pending], "callee unreachable").await;
            }
        }
    }

    async fn yield_result(&self, session: &Session, realm: &Realm, m: YieldMessage) {
        let pending = match realm.resolve_invocation(m.request_id, session.id) {
            Ok(pending) => pending,
            Err(e) => return reply(session, MessageType::Yield, m.request_id, Err(e)).await,
        };

        let Some(caller) = pending.caller else {
            debug!(
                "Caller {} left before invocation {} returned",
                pending.caller_id, m.request_id
            );
            return;
        };

        let result = Message::Result(ResultMessage {
            request_id: pending.request_id,
            options: Dict::new(),
            args: m.args,
            kwargs: m.kwargs,
        });
        if let Err(e) = caller.send_message(&result).await {
            warn!("RESULT to session {} failed: {}", caller.id, e);
        }
    }

    async fn invocation_error(&self, session: &Session, realm: &Realm, m: ErrorMessage) {
        let pending = match realm.resolve_invocation(m.request_id, session.id) {
            Ok(pending) => pending,
            Err(e) => {
                debug!("Dropping ERROR from session {}: {}", session.id, e);
                return;
            }
        };

        let Some(caller) = pending.caller else {
            debug!(
                "Caller {} left before invocation {} failed",
                pending.caller_id, m.request_id
            );
            return;
        };

        let error = Message::Error(ErrorMessage {
            request_type: MessageType::Call,
            request_id: pending.request_id,
            details: m.details,
            error: m.error,
            args: m.args,
            kwargs: m.kwargs,
        });
        if let Err(e) = caller.send_message(&error).await {
            warn!("ERROR to session {} failed: {}", caller.id, e);
        }
    }
}

/// Send the outcome of a request, converting failures into ERROR
async fn reply(session: &Session, kind: MessageType, request_id: Id, outcome: Result<Message>) {
    let message = match outcome {
        Ok(message) => message,
        Err(e) => {
            debug!("{} {} from session {} failed: {}", kind, request_id, session.id, e);
            Message::Error(ErrorMessage::new(kind, request_id, e.uri()))
        }
    };

    if let Err(e) = session.send_message(&message).await {
        warn!("Reply to session {} failed: {}", session.id, e);
    }
}
