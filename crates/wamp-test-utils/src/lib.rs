//! Common test helpers and utilities for WAMP router tests
//!
//! This crate provides:
//! - Condition-based waiting (no hardcoded sleeps)
//! - A router running over the in-memory transport, cleaned up on drop
//! - A scripted WAMP client with typed send/expect helpers

use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use wamp_core::{
    CallMessage, Codec, Dict, HelloMessage, Id, List, Message, PublishMessage, RegisterMessage,
    SubscribeMessage, YieldMessage,
};
use wamp_router::{Router, RouterConfig};
use wamp_transport::{
    MemoryConnector, MemoryReceiver, MemorySender, MemoryServer, TransportEvent,
    TransportReceiver, TransportSender,
};

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// How long `expect_silence` listens before concluding nothing is coming
pub const QUIET_PERIOD: Duration = Duration::from_millis(100);

// ============================================================================
// Port Allocation
// ============================================================================

/// Find an available TCP port for testing
pub async fn find_available_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F, Fut>(check: F, interval: Duration, max_wait: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }
    false
}

/// Build a dict from a `json!` object literal
pub fn dict(value: Value) -> Dict {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

// ============================================================================
// Test Router
// ============================================================================

/// A router served over the in-memory transport, stopped on drop
pub struct TestRouter {
    router: Router,
    connector: MemoryConnector,
    handle: Option<JoinHandle<()>>,
}

impl TestRouter {
    /// Start a test router with default configuration
    pub async fn start() -> Self {
        Self::start_with_config(RouterConfig::default()).await
    }

    /// Start a test router with custom configuration
    pub async fn start_with_config(config: RouterConfig) -> Self {
        let router = Router::new(config).expect("router config");
        let (server, connector) = MemoryServer::new();

        let serving = router.clone();
        let handle = tokio::spawn(async move {
            let _ = serving.serve_on(server).await;
        });

        Self {
            router,
            connector,
            handle: Some(handle),
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Open a connection without sending HELLO
    pub fn connect(&self) -> TestClient {
        let (sender, receiver) = self.connector.connect().expect("memory connect");
        TestClient::new(sender, receiver)
    }

    /// Open a connection and attach it to `realm`
    pub async fn join(&self, realm: &str) -> TestClient {
        let mut client = self.connect();
        client.join(realm).await;
        client
    }

    /// Wait until the router reports `n` attached sessions
    pub async fn wait_for_sessions(&self, n: usize) -> bool {
        let router = &self.router;
        wait_for(
            || async move { router.session_count() == n },
            DEFAULT_CHECK_INTERVAL,
            DEFAULT_TIMEOUT,
        )
        .await
    }

    /// Stop the router explicitly (also happens on drop)
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TestRouter {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Test Client
// ============================================================================

/// A scripted WAMP peer
pub struct TestClient {
    sender: MemorySender,
    receiver: MemoryReceiver,
    codec: Codec,
    next_request: Id,
    session_id: Option<Id>,
}

impl TestClient {
    pub fn new(sender: MemorySender, receiver: MemoryReceiver) -> Self {
        Self {
            sender,
            receiver,
            codec: Codec::default(),
            next_request: 1,
            session_id: None,
        }
    }

    /// Session id from WELCOME
    pub fn session_id(&self) -> Id {
        self.session_id.expect("client has not joined a realm")
    }

    /// Fresh request id
    pub fn request_id(&mut self) -> Id {
        let id = self.next_request;
        self.next_request += 1;
        id
    }

    pub async fn send(&self, message: Message) {
        let data = self.codec.encode_frame(&message).expect("encode");
        self.sender.send(data).await.expect("send");
    }

    /// Send raw wire text, bypassing validation
    pub async fn send_raw(&self, text: &str) {
        self.sender
            .send(text.as_bytes().to_vec().into())
            .await
            .expect("send");
    }

    /// Close the transport from the client side
    pub async fn disconnect(&self) {
        let _ = self.sender.close().await;
    }

    /// Next transport event other than `Connected`, or `None` on timeout
    async fn next_event(&mut self, wait: Duration) -> Option<TransportEvent> {
        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, self.receiver.recv()).await {
                Ok(Some(TransportEvent::Connected)) => continue,
                Ok(Some(event)) => return Some(event),
                Ok(None) => {
                    return Some(TransportEvent::Disconnected {
                        code: None,
                        reason: None,
                    })
                }
                Err(_) => return None,
            }
        }
    }

    /// Next message; panics on timeout or close
    pub async fn expect(&mut self) -> Message {
        match self.next_event(DEFAULT_TIMEOUT).await {
            Some(TransportEvent::Data(data)) => self.codec.decode_frame(&data).expect("decode"),
            Some(other) => panic!("expected a message, got {:?}", other),
            None => panic!("timed out waiting for a message"),
        }
    }

    /// Next message as its decoded wire array
    pub async fn expect_wire(&mut self) -> Value {
        match self.next_event(DEFAULT_TIMEOUT).await {
            Some(TransportEvent::Data(data)) => serde_json::from_slice(&data).expect("json"),
            Some(other) => panic!("expected a message, got {:?}", other),
            None => panic!("timed out waiting for a message"),
        }
    }

    /// Wait until the router closes the transport, skipping any messages
    pub async fn expect_closed(&mut self) -> Vec<Message> {
        let mut seen = Vec::new();
        loop {
            match self.next_event(DEFAULT_TIMEOUT).await {
                Some(TransportEvent::Data(data)) => {
                    seen.push(self.codec.decode_frame(&data).expect("decode"))
                }
                Some(TransportEvent::Disconnected { .. }) => return seen,
                Some(TransportEvent::Error(e)) => panic!("transport error: {}", e),
                Some(TransportEvent::Connected) => {}
                None => panic!("timed out waiting for close; got {:?}", seen),
            }
        }
    }

    /// Assert that nothing arrives for a short while
    pub async fn expect_silence(&mut self) {
        if let Some(event) = self.next_event(QUIET_PERIOD).await {
            panic!("expected silence, got {:?}", event);
        }
    }

    // ------------------------------------------------------------------------
    // Protocol helpers
    // ------------------------------------------------------------------------

    pub async fn hello(&mut self, realm: &str) -> Message {
        self.send(Message::Hello(HelloMessage {
            realm: realm.to_string(),
            details: dict(json!({"roles": {"publisher": {}, "subscriber": {}, "caller": {}, "callee": {}}})),
        }))
        .await;
        self.expect().await
    }

    /// HELLO and require WELCOME
    pub async fn join(&mut self, realm: &str) -> Id {
        match self.hello(realm).await {
            Message::Welcome(welcome) => {
                self.session_id = Some(welcome.session);
                welcome.session
            }
            other => panic!("expected WELCOME, got {:?}", other),
        }
    }

    /// SUBSCRIBE and require SUBSCRIBED; returns the subscription id
    pub async fn subscribe(&mut self, topic: &str) -> Id {
        let request_id = self.request_id();
        self.send(Message::Subscribe(SubscribeMessage {
            request_id,
            options: Dict::new(),
            topic: topic.to_string(),
        }))
        .await;

        match self.expect().await {
            Message::Subscribed(m) if m.request_id == request_id => m.subscription_id,
            other => panic!("expected SUBSCRIBED, got {:?}", other),
        }
    }

    /// PUBLISH; returns the request id
    pub async fn publish(&mut self, topic: &str, options: Dict, args: List) -> Id {
        let request_id = self.request_id();
        self.send(Message::Publish(PublishMessage {
            request_id,
            options,
            topic: topic.to_string(),
            args,
            kwargs: Dict::new(),
        }))
        .await;
        request_id
    }

    /// REGISTER and require REGISTERED; returns the registration id
    pub async fn register(&mut self, procedure: &str) -> Id {
        let request_id = self.request_id();
        self.send(Message::Register(RegisterMessage {
            request_id,
            options: Dict::new(),
            procedure: procedure.to_string(),
        }))
        .await;

        match self.expect().await {
            Message::Registered(m) if m.request_id == request_id => m.registration_id,
            other => panic!("expected REGISTERED, got {:?}", other),
        }
    }

    /// CALL; returns the request id
    pub async fn call(&mut self, procedure: &str, options: Dict, args: List) -> Id {
        let request_id = self.request_id();
        self.send(Message::Call(CallMessage {
            request_id,
            options,
            procedure: procedure.to_string(),
            args,
            kwargs: Dict::new(),
        }))
        .await;
        request_id
    }

    /// YIELD a result for `invocation_id`
    pub async fn yield_result(&self, invocation_id: Id, args: List) {
        self.send(Message::Yield(YieldMessage {
            request_id: invocation_id,
            options: Dict::new(),
            args,
            kwargs: Dict::new(),
        }))
        .await;
    }
}
