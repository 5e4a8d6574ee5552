//! Router tests
//!
//! End-to-end scenarios over the in-memory transport:
//! - Session handshake and realm attachment
//! - Broker: subscribe, publish, exclusion and disclosure
//! - Dealer: register, call, yield and failure paths
//! - Protocol violations and close handling
//! - Graceful shutdown

use serde_json::json;
use std::time::Duration;
use wamp_core::{GoodbyeMessage, Message};
use wamp_router::{RealmConfig, Roles, Router, RouterConfig, RouterError, TopicPolicy};
use wamp_test_utils::{dict, TestRouter};

const REALM: &str = "com.example";
const TOPIC: &str = "com.example.topic";
const PROCEDURE: &str = "com.example.add";

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_welcome_advertises_roles() {
    let router = TestRouter::start().await;
    let mut client = router.connect();

    client
        .send_raw(r#"[1, "com.example", {"roles": {"subscriber": {}}}]"#)
        .await;
    let welcome = client.expect_wire().await;

    assert_eq!(welcome[0], json!(2));
    assert!(welcome[1].as_u64().unwrap() > 0);
    assert!(welcome[2]["agent"].as_str().unwrap().starts_with("wamp-router/"));
    assert!(welcome[2]["roles"]["broker"].is_object());
    assert!(welcome[2]["roles"]["dealer"].is_object());

    assert!(router.wait_for_sessions(1).await);
    assert_eq!(router.router().realm_count(), 1);
}

#[tokio::test]
async fn test_session_ids_are_unique() {
    let router = TestRouter::start().await;
    let a = router.join(REALM).await;
    let b = router.join(REALM).await;
    let c = router.join("com.other").await;

    assert_ne!(a.session_id(), b.session_id());
    assert_ne!(b.session_id(), c.session_id());
    assert_ne!(a.session_id(), c.session_id());
}

#[tokio::test]
async fn test_unknown_realm_aborts() {
    let router = TestRouter::start_with_config(RouterConfig {
        auto_create_realms: false,
        ..Default::default()
    })
    .await;
    let mut client = router.connect();

    client.send_raw(r#"[1, "com.unknown", {}]"#).await;
    let abort = client.expect_wire().await;
    assert_eq!(abort[0], json!(3));
    assert_eq!(abort[2], json!("wamp.error.no_such_realm"));

    assert!(client.expect_closed().await.is_empty());
    assert_eq!(router.router().session_count(), 0);
}

#[tokio::test]
async fn test_declared_realm_without_auto_create() {
    let router = TestRouter::start_with_config(RouterConfig {
        auto_create_realms: false,
        realms: vec![RealmConfig::new(REALM)],
        ..Default::default()
    })
    .await;

    let client = router.join(REALM).await;
    assert!(client.session_id() > 0);
}

#[tokio::test]
async fn test_message_before_hello_closes_silently() {
    let router = TestRouter::start().await;
    let mut client = router.connect();

    client.send_raw(r#"[32, 1, {}, "com.example.topic"]"#).await;
    assert!(client.expect_closed().await.is_empty());
}

#[tokio::test]
async fn test_malformed_hello_closes() {
    let router = TestRouter::start().await;
    let mut client = router.connect();

    client.send_raw("not json").await;
    assert!(client.expect_closed().await.is_empty());
}

// ============================================================================
// Broker
// ============================================================================

#[tokio::test]
async fn test_publish_reaches_subscriber_with_ack() {
    let router = TestRouter::start().await;
    let mut a = router.join(REALM).await;
    let mut b = router.join(REALM).await;

    let subscription = a.subscribe(TOPIC).await;
    let request = b
        .publish(TOPIC, dict(json!({"acknowledge": true})), vec![json!("hi")])
        .await;

    match b.expect().await {
        Message::Published(m) => {
            assert_eq!(m.request_id, request);
            assert!(m.publication_id > 0);
        }
        other => panic!("expected PUBLISHED, got {:?}", other),
    }

    match a.expect().await {
        Message::Event(event) => {
            assert_eq!(event.subscription_id, subscription);
            assert_eq!(event.args, vec![json!("hi")]);
            assert!(event.details.get("publisher").is_none());
        }
        other => panic!("expected EVENT, got {:?}", other),
    }
}

#[tokio::test]
async fn test_publish_without_ack_is_silent() {
    let router = TestRouter::start().await;
    let mut a = router.join(REALM).await;
    let mut b = router.join(REALM).await;

    a.subscribe(TOPIC).await;
    b.publish(TOPIC, dict(json!({})), vec![json!(1)]).await;

    assert!(matches!(a.expect().await, Message::Event(_)));
    b.expect_silence().await;
}

#[tokio::test]
async fn test_publisher_excluded_by_default() {
    let router = TestRouter::start().await;
    let mut a = router.join(REALM).await;

    a.subscribe(TOPIC).await;
    a.publish(TOPIC, dict(json!({"acknowledge": true})), vec![]).await;

    assert!(matches!(a.expect().await, Message::Published(_)));
    a.expect_silence().await;
}

#[tokio::test]
async fn test_exclude_me_false_includes_publisher() {
    let router = TestRouter::start().await;
    let mut a = router.join(REALM).await;

    a.subscribe(TOPIC).await;
    a.publish(
        TOPIC,
        dict(json!({"acknowledge": true, "exclude_me": false})),
        vec![json!("echo")],
    )
    .await;

    assert!(matches!(a.expect().await, Message::Published(_)));
    match a.expect().await {
        Message::Event(event) => assert_eq!(event.args, vec![json!("echo")]),
        other => panic!("expected EVENT, got {:?}", other),
    }
}

#[tokio::test]
async fn test_exclude_wins_over_eligible() {
    let router = TestRouter::start().await;
    let mut publisher = router.join(REALM).await;
    let mut b = router.join(REALM).await;
    let mut c = router.join(REALM).await;
    let mut d = router.join(REALM).await;

    b.subscribe(TOPIC).await;
    c.subscribe(TOPIC).await;
    d.subscribe(TOPIC).await;

    let (b_id, c_id) = (b.session_id(), c.session_id());
    publisher
        .publish(
            TOPIC,
            dict(json!({"exclude": [b_id], "eligible": [b_id, c_id]})),
            vec![],
        )
        .await;

    assert!(matches!(c.expect().await, Message::Event(_)));
    b.expect_silence().await;
    d.expect_silence().await;
}

#[tokio::test]
async fn test_disclose_me_sets_publisher() {
    let router = TestRouter::start().await;
    let mut a = router.join(REALM).await;
    let mut b = router.join(REALM).await;

    a.subscribe(TOPIC).await;
    b.publish(TOPIC, dict(json!({"disclose_me": true})), vec![])
        .await;

    match a.expect().await {
        Message::Event(event) => {
            assert_eq!(event.details.get("publisher"), Some(&json!(b.session_id())));
        }
        other => panic!("expected EVENT, got {:?}", other),
    }
}

#[tokio::test]
async fn test_disallowed_disclosure_fails_before_fan_out() {
    let router = TestRouter::start_with_config(RouterConfig {
        realms: vec![RealmConfig::new(REALM).with_topic(TopicPolicy {
            uri: TOPIC.into(),
            disallow_disclose_me: true,
            auto_disclose: false,
        })],
        ..Default::default()
    })
    .await;
    let mut a = router.join(REALM).await;
    let mut b = router.join(REALM).await;

    a.subscribe(TOPIC).await;
    let request = b
        .publish(TOPIC, dict(json!({"disclose_me": true})), vec![])
        .await;

    assert_eq!(
        b.expect_wire().await,
        json!([8, 16, request, {}, "wamp.error.option_disallowed"])
    );
    a.expect_silence().await;
}

#[tokio::test]
async fn test_auto_disclose_topic() {
    let router = TestRouter::start_with_config(RouterConfig {
        realms: vec![RealmConfig::new(REALM).with_topic(TopicPolicy {
            uri: TOPIC.into(),
            disallow_disclose_me: false,
            auto_disclose: true,
        })],
        ..Default::default()
    })
    .await;
    let mut a = router.join(REALM).await;
    let mut b = router.join(REALM).await;

    a.subscribe(TOPIC).await;
    b.publish(TOPIC, dict(json!({})), vec![]).await;

    match a.expect().await {
        Message::Event(event) => {
            assert_eq!(event.details.get("publisher"), Some(&json!(b.session_id())));
        }
        other => panic!("expected EVENT, got {:?}", other),
    }
}

#[tokio::test]
async fn test_publish_to_unknown_topic() {
    let router = TestRouter::start().await;
    let mut a = router.join(REALM).await;

    let request = a
        .publish("com.example.nobody", dict(json!({"acknowledge": true})), vec![])
        .await;
    assert_eq!(
        a.expect_wire().await,
        json!([8, 16, request, {}, "wamp.error.no_such_subscription"])
    );
}

#[tokio::test]
async fn test_duplicate_subscribe_and_unsubscribe() {
    let router = TestRouter::start().await;
    let mut a = router.join(REALM).await;
    let mut b = router.join(REALM).await;

    let subscription = a.subscribe(TOPIC).await;

    a.send_raw(r#"[32, 50, {}, "com.example.topic"]"#).await;
    assert_eq!(
        a.expect_wire().await,
        json!([8, 32, 50, {}, "wamp.error.topic_already_subscribed"])
    );

    // b never subscribed
    b.send_raw(&format!("[34, 7, {}]", subscription)).await;
    assert_eq!(
        b.expect_wire().await,
        json!([8, 34, 7, {}, "wamp.error.no_such_subscription"])
    );

    a.send_raw(&format!("[34, 51, {}]", subscription)).await;
    assert_eq!(a.expect_wire().await, json!([35, 51]));

    let realm = router.router().find_realm(REALM).unwrap();
    assert_eq!(realm.topic_count(), 0);
}

#[tokio::test]
async fn test_disconnect_drops_subscriptions() {
    let router = TestRouter::start().await;
    let a = router.join(REALM).await;
    let mut b = router.join(REALM).await;

    b.subscribe(TOPIC).await;
    a.disconnect().await;
    assert!(router.wait_for_sessions(1).await);

    b.disconnect().await;
    assert!(router.wait_for_sessions(0).await);

    let realm = router.router().find_realm(REALM).unwrap();
    assert_eq!(realm.topic_count(), 0);
}

// ============================================================================
// Dealer
// ============================================================================

#[tokio::test]
async fn test_call_yield_result() {
    let router = TestRouter::start().await;
    let mut caller = router.join(REALM).await;
    let mut callee = router.join(REALM).await;

    let registration = callee.register(PROCEDURE).await;
    let request = caller
        .call(PROCEDURE, dict(json!({})), vec![json!(2), json!(3)])
        .await;

    let invocation = match callee.expect().await {
        Message::Invocation(m) => {
            assert_eq!(m.registration_id, registration);
            assert_eq!(m.args, vec![json!(2), json!(3)]);
            assert!(m.details.get("caller").is_none());
            m.request_id
        }
        other => panic!("expected INVOCATION, got {:?}", other),
    };

    callee.yield_result(invocation, vec![json!(5)]).await;
    assert_eq!(caller.expect_wire().await, json!([50, request, {}, [5]]));

    // a second YIELD for the same invocation is rejected
    callee.yield_result(invocation, vec![json!(5)]).await;
    assert_eq!(
        callee.expect_wire().await,
        json!([8, 70, invocation, {}, "wamp.error.no_such_invocation"])
    );
    caller.expect_silence().await;
}

#[tokio::test]
async fn test_call_discloses_caller() {
    let router = TestRouter::start().await;
    let mut caller = router.join(REALM).await;
    let mut callee = router.join(REALM).await;

    callee.register(PROCEDURE).await;
    caller
        .call(PROCEDURE, dict(json!({"disclose_me": true})), vec![])
        .await;

    match callee.expect().await {
        Message::Invocation(m) => {
            assert_eq!(m.details.get("caller"), Some(&json!(caller.session_id())));
        }
        other => panic!("expected INVOCATION, got {:?}", other),
    }
}

#[tokio::test]
async fn test_register_twice() {
    let router = TestRouter::start().await;
    let mut a = router.join(REALM).await;
    let mut b = router.join(REALM).await;

    a.register(PROCEDURE).await;
    b.send_raw(r#"[64, 9, {}, "com.example.add"]"#).await;
    assert_eq!(
        b.expect_wire().await,
        json!([8, 64, 9, {}, "wamp.error.procedure_already_exists"])
    );
}

#[tokio::test]
async fn test_call_unknown_procedure() {
    let router = TestRouter::start().await;
    let mut a = router.join(REALM).await;

    let request = a.call("com.example.missing", dict(json!({})), vec![]).await;
    assert_eq!(
        a.expect_wire().await,
        json!([8, 48, request, {}, "wamp.error.no_such_registration"])
    );
}

#[tokio::test]
async fn test_invocation_error_forwarded() {
    let router = TestRouter::start().await;
    let mut caller = router.join(REALM).await;
    let mut callee = router.join(REALM).await;

    callee.register(PROCEDURE).await;
    let request = caller.call(PROCEDURE, dict(json!({})), vec![]).await;
    let invocation = match callee.expect().await {
        Message::Invocation(m) => m.request_id,
        other => panic!("expected INVOCATION, got {:?}", other),
    };

    callee
        .send_raw(&format!(
            r#"[8, 68, {}, {{}}, "com.example.error.overflow", ["too big"]]"#,
            invocation
        ))
        .await;
    assert_eq!(
        caller.expect_wire().await,
        json!([8, 48, request, {}, "com.example.error.overflow", ["too big"]])
    );

    // unknown invocation errors are dropped
    callee
        .send_raw(&format!(r#"[8, 68, {}, {{}}, "com.example.error"]"#, invocation))
        .await;
    callee.expect_silence().await;
    caller.expect_silence().await;
}

#[tokio::test]
async fn test_callee_leaving_cancels_calls() {
    let router = TestRouter::start().await;
    let mut caller = router.join(REALM).await;
    let mut callee = router.join(REALM).await;

    callee.register(PROCEDURE).await;
    let request = caller.call(PROCEDURE, dict(json!({})), vec![]).await;
    assert!(matches!(callee.expect().await, Message::Invocation(_)));

    callee.disconnect().await;
    assert_eq!(
        caller.expect_wire().await,
        json!([8, 48, request, {}, "wamp.error.canceled"])
    );

    let realm = router.router().find_realm(REALM).unwrap();
    assert!(router.wait_for_sessions(1).await);
    assert_eq!(realm.procedure_count(), 0);
}

#[tokio::test]
async fn test_unregister_cancels_pending_calls() {
    let router = TestRouter::start().await;
    let mut caller = router.join(REALM).await;
    let mut callee = router.join(REALM).await;

    let registration = callee.register(PROCEDURE).await;
    let request = caller.call(PROCEDURE, dict(json!({})), vec![]).await;
    assert!(matches!(callee.expect().await, Message::Invocation(_)));

    callee
        .send_raw(&format!("[66, 99, {}]", registration))
        .await;
    assert_eq!(callee.expect_wire().await, json!([67, 99]));
    assert_eq!(
        caller.expect_wire().await,
        json!([8, 48, request, {}, "wamp.error.canceled"])
    );

    // only the owner may unregister
    let mut other = router.join(REALM).await;
    let registration = callee.register(PROCEDURE).await;
    other
        .send_raw(&format!("[66, 5, {}]", registration))
        .await;
    assert_eq!(
        other.expect_wire().await,
        json!([8, 66, 5, {}, "wamp.error.no_such_registration"])
    );
}

#[tokio::test]
async fn test_disabled_dealer_role() {
    let router = TestRouter::start_with_config(RouterConfig {
        roles: Roles {
            broker: true,
            dealer: false,
        },
        ..Default::default()
    })
    .await;
    let mut client = router.connect();

    client.send_raw(r#"[1, "com.example", {}]"#).await;
    let welcome = client.expect_wire().await;
    assert!(welcome[2]["roles"]["broker"].is_object());
    assert!(welcome[2]["roles"].get("dealer").is_none());

    client.send_raw(r#"[64, 3, {}, "com.example.add"]"#).await;
    assert_eq!(
        client.expect_wire().await,
        json!([8, 64, 3, {}, "wamp.error.not_implemented"])
    );
}

// ============================================================================
// Protocol violations and closing
// ============================================================================

#[tokio::test]
async fn test_advanced_message_not_implemented() {
    let router = TestRouter::start().await;
    let mut client = router.join(REALM).await;

    client.send_raw("[49, 17, {}]").await;
    assert_eq!(
        client.expect_wire().await,
        json!([8, 49, 17, {}, "wamp.error.not_implemented"])
    );

    // the session stays usable
    client.subscribe(TOPIC).await;
}

#[tokio::test]
async fn test_second_hello_is_protocol_violation() {
    let router = TestRouter::start().await;
    let mut client = router.join(REALM).await;

    client.send_raw(r#"[1, "com.example", {}]"#).await;
    let closing = client.expect_closed().await;
    match closing.as_slice() {
        [Message::Abort(abort)] => assert_eq!(abort.reason, "wamp.error.protocol_violation"),
        other => panic!("expected a single ABORT, got {:?}", other),
    }
    assert!(router.wait_for_sessions(0).await);
}

#[tokio::test]
async fn test_router_message_from_client_is_protocol_violation() {
    let router = TestRouter::start().await;
    let mut client = router.join(REALM).await;

    client.send_raw("[36, 1, 2, {}]").await;
    match client.expect_closed().await.as_slice() {
        [Message::Abort(abort)] => assert_eq!(abort.reason, "wamp.error.protocol_violation"),
        other => panic!("expected a single ABORT, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_message_closes_with_goodbye() {
    let router = TestRouter::start().await;
    let mut client = router.join(REALM).await;

    client.send_raw(r#"[32, "one", {}, "com.example.topic"]"#).await;
    match client.expect_closed().await.as_slice() {
        [Message::Goodbye(goodbye)] => assert_eq!(goodbye.reason, "wamp.close.close_realm"),
        other => panic!("expected a single GOODBYE, got {:?}", other),
    }
}

#[tokio::test]
async fn test_client_goodbye_gets_no_goodbye() {
    let router = TestRouter::start().await;
    let mut client = router.join(REALM).await;
    assert!(router.wait_for_sessions(1).await);

    client
        .send(Message::Goodbye(GoodbyeMessage {
            details: dict(json!({})),
            reason: "wamp.close.system_shutdown".into(),
        }))
        .await;

    assert!(client.expect_closed().await.is_empty());
    assert!(router.wait_for_sessions(0).await);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_says_goodbye() {
    let router = TestRouter::start().await;
    let mut a = router.join(REALM).await;
    let mut b = router.join("com.other").await;
    assert!(router.wait_for_sessions(2).await);

    router.router().shutdown().await.expect("shutdown");

    for client in [&mut a, &mut b] {
        match client.expect_closed().await.as_slice() {
            [Message::Goodbye(goodbye)] => {
                assert_eq!(goodbye.reason, "wamp.close.system_shutdown")
            }
            other => panic!("expected a single GOODBYE, got {:?}", other),
        }
    }
    assert_eq!(router.router().session_count(), 0);
}

#[tokio::test]
async fn test_shutdown_closes_unattached_connections() {
    let router = TestRouter::start().await;
    let mut pending = router.connect();

    // let the router pick up the connection
    tokio::time::sleep(Duration::from_millis(20)).await;
    router.router().shutdown().await.expect("shutdown");

    assert!(pending.expect_closed().await.is_empty());
}

mod stalled_peer {
    //! A peer that stops reading must not hold up anyone else.

    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use wamp_test_utils::TestClient;
    use wamp_transport::{
        MemoryConnector, MemoryReceiver, MemorySender, MemoryServer, TransportSender,
        TransportServer,
    };

    /// Memory sender whose sends never complete once `stalled` is set
    struct StallingSender {
        inner: MemorySender,
        stalled: Arc<AtomicBool>,
    }

    #[async_trait]
    impl TransportSender for StallingSender {
        async fn send(&self, data: Bytes) -> wamp_transport::Result<()> {
            if self.stalled.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.inner.send(data).await
        }

        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }

        async fn close(&self) -> wamp_transport::Result<()> {
            self.inner.close().await
        }
    }

    /// Hands out one stall switch per accepted connection, in accept order
    struct StallingServer {
        inner: MemoryServer,
        switches: mpsc::UnboundedSender<Arc<AtomicBool>>,
    }

    #[async_trait]
    impl TransportServer for StallingServer {
        type Sender = StallingSender;
        type Receiver = MemoryReceiver;

        async fn accept(
            &mut self,
        ) -> wamp_transport::Result<(StallingSender, MemoryReceiver, SocketAddr)> {
            let (inner, receiver, addr) = self.inner.accept().await?;
            let stalled = Arc::new(AtomicBool::new(false));
            self.switches
                .send(stalled.clone())
                .expect("test dropped the switch receiver");
            Ok((StallingSender { inner, stalled }, receiver, addr))
        }

        fn local_addr(&self) -> wamp_transport::Result<SocketAddr> {
            self.inner.local_addr()
        }

        async fn close(&self) -> wamp_transport::Result<()> {
            self.inner.close().await
        }
    }

    fn connect(connector: &MemoryConnector) -> TestClient {
        let (sender, receiver) = connector.connect().expect("memory connect");
        TestClient::new(sender, receiver)
    }

    #[tokio::test]
    async fn test_stalled_peer_does_not_block_sender() {
        let router = Router::new(RouterConfig::default()).unwrap();
        let (inner, connector) = MemoryServer::new();
        let (switches, mut accepted) = mpsc::unbounded_channel();

        let serving = router.clone();
        tokio::spawn(async move { serving.serve_on(StallingServer { inner, switches }).await });

        let mut a = connect(&connector);
        a.join(REALM).await;
        accepted.recv().await.unwrap();

        let mut slow = connect(&connector);
        slow.join(REALM).await;
        let slow_switch = accepted.recv().await.unwrap();
        slow.subscribe(TOPIC).await;
        slow.register(PROCEDURE).await;
        slow_switch.store(true, Ordering::SeqCst);

        // EVENTs to the stalled subscriber
        for _ in 0..50 {
            a.publish(TOPIC, dict(json!({})), vec![json!("x")]).await;
        }
        let request = a
            .publish(TOPIC, dict(json!({"acknowledge": true})), vec![])
            .await;
        match a.expect().await {
            Message::Published(m) => assert_eq!(m.request_id, request),
            other => panic!("expected PUBLISHED, got {:?}", other),
        }

        // INVOCATION to the stalled callee
        a.call(PROCEDURE, dict(json!({})), vec![]).await;

        // a's session still answers
        a.subscribe("com.example.other").await;
        a.register("com.example.mul").await;
    }
}

mod stuck_transport {
    //! A transport whose close never completes, to exercise the shutdown
    //! timeout.

    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::net::SocketAddr;
    use tokio::sync::mpsc;
    use wamp_transport::{
        TransportError, TransportEvent, TransportReceiver, TransportSender, TransportServer,
    };

    struct StuckSender;

    #[async_trait]
    impl TransportSender for StuckSender {
        async fn send(&self, _data: Bytes) -> wamp_transport::Result<()> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        async fn close(&self) -> wamp_transport::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct IdleReceiver(mpsc::Receiver<TransportEvent>);

    #[async_trait]
    impl TransportReceiver for IdleReceiver {
        async fn recv(&mut self) -> Option<TransportEvent> {
            self.0.recv().await
        }
    }

    struct OneShotServer {
        connection: Option<(StuckSender, IdleReceiver)>,
    }

    #[async_trait]
    impl TransportServer for OneShotServer {
        type Sender = StuckSender;
        type Receiver = IdleReceiver;

        async fn accept(&mut self) -> wamp_transport::Result<(StuckSender, IdleReceiver, SocketAddr)> {
            match self.connection.take() {
                Some((sender, receiver)) => {
                    Ok((sender, receiver, SocketAddr::from(([127, 0, 0, 1], 9))))
                }
                None => {
                    std::future::pending::<()>().await;
                    Err(TransportError::ConnectionClosed)
                }
            }
        }

        fn local_addr(&self) -> wamp_transport::Result<SocketAddr> {
            Ok(SocketAddr::from(([127, 0, 0, 1], 0)))
        }

        async fn close(&self) -> wamp_transport::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_shutdown_times_out() {
        let router = Router::new(RouterConfig {
            shutdown_timeout: Duration::from_millis(100),
            ..Default::default()
        })
        .unwrap();

        let (events, rx) = mpsc::channel(4);
        events.send(TransportEvent::Connected).await.unwrap();
        let server = OneShotServer {
            connection: Some((StuckSender, IdleReceiver(rx))),
        };

        let serving = router.clone();
        let listener = tokio::spawn(async move { serving.serve_on(server).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        match router.shutdown().await {
            Err(RouterError::ShutdownTimeout(limit)) => {
                assert_eq!(limit, Duration::from_millis(100))
            }
            other => panic!("expected a shutdown timeout, got {:?}", other),
        }

        // the listener itself stopped
        let served = tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .expect("listener did not stop");
        assert!(served.unwrap().is_ok());
        drop(events);
    }
}

#[cfg(feature = "websocket")]
mod websocket_tests {
    use super::*;
    use wamp_test_utils::find_available_port;
    use wamp_transport::{
        Transport, TransportEvent, TransportReceiver, TransportSender, WebSocketConfig,
        WebSocketTransport,
    };

    #[tokio::test]
    async fn test_websocket_handshake() {
        let port = find_available_port().await;
        let addr = format!("127.0.0.1:{}", port);
        let router = Router::new(RouterConfig::default()).unwrap();

        let serving = router.clone();
        let listen_addr = addr.clone();
        tokio::spawn(async move {
            let _ = serving
                .serve_websocket(&listen_addr, WebSocketConfig::default())
                .await;
        });

        let url = format!("ws://{}/ws", addr);
        let mut attempts = 0;
        let (sender, mut receiver) = loop {
            match WebSocketTransport::connect(&url).await {
                Ok(connection) => break connection,
                Err(_) if attempts < 100 => {
                    attempts += 1;
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Err(e) => panic!("router never started listening: {}", e),
            }
        };

        sender
            .send(br#"[1, "com.example", {}]"#.to_vec().into())
            .await
            .unwrap();

        let welcome = loop {
            match tokio::time::timeout(Duration::from_secs(5), receiver.recv())
                .await
                .expect("timed out")
            {
                Some(TransportEvent::Data(data)) => {
                    break serde_json::from_slice::<serde_json::Value>(&data).unwrap()
                }
                Some(TransportEvent::Connected) => continue,
                other => panic!("unexpected event {:?}", other),
            }
        };
        assert_eq!(welcome[0], json!(2));

        router.shutdown().await.expect("shutdown");
        let closed = loop {
            match tokio::time::timeout(Duration::from_secs(5), receiver.recv())
                .await
                .expect("timed out")
            {
                Some(TransportEvent::Data(data)) => {
                    let goodbye: serde_json::Value = serde_json::from_slice(&data).unwrap();
                    assert_eq!(goodbye[0], json!(6));
                }
                Some(TransportEvent::Disconnected { code, .. }) => break code,
                other => panic!("unexpected event {:?}", other),
            }
        };
        assert_eq!(closed, Some(1000));
    }
}
