//! Main router implementation
//!
//! The router is transport-agnostic: it accepts connections from any
//! transport implementing [`TransportServer`] (WebSocket, in-memory) and runs
//! one [`SessionHandler`] task per connection.
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

use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use wamp_core::{Codec, CodecConfig, Error};
use wamp_transport::{
    TransportError, TransportEvent, TransportReceiver, TransportSender, TransportServer,
};

#[cfg(feature = "websocket")]
use wamp_transport::{WebSocketConfig, WebSocketServer};

use crate::{
    error::{Result, RouterError},
    handler::{SessionHandler, GOODBYE_CLOSE_REALM, GOODBYE_SYSTEM_SHUTDOWN},
    id::IdAllocator,
    outbox::Outbox,
    realm::{Realm, RealmConfig},
    session::Roles,
};

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Agent string sent in WELCOME
    pub agent: String,
    /// Roles the router plays
    pub roles: Roles,
    /// Create realms on first HELLO instead of rejecting unknown ones
    pub auto_create_realms: bool,
    /// URI and dict-key rules
    pub codec: CodecConfig,
    /// Realms that exist from start-up
    pub realms: Vec<RealmConfig>,
    /// How long `shutdown` waits for sessions to close
    pub shutdown_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            agent: concat!("wamp-router/", env!("CARGO_PKG_VERSION")).to_string(),
            roles: Roles::default(),
            auto_create_realms: true,
            codec: CodecConfig::default(),
            realms: Vec::new(),
            shutdown_timeout: Duration::from_millis(500),
        }
    }
}

/// State shared by the router and every connection task
pub(crate) struct RouterContext {
    pub(crate) config: RouterConfig,
    pub(crate) codec: Arc<Codec>,
    pub(crate) session_ids: IdAllocator,
    realms: DashMap<String, Arc<Realm>>,
}

impl RouterContext {
    /// Existing realm, or a new one when auto-create is on
    pub(crate) fn realm(&self, uri: &str) -> wamp_core::Result<Arc<Realm>> {
        if let Some(realm) = self.realms.get(uri) {
            return Ok(realm.clone());
        }
        if !self.codec.is_uri(uri) {
            return Err(Error::InvalidUri(uri.to_string()));
        }
        if !self.config.auto_create_realms {
            return Err(Error::NoSuchRealm(uri.to_string()));
        }

        let realm = self
            .realms
            .entry(uri.to_string())
            .or_insert_with(|| {
                info!("Realm {} created", uri);
                Arc::new(Realm::new(uri))
            })
            .clone();
        Ok(realm)
    }

    fn add_realm(&self, config: RealmConfig) -> wamp_core::Result<Arc<Realm>> {
        if !self.codec.is_uri(&config.name) {
            return Err(Error::InvalidUri(config.name));
        }

        match self.realms.entry(config.name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(Error::RealmAlreadyExists(config.name))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                info!("Realm {} declared", config.name);
                let realm = Arc::new(Realm::from_config(config));
                slot.insert(realm.clone());
                Ok(realm)
            }
        }
    }
}

/// Shutdown signalling.
///
/// Every running listener and connection task holds a clone of `tracker`;
/// `done` yields `None` once all of them have finished.
struct Lifecycle {
    signal: watch::Sender<bool>,
    tracker: Mutex<Option<mpsc::Sender<()>>>,
    done: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

/// WAMP router
#[derive(Clone)]
pub struct Router {
    ctx: Arc<RouterContext>,
    lifecycle: Arc<Lifecycle>,
}

impl Router {
    pub fn new(config: RouterConfig) -> Result<Self> {
        let codec = Codec::new(&config.codec)?;
        let declared = config.realms.clone();

        let ctx = Arc::new(RouterContext {
            config,
            codec: Arc::new(codec),
            session_ids: IdAllocator::new(),
            realms: DashMap::new(),
        });
        for realm in declared {
            ctx.add_realm(realm)?;
        }

        info!(
            "Router option for auto-creating realms is {}",
            if ctx.config.auto_create_realms { "set" } else { "not set" }
        );

        let (signal, _) = watch::channel(false);
        let (tracker, done) = mpsc::channel(1);

        Ok(Self {
            ctx,
            lifecycle: Arc::new(Lifecycle {
                signal,
                tracker: Mutex::new(Some(tracker)),
                done: tokio::sync::Mutex::new(done),
            }),
        })
    }

    pub fn config(&self) -> &RouterConfig {
        &self.ctx.config
    }

    // =========================================================================
    // Transport-Agnostic Methods
    // =========================================================================

    /// Serve using any TransportServer implementation.
    ///
    /// Returns once the listener closes or the router shuts down.
    pub async fn serve_on<S>(&self, mut server: S) -> Result<()>
    where
        S: TransportServer + 'static,
        S::Sender: 'static,
        S::Receiver: 'static,
    {
        let Some(guard) = self.lifecycle.tracker.lock().clone() else {
            warn!("Router is shut down; not accepting connections");
            return Ok(());
        };
        let mut shutdown = self.lifecycle.signal.subscribe();

        info!("Router accepting connections");

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                accepted = server.accept() => match accepted {
                    Ok((sender, receiver, addr)) => {
                        info!("New connection from {}", addr);
                        self.handle_connection(Arc::new(sender), receiver, addr, guard.clone());
                    }
                    Err(TransportError::ConnectionClosed) => {
                        info!("Listener closed");
                        break;
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
        }

        if let Err(e) = server.close().await {
            warn!("Error closing listener: {}", e);
        }
        drop(guard);
        Ok(())
    }

    // =========================================================================
    // WebSocket Transport
    // =========================================================================

    /// Start the router on a WebSocket listener
    #[cfg(feature = "websocket")]
    pub async fn serve_websocket(&self, addr: &str, config: WebSocketConfig) -> Result<()> {
        let server = WebSocketServer::bind(addr).await?.with_config(config);
        info!(
            "WebSocket endpoint ws://{}{}",
            server.local_addr()?,
            server.config().path
        );
        self.serve_on(server).await
    }

    /// Handle a new connection
    fn handle_connection(
        &self,
        sender: Arc<dyn TransportSender>,
        mut receiver: impl TransportReceiver + 'static,
        addr: SocketAddr,
        guard: mpsc::Sender<()>,
    ) {
        let ctx = Arc::clone(&self.ctx);
        let mut shutdown = self.lifecycle.signal.subscribe();

        tokio::spawn(async move {
            let _guard = guard;
            let outbox: Arc<dyn TransportSender> = Arc::new(Outbox::spawn(sender, addr));
            let mut handler = SessionHandler::new(ctx, outbox, addr);

            loop {
                tokio::select! {
                    biased;
                    _ = wait_for_shutdown(&mut shutdown) => {
                        handler.close(Some(GOODBYE_SYSTEM_SHUTDOWN)).await;
                        break;
                    }
                    event = receiver.recv() => match event {
                        Some(TransportEvent::Data(data)) => {
                            if handler.handle_data(&data).await.is_break() {
                                break;
                            }
                        }
                        Some(TransportEvent::Connected) => {
                            debug!("Transport from {} connected", addr);
                        }
                        Some(TransportEvent::Disconnected { code, reason }) => {
                            info!("Client {} disconnected: {:?} {:?}", addr, code, reason);
                            handler.close(Some(GOODBYE_CLOSE_REALM)).await;
                            break;
                        }
                        Some(TransportEvent::Error(e)) => {
                            error!("Transport error from {}: {}", addr, e);
                            handler.close(Some(GOODBYE_CLOSE_REALM)).await;
                            break;
                        }
                        None => {
                            handler.close(Some(GOODBYE_CLOSE_REALM)).await;
                            break;
                        }
                    }
                }
            }

            debug!("Connection task for {} finished", addr);
        });
    }

    /// Close every session, stop the listeners and wait for them.
    ///
    /// Fails with [`RouterError::ShutdownTimeout`] when tasks are still
    /// running after the configured timeout.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Router shutting down");
        self.lifecycle.signal.send_replace(true);
        drop(self.lifecycle.tracker.lock().take());

        let limit = self.ctx.config.shutdown_timeout;
        let mut done = self.lifecycle.done.lock().await;
        match tokio::time::timeout(limit, done.recv()).await {
            Ok(_) => {
                info!("Router shut down");
                Ok(())
            }
            Err(_) => {
                error!("Shutdown did not finish within {:?}", limit);
                Err(RouterError::ShutdownTimeout(limit))
            }
        }
    }

    /// Whether `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        *self.lifecycle.signal.borrow()
    }

    // =========================================================================
    // Realms
    // =========================================================================

    /// Look up a realm, creating it when auto-create is enabled
    pub fn realm(&self, uri: &str) -> Result<Arc<Realm>> {
        Ok(self.ctx.realm(uri)?)
    }

    /// Look up an existing realm without creating it
    pub fn find_realm(&self, uri: &str) -> Option<Arc<Realm>> {
        self.ctx.realms.get(uri).map(|r| r.clone())
    }

    /// Declare a realm at runtime
    pub fn add_realm(&self, config: RealmConfig) -> Result<Arc<Realm>> {
        Ok(self.ctx.add_realm(config)?)
    }

    pub fn realm_count(&self) -> usize {
        self.ctx.realms.len()
    }

    /// Sessions attached across all realms
    pub fn session_count(&self) -> usize {
        self.ctx
            .realms
            .iter()
            .map(|entry| entry.value().session_count())
            .sum()
    }
}

/// Resolves once the shutdown flag is raised or the router is gone
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
