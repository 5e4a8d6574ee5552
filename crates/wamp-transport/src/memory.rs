//! In-memory transport
//!
//! Connections are a pair of unbounded channels. A [`MemoryServer`] accepts
//! connections opened through its [`MemoryConnector`], so a router can be
//! driven end to end without sockets.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{TransportEvent, TransportReceiver, TransportSender, TransportServer};

/// Close code reported when a side closes normally
const NORMAL_CLOSURE: u16 = 1000;

/// Sending half of an in-memory connection
pub struct MemorySender {
    peer_tx: mpsc::UnboundedSender<TransportEvent>,
    own_tx: mpsc::UnboundedSender<TransportEvent>,
    connected: Arc<Mutex<bool>>,
}

#[async_trait]
impl TransportSender for MemorySender {
    async fn send(&self, data: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        self.peer_tx
            .send(TransportEvent::Data(data))
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        let was_connected = std::mem::replace(&mut *self.connected.lock(), false);
        if was_connected {
            let closed = TransportEvent::Disconnected {
                code: Some(NORMAL_CLOSURE),
                reason: None,
            };
            let _ = self.peer_tx.send(closed.clone());
            let _ = self.own_tx.send(closed);
        }
        Ok(())
    }
}

/// Receiving half of an in-memory connection
pub struct MemoryReceiver {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for MemoryReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// Create a connected pair of endpoints
pub fn pair() -> ((MemorySender, MemoryReceiver), (MemorySender, MemoryReceiver)) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let connected = Arc::new(Mutex::new(true));

    let _ = a_tx.send(TransportEvent::Connected);
    let _ = b_tx.send(TransportEvent::Connected);

    let a = (
        MemorySender {
            peer_tx: b_tx.clone(),
            own_tx: a_tx.clone(),
            connected: connected.clone(),
        },
        MemoryReceiver { rx: a_rx },
    );
    let b = (
        MemorySender {
            peer_tx: a_tx,
            own_tx: b_tx,
            connected,
        },
        MemoryReceiver { rx: b_rx },
    );
    (a, b)
}

type Accepted = (MemorySender, MemoryReceiver, SocketAddr);

/// Listener side of the in-memory transport
pub struct MemoryServer {
    incoming: mpsc::UnboundedReceiver<Accepted>,
    closed: Arc<AtomicBool>,
}

/// Opens connections to a [`MemoryServer`]
#[derive(Clone)]
pub struct MemoryConnector {
    incoming: mpsc::UnboundedSender<Accepted>,
    closed: Arc<AtomicBool>,
    next_port: Arc<AtomicU16>,
}

impl MemoryServer {
    pub fn new() -> (Self, MemoryConnector) {
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        (
            Self {
                incoming: rx,
                closed: closed.clone(),
            },
            MemoryConnector {
                incoming: tx,
                closed,
                next_port: Arc::new(AtomicU16::new(1)),
            },
        )
    }
}

impl MemoryConnector {
    /// Open a connection; returns the client side
    pub fn connect(&self) -> Result<(MemorySender, MemoryReceiver)> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed("server closed".into()));
        }

        let (client, (sender, receiver)) = pair();
        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        let addr = SocketAddr::from(([127, 0, 0, 1], port));

        self.incoming
            .send((sender, receiver, addr))
            .map_err(|_| TransportError::ConnectionFailed("server dropped".into()))?;
        debug!("Memory connection opened as {}", addr);
        Ok(client)
    }
}

#[async_trait]
impl TransportServer for MemoryServer {
    type Sender = MemorySender;
    type Receiver = MemoryReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        self.incoming
            .recv()
            .await
            .ok_or(TransportError::ConnectionClosed)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
