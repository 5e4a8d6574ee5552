//! Per-connection outbound queue
//!
//! Frames for a connection go through an unbounded queue drained by one
//! writer task, so a peer that stops reading only stalls its own writer.
//! Frames keep their order; `close` runs after every frame queued before it.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use wamp_transport::{Result, TransportError, TransportSender};

enum Outgoing {
    Frame(Bytes),
    Close(oneshot::Sender<()>),
}

/// Queued sender in front of a connection's transport
pub(crate) struct Outbox {
    queue: mpsc::UnboundedSender<Outgoing>,
    open: Arc<Mutex<bool>>,
}

impl Outbox {
    /// Start the writer task for `transport`
    pub(crate) fn spawn(transport: Arc<dyn TransportSender>, addr: SocketAddr) -> Self {
        let (queue, mut pending) = mpsc::unbounded_channel();
        let open = Arc::new(Mutex::new(true));
        let open_writer = open.clone();

        tokio::spawn(async move {
            let mut failed = false;
            while let Some(item) = pending.recv().await {
                match item {
                    Outgoing::Frame(_) if failed => {}
                    Outgoing::Frame(data) => {
                        if let Err(e) = transport.send(data).await {
                            debug!("Send to {} failed, dropping later frames: {}", addr, e);
                            failed = true;
                            *open_writer.lock() = false;
                        }
                    }
                    Outgoing::Close(done) => {
                        if let Err(e) = transport.close().await {
                            debug!("Closing transport to {}: {}", addr, e);
                        }
                        if done.send(()).is_err() {
                            debug!("Close of {} finished after its caller left", addr);
                        }
                        break;
                    }
                }
            }
            *open_writer.lock() = false;
        });

        Self { queue, open }
    }
}

#[async_trait]
impl TransportSender for Outbox {
    /// Queue a frame; never waits on the peer
    async fn send(&self, data: Bytes) -> Result<()> {
        if !*self.open.lock() {
            return Err(TransportError::NotConnected);
        }
        self.queue
            .send(Outgoing::Frame(data))
            .map_err(|_| TransportError::NotConnected)
    }

    fn is_connected(&self) -> bool {
        *self.open.lock()
    }

    /// Close after the queued frames are written
    async fn close(&self) -> Result<()> {
        *self.open.lock() = false;
        let (done, closed) = oneshot::channel();
        if self.queue.send(Outgoing::Close(done)).is_err() {
            return Ok(());
        }
        closed.await.map_err(|_| TransportError::ConnectionClosed)
    }
}
