//! WebSocket transport implementation
//!
//! Messages travel as text frames carrying the JSON wire form. The server
//! only upgrades requests on the configured path and echoes the
//! `wamp.2.json` subprotocol when the client offers it.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        handshake::server::{ErrorResponse, Request as HsRequest, Response as HsResponse},
        http::{HeaderValue, StatusCode},
        protocol::{
            frame::coding::CloseCode, CloseFrame, Message as WsMessage,
            WebSocketConfig as WsConfig,
        },
    },
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{
    Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer,
};

use wamp_core::{DEFAULT_PATH, WS_SUBPROTOCOL};

const PROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

/// WebSocket configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Subprotocol echoed during the handshake
    pub subprotocol: String,
    /// Request path the server upgrades; anything else gets a 404
    pub path: String,
    /// Maximum incoming message size
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            subprotocol: WS_SUBPROTOCOL.to_string(),
            path: DEFAULT_PATH.to_string(),
            max_message_size: 1024 * 1024,
        }
    }
}

impl WebSocketConfig {
    fn tungstenite(&self) -> WsConfig {
        let mut config = WsConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config
    }
}

/// WebSocket client transport
pub struct WebSocketTransport;

/// WebSocket sender
pub struct WebSocketSender {
    tx: mpsc::Sender<WsMessage>,
    connected: Arc<Mutex<bool>>,
}

#[async_trait]
impl TransportSender for WebSocketSender {
    async fn send(&self, data: Bytes) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let text = String::from_utf8(data.to_vec())
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.tx
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        let was_connected = std::mem::replace(&mut *self.connected.lock(), false);
        if was_connected {
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            };
            let _ = self.tx.send(WsMessage::Close(Some(frame))).await;
        }
        Ok(())
    }
}

/// WebSocket receiver
pub struct WebSocketReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for WebSocketReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// Split an upgraded stream into a sender and a receiver, each driven by its
/// own task.
fn spawn_pumps<S>(ws_stream: WebSocketStream<S>) -> (WebSocketSender, WebSocketReceiver)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut write, mut read) = ws_stream.split();

    let (send_tx, mut send_rx) = mpsc::channel::<WsMessage>(100);
    let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(100);

    let connected = Arc::new(Mutex::new(true));
    let connected_write = connected.clone();
    let connected_read = connected.clone();

    tokio::spawn(async move {
        while let Some(msg) = send_rx.recv().await {
            let closing = matches!(msg, WsMessage::Close(_));
            if let Err(e) = write.send(msg).await {
                error!("WebSocket write error: {}", e);
                break;
            }
            if closing {
                break;
            }
        }
        *connected_write.lock() = false;
    });

    tokio::spawn(async move {
        let _ = event_tx.send(TransportEvent::Connected).await;

        let mut disconnected = TransportEvent::Disconnected {
            code: None,
            reason: None,
        };

        while let Some(result) = read.next().await {
            match result {
                Ok(WsMessage::Text(text)) => {
                    let _ = event_tx.send(TransportEvent::Data(Bytes::from(text))).await;
                }
                Ok(WsMessage::Binary(data)) => {
                    let _ = event_tx.send(TransportEvent::Data(Bytes::from(data))).await;
                }
                Ok(WsMessage::Close(frame)) => {
                    debug!("WebSocket close frame: {:?}", frame);
                    disconnected = TransportEvent::Disconnected {
                        code: frame.as_ref().map(|f| u16::from(f.code)),
                        reason: frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty()),
                    };
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket read error: {}", e);
                    let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                    break;
                }
            }
        }

        *connected_read.lock() = false;
        let _ = event_tx.send(disconnected).await;
    });

    (
        WebSocketSender {
            tx: send_tx,
            connected,
        },
        WebSocketReceiver { rx: event_rx },
    )
}

#[async_trait]
impl Transport for WebSocketTransport {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn connect(url: &str) -> Result<(Self::Sender, Self::Receiver)> {
        info!("Connecting to WebSocket: {}", url);

        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        request
            .headers_mut()
            .insert(PROTOCOL_HEADER, HeaderValue::from_static(WS_SUBPROTOCOL));

        let (ws_stream, response) = connect_async(request)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!(
            "WebSocket connected, status {} subprotocol {:?}",
            response.status(),
            response.headers().get(PROTOCOL_HEADER)
        );

        Ok(spawn_pumps(ws_stream))
    }
}

/// WebSocket server
pub struct WebSocketServer {
    listener: tokio::net::TcpListener,
    config: WebSocketConfig,
}

impl WebSocketServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        info!("WebSocket server listening on {}", addr);

        Ok(Self {
            listener,
            config: WebSocketConfig::default(),
        })
    }

    pub fn with_config(mut self, config: WebSocketConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &WebSocketConfig {
        &self.config
    }
}

fn not_found(path: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(format!("no WAMP endpoint at {}", path)));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

#[async_trait]
impl TransportServer for WebSocketServer {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            debug!("Accepted TCP connection from {}", addr);

            let path = self.config.path.clone();
            let subprotocol = self.config.subprotocol.clone();
            let callback = move |req: &HsRequest, mut response: HsResponse| {
                if req.uri().path() != path {
                    return Err(not_found(req.uri().path()));
                }

                let offered = req
                    .headers()
                    .get(PROTOCOL_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.split(',').any(|p| p.trim() == subprotocol))
                    .unwrap_or(false);
                if offered {
                    if let Ok(value) = HeaderValue::from_str(&subprotocol) {
                        response.headers_mut().insert(PROTOCOL_HEADER, value);
                    }
                }
                Ok(response)
            };

            // A failed upgrade only affects that client; keep listening.
            match tokio_tungstenite::accept_hdr_async_with_config(
                stream,
                callback,
                Some(self.config.tungstenite()),
            )
            .await
            {
                Ok(ws_stream) => {
                    info!("WebSocket client connected from {}", addr);
                    let (sender, receiver) = spawn_pumps(ws_stream);
                    return Ok((sender, receiver, addr));
                }
                Err(e) => {
                    warn!("WebSocket handshake with {} failed: {}", addr, e);
                }
            }
        }
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
