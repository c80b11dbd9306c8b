//! WebSocket transport ownership.
//!
//! [`ConnectionManager`] owns the socket for one connection lifetime. The
//! write half lives in a dedicated writer task fed by a bounded channel; the
//! read half is handed to the listener loop as an [`InboundStream`]. A shared
//! [`CancellationToken`] tears both down on `close()` or on transport failure.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{BoxStream, SplitSink};
use futures::{SinkExt, StreamExt, future};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::errors::{ClientError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle of one connection. `Closed` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not yet connected.
    Disconnected,
    /// Handshake complete; calls and events flow.
    Connected,
    /// Torn down by the caller.
    Closed,
    /// Lost to a transport error or a remote close.
    Failed,
}

impl ConnectionState {
    /// Whether no further traffic is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// A transport frame after ping/pong filtering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    /// Text frame.
    Text(String),
    /// Binary frame; expected to hold UTF-8 JSON.
    Binary(Vec<u8>),
    /// The remote sent a close frame.
    Close {
        /// Close code and reason, when the remote sent one.
        reason: Option<String>,
    },
}

/// Inbound frames for the listener loop.
pub type InboundStream = BoxStream<'static, Result<Inbound>>;

/// Owns the duplex channel and its state.
pub struct ConnectionManager {
    url: String,
    connect_timeout: Duration,
    outbound_buffer: usize,
    state: Arc<RwLock<ConnectionState>>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    cancel: CancellationToken,
}

impl ConnectionManager {
    /// Create a manager for `config.url`. No I/O happens until [`connect`](Self::connect).
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            url: config.url.clone(),
            connect_timeout: config.connect_timeout(),
            outbound_buffer: config.outbound_buffer.max(1),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outbound: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Endpoint this manager connects to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Token cancelled when the connection is torn down for any reason.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Perform the WebSocket handshake and start the writer task.
    ///
    /// A manager connects at most once; reconnecting requires a new manager.
    pub async fn connect(&self) -> Result<InboundStream> {
        if self.state() != ConnectionState::Disconnected {
            return Err(ClientError::connection(format!(
                "cannot connect from state {:?}",
                self.state()
            )));
        }

        let handshake =
            tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str())).await;
        let ws = match handshake {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(e)) => return Err(self.connect_failed(e.to_string())),
            Err(_) => {
                return Err(self.connect_failed(format!(
                    "handshake timed out after {}ms",
                    self.connect_timeout.as_millis()
                )));
            }
        };

        let (sink, stream) = ws.split();
        let (tx, rx) = mpsc::channel(self.outbound_buffer);
        *self.outbound.lock() = Some(tx);
        *self.state.write() = ConnectionState::Connected;

        let _writer = tokio::spawn(write_loop(
            sink,
            rx,
            Arc::clone(&self.state),
            self.cancel.clone(),
        ));

        info!(url = %self.url, "connected");
        Ok(stream.filter_map(|msg| future::ready(classify(msg))).boxed())
    }

    /// Queue one encoded frame for the writer task.
    ///
    /// Fails unless the connection is `Connected`.
    pub async fn send(&self, frame: String) -> Result<()> {
        let tx = match self.state() {
            ConnectionState::Connected => self.outbound.lock().clone(),
            ConnectionState::Disconnected => {
                return Err(ClientError::connection("not connected"));
            }
            ConnectionState::Closed => return Err(ClientError::closed("closed by client")),
            ConnectionState::Failed => return Err(ClientError::closed("connection lost")),
        };
        let Some(tx) = tx else {
            return Err(ClientError::closed("writer stopped"));
        };
        tx.send(frame)
            .await
            .map_err(|_| ClientError::closed("writer stopped"))
    }

    /// Tear down the connection. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.state.write();
            if !state.is_terminal() {
                *state = ConnectionState::Closed;
                info!(url = %self.url, "closing connection");
            }
        }
        drop(self.outbound.lock().take());
        self.cancel.cancel();
    }

    /// Record a transport failure and stop the writer. A prior `close()` wins.
    pub fn mark_failed(&self, reason: &str) {
        {
            let mut state = self.state.write();
            if !state.is_terminal() {
                *state = ConnectionState::Failed;
                error!(url = %self.url, reason, "connection failed");
            }
        }
        drop(self.outbound.lock().take());
        self.cancel.cancel();
    }

    fn connect_failed(&self, context: String) -> ClientError {
        *self.state.write() = ConnectionState::Failed;
        warn!(url = %self.url, error = %context, "connect failed");
        ClientError::connection(format!("{}: {context}", self.url))
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::Receiver<String>,
    state: Arc<RwLock<ConnectionState>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sink.send(Message::text(frame)).await {
                    {
                        let mut state = state.write();
                        if !state.is_terminal() {
                            *state = ConnectionState::Failed;
                        }
                    }
                    error!(error = %e, "websocket write failed");
                    cancel.cancel();
                    return;
                }
            }
        }
    }

    if let Err(e) = sink.send(Message::Close(None)).await {
        debug!(error = %e, "close frame not sent");
    }
    let _ = sink.close().await;
    debug!("writer stopped");
}

/// Map a raw socket message to an [`Inbound`] frame; ping/pong are dropped.
fn classify(msg: std::result::Result<Message, tungstenite::Error>) -> Option<Result<Inbound>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(Inbound::Text(text.as_str().to_owned()))),
        Ok(Message::Binary(bytes)) => Some(Ok(Inbound::Binary(bytes.to_vec()))),
        Ok(Message::Close(frame)) => Some(Ok(Inbound::Close {
            reason: frame.map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str())),
        })),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(e) => Some(Err(ClientError::connection(e.to_string()))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
