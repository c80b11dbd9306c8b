//! Scripted orchestrator stand-in for end-to-end tests.

#![allow(dead_code)]

use std::future::Future;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

enum Command {
    Send(String),
    Close,
    Drop,
}

/// One-connection WebSocket server driven from the test body.
pub struct MockServer {
    pub url: String,
    requests: mpsc::UnboundedReceiver<Value>,
    commands: mpsc::UnboundedSender<Command>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (req_tx, requests) = mpsc::unbounded_channel();
        let (commands, mut cmd_rx) = mpsc::unbounded_channel();

        let _ = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            loop {
                tokio::select! {
                    msg = ws.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            let value: Value = serde_json::from_str(text.as_str()).unwrap();
                            let _ = req_tx.send(value);
                        }
                        Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                        Some(Ok(_)) => {}
                    },
                    cmd = cmd_rx.recv() => match cmd {
                        Some(Command::Send(text)) => {
                            if ws.send(Message::text(text)).await.is_err() {
                                break;
                            }
                        }
                        Some(Command::Close) => {
                            let _ = ws.close(None).await;
                            break;
                        }
                        // Drop the socket without a close handshake.
                        Some(Command::Drop) | None => break,
                    },
                }
            }
        });

        Self {
            url,
            requests,
            commands,
        }
    }

    /// Next request frame the client sent.
    pub async fn next_request(&mut self) -> Value {
        within(self.requests.recv()).await.expect("server stopped")
    }

    /// Push a JSON frame to the client.
    pub fn send(&self, frame: &Value) {
        self.send_raw(&frame.to_string());
    }

    /// Push raw text to the client.
    pub fn send_raw(&self, text: &str) {
        let _ = self.commands.send(Command::Send(text.to_owned()));
    }

    /// Close with a proper handshake.
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// Vanish without a close frame.
    pub fn drop_connection(&self) {
        let _ = self.commands.send(Command::Drop);
    }
}

/// Bound every await so a broken engine fails the test instead of hanging it.
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out")
}
