//! Scripted `graphql-transport-ws` server for subscription tests
#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

#[derive(Clone, Copy, PartialEq)]
enum Handshake {
    Ack,
    PingThenAck,
    Silent,
}

enum ServerAction {
    Send(Value),
    Drop,
}

/// Accepts connections one at a time. Every text frame the client sends after
/// the handshake is forwarded to the test; frames queued with [`send`] go to
/// the current connection.
///
/// [`send`]: MockSocketServer::send
pub struct MockSocketServer {
    pub url: String,
    received: mpsc::UnboundedReceiver<Value>,
    actions: mpsc::UnboundedSender<ServerAction>,
    connections: Arc<AtomicUsize>,
}

fn accept_protocol(_request: &Request, mut response: Response) -> Result<Response, ErrorResponse> {
    response.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_static("graphql-transport-ws"),
    );
    Ok(response)
}

impl MockSocketServer {
    /// Server that acknowledges `connection_init`
    pub async fn start() -> Self {
        Self::spawn(Handshake::Ack).await
    }

    /// Server that pings after `connection_init` and acknowledges once the
    /// client has answered; the answer is forwarded like any other frame
    pub async fn start_with_handshake_ping() -> Self {
        Self::spawn(Handshake::PingThenAck).await
    }

    /// Server that accepts the socket but never sends `connection_ack`
    pub async fn start_without_ack() -> Self {
        Self::spawn(Handshake::Silent).await
    }

    async fn spawn(handshake: Handshake) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());

        let (received_sender, received) = mpsc::unbounded_channel();
        let (actions, mut action_receiver) = mpsc::unbounded_channel();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();

        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let Ok(mut ws) = accept_hdr_async(tcp, accept_protocol).await else {
                    continue;
                };

                // Handshake
                loop {
                    match ws.next().await {
                        Some(Ok(Message::Text(text))) => {
                            let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                            if frame["type"] == "connection_init" {
                                break;
                            }
                        }
                        Some(Ok(_)) => {}
                        _ => return,
                    }
                }
                if handshake == Handshake::PingThenAck {
                    let ping = json!({"type": "ping"}).to_string();
                    if ws.send(Message::text(ping)).await.is_err() {
                        continue;
                    }
                    match ws.next().await {
                        Some(Ok(Message::Text(text))) => {
                            let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                            let _ = received_sender.send(frame);
                        }
                        _ => continue,
                    }
                }
                if handshake != Handshake::Silent {
                    let ack = json!({"type": "connection_ack"}).to_string();
                    if ws.send(Message::text(ack)).await.is_err() {
                        continue;
                    }
                }

                loop {
                    tokio::select! {
                        frame = ws.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                                let _ = received_sender.send(frame);
                            }
                            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                            Some(Ok(_)) => {}
                        },
                        action = action_receiver.recv() => match action {
                            Some(ServerAction::Send(frame)) => {
                                if ws.send(Message::text(frame.to_string())).await.is_err() {
                                    break;
                                }
                            }
                            // Vanish without a close handshake
                            Some(ServerAction::Drop) => break,
                            None => return,
                        },
                    }
                }
            }
        });

        MockSocketServer {
            url,
            received,
            actions,
            connections,
        }
    }

    /// Next frame sent by the client
    pub async fn next_message(&mut self) -> Value {
        timeout(Duration::from_secs(5), self.received.recv())
            .await
            .expect("client sent nothing within 5s")
            .expect("server task ended")
    }

    /// Assert the client stays quiet for `within`
    pub async fn expect_silence(&mut self, within: Duration) {
        if let Ok(Some(frame)) = timeout(within, self.received.recv()).await {
            panic!("unexpected frame from client: {}", frame);
        }
    }

    pub fn send(&self, frame: Value) {
        let _ = self.actions.send(ServerAction::Send(frame));
    }

    pub fn next(&self, id: &str, data: Value) {
        self.send(json!({"type": "next", "id": id, "payload": {"data": data}}));
    }

    pub fn complete(&self, id: &str) {
        self.send(json!({"type": "complete", "id": id}));
    }

    /// Drop the current connection without a close frame
    pub fn drop_connection(&self) {
        let _ = self.actions.send(ServerAction::Drop);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}
