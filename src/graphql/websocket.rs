//! Subscription transport over a shared WebSocket connection
//!
//! Speaks the `graphql-transport-ws` sub-protocol. One connection is opened
//! lazily per client and carries every subscription; a background task owns
//! the socket, writes control frames in the order it receives commands and
//! routes inbound frames to subscribers by id.
//!
//! The connection is never re-established behind a subscriber's back. When it
//! drops, every active [`Subscription`] yields one
//! [`ErrorKind::TransportClosed`](crate::ErrorKind::TransportClosed) failure
//! and ends; the next call to [`StreamExecutor::subscribe`] dials again.

use crate::client::EndpointConfig;
use crate::error::{ClientError, Result};
use crate::graphql::{GraphQLError, GraphQLResponse};
use crate::operation::{Operation, OperationKind};
use futures::stream::{FusedStream, SplitSink, Stream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use tungstenite::client::IntoClientRequest;
use tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tungstenite::http::{HeaderName, HeaderValue};
use tungstenite::Message;
use uuid::Uuid;

/// Sub-protocol requested during the WebSocket handshake
pub const GRAPHQL_TRANSPORT_WS_PROTOCOL: &str = "graphql-transport-ws";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Frames sent by the client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage<'a> {
    ConnectionInit {
        #[serde(skip_serializing_if = "Option::is_none")]
        payload: Option<&'a Value>,
    },
    Subscribe {
        id: &'a str,
        payload: &'a Value,
    },
    Complete {
        id: &'a str,
    },
    Ping,
    Pong,
}

/// Frames sent by the server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    ConnectionAck,
    Next { id: String, payload: Value },
    Error { id: String, payload: Value },
    Complete { id: String },
    Ping,
    Pong,
}

/// Requests from client handles to the connection task
#[derive(Debug)]
enum Command {
    Subscribe {
        id: String,
        payload: Value,
        events: mpsc::UnboundedSender<StreamEvent>,
    },
    Unsubscribe {
        id: String,
    },
    Close,
}

/// What the connection task delivers to one subscriber
#[derive(Debug)]
enum StreamEvent {
    Item(Result<Value>),
    Failed(ClientError),
    Complete,
}

struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
}

/// Streaming executor for subscription operations
#[derive(Clone)]
pub struct StreamExecutor {
    config: Arc<EndpointConfig>,
    connection: Arc<Mutex<Option<ConnectionHandle>>>,
}

impl StreamExecutor {
    pub fn new(config: Arc<EndpointConfig>) -> Self {
        StreamExecutor {
            config,
            connection: Arc::new(Mutex::new(None)),
        }
    }

    /// Start a subscription, opening the shared connection if needed
    pub async fn subscribe(&self, operation: &Operation) -> Result<Subscription> {
        if operation.kind() != OperationKind::Subscription {
            return Err(ClientError::malformed(format!(
                "a {} cannot be sent over the streaming transport",
                operation.kind()
            )));
        }

        let payload = serde_json::to_value(operation.request())?;
        let commands = self.commands().await?;

        let id = Uuid::new_v4().to_string();
        let (events_sender, events_receiver) = mpsc::unbounded_channel();

        commands
            .send(Command::Subscribe {
                id: id.clone(),
                payload,
                events: events_sender,
            })
            .map_err(|_| ClientError::transport_closed("connection task is gone"))?;

        debug!(%id, operation_name = operation.operation_name(), "subscription started");

        Ok(Subscription {
            id,
            events: Some(events_receiver),
            commands: Some(commands),
            pending: None,
            finished: false,
        })
    }

    /// Whether a live connection is currently held
    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.commands.is_closed())
    }

    /// Close the shared connection; active subscriptions end with
    /// `TransportClosed`
    pub async fn close(&self) {
        if let Some(handle) = self.connection.lock().await.take() {
            let _ = handle.commands.send(Command::Close);
        }
    }

    // The lock is held across dial and ack so concurrent first subscribers
    // share one connection. `close()` and `is_connected()` wait behind it for
    // at most `connect_timeout + ack_timeout`.
    async fn commands(&self) -> Result<mpsc::UnboundedSender<Command>> {
        let mut connection = self.connection.lock().await;

        if let Some(handle) = connection.as_ref() {
            if !handle.commands.is_closed() {
                return Ok(handle.commands.clone());
            }
            debug!("previous WebSocket connection has ended");
        }

        let ws_url = self.config.ws_url.as_deref().ok_or_else(|| {
            ClientError::Configuration("No WebSocket URL configured for subscriptions".into())
        })?;

        let ws = open_connection(&self.config, ws_url).await?;
        info!("WebSocket connected to {}", ws_url);

        let (command_sender, command_receiver) = mpsc::unbounded_channel();
        tokio::spawn(connection_loop(
            ws,
            command_receiver,
            self.config.keep_alive_interval,
        ));

        *connection = Some(ConnectionHandle {
            commands: command_sender.clone(),
        });

        Ok(command_sender)
    }
}

/// Dial, request the sub-protocol and complete the `connection_init` handshake
async fn open_connection(config: &EndpointConfig, ws_url: &str) -> Result<WsStream> {
    let mut request = ws_url.into_client_request()?;
    let headers = request.headers_mut();
    headers.insert(
        SEC_WEBSOCKET_PROTOCOL,
        HeaderValue::from_static(GRAPHQL_TRANSPORT_WS_PROTOCOL),
    );
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
            ClientError::Configuration(format!("Invalid header name: {}", name))
        })?;
        let value = HeaderValue::from_str(value).map_err(|_| {
            ClientError::Configuration(format!("Invalid value for header {}", name))
        })?;
        headers.insert(name, value);
    }

    let (mut ws, _) = timeout(config.connect_timeout, connect_async(request))
        .await
        .map_err(|_| ClientError::network(format!("WebSocket connect to {} timed out", ws_url)))??;

    let init = ClientMessage::ConnectionInit {
        payload: config.connection_params.as_ref(),
    };
    ws.send(encode(&init)?).await?;

    timeout(config.ack_timeout, await_ack(&mut ws))
        .await
        .map_err(|_| {
            ClientError::Timeout(format!(
                "no connection_ack within {:?}",
                config.ack_timeout
            ))
        })??;

    Ok(ws)
}

async fn await_ack(ws: &mut WsStream) -> Result<()> {
    while let Some(frame) = ws.next().await {
        match frame? {
            Message::Text(text) => match parse_server_message(text.as_str())? {
                ServerMessage::ConnectionAck => return Ok(()),
                ServerMessage::Ping => ws.send(encode(&ClientMessage::Pong)?).await?,
                other => {
                    return Err(ClientError::protocol(format!(
                        "expected connection_ack, got {:?}",
                        other
                    )))
                }
            },
            Message::Close(frame) => {
                return Err(ClientError::transport_closed(format!(
                    "server closed the connection during handshake: {:?}",
                    frame
                )))
            }
            _ => {}
        }
    }

    Err(ClientError::transport_closed(
        "connection ended before connection_ack",
    ))
}

/// Owns the socket until it closes or the client lets go of it
async fn connection_loop(
    ws: WsStream,
    mut commands: mpsc::UnboundedReceiver<Command>,
    keep_alive_interval: Option<Duration>,
) {
    let (mut sink, mut stream) = ws.split();
    let mut subscriptions: HashMap<String, mpsc::UnboundedSender<StreamEvent>> = HashMap::new();
    let mut keep_alive = keep_alive_interval.map(keep_alive_timer);

    let reason = loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = handle_frame(text.as_str(), &mut subscriptions, &mut sink).await {
                        break e;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    break ClientError::transport_closed(format!("closed by server: {:?}", frame));
                }
                // Binary frames are not part of the protocol; control frames
                // are answered by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(e)) => break ClientError::transport_closed(format!("stream error: {}", e)),
                None => break ClientError::transport_closed("stream ended"),
            },

            command = commands.recv() => match command {
                Some(Command::Subscribe { id, payload, events }) => {
                    subscriptions.insert(id.clone(), events);
                    let frame = ClientMessage::Subscribe { id: &id, payload: &payload };
                    if let Err(e) = send(&mut sink, &frame).await {
                        break e;
                    }
                }
                Some(Command::Unsubscribe { id }) => {
                    // Already ended by the server: nothing to cancel
                    if subscriptions.remove(&id).is_some() {
                        debug!(%id, "cancelling subscription");
                        if let Err(e) = send(&mut sink, &ClientMessage::Complete { id: &id }).await {
                            break e;
                        }
                    }
                }
                Some(Command::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break ClientError::transport_closed("connection closed by client");
                }
            },

            _ = tick(&mut keep_alive) => {
                if let Err(e) = send(&mut sink, &ClientMessage::Ping).await {
                    break e;
                }
            }
        }
    };

    // Mark the handle dead before anyone hears about it
    drop(commands);

    if subscriptions.is_empty() {
        debug!("WebSocket connection finished: {}", reason);
    } else {
        warn!(
            "WebSocket connection finished with {} active subscriptions: {}",
            subscriptions.len(),
            reason
        );
    }

    for (_, events) in subscriptions.drain() {
        let _ = events.send(StreamEvent::Failed(reason.clone()));
    }
}

async fn handle_frame(
    text: &str,
    subscriptions: &mut HashMap<String, mpsc::UnboundedSender<StreamEvent>>,
    sink: &mut WsSink,
) -> Result<()> {
    let message = match parse_server_message(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("Ignoring WebSocket frame: {}", e);
            return Ok(());
        }
    };

    match message {
        ServerMessage::Next { id, payload } => match subscriptions.get(&id) {
            Some(events) => {
                let item = serde_json::from_value::<GraphQLResponse>(payload)
                    .map_err(|e| ClientError::protocol(format!("invalid next payload: {}", e)))
                    .and_then(GraphQLResponse::into_result);
                if events.send(StreamEvent::Item(item)).is_err() {
                    debug!(%id, "subscriber went away");
                }
            }
            None => debug!(%id, "next for unknown subscription"),
        },

        ServerMessage::Error { id, payload } => {
            if let Some(events) = subscriptions.remove(&id) {
                let errors = GraphQLError::list_from_value(payload);
                let _ = events.send(StreamEvent::Failed(ClientError::graphql(errors)));
            }
        }

        ServerMessage::Complete { id } => {
            if let Some(events) = subscriptions.remove(&id) {
                debug!(%id, "subscription completed by server");
                let _ = events.send(StreamEvent::Complete);
            }
        }

        ServerMessage::Ping => send(sink, &ClientMessage::Pong).await?,
        ServerMessage::Pong => {}
        ServerMessage::ConnectionAck => debug!("ignoring repeated connection_ack"),
    }

    Ok(())
}

/// First tick one period after connecting; a stalled task pings once on
/// resume rather than in a burst
fn keep_alive_timer(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn tick(keep_alive: &mut Option<Interval>) {
    match keep_alive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn send(sink: &mut WsSink, message: &ClientMessage<'_>) -> Result<()> {
    sink.send(encode(message)?)
        .await
        .map_err(|e| ClientError::transport_closed(format!("failed to send frame: {}", e)))
}

fn encode(message: &ClientMessage<'_>) -> Result<Message> {
    Ok(Message::text(serde_json::to_string(message)?))
}

fn parse_server_message(text: &str) -> Result<ServerMessage> {
    serde_json::from_str(text)
        .map_err(|e| ClientError::protocol(format!("unexpected frame {}: {}", text, e)))
}

/// Results of one subscription, in the order the server sent them.
///
/// The stream ends after the server completes the subscription, after a
/// failure that terminates it, or after the connection is lost. Dropping it
/// early cancels the subscription on the server.
pub struct Subscription {
    id: String,
    events: Option<mpsc::UnboundedReceiver<StreamEvent>>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    pending: Option<ClientError>,
    finished: bool,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Subscription {
    /// A subscription that could not be started: yields `error`, then ends
    pub(crate) fn failed(error: ClientError) -> Self {
        Subscription {
            id: Uuid::new_v4().to_string(),
            events: None,
            commands: None,
            pending: Some(error),
            finished: false,
        }
    }

    /// Subscription id used on the wire
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the stream has ended
    pub fn is_finished(&self) -> bool {
        self.finished && self.pending.is_none()
    }

    /// Stop receiving and tell the server to stop sending
    pub fn cancel(self) {}

    fn finish(&mut self) {
        self.finished = true;
        self.events = None;
    }
}

impl Stream for Subscription {
    type Item = Result<Value>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(error) = this.pending.take() {
            this.finish();
            return Poll::Ready(Some(Err(error)));
        }

        let Some(events) = this.events.as_mut() else {
            return Poll::Ready(None);
        };

        match ready!(events.poll_recv(cx)) {
            Some(StreamEvent::Item(item)) => Poll::Ready(Some(item)),
            Some(StreamEvent::Failed(error)) => {
                this.finish();
                Poll::Ready(Some(Err(error)))
            }
            Some(StreamEvent::Complete) => {
                this.finish();
                Poll::Ready(None)
            }
            None => {
                this.finish();
                Poll::Ready(Some(Err(ClientError::transport_closed(
                    "connection task ended",
                ))))
            }
        }
    }
}

impl FusedStream for Subscription {
    fn is_terminated(&self) -> bool {
        self.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Unsubscribe {
                id: std::mem::take(&mut self.id),
            });
        }
    }
}
