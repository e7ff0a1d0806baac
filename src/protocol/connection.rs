//! WebSocket connection to the realtime endpoint.
//!
//! One spawned I/O task owns the socket and multiplexes two directions:
//! outbound send units pulled from a capacity-1 queue, and inbound text
//! frames parsed into [`WireMessage`]s and delivered as a pull-based stream.
//!
//! The capacity-1 outbound queue is the single-writer discipline: concurrent
//! senders race for the slot, and a unit (such as the append+commit pair) is
//! written to the socket in full before the next unit is taken, so units can
//! never interleave at the transport level.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::messages::WireMessage;

/// Depth of the single-writer outbound queue. One slot keeps the capture
/// loop's backpressure at a single in-flight frame.
const OUTBOUND_QUEUE_DEPTH: usize = 1;

/// Capacity for inbound messages awaiting the playback reader.
const INBOUND_QUEUE_DEPTH: usize = 32;

/// Bound on the closing frame write during shutdown. A peer that has
/// stopped reading must not keep the I/O task alive.
const CLOSE_GRACE: std::time::Duration = std::time::Duration::from_secs(1);

// =============================================================================
// Error Types
// =============================================================================

/// Connection establishment failures. TLS, DNS, handshake, and auth
/// rejection all surface here with their cause.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The endpoint URI could not be parsed or is not a websocket URI
    #[error("invalid endpoint URI '{uri}': {reason}")]
    InvalidEndpoint {
        /// The offending URI
        uri: String,
        /// Why it was rejected
        reason: String,
    },

    /// The server refused the upgrade (auth rejection comes back this way)
    #[error("endpoint rejected the connection with HTTP {0}")]
    Rejected(u16),

    /// Handshake, TLS, or DNS failure
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
}

/// Failure to queue an outbound message.
#[derive(Debug, Error)]
pub enum SendError {
    /// The connection is closed; nothing further can be sent
    #[error("connection closed")]
    Closed,

    /// The transport failed while this or an earlier message was in flight
    #[error("transport error: {0}")]
    Transport(String),
}

/// Failure while tearing the connection down.
#[derive(Debug, Error)]
#[error("connection close failed: {0}")]
pub struct CloseError(pub String);

// =============================================================================
// Seams
// =============================================================================

/// Outbound half of a connection, shared by the capture relay and the
/// prompt injector.
#[async_trait]
pub trait OutboundSink: Send + Sync {
    /// Queue a unit of messages delivered back-to-back on the wire with no
    /// interleaving from other senders.
    async fn send_unit(&self, unit: Vec<WireMessage>) -> Result<(), SendError>;

    /// Queue a single message.
    async fn send(&self, msg: WireMessage) -> Result<(), SendError> {
        self.send_unit(vec![msg]).await
    }
}

/// Inbound half of a connection, consumed by exactly one reader. The
/// sequence ends (`None`) when the connection closes, locally or by the
/// peer.
#[async_trait]
pub trait InboundSource: Send {
    /// Next inbound message, or `None` once the connection is closed.
    async fn recv(&mut self) -> Option<WireMessage>;
}

/// Handle for tearing a connection down from the orchestrator.
#[async_trait]
pub trait ConnectionCloser: Send {
    /// Best-effort, idempotent close.
    async fn close(&mut self) -> Result<(), CloseError>;
}

// =============================================================================
// Connection
// =============================================================================

/// Shared slot recording the first transport error seen by the I/O task.
type ErrorSlot = Arc<Mutex<Option<String>>>;

/// A live duplex connection to the realtime endpoint.
pub struct ProtocolConnection {
    sender: MessageSender,
    inbound: InboundStream,
    closer: WsCloser,
}

impl ProtocolConnection {
    /// Open a websocket to `endpoint`, authenticating with a bearer token.
    pub async fn connect(endpoint: &str, auth_token: &str) -> Result<Self, ConnectError> {
        let request = build_request(endpoint, auth_token)?;

        let (ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| match e {
                tungstenite::Error::Http(response) => {
                    ConnectError::Rejected(response.status().as_u16())
                }
                other => ConnectError::Handshake(other.to_string()),
            })?;
        info!(endpoint, "connected to realtime endpoint");

        let (out_tx, out_rx) = mpsc::channel::<Vec<WireMessage>>(OUTBOUND_QUEUE_DEPTH);
        let (in_tx, in_rx) = mpsc::channel::<WireMessage>(INBOUND_QUEUE_DEPTH);
        let last_error: ErrorSlot = Arc::new(Mutex::new(None));
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(io_task(
            ws,
            out_rx,
            in_tx,
            shutdown.clone(),
            last_error.clone(),
        ));

        Ok(Self {
            sender: MessageSender {
                tx: out_tx,
                last_error,
            },
            inbound: InboundStream { rx: in_rx },
            closer: WsCloser {
                shutdown,
                task: Some(task),
            },
        })
    }

    /// Split into the three roles the session hands out: a clonable sender
    /// for the two writers, the single inbound stream for the reader, and
    /// the close handle for the orchestrator.
    pub fn split(self) -> (MessageSender, InboundStream, WsCloser) {
        (self.sender, self.inbound, self.closer)
    }
}

/// Build the upgrade request with auth headers.
fn build_request(endpoint: &str, auth_token: &str) -> Result<http::Request<()>, ConnectError> {
    let invalid = |reason: &str| ConnectError::InvalidEndpoint {
        uri: endpoint.to_string(),
        reason: reason.to_string(),
    };

    let url = url::Url::parse(endpoint).map_err(|e| invalid(&e.to_string()))?;
    if url.scheme() != "ws" && url.scheme() != "wss" {
        return Err(invalid("scheme must be ws or wss"));
    }
    let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
    let host_header = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    http::Request::builder()
        .uri(endpoint)
        .header("Authorization", format!("Bearer {auth_token}"))
        .header("OpenAI-Beta", "realtime=v1")
        .header(
            "Sec-WebSocket-Key",
            tungstenite::handshake::client::generate_key(),
        )
        .header("Sec-WebSocket-Version", "13")
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Host", host_header)
        .body(())
        .map_err(|e| invalid(&e.to_string()))
}

/// The single task that owns the socket for the connection's lifetime.
async fn io_task(
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    mut out_rx: mpsc::Receiver<Vec<WireMessage>>,
    in_tx: mpsc::Sender<WireMessage>,
    shutdown: CancellationToken,
    last_error: ErrorSlot,
) {
    let (mut ws_sink, mut ws_stream) = ws.split();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                send_close(&mut ws_sink).await;
                break;
            }

            unit = out_rx.recv() => match unit {
                Some(unit) => {
                    // The socket write itself can block indefinitely against
                    // a peer that stopped reading; shutdown must still win.
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => {
                            send_close(&mut ws_sink).await;
                            break;
                        }
                        written = write_unit(&mut ws_sink, unit) => {
                            if let Err(e) = written {
                                last_error.lock().get_or_insert(e.to_string());
                                error!(error = %e, "websocket send failed");
                                break;
                            }
                        }
                    }
                }
                // All senders dropped; nothing left to write.
                None => break,
            },

            inbound = ws_stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let msg = WireMessage::parse(&text);
                    trace!(?msg, "inbound message");
                    if in_tx.send(msg).await.is_err() {
                        // Reader gone; keep serving the writers.
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    match tokio::time::timeout(CLOSE_GRACE, ws_sink.send(Message::Pong(data))).await
                    {
                        Ok(Err(e)) => warn!(error = %e, "failed to send pong"),
                        Err(_) => warn!("pong write stalled, skipping"),
                        Ok(Ok(())) => {}
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("connection closed by peer");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    last_error.lock().get_or_insert(e.to_string());
                    error!(error = %e, "websocket receive failed");
                    break;
                }
            },
        }
    }
    // Dropping in_tx ends the inbound sequence; dropping out_rx makes every
    // pending and future send fail.
}

/// Best-effort closing frame; gives up after [`CLOSE_GRACE`] if the peer
/// has stopped reading.
async fn send_close<S>(ws_sink: &mut S)
where
    S: futures_util::Sink<Message, Error = tungstenite::Error> + Unpin,
{
    match tokio::time::timeout(CLOSE_GRACE, ws_sink.send(Message::Close(None))).await {
        Ok(_) => debug!("connection closed locally"),
        Err(_) => warn!("close frame write stalled, dropping the socket"),
    }
}

/// Write one unit to the socket, all messages back-to-back.
async fn write_unit<S>(ws_sink: &mut S, unit: Vec<WireMessage>) -> Result<(), tungstenite::Error>
where
    S: futures_util::Sink<Message, Error = tungstenite::Error> + Unpin,
{
    for msg in unit {
        let json = match msg.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "failed to serialize outbound message");
                continue;
            }
        };
        ws_sink.send(Message::Text(json.into())).await?;
    }
    Ok(())
}

// =============================================================================
// Role Handles
// =============================================================================

/// Clonable outbound handle feeding the single-writer queue.
#[derive(Clone)]
pub struct MessageSender {
    tx: mpsc::Sender<Vec<WireMessage>>,
    last_error: ErrorSlot,
}

#[async_trait]
impl OutboundSink for MessageSender {
    async fn send_unit(&self, unit: Vec<WireMessage>) -> Result<(), SendError> {
        self.tx.send(unit).await.map_err(|_| {
            match self.last_error.lock().clone() {
                Some(cause) => SendError::Transport(cause),
                None => SendError::Closed,
            }
        })
    }
}

/// The connection's single inbound reader handle.
pub struct InboundStream {
    rx: mpsc::Receiver<WireMessage>,
}

#[async_trait]
impl InboundSource for InboundStream {
    async fn recv(&mut self) -> Option<WireMessage> {
        self.rx.recv().await
    }
}

/// Close handle: cancels the I/O task and waits for it to finish.
pub struct WsCloser {
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

#[async_trait]
impl ConnectionCloser for WsCloser {
    async fn close(&mut self) -> Result<(), CloseError> {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            task.await.map_err(|e| CloseError(e.to_string()))?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
