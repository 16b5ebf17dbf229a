//! WebSocket protocol endpoint
//!
//! Every connected client gets an id. Text frames from a client are
//! validated, relayed verbatim to all *other* clients and then queued for
//! the session. Events produced by the session go to every client.
//!
//! # Architecture
//!
//! All outgoing traffic flows through one [`broadcast`] channel of
//! [`Frame`]s. Each frame remembers which client it came from, if any, and a
//! client's writer task skips the frames it sent itself. Session events are
//! turned into frames by [`forward_events`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use vavr_bridge::{CommandSender, SessionClosed};
use vavr_protocol::{Envelope, OutboundEvent, ProtocolError};

/// Identifier of a connected client
pub type ClientId = u64;

/// A text frame on its way to clients
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Client that sent the frame; `None` for session events
    pub origin: Option<ClientId>,
    /// JSON text
    pub text: Arc<str>,
}

impl Frame {
    /// Whether `client` should receive this frame
    pub fn is_for(&self, client: ClientId) -> bool {
        self.origin != Some(client)
    }
}

/// Errors handling an inbound text frame
#[derive(Debug, Error)]
pub enum InboundError {
    /// Payload is not a valid protocol message
    #[error("invalid message: {0}")]
    Protocol(#[from] ProtocolError),

    /// Session has stopped
    #[error(transparent)]
    Closed(#[from] SessionClosed),
}

/// State shared by all connections
#[derive(Debug, Clone)]
pub struct Hub {
    commands: CommandSender,
    frames: broadcast::Sender<Frame>,
    next_client: Arc<AtomicU64>,
}

impl Hub {
    /// Create a hub feeding `commands` and publishing on `frames`
    pub fn new(commands: CommandSender, frames: broadcast::Sender<Frame>) -> Self {
        Self {
            commands,
            frames,
            next_client: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Allocate an id for a new client
    pub fn register(&self) -> ClientId {
        self.next_client.fetch_add(1, Ordering::Relaxed)
    }

    /// Receiver for outgoing frames
    pub fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.frames.subscribe()
    }

    /// Handle a text frame sent by `origin`
    ///
    /// Invalid payloads are neither relayed nor queued.
    pub fn on_text(&self, origin: ClientId, text: &str) -> Result<(), InboundError> {
        let envelope = Envelope::from_json(text)?;

        let _ = self.frames.send(Frame {
            origin: Some(origin),
            text: Arc::from(text),
        });
        self.commands.submit(envelope)?;
        Ok(())
    }
}

/// Turn session events into frames until the session's sender is dropped
pub async fn forward_events(
    mut events: broadcast::Receiver<OutboundEvent>,
    frames: broadcast::Sender<Frame>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let _ = frames.send(Frame {
                    origin: None,
                    text: Arc::from(event.to_json()),
                });
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event forwarder lagged, events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("event forwarder stopped");
}

/// Router serving the endpoint at `/`
pub fn router(hub: Hub) -> Router {
    Router::new().route("/", get(upgrade)).with_state(hub)
}

/// Serve the endpoint on `listener`
pub async fn serve(listener: TcpListener, hub: Hub) -> std::io::Result<()> {
    axum::serve(listener, router(hub)).await
}

async fn upgrade(ws: WebSocketUpgrade, State(hub): State<Hub>) -> Response {
    ws.on_upgrade(move |socket| client_session(socket, hub))
}

async fn client_session(socket: WebSocket, hub: Hub) {
    let id = hub.register();
    info!(client = id, "client connected");

    let (mut sink, mut stream) = socket.split();
    let mut frames = hub.subscribe();

    let mut writer = tokio::spawn(async move {
        loop {
            match frames.recv().await {
                Ok(frame) if frame.is_for(id) => {
                    let message = Message::Text(frame.text.as_ref().into());
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(client = id, skipped, "client too slow, frames dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut reader = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => match hub.on_text(id, text.as_str()) {
                    Ok(()) => {}
                    Err(InboundError::Closed(_)) => break,
                    Err(e) => warn!(client = id, "dropping message: {}", e),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }
    info!(client = id, "client disconnected");
}
