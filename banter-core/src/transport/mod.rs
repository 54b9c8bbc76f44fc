//! Duplex WebSocket connection to the voice endpoint.
//!
//! ## Lifecycle
//!
//! ```text
//! TransportSession::new()
//!     └─► connect(url)   → Connecting, socket task spawned
//!         └─► (task)     → auth envelope sent (if any) → Open → Opened event
//!             └─► close()→ Closed, close frame sent, task exits → Closed event
//! ```
//!
//! The socket runs in its own tokio task. Outbound messages reach it through
//! an unbounded channel; inbound messages are classified by the
//! [`WireSchema`] and handed to the registered callback in arrival order.
//!
//! Error and close notifications are informational. Nothing here retries or
//! tears anything else down.

pub mod envelope;

pub use envelope::{AuthToken, InboundMessage, WireSchema};

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{BanterError, Result};

/// Connection state of a [`TransportSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// `connect()` not called yet.
    Idle,
    Connecting,
    Open,
    /// Closed locally or by the endpoint. Terminal.
    Closed,
}

/// Notifications from the socket task.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Inbound(InboundMessage),
    /// A message failed to parse and was dropped.
    Malformed(String),
    Error(String),
    Closed,
}

/// Receives [`TransportEvent`]s from the socket task.
pub type TransportCallback = Arc<dyn Fn(TransportEvent) + Send + Sync>;

/// One logical duplex connection.
pub struct TransportSession {
    schema: Arc<WireSchema>,
    state: Arc<Mutex<ConnectionState>>,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    task: Option<JoinHandle<()>>,
}

impl TransportSession {
    pub fn new(schema: WireSchema) -> Self {
        Self {
            schema: Arc::new(schema),
            state: Arc::new(Mutex::new(ConnectionState::Idle)),
            outbound: None,
            task: None,
        }
    }

    /// Validate `url` and start connecting in the background.
    ///
    /// Returns as soon as the socket task is spawned. Connection failures
    /// arrive later as `Error` + `Closed` events. Must be called inside a
    /// tokio runtime.
    ///
    /// # Errors
    /// - `BanterError::InvalidEndpoint` if `url` is not a `ws://` / `wss://` URL.
    /// - `BanterError::AlreadyActive` if this session was already connected.
    pub fn connect(
        &mut self,
        url: &str,
        token: Option<AuthToken>,
        on_event: TransportCallback,
    ) -> Result<()> {
        let endpoint = parse_endpoint(url)?;

        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Idle {
                return Err(BanterError::AlreadyActive);
            }
            *state = ConnectionState::Connecting;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound = Some(tx);

        info!(endpoint = %endpoint, "connecting to voice endpoint");
        self.task = Some(tokio::spawn(run_socket(
            endpoint,
            Arc::clone(&self.schema),
            token,
            Arc::clone(&self.state),
            rx,
            on_event,
        )));
        Ok(())
    }

    /// Queue a text frame. Silently dropped unless the socket is open.
    ///
    /// Returns whether the frame was queued.
    pub fn send_text(&self, text: String) -> bool {
        if *self.state.lock() != ConnectionState::Open {
            trace!("socket not open; outbound frame dropped");
            return false;
        }
        self.outbound
            .as_ref()
            .map(|tx| tx.send(Message::Text(text.into())).is_ok())
            .unwrap_or(false)
    }

    /// Wrap a base64 payload in the schema's audio envelope and queue it.
    pub fn send_audio(&self, payload: String) -> bool {
        self.send_text(self.schema.audio_envelope(payload))
    }

    /// Close the connection. Idempotent; safe before `connect()`.
    pub fn close(&mut self) {
        let previous = std::mem::replace(&mut *self.state.lock(), ConnectionState::Closed);

        // Dropping the sender makes the task send a close frame and exit.
        self.outbound = None;
        if let Some(task) = self.task.take() {
            if previous == ConnectionState::Connecting {
                task.abort();
            }
        }

        if matches!(previous, ConnectionState::Connecting | ConnectionState::Open) {
            info!(?previous, "transport closed locally");
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn parse_endpoint(url: &str) -> Result<Url> {
    let parsed = Url::parse(url.trim()).map_err(|e| BanterError::InvalidEndpoint {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(BanterError::InvalidEndpoint {
            url: url.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

/// Flip `Connecting` to `Open`. Returns `false` if the session was closed meanwhile.
fn promote_to_open(state: &Mutex<ConnectionState>) -> bool {
    let mut current = state.lock();
    if *current != ConnectionState::Connecting {
        return false;
    }
    *current = ConnectionState::Open;
    true
}

async fn run_socket(
    endpoint: Url,
    schema: Arc<WireSchema>,
    token: Option<AuthToken>,
    state: Arc<Mutex<ConnectionState>>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    on_event: TransportCallback,
) {
    let ws = match tokio_tungstenite::connect_async(endpoint.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            let err = BanterError::Transport(e.to_string());
            warn!(endpoint = %endpoint, error = %err, "voice endpoint connection failed");
            *state.lock() = ConnectionState::Closed;
            on_event(TransportEvent::Error(err.to_string()));
            on_event(TransportEvent::Closed);
            return;
        }
    };
    let (mut sink, mut stream) = ws.split();

    let still_connecting = *state.lock() == ConnectionState::Connecting;
    if !still_connecting {
        debug!("closed while connecting; dropping socket");
        let _ = sink.send(Message::Close(None)).await;
        return;
    }

    // The auth envelope must precede every audio frame, so it goes out
    // before the state flips to Open and `send_text` starts accepting.
    match token {
        Some(token) if schema.auth_handshake => {
            if let Err(e) = sink.send(Message::Text(schema.auth_envelope(&token).into())).await {
                warn!(error = %e, "failed to send auth envelope");
                *state.lock() = ConnectionState::Closed;
                on_event(TransportEvent::Error(e.to_string()));
                on_event(TransportEvent::Closed);
                return;
            }
            debug!("auth envelope sent");
        }
        Some(_) => debug!("schema has no auth handshake; token not sent"),
        None => {}
    }

    // The guard must not be held across an await; the task has to stay Send.
    if !promote_to_open(&state) {
        debug!("closed during auth handshake; dropping socket");
        let _ = sink.send(Message::Close(None)).await;
        return;
    }
    info!("voice endpoint connected");
    on_event(TransportEvent::Opened);

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => match outgoing {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        warn!(error = %e, "socket send failed");
                        on_event(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match schema.classify(text.as_str()) {
                    Ok(Some(message)) => on_event(TransportEvent::Inbound(message)),
                    Ok(None) => trace!("unhandled message type ignored"),
                    Err(e) => {
                        warn!(error = %e, "dropping malformed inbound message");
                        on_event(TransportEvent::Malformed(e.to_string()));
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "endpoint closed the socket");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "socket receive failed");
                    on_event(TransportEvent::Error(e.to_string()));
                    break;
                }
                None => break,
            },
        }
    }

    *state.lock() = ConnectionState::Closed;
    info!("voice endpoint socket closed");
    on_event(TransportEvent::Closed);
}
