use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::config::Config;
use super::error::WsError;
use super::traits::MessageSink;
use crate::Result;
use crate::error::{Error, Kind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Broadcast channel capacity for lifecycle events.
const EVENT_CAPACITY: usize = 64;

/// Receiving end of the inbound text frames of a [`Transport`], in arrival order.
pub type Incoming = mpsc::UnboundedReceiver<String>;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, and not trying to be
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Socket is open
    Open {
        /// When the connection was established
        since: Instant,
    },
    /// Waiting out the backoff delay before the next attempt
    Reconnecting {
        /// Reconnect attempt about to be made (1 based)
        attempt: u32,
    },
}

impl ConnectionState {
    /// Check if the socket is currently open.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Check if the transport has no live session.
    #[must_use]
    pub const fn is_disconnected(self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

/// Lifecycle notifications published by a [`Transport`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The socket opened.
    Open,
    /// The socket closed, either by the peer, by an error or by [`Transport::disconnect`].
    Closed {
        /// Close reason, when one is known
        reason: Option<String>,
    },
    /// A connection attempt or an open socket failed.
    Error {
        /// Human readable description of the failure
        message: String,
    },
    /// The socket opened again after at least one reconnect attempt.
    ///
    /// The server does not remember subscriptions across sockets, so anything
    /// that was subscribed must be subscribed again.
    Reconnected,
    /// Reconnect attempts are exhausted. The session is over until
    /// [`Transport::connect`] is called again.
    ReconnectFailed,
}

/// Owns one logical WebSocket connection and keeps it alive.
///
/// - [`connect`](Self::connect) starts a session; calling it again while the
///   session is alive is a no-op.
/// - Unexpected closes are followed by reconnect attempts with exponential
///   backoff, up to [`ReconnectConfig::max_retries`](super::config::ReconnectConfig).
/// - [`send`](Self::send) queues text frames. They are written in FIFO order
///   while the socket is open and held while it is not. Frames still queued
///   when a socket reopens after a reconnect attempt are dropped, since they
///   were meant for the old server session.
/// - [`disconnect`](Self::disconnect) ends the session, drops queued frames
///   and suppresses reconnection.
///
/// Inbound text frames go to the [`Incoming`] receiver returned by
/// [`Transport::new`]; lifecycle changes go to [`Transport::events`].
///
/// # Example
///
/// ```ignore
/// let (transport, mut incoming) = Transport::new("wss://mint.example/v1/ws", Config::default())?;
/// transport.connect();
/// transport.send(r#"{"jsonrpc":"2.0"}"#.to_owned())?;
///
/// while let Some(text) = incoming.recv().await {
///     println!("Received: {text}");
/// }
/// ```
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    endpoint: String,
    config: Config,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<TransportEvent>,
    inbound_tx: mpsc::UnboundedSender<String>,
    /// The live session, if any. At most one exists per transport.
    session: Mutex<Option<Session>>,
}

struct Session {
    outbound_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Handles the connection task uses to report back.
struct SessionChannels {
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<TransportEvent>,
    inbound_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl SessionChannels {
    fn set_state(&self, state: ConnectionState) {
        // A cancelled session must not overwrite the state of its successor
        if !self.cancel.is_cancelled() {
            self.state_tx.send_replace(state);
        }
    }

    fn emit(&self, event: TransportEvent) {
        _ = self.events_tx.send(event);
    }
}

/// How an open socket stopped being serviced.
enum Ended {
    /// [`Transport::disconnect`] was called.
    Cancelled,
    /// Every handle to the transport, or the inbound receiver, was dropped.
    Shutdown,
    /// The peer closed the socket.
    Closed(Option<String>),
}

impl Transport {
    /// Create a transport for `endpoint` without connecting.
    ///
    /// The endpoint must be a `ws://` or `wss://` URL.
    pub fn new(endpoint: &str, config: Config) -> Result<(Self, Incoming)> {
        validate_endpoint(endpoint)?;

        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let transport = Self {
            inner: Arc::new(TransportInner {
                endpoint: endpoint.to_owned(),
                config,
                state_tx,
                events_tx,
                inbound_tx,
                session: Mutex::new(None),
            }),
        };

        Ok((transport, inbound_rx))
    }

    /// Start a session unless one is already connecting or open.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut session = self.session();
        if let Some(live) = session.as_ref() {
            if !live.handle.is_finished() && !self.state().is_disconnected() {
                return;
            }
            // A session that gave up may still be unwinding
            live.cancel.cancel();
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.inner.endpoint, "Starting WebSocket session");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let channels = SessionChannels {
            state_tx: self.inner.state_tx.clone(),
            events_tx: self.inner.events_tx.clone(),
            inbound_tx: self.inner.inbound_tx.clone(),
            cancel: cancel.clone(),
        };

        self.inner.state_tx.send_replace(ConnectionState::Connecting);

        let handle = tokio::spawn(connection_loop(
            self.inner.endpoint.clone(),
            self.inner.config.clone(),
            outbound_rx,
            channels,
        ));

        *session = Some(Session {
            outbound_tx,
            cancel,
            handle,
        });
    }

    /// Close the connection and stop reconnecting. Queued frames are dropped.
    pub fn disconnect(&self) {
        let session = self.session().take();
        if let Some(session) = session {
            #[cfg(feature = "tracing")]
            tracing::debug!(endpoint = %self.inner.endpoint, "Disconnecting WebSocket session");
            session.cancel.cancel();
        }
        self.inner
            .state_tx
            .send_replace(ConnectionState::Disconnected);
    }

    /// Queue a text frame for delivery.
    ///
    /// Fails with [`WsError::NotConnected`] when there is no live session:
    /// before the first [`connect`](Self::connect), after
    /// [`disconnect`](Self::disconnect) or once reconnection has been exhausted.
    pub fn send(&self, text: String) -> Result<()> {
        if self.state().is_disconnected() {
            return Err(WsError::NotConnected.into());
        }

        let session = self.session();
        let Some(session) = session.as_ref() else {
            return Err(WsError::NotConnected.into());
        };
        session
            .outbound_tx
            .send(text)
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Subscribe to lifecycle events.
    ///
    /// Each call returns an independent receiver that sees events published
    /// after the call.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events_tx.subscribe()
    }

    /// The endpoint this transport connects to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        // The slot holds no invariant a panicking holder could break halfway.
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl MessageSink for Transport {
    fn send_text(&self, text: String) -> Result<()> {
        self.send(text)
    }
}

fn validate_endpoint(endpoint: &str) -> Result<()> {
    let url = Url::parse(endpoint)?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(Error::validation(format!(
            "unsupported scheme `{other}`, expected ws or wss"
        ))),
    }
}

/// Session loop: connect, service the socket, back off, repeat.
async fn connection_loop(
    endpoint: String,
    config: Config,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    session: SessionChannels,
) {
    let mut retry_count = 0_u32;
    let mut backoff: ExponentialBackoff = config.reconnect.clone().into();

    loop {
        if outbound_rx.is_closed() {
            return;
        }

        session.set_state(ConnectionState::Connecting);

        let attempt = timeout(config.connection_timeout, connect_async(endpoint.as_str()));
        let outcome = tokio::select! {
            () = session.cancel.cancelled() => return,
            outcome = attempt => outcome,
        };

        match outcome {
            Ok(Ok((ws_stream, _))) => {
                if retry_count > 0 {
                    // Frames queued for the old socket refer to server state that is gone
                    let dropped = discard_queued(&mut outbound_rx);
                    #[cfg(feature = "tracing")]
                    tracing::debug!(retry_count, dropped, "WebSocket reconnected");
                    #[cfg(not(feature = "tracing"))]
                    let _: usize = dropped;
                    session.emit(TransportEvent::Reconnected);
                }
                retry_count = 0;
                backoff.reset();

                session.set_state(ConnectionState::Open {
                    since: Instant::now(),
                });
                session.emit(TransportEvent::Open);

                match handle_connection(ws_stream, &mut outbound_rx, &session).await {
                    Ok(Ended::Cancelled | Ended::Shutdown) => return,
                    Ok(Ended::Closed(reason)) => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(?reason, "WebSocket closed by peer");
                        session.emit(TransportEvent::Closed { reason });
                    }
                    Err(e) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Error handling connection: {e:?}");
                        session.emit(TransportEvent::Error {
                            message: e.to_string(),
                        });
                        session.emit(TransportEvent::Closed { reason: None });
                    }
                }
            }
            Ok(Err(e)) => {
                let error = Error::from(e);
                #[cfg(feature = "tracing")]
                tracing::warn!("Unable to connect: {error:?}");
                session.emit(TransportEvent::Error {
                    message: error.to_string(),
                });
            }
            Err(_elapsed) => {
                let error = Error::from(WsError::Timeout(config.connection_timeout));
                #[cfg(feature = "tracing")]
                tracing::warn!("Unable to connect: {error:?}");
                session.emit(TransportEvent::Error {
                    message: error.to_string(),
                });
            }
        }

        if retry_count >= config.reconnect.max_retries {
            #[cfg(feature = "tracing")]
            tracing::warn!(retry_count, "Giving up on reconnecting");
            session.set_state(ConnectionState::Disconnected);
            session.emit(TransportEvent::ReconnectFailed);
            return;
        }

        session.set_state(ConnectionState::Reconnecting {
            attempt: retry_count.saturating_add(1),
        });

        if let Some(delay) = backoff.next_backoff() {
            #[cfg(feature = "tracing")]
            tracing::debug!(?delay, retry_count, "Scheduling reconnect");
            tokio::select! {
                () = session.cancel.cancelled() => return,
                () = sleep(delay) => {}
            }
        }
        retry_count = retry_count.saturating_add(1);
    }
}

/// Empty the outbound queue, returning how many frames were dropped.
fn discard_queued(outbound_rx: &mut mpsc::UnboundedReceiver<String>) -> usize {
    let mut dropped = 0_usize;
    while outbound_rx.try_recv().is_ok() {
        dropped = dropped.saturating_add(1);
    }
    dropped
}

/// Service an open socket until it closes, fails or the session ends.
async fn handle_connection(
    ws_stream: WsStream,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    session: &SessionChannels,
) -> Result<Ended> {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            () = session.cancel.cancelled() => {
                _ = write.send(Message::Close(None)).await;
                session.emit(TransportEvent::Closed {
                    reason: Some("client disconnect".to_owned()),
                });
                return Ok(Ended::Cancelled);
            }

            // Handle incoming messages
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(text = text.as_str(), "Received WebSocket text message");
                        if session.inbound_tx.send(text.as_str().to_owned()).is_err() {
                            _ = write.close().await;
                            return Ok(Ended::Shutdown);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Ok(Ended::Closed(frame.map(|f| f.reason.as_str().to_owned())));
                    }
                    Some(Ok(_)) => {
                        // Binary frames are not part of the protocol; pings are answered by tungstenite.
                    }
                    Some(Err(e)) => {
                        return Err(Error::with_source(Kind::WebSocket, WsError::Connection(e)));
                    }
                    None => return Ok(Ended::Closed(None)),
                }
            }

            // Drain queued outbound frames in order
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(text) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(%text, "Sending WebSocket text message");
                        write
                            .send(Message::Text(text.into()))
                            .await
                            .map_err(|e| Error::with_source(Kind::WebSocket, WsError::Connection(e)))?;
                    }
                    None => {
                        _ = write.close().await;
                        return Ok(Ended::Shutdown);
                    }
                }
            }
        }
    }
}
