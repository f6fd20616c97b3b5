use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use rand::Rng as _;
use rand::distr::Alphanumeric;
use serde_json::Value;
use tokio::task::JoinHandle;

use super::types::request::{CloseMessage, Method, Request, SubscribeParams};
use super::types::response::{InboundMessage, Notification, RpcError};
use crate::Result;
use crate::types::SubscriptionKind;
use crate::ws::{Incoming, MessageSink};

/// Length of generated wire subscription ids.
const SUB_ID_LEN: usize = 12;

/// One-shot continuation run with the outcome of a request.
pub type Continuation =
    Box<dyn FnOnce(std::result::Result<Value, RpcError>) + Send + Sync + 'static>;

/// Receives every inbound notification.
pub type NotificationHandler = Arc<dyn Fn(Notification) + Send + Sync + 'static>;

/// Matches JSON-RPC responses to the requests that produced them.
///
/// Every `subscribe` call registers a [`Continuation`] under its request id.
/// The first response carrying that id removes the entry and runs the
/// continuation; later responses with the same id find nothing and are
/// dropped, so a continuation never runs twice.
///
/// Inbound frames are processed strictly one at a time by the task started
/// with [`spawn_dispatcher`](Self::spawn_dispatcher).
#[derive(Clone)]
pub struct Correlator {
    inner: Arc<CorrelatorInner>,
}

struct CorrelatorInner {
    sink: Arc<dyn MessageSink>,
    /// Outstanding calls keyed by request id
    pending: DashMap<u64, PendingCall>,
    next_id: AtomicU64,
    notification_handler: RwLock<Option<NotificationHandler>>,
}

struct PendingCall {
    method: Method,
    wire_sub_id: String,
    continuation: Continuation,
}

impl Correlator {
    /// Create a correlator writing to `sink`.
    ///
    /// Nothing is read until [`spawn_dispatcher`](Self::spawn_dispatcher) is called.
    #[must_use]
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self {
            inner: Arc::new(CorrelatorInner {
                sink,
                pending: DashMap::new(),
                next_id: AtomicU64::new(0),
                notification_handler: RwLock::new(None),
            }),
        }
    }

    /// Start the task that drains `incoming` and dispatches each frame in order.
    ///
    /// The task ends when `incoming` closes or the correlator is dropped.
    pub fn spawn_dispatcher(&self, mut incoming: Incoming) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            while let Some(text) = incoming.recv().await {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.dispatch(&text);
            }
        })
    }

    /// Register the handler that receives every inbound notification,
    /// replacing any previous one.
    pub fn set_notification_handler(&self, handler: NotificationHandler) {
        *self
            .inner
            .notification_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    /// Send a `subscribe` request and return the wire id it subscribes under.
    ///
    /// Returns as soon as the request is queued. `on_response` runs once, on
    /// the dispatcher task, when the mint acknowledges or rejects the call.
    /// If the request cannot be queued it is forgotten and the error returned.
    pub fn create_subscription<F>(
        &self,
        kind: SubscriptionKind,
        filters: Vec<String>,
        on_response: F,
    ) -> Result<String>
    where
        F: FnOnce(std::result::Result<Value, RpcError>) + Send + Sync + 'static,
    {
        let wire_sub_id = generate_sub_id();
        let id = self.next_request_id();

        #[cfg(feature = "tracing")]
        tracing::debug!(id, %kind, ?filters, %wire_sub_id, "Subscribing");

        let request = Request::subscribe(id, SubscribeParams::new(kind, filters, wire_sub_id.clone()));
        let text = serde_json::to_string(&request)?;

        // Register before sending so a fast response always finds its entry
        self.inner.pending.insert(
            id,
            PendingCall {
                method: Method::Subscribe,
                wire_sub_id: wire_sub_id.clone(),
                continuation: Box::new(on_response),
            },
        );

        if let Err(e) = self.inner.sink.send_text(text) {
            self.inner.pending.remove(&id);
            return Err(e);
        }

        Ok(wire_sub_id)
    }

    /// Ask the mint to stop sending updates for `wire_sub_id`.
    ///
    /// Fire-and-forget: no continuation is registered and any response is dropped.
    pub fn cancel_subscription(&self, wire_sub_id: &str) -> Result<()> {
        let id = self.next_request_id();

        #[cfg(feature = "tracing")]
        tracing::debug!(id, %wire_sub_id, "Unsubscribing");

        let request = Request::unsubscribe(id, wire_sub_id.to_owned());
        self.inner.sink.send_text(serde_json::to_string(&request)?)
    }

    /// Send the `["CLOSE", subId]` teardown control message.
    pub fn close_subscription(&self, wire_sub_id: &str) -> Result<()> {
        #[cfg(feature = "tracing")]
        tracing::debug!(%wire_sub_id, "Closing subscription");

        let message = CloseMessage::new(wire_sub_id.to_owned());
        self.inner.sink.send_text(serde_json::to_string(&message)?)
    }

    /// Process one inbound frame.
    ///
    /// Normally called by the dispatcher task only; calling it from elsewhere
    /// gives up the one-at-a-time guarantee.
    pub fn dispatch(&self, text: &str) {
        self.inner.dispatch(text);
    }

    /// Number of requests still waiting for a response.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Forget every outstanding call without running its continuation.
    ///
    /// Used once the socket the calls were sent on is gone. Late responses
    /// to them are dropped like any other unmatched response.
    pub fn abandon_pending(&self) -> usize {
        let abandoned = self.inner.pending.len();
        self.inner.pending.clear();
        abandoned
    }

    fn next_request_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl CorrelatorInner {
    fn dispatch(&self, text: &str) {
        let message = match InboundMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%text, error = %e, "Failed to parse inbound message");
                #[cfg(not(feature = "tracing"))]
                let _: &serde_json::Error = &e;
                return;
            }
        };

        match message {
            InboundMessage::Success { id, result } => self.resolve(id, Ok(result)),
            InboundMessage::Failure { id, error } => self.resolve(id, Err(error)),
            InboundMessage::Notification(notification) => {
                let handler = self
                    .notification_handler
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                match handler {
                    Some(handler) => handler(notification),
                    None => {
                        #[cfg(feature = "tracing")]
                        tracing::debug!(
                            sub_id = notification.sub_id(),
                            "Dropping notification, no handler registered"
                        );
                    }
                }
            }
            InboundMessage::Request { method } => {
                // Clients never serve requests
                #[cfg(feature = "tracing")]
                tracing::debug!(%method, "Ignoring inbound request");
                #[cfg(not(feature = "tracing"))]
                let _: &String = &method;
            }
            InboundMessage::Unrecognized => {
                #[cfg(feature = "tracing")]
                tracing::debug!(%text, "Dropping unrecognized message");
            }
        }
    }

    fn resolve(&self, id: u64, outcome: std::result::Result<Value, RpcError>) {
        let Some((_, call)) = self.pending.remove(&id) else {
            #[cfg(feature = "tracing")]
            tracing::debug!(id, "Dropping response without pending call");
            return;
        };

        #[cfg(feature = "tracing")]
        match &outcome {
            Ok(_) => tracing::debug!(id, method = %call.method, wire_sub_id = %call.wire_sub_id, "Request acknowledged"),
            Err(e) => tracing::warn!(id, method = %call.method, wire_sub_id = %call.wire_sub_id, error = %e, "Request rejected"),
        }
        #[cfg(not(feature = "tracing"))]
        let _: (&Method, &String) = (&call.method, &call.wire_sub_id);

        (call.continuation)(outcome);
    }
}

/// Short unpredictable token for the `subId` field.
fn generate_sub_id() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(SUB_ID_LEN)
        .map(char::from)
        .collect()
}
