use std::sync::Arc;

use async_stream::try_stream;
use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};

use super::registry::{Registry, SubscriptionInfo};
use super::subscription::{Listener, ListenerId};
use crate::Result;
use crate::error::Error;
use crate::rpc::{Correlator, RpcError};
use crate::serde_helpers::deserialize_with_warnings;
use crate::types::{MeltQuoteUpdate, MintQuoteUpdate, ProofStateUpdate, SubscriptionKind};
use crate::ws::config::Config;
use crate::ws::{ConnectionState, Transport, TransportEvent};

/// Notification client for one mint.
///
/// Wires a [`Transport`], a [`Correlator`] and a [`Registry`] together and
/// keeps subscriptions alive across reconnects.
///
/// Updates can be consumed two ways:
///
/// - callbacks, through [`add_listener`](Self::add_listener)
/// - typed streams, through [`subscribe_mint_quote`](Self::subscribe_mint_quote)
///   and its siblings. Dropping the stream removes its listener.
///
/// # Examples
///
/// ```rust, no_run
/// use futures::StreamExt as _;
/// use mint_notify::notify::Client;
/// use mint_notify::ws::config::Config;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::new("wss://mint.example.com/v1/ws", Config::default())?;
///
///     let stream = client.subscribe_mint_quote("quote-id")?;
///     let mut stream = Box::pin(stream);
///
///     while let Some(update) = stream.next().await {
///         println!("Quote is now {}", update?.state);
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Transport,
    correlator: Correlator,
    registry: Registry,
}

impl Client {
    /// Create a client for `endpoint` and start connecting.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails when `endpoint` is not a `ws://` or `wss://` URL.
    pub fn new(endpoint: &str, config: Config) -> Result<Self> {
        let (transport, incoming) = Transport::new(endpoint, config)?;

        let correlator = Correlator::new(Arc::new(transport.clone()));
        correlator.spawn_dispatcher(incoming);

        let registry = Registry::new(correlator.clone());
        // Subscribe to events before connecting so no Reconnected is missed
        registry.start_reconnection_handler(transport.events());

        transport.connect();

        Ok(Self {
            inner: Arc::new(ClientInner {
                transport,
                correlator,
                registry,
            }),
        })
    }

    /// Attach a callback listener to `(kind, app_key)`.
    ///
    /// The first listener for a key sends the `subscribe` call.
    pub fn add_listener(
        &self,
        kind: SubscriptionKind,
        app_key: &str,
        listener: Listener,
    ) -> Result<ListenerId> {
        self.inner.registry.add_listener(kind, app_key, listener)
    }

    /// Detach a listener added with [`add_listener`](Self::add_listener).
    pub fn remove_listener(
        &self,
        kind: SubscriptionKind,
        app_key: &str,
        listener_id: ListenerId,
    ) -> Result<()> {
        self.inner
            .registry
            .remove_listener(kind, app_key, listener_id)
    }

    /// Stop watching `(kind, app_key)` and drop all of its listeners.
    ///
    /// Streams on the key end.
    pub fn close(&self, kind: SubscriptionKind, app_key: &str) -> Result<()> {
        self.inner.registry.close(kind, app_key)
    }

    /// Feed an update obtained elsewhere (e.g. by polling the mint's REST API)
    /// through the same fan-out as pushed notifications.
    pub fn deliver(&self, kind: SubscriptionKind, app_key: &str, payload: &Value) {
        self.inner.registry.deliver(kind, app_key, payload);
    }

    /// Stream state changes of a bolt11 mint quote.
    ///
    /// The stream yields an error and ends if the mint rejects the subscription.
    pub fn subscribe_mint_quote(
        &self,
        quote_id: &str,
    ) -> Result<impl Stream<Item = Result<MintQuoteUpdate>> + use<>> {
        self.subscribe_typed(SubscriptionKind::Bolt11MintQuote, quote_id)
    }

    /// Stream state changes of a bolt11 melt quote.
    pub fn subscribe_melt_quote(
        &self,
        quote_id: &str,
    ) -> Result<impl Stream<Item = Result<MeltQuoteUpdate>> + use<>> {
        self.subscribe_typed(SubscriptionKind::Bolt11MeltQuote, quote_id)
    }

    /// Stream spent state changes of a proof, identified by its `Y` value.
    pub fn subscribe_proof_state(
        &self,
        y: &str,
    ) -> Result<impl Stream<Item = Result<ProofStateUpdate>> + use<>> {
        self.subscribe_typed(SubscriptionKind::ProofState, y)
    }

    fn subscribe_typed<T>(
        &self,
        kind: SubscriptionKind,
        app_key: &str,
    ) -> Result<impl Stream<Item = Result<T>> + use<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Result<Value>>();
        let errors = tx.clone();
        let listener = Listener::new(
            move |payload| {
                _ = tx.send(Ok(payload.clone()));
            },
            move |_, _, error| {
                _ = errors.send(Err(detach_error(error)));
            },
        );

        let listener_id = self.inner.registry.add_listener(kind, app_key, listener)?;
        let guard = ListenerGuard {
            registry: self.inner.registry.clone(),
            kind,
            app_key: app_key.to_owned(),
            listener_id,
        };

        Ok(try_stream! {
            let _guard = guard;

            // Ends once the listener is gone, e.g. after `close`
            while let Some(item) = rx.recv().await {
                let payload = item?;
                match deserialize_with_warnings::<T>(payload) {
                    Ok(update) => yield update,
                    Err(e) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(%kind, error = %e, "Skipping undecodable update");
                        #[cfg(not(feature = "tracing"))]
                        let _: &Error = &e;
                    }
                }
            }
        })
    }

    /// Open the connection again after [`disconnect`](Self::disconnect) or
    /// after reconnection gave up, and re-subscribe every tracked key.
    ///
    /// No-op while a session is alive.
    pub fn connect(&self) {
        if !self.inner.transport.state().is_disconnected() {
            return;
        }
        self.inner.transport.connect();
        self.inner.registry.handle_reconnect();
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Subscriptions stay tracked and are sent again by [`connect`](Self::connect).
    pub fn disconnect(&self) {
        self.inner.transport.disconnect();
    }

    /// Get the current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.transport.state()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.transport.state_receiver()
    }

    /// Subscribe to transport lifecycle events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.transport.events()
    }

    /// Get the number of tracked subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Snapshot of every tracked subscription.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.inner.registry.subscriptions()
    }

    /// Subscribe calls still waiting for the mint to answer.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.inner.correlator.pending_calls()
    }

    /// The underlying registry, for wiring in an alternative update source.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }
}

/// Removes a stream's listener when the stream is dropped.
struct ListenerGuard {
    registry: Registry,
    kind: SubscriptionKind,
    app_key: String,
    listener_id: ListenerId,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Err(e) = self
            .registry
            .remove_listener(self.kind, &self.app_key, self.listener_id)
        {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %e, "Unsubscribe after stream drop was not sent");
            #[cfg(not(feature = "tracing"))]
            let _: &Error = &e;
        }
    }
}

/// Build an owned error for a stream from one shared by several listeners.
fn detach_error(error: &Error) -> Error {
    match error.downcast_ref::<RpcError>() {
        Some(rpc_error) => rpc_error.clone().into(),
        None => {
            let message = error
                .inner()
                .map_or_else(|| format!("{:?}", error.kind()), ToString::to_string);
            Error::with_source(error.kind(), std::io::Error::other(message))
        }
    }
}
