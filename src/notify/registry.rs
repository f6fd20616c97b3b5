use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::subscription::{Listener, ListenerId, Subscription, SubscriptionState};
use crate::Result;
use crate::error::Error;
use crate::rpc::{Correlator, Notification, RpcError};
use crate::types::SubscriptionKind;
use crate::ws::TransportEvent;

/// Most keys covered by one `subscribe` call when re-subscribing after a reconnect.
pub const RESUBSCRIBE_BATCH_SIZE: usize = 10;

type SubscriptionKey = (SubscriptionKind, String);

/// Snapshot of one tracked subscription.
///
/// This is what a polling fallback needs to know to watch the same entities.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub kind: SubscriptionKind,
    pub app_key: String,
    pub state: SubscriptionState,
    /// Wire id of the subscribe call covering the key, once one was sent
    pub wire_sub_id: Option<String>,
}

/// Tracks which entities are watched and fans updates out to their listeners.
///
/// Each `(kind, app_key)` pair maps to one [`Subscription`]. The first
/// listener for a pair triggers a `subscribe` call; further listeners share
/// it. When the last listener goes away the subscription expires and, if no
/// other key shares its wire id, an `unsubscribe` is sent.
///
/// After the transport reconnects, [`handle_reconnect`](Self::handle_reconnect)
/// subscribes everything again in batches of [`RESUBSCRIBE_BATCH_SIZE`].
///
/// Listener callbacks run after the registry lock is released, so they may
/// call back into the registry.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    correlator: Correlator,
    state: Mutex<RegistryState>,
    next_listener_id: AtomicU64,
}

#[derive(Default)]
struct RegistryState {
    subscriptions: HashMap<SubscriptionKey, Subscription>,
    /// Keys covered by each wire id of the current server session
    routes: HashMap<String, Route>,
}

struct Route {
    kind: SubscriptionKind,
    keys: Vec<String>,
}

impl Registry {
    /// Create a registry issuing calls through `correlator`.
    ///
    /// Registers itself as the correlator's notification handler.
    #[must_use]
    pub fn new(correlator: Correlator) -> Self {
        let registry = Self {
            inner: Arc::new(RegistryInner {
                correlator,
                state: Mutex::new(RegistryState::default()),
                next_listener_id: AtomicU64::new(0),
            }),
        };

        let inner = Arc::downgrade(&registry.inner);
        registry
            .inner
            .correlator
            .set_notification_handler(Arc::new(move |notification: Notification| {
                if let Some(inner) = inner.upgrade() {
                    inner.handle_update(&notification);
                }
            }));

        registry
    }

    /// Start the task that re-subscribes everything whenever `events`
    /// reports [`TransportEvent::Reconnected`].
    ///
    /// The task ends when the event channel closes or the registry is dropped.
    pub fn start_reconnection_handler(
        &self,
        mut events: broadcast::Receiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(TransportEvent::Reconnected) => {
                        let Some(inner) = inner.upgrade() else {
                            break;
                        };
                        #[cfg(feature = "tracing")]
                        tracing::debug!("Transport reconnected, re-establishing subscriptions");
                        inner.handle_reconnect();
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(count)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(count, "Missed transport events");
                        #[cfg(not(feature = "tracing"))]
                        let _: u64 = count;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Attach `listener` to `(kind, app_key)`, subscribing on first use.
    ///
    /// Every call returns a distinct [`ListenerId`], even for the same
    /// listener attached twice.
    ///
    /// # Errors
    ///
    /// Fails when this is the first listener for the key and the subscribe
    /// call cannot be sent. Nothing is tracked in that case.
    pub fn add_listener(
        &self,
        kind: SubscriptionKind,
        app_key: &str,
        listener: Listener,
    ) -> Result<ListenerId> {
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed));
        let key = (kind, app_key.to_owned());

        let mut state = self.inner.lock();
        if let Some(subscription) = state.subscriptions.get_mut(&key) {
            subscription.attach(id, listener);
            return Ok(id);
        }

        let mut subscription = Subscription::new(kind, app_key.to_owned());
        subscription.attach(id, listener);
        state.subscriptions.insert(key.clone(), subscription);

        // Sent under the lock so concurrent first listeners cannot both subscribe
        if let Err(e) = self.inner.subscribe(&mut state, kind, vec![app_key.to_owned()]) {
            state.subscriptions.remove(&key);
            return Err(e);
        }

        Ok(id)
    }

    /// Detach one listener. An unknown key or id is a no-op.
    ///
    /// Removing the last listener expires the subscription. When no other
    /// key shares its wire id, an `unsubscribe` is sent for it.
    ///
    /// # Errors
    ///
    /// Fails only when that `unsubscribe` cannot be sent. The listener is
    /// removed either way.
    pub fn remove_listener(
        &self,
        kind: SubscriptionKind,
        app_key: &str,
        listener_id: ListenerId,
    ) -> Result<()> {
        let key = (kind, app_key.to_owned());

        let mut state = self.inner.lock();
        let Some(subscription) = state.subscriptions.get_mut(&key) else {
            return Ok(());
        };
        if !subscription.detach(listener_id) || subscription.listener_count() > 0 {
            return Ok(());
        }

        let orphaned = state.evict(&key);
        drop(state);

        match orphaned {
            Some(wire_sub_id) => self.inner.correlator.cancel_subscription(&wire_sub_id),
            None => Ok(()),
        }
    }

    /// Stop watching `(kind, app_key)` regardless of how many listeners remain.
    ///
    /// Sends `["CLOSE", subId]` when no other key shares the wire id.
    pub fn close(&self, kind: SubscriptionKind, app_key: &str) -> Result<()> {
        let orphaned = self.inner.lock().evict(&(kind, app_key.to_owned()));

        match orphaned {
            Some(wire_sub_id) => self.inner.correlator.close_subscription(&wire_sub_id),
            None => Ok(()),
        }
    }

    /// Route a notification to the listeners of the key it belongs to.
    pub fn handle_update(&self, notification: &Notification) {
        self.inner.handle_update(notification);
    }

    /// Fan `payload` out to the listeners of `(kind, app_key)` as if the mint
    /// had pushed it. Used by alternative update sources such as polling.
    pub fn deliver(&self, kind: SubscriptionKind, app_key: &str, payload: &Value) {
        let snapshot = self
            .inner
            .lock()
            .subscriptions
            .get(&(kind, app_key.to_owned()))
            .cloned();

        if let Some(subscription) = snapshot {
            subscription.update(payload);
        }
    }

    /// Subscribe every tracked key again on a fresh server session.
    ///
    /// Every wire id issued before is unsubscribed first and its pending
    /// subscribe call abandoned, so each key ends up under exactly one live id.
    pub fn handle_reconnect(&self) {
        self.inner.handle_reconnect();
    }

    /// Listeners attached to `(kind, app_key)`; zero when it is not tracked.
    #[must_use]
    pub fn listener_count(&self, kind: SubscriptionKind, app_key: &str) -> usize {
        self.inner
            .lock()
            .subscriptions
            .get(&(kind, app_key.to_owned()))
            .map_or(0, Subscription::listener_count)
    }

    /// State of `(kind, app_key)`, or `None` when it is not tracked.
    #[must_use]
    pub fn state(&self, kind: SubscriptionKind, app_key: &str) -> Option<SubscriptionState> {
        self.inner
            .lock()
            .subscriptions
            .get(&(kind, app_key.to_owned()))
            .map(Subscription::state)
    }

    /// Every tracked subscription, ordered by kind then key.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        let state = self.inner.lock();
        let mut infos: Vec<SubscriptionInfo> = state
            .subscriptions
            .values()
            .map(|subscription| SubscriptionInfo {
                kind: subscription.kind(),
                app_key: subscription.app_key().to_owned(),
                state: subscription.state(),
                wire_sub_id: subscription.wire_sub_id().map(str::to_owned),
            })
            .collect();
        infos.sort_by(|a, b| (a.kind, &a.app_key).cmp(&(b.kind, &b.app_key)));
        infos
    }

    /// Number of tracked subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().subscriptions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RegistryInner {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // Every mutation leaves the maps consistent before anything can panic.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issue one subscribe call covering `keys` and route its wire id to them.
    fn subscribe(
        self: &Arc<Self>,
        state: &mut RegistryState,
        kind: SubscriptionKind,
        keys: Vec<String>,
    ) -> Result<String> {
        let wire_slot: Arc<OnceLock<String>> = Arc::new(OnceLock::new());
        let inner = Arc::downgrade(self);
        let slot = Arc::clone(&wire_slot);

        let wire_sub_id = self
            .correlator
            .create_subscription(kind, keys.clone(), move |outcome| {
                complete(&inner, &slot, outcome);
            })?;
        _ = wire_slot.set(wire_sub_id.clone());

        for key in &keys {
            if let Some(subscription) = state.subscriptions.get_mut(&(kind, key.clone())) {
                subscription.resubscribing(wire_sub_id.clone());
            }
        }
        state.routes.insert(wire_sub_id.clone(), Route { kind, keys });

        Ok(wire_sub_id)
    }

    fn handle_update(&self, notification: &Notification) {
        let snapshot = {
            let state = self.lock();
            let Some(route) = state.routes.get(notification.sub_id()) else {
                #[cfg(feature = "tracing")]
                tracing::debug!(sub_id = notification.sub_id(), "Dropping update for unknown subscription");
                return;
            };

            let key = match route.keys.as_slice() {
                [only] => Some(only.clone()),
                keys => notification
                    .payload()
                    .get(route.kind.key_field())
                    .and_then(Value::as_str)
                    .filter(|key| keys.iter().any(|k| k == key))
                    .map(str::to_owned),
            };

            key.and_then(|key| state.subscriptions.get(&(route.kind, key)).cloned())
        };

        match snapshot {
            Some(subscription) => subscription.update(notification.payload()),
            None => {
                #[cfg(feature = "tracing")]
                tracing::debug!(sub_id = notification.sub_id(), "Dropping update matching no tracked key");
            }
        }
    }

    fn handle_reconnect(self: &Arc<Self>) {
        let mut failed: Vec<(Vec<Subscription>, Error)> = Vec::new();

        {
            let mut state = self.lock();
            // Calls made on the old socket will never be answered
            let abandoned = self.correlator.abandon_pending();
            #[cfg(feature = "tracing")]
            tracing::debug!(abandoned, "Abandoned calls of the previous socket");
            #[cfg(not(feature = "tracing"))]
            let _: usize = abandoned;

            // A subscribe queued around the reopen may have reached the new
            // socket, so every superseded wire id is torn down explicitly
            let mut superseded: Vec<String> = state.routes.drain().map(|(id, _)| id).collect();
            superseded.sort();
            for wire_sub_id in superseded {
                if let Err(e) = self.correlator.cancel_subscription(&wire_sub_id) {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%wire_sub_id, error = %e, "Unsubscribe of superseded id was not sent");
                    #[cfg(not(feature = "tracing"))]
                    let _: &Error = &e;
                }
            }

            let mut by_kind: BTreeMap<SubscriptionKind, Vec<String>> = BTreeMap::new();
            for (kind, key) in state.subscriptions.keys() {
                by_kind.entry(*kind).or_default().push(key.clone());
            }

            for (kind, mut keys) in by_kind {
                keys.sort();

                for chunk in keys.chunks(RESUBSCRIBE_BATCH_SIZE) {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%kind, count = chunk.len(), "Re-subscribing batch");

                    if let Err(e) = self.subscribe(&mut state, kind, chunk.to_vec()) {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(%kind, error = %e, "Failed to re-subscribe batch");

                        let members = chunk
                            .iter()
                            .filter_map(|key| state.subscriptions.get(&(kind, key.clone())).cloned())
                            .collect();
                        failed.push((members, e));
                    }
                }
            }
        }

        for (members, error) in failed {
            for subscription in members {
                subscription.error(&error);
            }
        }
    }
}

impl RegistryState {
    /// Remove a subscription and detach it from its route.
    ///
    /// Returns the wire id when the route is left covering no key.
    fn evict(&mut self, key: &SubscriptionKey) -> Option<String> {
        let mut subscription = self.subscriptions.remove(key)?;
        subscription.expire();

        #[cfg(feature = "tracing")]
        tracing::debug!(kind = %key.0, app_key = %key.1, "Subscription expired");

        let wire_sub_id = subscription.wire_sub_id()?.to_owned();
        let route = self.routes.get_mut(&wire_sub_id)?;
        route.keys.retain(|k| *k != key.1);

        if route.keys.is_empty() {
            self.routes.remove(&wire_sub_id);
            Some(wire_sub_id)
        } else {
            None
        }
    }
}

/// Runs on the dispatcher once the mint answers a subscribe call.
fn complete(
    inner: &Weak<RegistryInner>,
    wire_slot: &OnceLock<String>,
    outcome: std::result::Result<Value, RpcError>,
) {
    let Some(inner) = inner.upgrade() else {
        return;
    };

    let failed: Vec<Subscription> = {
        let mut state = inner.lock();
        // Set before the lock was released in `subscribe`
        let Some(wire_sub_id) = wire_slot.get() else {
            return;
        };
        let Some(route) = state.routes.get(wire_sub_id) else {
            // Superseded by a reconnect or every key was removed
            return;
        };
        let kind = route.kind;
        let keys = route.keys.clone();

        let mut failed = Vec::new();
        for key in keys {
            let Some(subscription) = state.subscriptions.get_mut(&(kind, key)) else {
                continue;
            };
            if subscription.wire_sub_id() != Some(wire_sub_id.as_str()) {
                continue;
            }
            if outcome.is_ok() {
                subscription.set_active();
            } else {
                failed.push(subscription.clone());
            }
        }

        #[cfg(feature = "tracing")]
        if outcome.is_ok() {
            tracing::debug!(%wire_sub_id, %kind, "Subscription active");
        }

        failed
    };

    if let Err(rpc_error) = outcome {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %rpc_error, "Mint rejected subscription");

        let error = Error::from(rpc_error);
        for subscription in failed {
            subscription.error(&error);
        }
    }
}
