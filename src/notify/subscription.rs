#![expect(
    clippy::module_name_repetitions,
    reason = "Subscription types deliberately include the module name for clarity"
)]

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Error;
use crate::types::SubscriptionKind;

/// Handle for one attached listener, returned by
/// [`Registry::add_listener`](super::Registry::add_listener).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

/// Lifecycle of a [`Subscription`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SubscriptionState {
    /// A listener exists, the subscribe call is not acknowledged yet
    Pending,
    /// The mint acknowledged the subscribe call
    Active,
    /// The last listener went away; terminal
    Expired,
}

type UpdateFn = dyn Fn(&Value) + Send + Sync;
type ErrorFn = dyn Fn(SubscriptionKind, &str, &Error) + Send + Sync;

/// A pair of callbacks attached to one subscription.
#[derive(Clone)]
pub struct Listener {
    on_update: Arc<UpdateFn>,
    on_error: Arc<ErrorFn>,
}

impl Listener {
    /// Create a listener from an update callback and an error callback.
    ///
    /// The error callback receives the kind and application key of the
    /// subscription that failed.
    pub fn new<U, E>(on_update: U, on_error: E) -> Self
    where
        U: Fn(&Value) + Send + Sync + 'static,
        E: Fn(SubscriptionKind, &str, &Error) + Send + Sync + 'static,
    {
        Self {
            on_update: Arc::new(on_update),
            on_error: Arc::new(on_error),
        }
    }

    /// Create a listener that ignores errors.
    pub fn on_update<U>(on_update: U) -> Self
    where
        U: Fn(&Value) + Send + Sync + 'static,
    {
        Self::new(on_update, |_, _, _| {})
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").finish_non_exhaustive()
    }
}

/// One watched entity: its state and the listeners attached to it.
#[derive(Debug, Clone)]
pub struct Subscription {
    kind: SubscriptionKind,
    app_key: String,
    wire_sub_id: Option<String>,
    state: SubscriptionState,
    listeners: Vec<(ListenerId, Listener)>,
}

impl Subscription {
    /// Create a pending subscription with no listeners.
    #[must_use]
    pub fn new(kind: SubscriptionKind, app_key: String) -> Self {
        Self {
            kind,
            app_key,
            wire_sub_id: None,
            state: SubscriptionState::Pending,
            listeners: Vec::new(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }

    #[must_use]
    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    /// Wire id of the subscribe call currently covering this subscription.
    #[must_use]
    pub fn wire_sub_id(&self) -> Option<&str> {
        self.wire_sub_id.as_deref()
    }

    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Fan `payload` out to every listener, in attachment order.
    pub fn update(&self, payload: &Value) {
        for (_, listener) in &self.listeners {
            (listener.on_update)(payload);
        }
    }

    /// Fan `error` out to every listener, in attachment order.
    pub fn error(&self, error: &Error) {
        for (_, listener) in &self.listeners {
            (listener.on_error)(self.kind, &self.app_key, error);
        }
    }

    pub(crate) fn attach(&mut self, id: ListenerId, listener: Listener) {
        self.listeners.push((id, listener));
    }

    /// Detach a listener. Returns whether it was attached.
    pub(crate) fn detach(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(attached, _)| *attached != id);
        self.listeners.len() != before
    }

    /// Record the wire id of a new subscribe call and go back to pending.
    pub(crate) fn resubscribing(&mut self, wire_sub_id: String) {
        self.wire_sub_id = Some(wire_sub_id);
        self.state = SubscriptionState::Pending;
    }

    pub(crate) fn set_active(&mut self) {
        if self.state == SubscriptionState::Pending {
            self.state = SubscriptionState::Active;
        }
    }

    pub(crate) fn expire(&mut self) {
        self.state = SubscriptionState::Expired;
        self.listeners.clear();
    }
}
