#![expect(
    clippy::module_name_repetitions,
    reason = "Re-exported names intentionally match their modules for API clarity"
)]

//! JSON-RPC correlation layer.
//!
//! Turns the raw text frames of a [`Transport`](crate::ws::Transport) into
//! request/response pairs and subscription pushes:
//!
//! - outbound `subscribe` / `unsubscribe` envelopes with monotonically increasing ids
//! - inbound responses matched back to the continuation registered for their id
//! - inbound notifications handed to a single notification handler

pub mod correlator;
pub mod types;

pub use correlator::{Continuation, Correlator, NotificationHandler};
pub use types::request::{CloseMessage, Method, Request, SubscribeParams, UnsubscribeParams};
pub use types::response::{InboundMessage, Notification, NotificationParams, RpcError};
