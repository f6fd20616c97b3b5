//! Core WebSocket infrastructure.
//!
//! This module owns the socket: connecting, reconnecting with exponential
//! backoff, and moving text frames in and out. It knows nothing about
//! JSON-RPC; the [`rpc`](crate::rpc) layer sits on top of it through the
//! [`MessageSink`] trait.
//!
//! # Architecture
//!
//! - [`Transport`]: WebSocket session handler with reconnection and an outbound queue
//! - [`MessageSink`]: Trait for anything that can accept outbound text frames
//!
//! # Example
//!
//! ```ignore
//! let (transport, incoming) = Transport::new(endpoint, config)?;
//! transport.connect();
//! let correlator = Correlator::new(Arc::new(transport.clone()));
//! correlator.spawn_dispatcher(incoming);
//! ```

pub mod config;
pub mod error;
pub mod traits;
pub mod transport;

#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use traits::*;
pub use transport::{ConnectionState, Incoming, Transport, TransportEvent};
