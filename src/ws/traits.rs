//! Core traits for generic WebSocket infrastructure.

use std::sync::{Mutex, PoisonError};

/// Outbound half of a text-frame connection.
///
/// The RPC layer talks to the socket only through this trait, so it can be
/// driven by a [`Transport`](super::Transport) in production and by an
/// in-memory recorder in tests.
///
/// # Example
///
/// ```ignore
/// struct Recorder(Mutex<Vec<String>>);
///
/// impl MessageSink for Recorder {
///     fn send_text(&self, text: String) -> crate::Result<()> {
///         self.0.lock().unwrap().push(text);
///         Ok(())
///     }
/// }
/// ```
pub trait MessageSink: Send + Sync + 'static {
    /// Queue a text frame for delivery.
    ///
    /// Returns immediately. Fails only if the frame can never be delivered,
    /// e.g. because the connection was shut down.
    fn send_text(&self, text: String) -> crate::Result<()>;
}

/// Sink that keeps every frame in memory, in send order.
///
/// Test and benchmark double for driving a [`Correlator`](crate::rpc::Correlator)
/// without a socket.
#[doc(hidden)]
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<String>>,
}

impl RecordingSink {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove and return all frames sent so far.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl MessageSink for RecordingSink {
    fn send_text(&self, text: String) -> crate::Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text);
        Ok(())
    }
}
