//! The transport handle consumed by the chat layer.
//!
//! The real client wraps a STOMP/WebSocket pub/sub connection whose
//! reconnect and backoff logic is a black box to this crate. Only three
//! capabilities are needed: the connected flag, emitting a named event and
//! subscribing to one.

pub mod memory;

use tokio::sync::watch;

use crate::error::TransportError;

/// Callback invoked with the JSON payload of an inbound event.
pub type EventHandler = Box<dyn Fn(serde_json::Value) + Send + Sync + 'static>;

pub trait Transport: Send + Sync + 'static {
    fn is_connected(&self) -> bool;

    /// Emit a named event.
    ///
    /// Implementations must not invoke handlers registered through [`on`]
    /// from inside `emit`; inbound events are delivered from the transport's
    /// own context.
    ///
    /// [`on`]: Transport::on
    fn emit(&self, event: &str, payload: serde_json::Value) -> Result<(), TransportError>;

    /// Register `handler` for `event`. The handler stays registered until the
    /// returned [`Subscription`] is dropped.
    fn on(&self, event: &str, handler: EventHandler) -> Subscription;

    /// Stream of connected-state changes, if the transport can report them.
    fn connection_changes(&self) -> Option<watch::Receiver<bool>> {
        None
    }
}

/// Guard for a registered handler. Dropping it unsubscribes.
pub struct Subscription {
    event: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(event: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            event: event.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Unsubscribe now instead of at drop time.
    pub fn unsubscribe(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("active", &self.release.is_some())
            .finish()
    }
}
