//! In-process transport.
//!
//! Emissions are recorded and forwarded on an mpsc channel so a loopback
//! server task (or a test) can answer them; inbound events are injected with
//! [`MemoryTransport::deliver`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::{EventHandler, Subscription, Transport};
use crate::error::TransportError;
use crate::lock;

/// An event emitted by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub event: String,
    pub payload: serde_json::Value,
}

type SharedHandler = Arc<dyn Fn(serde_json::Value) + Send + Sync + 'static>;
type HandlerMap = HashMap<String, Vec<(u64, SharedHandler)>>;

pub struct MemoryTransport {
    connected: watch::Sender<bool>,
    handlers: Arc<Mutex<HandlerMap>>,
    next_handler_id: AtomicU64,
    emitted: Mutex<Vec<Emission>>,
    outbound_tx: mpsc::UnboundedSender<Emission>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Emission>>>,
    /// Event name -> rejection reason, for simulating server-side refusals.
    rejections: Mutex<HashMap<String, String>>,
}

impl MemoryTransport {
    pub fn new(connected: bool) -> Self {
        let (connected, _) = watch::channel(connected);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            connected,
            handlers: Arc::new(Mutex::new(HashMap::new())),
            next_handler_id: AtomicU64::new(1),
            emitted: Mutex::new(Vec::new()),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            rejections: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        let changed = self.connected.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
        if changed {
            debug!(connected, "Memory transport connection changed");
        }
    }

    /// Deliver an inbound event to every registered handler.
    /// Returns the number of handlers invoked.
    pub fn deliver(&self, event: &str, payload: serde_json::Value) -> usize {
        let targets: Vec<SharedHandler> = lock(&self.handlers)
            .get(event)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in &targets {
            handler(payload.clone());
        }
        targets.len()
    }

    /// Make every future emission of `event` fail with `reason`.
    pub fn reject(&self, event: &str, reason: &str) {
        lock(&self.rejections).insert(event.to_string(), reason.to_string());
    }

    pub fn clear_rejections(&self) {
        lock(&self.rejections).clear();
    }

    /// Receiver of every successful emission. Can be taken once.
    pub fn take_outbound(&self) -> Option<mpsc::UnboundedReceiver<Emission>> {
        lock(&self.outbound_rx).take()
    }

    pub fn emitted(&self) -> Vec<Emission> {
        lock(&self.emitted).clone()
    }

    pub fn emitted_for(&self, event: &str) -> Vec<Emission> {
        lock(&self.emitted)
            .iter()
            .filter(|e| e.event == event)
            .cloned()
            .collect()
    }

    pub fn take_emitted(&self) -> Vec<Emission> {
        std::mem::take(&mut *lock(&self.emitted))
    }

    /// Total number of registered handlers across all events.
    pub fn handler_count(&self) -> usize {
        lock(&self.handlers).values().map(Vec::len).sum()
    }

    pub fn handler_count_for(&self, event: &str) -> usize {
        lock(&self.handlers).get(event).map(Vec::len).unwrap_or(0)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Transport for MemoryTransport {
    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    fn emit(&self, event: &str, payload: serde_json::Value) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if let Some(reason) = lock(&self.rejections).get(event) {
            return Err(TransportError::Rejected(reason.clone()));
        }

        let emission = Emission {
            event: event.to_string(),
            payload,
        };
        lock(&self.emitted).push(emission.clone());
        // Nobody listening on the outbound side is fine.
        let _ = self.outbound_tx.send(emission);
        Ok(())
    }

    fn on(&self, event: &str, handler: EventHandler) -> Subscription {
        let id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.handlers)
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::from(handler)));

        let handlers = Arc::downgrade(&self.handlers);
        let name = event.to_string();
        Subscription::new(event, move || {
            if let Some(handlers) = handlers.upgrade() {
                let mut map = lock(&handlers);
                if let Some(list) = map.get_mut(&name) {
                    list.retain(|(hid, _)| *hid != id);
                    if list.is_empty() {
                        map.remove(&name);
                    }
                }
            }
        })
    }

    fn connection_changes(&self) -> Option<watch::Receiver<bool>> {
        Some(self.connected.subscribe())
    }
}
