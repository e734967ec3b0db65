//! Keyed one-shot timers backing the typing indicators.
//!
//! Two sets exist per session: outgoing debounce timers keyed by
//! conversation (auto-emit "stopped typing" after the quiet period) and
//! expiry timers for remote indicators keyed by (conversation, user).
//! Arming a key cancels whatever was pending for it, so at most one timer
//! per key is ever live.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use focushive_shared::{ConversationId, UserId};

use crate::lock;

/// Key of a remote typing indicator.
pub type TypingKey = (ConversationId, UserId);

/// Live timers by key, tagged with the generation that armed them.
type TimerMap<K> = Mutex<HashMap<K, (u64, JoinHandle<()>)>>;

/// A fired timer removes its own entry, so the map only ever holds timers
/// that have not run yet.
pub struct TimerSet<K> {
    runtime: Handle,
    timers: Arc<TimerMap<K>>,
    next_generation: u64,
}

impl<K: Eq + Hash + Clone + Send + 'static> TimerSet<K> {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_generation: 0,
        }
    }

    /// Run `on_fire` after `delay` unless the key is re-armed or cancelled first.
    pub fn arm<F>(&mut self, key: K, delay: Duration, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);

        let mut timers = lock(&self.timers);
        if let Some((_, previous)) = timers.remove(&key) {
            previous.abort();
        }

        let registry: Weak<TimerMap<K>> = Arc::downgrade(&self.timers);
        let own_key = key.clone();
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(registry) = registry.upgrade() {
                let mut timers = lock(&registry);
                if timers.get(&own_key).is_some_and(|(g, _)| *g == generation) {
                    timers.remove(&own_key);
                }
            }
            on_fire();
        });
        // Inserted under the same guard the task needs, so it cannot fire first.
        timers.insert(key, (generation, handle));
    }

    /// Cancel the timer for `key`. Returns whether one was still pending.
    pub fn cancel(&mut self, key: &K) -> bool {
        match lock(&self.timers).remove(key) {
            Some((_, handle)) => {
                let pending = !handle.is_finished();
                handle.abort();
                pending
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, (_, handle)) in lock(&self.timers).drain() {
            handle.abort();
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        lock(&self.timers).contains_key(key)
    }

    /// Number of timers that have not fired yet.
    pub fn pending_count(&self) -> usize {
        lock(&self.timers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending_count() == 0
    }
}

impl<K> Drop for TimerSet<K> {
    fn drop(&mut self) {
        for (_, (_, handle)) in lock(&self.timers).drain() {
            handle.abort();
        }
    }
}
