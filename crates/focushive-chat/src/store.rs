//! Owner of the canonical [`ChatState`].
//!
//! Every mutation goes through [`ChatStore::dispatch`]. Effective transitions
//! publish a fresh `Arc` on a watch channel; transitions that change nothing
//! keep the previous `Arc` so pointer comparison stays meaningful.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::trace;

use focushive_shared::UserId;

use crate::reducer::{reduce, ChatEvent};
use crate::state::ChatState;

pub struct ChatStore {
    current: Arc<ChatState>,
    self_id: Option<UserId>,
    publisher: watch::Sender<Arc<ChatState>>,
}

impl ChatStore {
    pub fn new(self_id: Option<UserId>) -> Self {
        let current = Arc::new(ChatState::default());
        let (publisher, _) = watch::channel(Arc::clone(&current));
        Self {
            current,
            self_id,
            publisher,
        }
    }

    pub fn snapshot(&self) -> Arc<ChatState> {
        Arc::clone(&self.current)
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ChatState>> {
        self.publisher.subscribe()
    }

    pub fn self_id(&self) -> Option<&UserId> {
        self.self_id.as_ref()
    }

    /// Apply one transition. Returns whether the observable state changed.
    pub fn dispatch(&mut self, event: ChatEvent) -> bool {
        let next = reduce(&self.current, &event, self.self_id.as_ref());
        if next == *self.current {
            trace!(event = event.kind(), "Transition left state unchanged");
            return false;
        }

        trace!(event = event.kind(), "Applied transition");
        self.current = Arc::new(next);
        self.publisher.send_replace(Arc::clone(&self.current));
        true
    }
}
