//! Optimistic buffer and offline send queue.
//!
//! Every locally created message is tracked here until its server echo
//! replaces the optimistic copy in the state (or it is rolled back). Sends
//! attempted while the transport is down additionally wait in a FIFO queue
//! that is flushed once the connection comes back.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;

use focushive_shared::constants::{TEMP_ID_PREFIX, TEMP_ID_RANDOM_LEN};
use focushive_shared::protocol::SendMessagePayload;
use focushive_shared::{ConversationId, MessageId};

use crate::error::ChatError;
use crate::state::ChatState;

/// A send whose optimistic copy is visible but not yet confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSend {
    pub temp_id: MessageId,
    pub payload: SendMessagePayload,
}

impl PendingSend {
    pub fn conversation_id(&self) -> &ConversationId {
        &self.payload.conversation_id
    }
}

#[derive(Debug)]
pub struct OptimisticBuffer {
    pending: HashMap<ConversationId, Vec<PendingSend>>,
    queue: VecDeque<MessageId>,
    capacity: usize,
}

impl OptimisticBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: HashMap::new(),
            queue: VecDeque::new(),
            capacity,
        }
    }

    /// Whether an unacknowledged copy with the same body already exists in
    /// the conversation.
    pub fn has_duplicate(&self, conversation_id: &ConversationId, content: &str) -> bool {
        self.pending
            .get(conversation_id)
            .is_some_and(|list| list.iter().any(|p| p.payload.content == content))
    }

    pub fn track(&mut self, send: PendingSend) {
        self.pending
            .entry(send.conversation_id().clone())
            .or_default()
            .push(send);
    }

    pub fn can_enqueue(&self) -> bool {
        self.queue.len() < self.capacity
    }

    /// Hold a tracked send until the next flush.
    pub fn enqueue(&mut self, temp_id: MessageId) -> Result<(), ChatError> {
        if !self.can_enqueue() {
            return Err(ChatError::OutboxFull {
                capacity: self.capacity,
            });
        }
        self.queue.push_back(temp_id);
        Ok(())
    }

    /// Drain the queue in submission order. Each entry is returned once.
    pub fn take_queue(&mut self) -> Vec<PendingSend> {
        let ids: Vec<MessageId> = self.queue.drain(..).collect();
        ids.iter().filter_map(|id| self.find(id).cloned()).collect()
    }

    /// Put unsent entries back at the head of the queue, keeping their order.
    pub fn requeue_front(&mut self, sends: &[PendingSend]) {
        for send in sends.iter().rev() {
            self.queue.push_front(send.temp_id.clone());
        }
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn forget(&mut self, conversation_id: &ConversationId, temp_id: &MessageId) -> Option<PendingSend> {
        self.queue.retain(|id| id != temp_id);
        let list = self.pending.get_mut(conversation_id)?;
        let pos = list.iter().position(|p| &p.temp_id == temp_id)?;
        let removed = list.remove(pos);
        if list.is_empty() {
            self.pending.remove(conversation_id);
        }
        Some(removed)
    }

    /// Drop entries whose optimistic copy no longer exists in `state`,
    /// i.e. the server echo has replaced it.
    pub fn prune(&mut self, state: &ChatState) {
        let mut gone = Vec::new();
        for (cid, list) in &self.pending {
            for p in list {
                let present = state
                    .conversation(cid)
                    .and_then(|c| c.get(&p.temp_id))
                    .is_some();
                if !present {
                    gone.push((cid.clone(), p.temp_id.clone()));
                }
            }
        }
        for (cid, temp_id) in gone {
            self.forget(&cid, &temp_id);
        }
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.queue.clear();
    }

    fn find(&self, temp_id: &MessageId) -> Option<&PendingSend> {
        self.pending
            .values()
            .flat_map(|list| list.iter())
            .find(|p| &p.temp_id == temp_id)
    }
}

/// `temp_<unix millis>_<random>` id for a message the server has not seen.
pub fn temp_message_id() -> MessageId {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TEMP_ID_RANDOM_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    MessageId(format!(
        "{TEMP_ID_PREFIX}{}_{suffix}",
        Utc::now().timestamp_millis()
    ))
}

/// Correlation id round-tripped through the server with each send.
pub fn correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
