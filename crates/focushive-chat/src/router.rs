//! Binds the named inbound transport events to state transitions.
//!
//! Handlers are registered only while the transport is connected and are
//! released as a group on disconnect or dispose, so a reconnect never leaves
//! a second copy of a handler behind.

use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use tracing::{debug, warn};

use focushive_shared::protocol::{
    self, inbound, ErrorPayload, HistoryPayload, MessageDeletedPayload, ReactionPayload,
    TypingPayload,
};
use focushive_shared::{Message, ProtocolError, Reaction, TypingIndicator};

use crate::lock;
use crate::reducer::ChatEvent;
use crate::session::SessionCore;
use crate::transport::{EventHandler, Subscription, Transport};

/// Decode an inbound event into a transition. Unknown event names yield `None`.
pub fn route(event: &str, payload: serde_json::Value) -> Result<Option<ChatEvent>, ProtocolError> {
    let transition = match event {
        inbound::MESSAGE => ChatEvent::MessageReceived(protocol::decode::<Message>(event, payload)?),

        inbound::MESSAGE_UPDATED => {
            ChatEvent::MessageUpdated(protocol::decode::<Message>(event, payload)?)
        }

        inbound::MESSAGE_DELETED => {
            let p: MessageDeletedPayload = protocol::decode(event, payload)?;
            ChatEvent::MessageDeleted {
                conversation_id: p.conversation_id,
                message_id: p.message_id,
            }
        }

        inbound::REACTION_ADDED | inbound::REACTION_REMOVED => {
            let p: ReactionPayload = protocol::decode(event, payload)?;
            let reaction = Reaction {
                message_id: p.message_id,
                user_id: p.user_id,
                emoji: p.emoji,
            };
            if event == inbound::REACTION_ADDED {
                ChatEvent::ReactionAdded {
                    conversation_id: p.conversation_id,
                    reaction,
                }
            } else {
                ChatEvent::ReactionRemoved {
                    conversation_id: p.conversation_id,
                    reaction,
                }
            }
        }

        inbound::TYPING_START => {
            let p: TypingPayload = protocol::decode(event, payload)?;
            ChatEvent::TypingStarted(TypingIndicator {
                conversation_id: p.conversation_id,
                user_id: p.user_id,
                display_name: p.username,
                started_at: p.started_at.unwrap_or_else(Utc::now),
            })
        }

        inbound::TYPING_STOP => {
            let p: TypingPayload = protocol::decode(event, payload)?;
            ChatEvent::TypingStopped {
                conversation_id: p.conversation_id,
                user_id: p.user_id,
            }
        }

        inbound::HISTORY => {
            let p: HistoryPayload = protocol::decode(event, payload)?;
            ChatEvent::HistoryLoaded {
                conversation_id: p.conversation_id,
                messages: p.messages,
                has_more: p.has_more,
            }
        }

        inbound::ERROR => {
            let p: ErrorPayload = protocol::decode(event, payload)?;
            ChatEvent::Error(p.text())
        }

        _ => return Ok(None),
    };

    Ok(Some(transition))
}

/// Holds the transport subscriptions of one session.
#[derive(Debug, Default)]
pub struct DispatchRouter {
    subscriptions: Vec<Subscription>,
}

impl DispatchRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_attached(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    /// Register one handler per inbound event. No-op when already attached.
    pub(crate) fn attach<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        core: &Arc<Mutex<SessionCore>>,
    ) {
        if self.is_attached() {
            return;
        }

        for name in inbound::ALL {
            let core = Arc::downgrade(core);
            let handler: EventHandler = Box::new(move |payload| {
                handle_inbound(&core, name, payload);
            });
            self.subscriptions.push(transport.on(name, handler));
        }

        debug!(count = self.subscriptions.len(), "Chat handlers attached");
    }

    /// Release every handler.
    pub fn detach(&mut self) {
        if self.is_attached() {
            debug!(count = self.subscriptions.len(), "Chat handlers released");
        }
        self.subscriptions.clear();
    }
}

fn handle_inbound(core: &Weak<Mutex<SessionCore>>, name: &str, payload: serde_json::Value) {
    let event = match route(name, payload) {
        Ok(Some(event)) => event,
        Ok(None) => {
            debug!(event = name, "Ignoring unrouted chat event");
            return;
        }
        Err(e) => {
            warn!(event = name, error = %e, "Dropping malformed chat payload");
            return;
        }
    };

    let Some(core) = core.upgrade() else {
        return;
    };

    debug!(event = name, transition = event.kind(), "Inbound chat event");
    let weak = Arc::downgrade(&core);
    lock(&core).apply_inbound(event, &weak);
}
