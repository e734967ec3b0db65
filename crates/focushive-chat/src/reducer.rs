//! State transitions.
//!
//! [`reduce`] is pure: it maps a previous state and one event to the next
//! state without touching the input. Remote transitions are idempotent under
//! redelivery except `ReactionAdded`, which moves the reaction to the end.

use focushive_shared::{
    ConversationId, Delivery, Message, MessageId, Reaction, TypingIndicator, UserId,
};

use crate::state::{ChatState, ConversationChatState};

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    // --- pushed by the server ---
    MessageReceived(Message),
    MessageUpdated(Message),
    MessageDeleted {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    ReactionAdded {
        conversation_id: Option<ConversationId>,
        reaction: Reaction,
    },
    ReactionRemoved {
        conversation_id: Option<ConversationId>,
        reaction: Reaction,
    },
    TypingStarted(TypingIndicator),
    TypingStopped {
        conversation_id: ConversationId,
        user_id: UserId,
    },
    HistoryLoaded {
        conversation_id: ConversationId,
        messages: Vec<Message>,
        has_more: bool,
    },
    Error(String),

    // --- local actions ---
    OptimisticAppended(Message),
    OptimisticDelivery {
        conversation_id: ConversationId,
        temp_id: MessageId,
        delivery: Delivery,
    },
    OptimisticRolledBack {
        conversation_id: ConversationId,
        temp_id: MessageId,
    },
    HistoryRequested {
        conversation_id: ConversationId,
    },
    ErrorCleared,
}

impl ChatEvent {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatEvent::MessageReceived(_) => "message-received",
            ChatEvent::MessageUpdated(_) => "message-updated",
            ChatEvent::MessageDeleted { .. } => "message-deleted",
            ChatEvent::ReactionAdded { .. } => "reaction-added",
            ChatEvent::ReactionRemoved { .. } => "reaction-removed",
            ChatEvent::TypingStarted(_) => "typing-start",
            ChatEvent::TypingStopped { .. } => "typing-stop",
            ChatEvent::HistoryLoaded { .. } => "history-loaded",
            ChatEvent::Error(_) => "error",
            ChatEvent::OptimisticAppended(_) => "optimistic-appended",
            ChatEvent::OptimisticDelivery { .. } => "optimistic-delivery",
            ChatEvent::OptimisticRolledBack { .. } => "optimistic-rolled-back",
            ChatEvent::HistoryRequested { .. } => "history-requested",
            ChatEvent::ErrorCleared => "error-cleared",
        }
    }
}

/// Apply `event` to `state`. `self_id` is the local user, needed to
/// reconcile server echoes with optimistic entries.
pub fn reduce(state: &ChatState, event: &ChatEvent, self_id: Option<&UserId>) -> ChatState {
    let mut next = state.clone();

    match event {
        ChatEvent::MessageReceived(msg) => {
            let conv = next.conversation_mut(&msg.conversation_id);
            receive_message(conv, msg, self_id);
        }

        ChatEvent::MessageUpdated(msg) => {
            if let Some(conv) = next.conversations.get_mut(&msg.conversation_id) {
                if let Some(pos) = conv.position(&msg.id) {
                    conv.messages[pos] = confirmed(msg);
                }
            }
        }

        ChatEvent::MessageDeleted {
            conversation_id,
            message_id,
        } => {
            if let Some(conv) = next.conversations.get_mut(conversation_id) {
                conv.messages.retain(|m| &m.id != message_id);
            }
        }

        ChatEvent::ReactionAdded {
            conversation_id,
            reaction,
        } => {
            if let Some(msg) = target_message(&mut next, conversation_id.as_ref(), &reaction.message_id) {
                msg.reactions
                    .retain(|r| !(r.user_id == reaction.user_id && r.emoji == reaction.emoji));
                msg.reactions.push(reaction.clone());
            }
        }

        ChatEvent::ReactionRemoved {
            conversation_id,
            reaction,
        } => {
            if let Some(msg) = target_message(&mut next, conversation_id.as_ref(), &reaction.message_id) {
                msg.reactions
                    .retain(|r| !(r.user_id == reaction.user_id && r.emoji == reaction.emoji));
            }
        }

        ChatEvent::TypingStarted(indicator) => {
            if self_id != Some(&indicator.user_id) {
                let conv = next.conversation_mut(&indicator.conversation_id);
                if !conv.typing.iter().any(|t| t.user_id == indicator.user_id) {
                    conv.typing.push(indicator.clone());
                }
            }
        }

        ChatEvent::TypingStopped {
            conversation_id,
            user_id,
        } => {
            if let Some(conv) = next.conversations.get_mut(conversation_id) {
                conv.typing.retain(|t| &t.user_id != user_id);
            }
        }

        ChatEvent::HistoryLoaded {
            conversation_id,
            messages,
            has_more,
        } => {
            let conv = next.conversation_mut(conversation_id);
            // A page may carry the confirmed copy of a pending send whose echo never arrived.
            for m in messages.iter().filter(|m| self_id == Some(&m.author_id)) {
                if let Some(pos) = find_optimistic_copy(conv, m) {
                    conv.messages.remove(pos);
                }
            }
            let mut older: Vec<Message> = Vec::with_capacity(messages.len() + conv.messages.len());
            for m in messages {
                let known = conv.messages.iter().chain(older.iter()).any(|e| e.id == m.id);
                if !known {
                    older.push(confirmed(m));
                }
            }
            older.append(&mut conv.messages);
            conv.messages = older;
            conv.has_more = *has_more;
            conv.is_loading = false;
        }

        ChatEvent::Error(text) => {
            next.error = Some(text.clone());
            for conv in next.conversations.values_mut() {
                conv.is_loading = false;
            }
        }

        ChatEvent::OptimisticAppended(msg) => {
            let conv = next.conversation_mut(&msg.conversation_id);
            if conv.position(&msg.id).is_none() {
                conv.messages.push(msg.clone());
            }
        }

        ChatEvent::OptimisticDelivery {
            conversation_id,
            temp_id,
            delivery,
        } => {
            if let Some(conv) = next.conversations.get_mut(conversation_id) {
                if let Some(pos) = conv.position(temp_id) {
                    if conv.messages[pos].is_optimistic() {
                        conv.messages[pos].delivery = *delivery;
                    }
                }
            }
        }

        ChatEvent::OptimisticRolledBack {
            conversation_id,
            temp_id,
        } => {
            if let Some(conv) = next.conversations.get_mut(conversation_id) {
                conv.messages.retain(|m| !(m.id == *temp_id && m.is_optimistic()));
            }
        }

        ChatEvent::HistoryRequested { conversation_id } => {
            next.conversation_mut(conversation_id).is_loading = true;
        }

        ChatEvent::ErrorCleared => {
            next.error = None;
        }
    }

    next
}

fn receive_message(conv: &mut ConversationChatState, msg: &Message, self_id: Option<&UserId>) {
    let optimistic = match self_id {
        Some(me) if *me == msg.author_id => find_optimistic_copy(conv, msg),
        _ => None,
    };
    let already_known = conv.position(&msg.id).is_some();

    match (optimistic, already_known) {
        (Some(pos), false) => conv.messages[pos] = confirmed(msg),
        // The confirmed copy arrived earlier (e.g. via history); drop the stale optimistic one.
        (Some(pos), true) => {
            conv.messages.remove(pos);
        }
        (None, false) => conv.messages.push(confirmed(msg)),
        (None, true) => {}
    }
}

/// Locate the optimistic entry an echo confirms: by correlation id when the
/// server round-trips it, otherwise by author and body.
fn find_optimistic_copy(conv: &ConversationChatState, echo: &Message) -> Option<usize> {
    conv.messages.iter().position(|m| {
        if !m.is_optimistic() || m.author_id != echo.author_id {
            return false;
        }
        match (&echo.client_message_id, &m.client_message_id) {
            (Some(echo_cid), Some(local_cid)) => echo_cid == local_cid,
            (Some(_), None) => false,
            (None, _) => m.content == echo.content,
        }
    })
}

fn target_message<'a>(
    state: &'a mut ChatState,
    conversation_id: Option<&ConversationId>,
    message_id: &MessageId,
) -> Option<&'a mut Message> {
    match conversation_id {
        Some(cid) => state
            .conversations
            .get_mut(cid)?
            .messages
            .iter_mut()
            .find(|m| &m.id == message_id),
        None => state
            .conversations
            .values_mut()
            .flat_map(|c| c.messages.iter_mut())
            .find(|m| &m.id == message_id),
    }
}

fn confirmed(msg: &Message) -> Message {
    let mut msg = msg.clone();
    msg.delivery = Delivery::Sent;
    msg
}
