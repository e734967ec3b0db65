//! UI-observable chat state.
//!
//! A [`ChatState`] is an immutable snapshot: the store replaces it wholesale
//! on every effective transition, so consumers may detect changes by pointer
//! identity of the `Arc` they hold.

use std::collections::HashMap;

use focushive_shared::{ConversationId, Message, MessageId, TypingIndicator, UserId};

/// Per-conversation slice of the chat state.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationChatState {
    /// Conversation order; older history pages are prepended.
    pub messages: Vec<Message>,
    /// Remote users currently typing, at most one entry per user.
    pub typing: Vec<TypingIndicator>,
    pub has_more: bool,
    pub is_loading: bool,
}

impl Default for ConversationChatState {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            typing: Vec::new(),
            // Unknown until the first history page says otherwise.
            has_more: true,
            is_loading: false,
        }
    }
}

impl ConversationChatState {
    pub fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.id == id)
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Oldest message the server knows about, used as the history cursor.
    pub fn oldest_confirmed(&self) -> Option<&Message> {
        self.messages.iter().find(|m| !m.id.is_temporary())
    }

    /// Newest message the server knows about.
    pub fn newest_confirmed(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| !m.id.is_temporary())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    pub conversations: HashMap<ConversationId, ConversationChatState>,
    /// Last reported error, for banner/toast display.
    pub error: Option<String>,
}

impl ChatState {
    pub fn conversation(&self, id: &ConversationId) -> Option<&ConversationChatState> {
        self.conversations.get(id)
    }

    /// Messages of a conversation; empty if it has never been referenced.
    pub fn messages(&self, id: &ConversationId) -> &[Message] {
        self.conversations
            .get(id)
            .map(|c| c.messages.as_slice())
            .unwrap_or(&[])
    }

    pub fn typing_users(&self, id: &ConversationId) -> Vec<&UserId> {
        self.conversations
            .get(id)
            .map(|c| c.typing.iter().map(|t| &t.user_id).collect())
            .unwrap_or_default()
    }

    pub fn has_more_messages(&self, id: &ConversationId) -> bool {
        self.conversations.get(id).map_or(true, |c| c.has_more)
    }

    pub fn is_loading(&self, id: &ConversationId) -> bool {
        self.conversations.get(id).map_or(false, |c| c.is_loading)
    }

    /// Find a message and the conversation holding it.
    pub fn find_message(&self, id: &MessageId) -> Option<&Message> {
        self.conversations.values().find_map(|c| c.get(id))
    }

    pub(crate) fn conversation_mut(&mut self, id: &ConversationId) -> &mut ConversationChatState {
        self.conversations.entry(id.clone()).or_default()
    }
}
