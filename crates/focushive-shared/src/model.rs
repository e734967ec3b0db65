//! Chat data model as it travels over the real-time transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, MessageId, UserId};

/// Display snapshot of the author taken when the message was created.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorSnapshot {
    pub id: UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    /// Also covers backend announcements such as `join` and `leave`.
    #[serde(other)]
    System,
}

/// Local delivery state of a message. Never sent over the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Delivery {
    /// Optimistic copy, emission in flight.
    Sending,
    /// Optimistic copy held in the outbox until the transport reconnects.
    Queued,
    /// Confirmed by the server.
    #[default]
    Sent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub author_id: UserId,
    #[serde(default)]
    pub author: AuthorSnapshot,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    /// Correlation id generated by the sender and echoed back by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
    #[serde(skip)]
    pub delivery: Delivery,
}

impl Message {
    /// Whether this entry is a locally created copy awaiting its server echo.
    pub fn is_optimistic(&self) -> bool {
        self.delivery != Delivery::Sent && self.id.is_temporary()
    }
}

/// A remote participant currently typing in a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingIndicator {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub started_at: DateTime<Utc>,
}
