use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::model::{Message, MessageKind};
use crate::types::{ConversationId, MessageId, UserId};

/// Events pushed by the server and folded into local chat state.
pub mod inbound {
    pub const MESSAGE: &str = "chat:message";
    pub const MESSAGE_UPDATED: &str = "chat:message_updated";
    pub const MESSAGE_DELETED: &str = "chat:message_deleted";
    pub const REACTION_ADDED: &str = "chat:reaction_added";
    pub const REACTION_REMOVED: &str = "chat:reaction_removed";
    pub const TYPING_START: &str = "chat:typing_start";
    pub const TYPING_STOP: &str = "chat:typing_stop";
    pub const HISTORY: &str = "chat:history";
    pub const ERROR: &str = "chat:error";

    pub const ALL: [&str; 9] = [
        MESSAGE,
        MESSAGE_UPDATED,
        MESSAGE_DELETED,
        REACTION_ADDED,
        REACTION_REMOVED,
        TYPING_START,
        TYPING_STOP,
        HISTORY,
        ERROR,
    ];
}

/// Events emitted by the client.
pub mod outbound {
    pub const SEND_MESSAGE: &str = "chat:send_message";
    pub const EDIT_MESSAGE: &str = "chat:edit_message";
    pub const DELETE_MESSAGE: &str = "chat:delete_message";
    pub const ADD_REACTION: &str = "chat:add_reaction";
    pub const REMOVE_REACTION: &str = "chat:remove_reaction";
    pub const TYPING_START: &str = "chat:typing_start";
    pub const TYPING_STOP: &str = "chat:typing_stop";
    pub const LOAD_HISTORY: &str = "chat:load_history";
    pub const MARK_READ: &str = "chat:mark_read";
}

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeletedPayload {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
}

/// Reaction add/remove broadcast. The conversation is optional on the wire;
/// when absent the target message is looked up across all conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionPayload {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPayload {
    pub conversation_id: ConversationId,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub has_more: bool,
}

/// Server-side error notification. Older backends send `error` instead of `message`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ErrorPayload {
    pub fn text(&self) -> String {
        self.message
            .clone()
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| "Unknown chat error".to_string())
    }
}

// ---------------------------------------------------------------------------
// Outbound payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
    pub client_message_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EditMessagePayload {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessagePayload {
    pub message_id: MessageId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
}

/// Used for both the start and stop signals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignalPayload {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadHistoryPayload {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<MessageId>,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadPayload {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up_to: Option<MessageId>,
}

/// Decode a JSON payload received for `event`.
pub fn decode<T: DeserializeOwned>(event: &str, payload: serde_json::Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|source| ProtocolError::Decode {
        event: event.to_string(),
        source,
    })
}

/// Encode a payload to be emitted as `event`.
pub fn encode<T: Serialize>(event: &str, payload: &T) -> Result<serde_json::Value, ProtocolError> {
    serde_json::to_value(payload).map_err(|source| ProtocolError::Encode {
        event: event.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reaction_payload_without_conversation() {
        let payload: ReactionPayload = decode(
            inbound::REACTION_ADDED,
            serde_json::json!({ "messageId": "m1", "userId": "u2", "emoji": "🔥" }),
        )
        .unwrap();

        assert_eq!(payload.message_id, MessageId::from("m1"));
        assert!(payload.conversation_id.is_none());
    }

    #[test]
    fn test_malformed_payload_names_the_event() {
        let err = decode::<HistoryPayload>(inbound::HISTORY, serde_json::json!({ "messages": 3 }))
            .unwrap_err();
        assert!(err.to_string().contains("chat:history"));
    }

    #[test]
    fn test_error_payload_fallbacks() {
        let legacy: ErrorPayload =
            decode(inbound::ERROR, serde_json::json!({ "error": "rate limited" })).unwrap();
        assert_eq!(legacy.text(), "rate limited");
        assert_eq!(ErrorPayload::default().text(), "Unknown chat error");
    }

    #[test]
    fn test_send_payload_uses_wire_field_names() {
        let payload = SendMessagePayload {
            conversation_id: ConversationId::from("c1"),
            user_id: UserId::from("u1"),
            content: "hello".into(),
            kind: MessageKind::Text,
            reply_to_id: None,
            client_message_id: "corr-1".into(),
        };

        let value = encode(outbound::SEND_MESSAGE, &payload).unwrap();
        assert_eq!(value["conversationId"], "c1");
        assert_eq!(value["clientMessageId"], "corr-1");
        assert_eq!(value["type"], "text");
        assert!(value.get("replyToId").is_none());
    }

    #[test]
    fn test_inbound_event_names_are_unique() {
        let mut names = inbound::ALL.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), inbound::ALL.len());
    }
}
