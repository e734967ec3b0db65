use serde::{Deserialize, Serialize};

use crate::constants::TEMP_ID_PREFIX;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// A hive chat room or direct conversation.
    ConversationId
);

string_id!(
    /// Server-issued message id, or a `temp_` id before acknowledgement.
    MessageId
);

string_id!(
    /// Account id of a chat participant.
    UserId
);

impl MessageId {
    /// Whether this id was generated locally for an unacknowledged message.
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_ids() {
        assert!(MessageId::from("temp_1700000000000_abc123xyz").is_temporary());
        assert!(!MessageId::from("m-42").is_temporary());
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let json = serde_json::to_string(&ConversationId::from("hive-7")).unwrap();
        assert_eq!(json, "\"hive-7\"");

        let back: UserId = serde_json::from_str("\"u1\"").unwrap();
        assert_eq!(back, UserId::from("u1"));
    }

    #[test]
    fn test_blank_id_is_empty() {
        assert!(UserId::from("   ").is_empty());
        assert!(!UserId::from("u1").is_empty());
    }

    #[test]
    fn test_default_id_is_empty() {
        assert!(UserId::default().is_empty());
        assert_eq!(crate::AuthorSnapshot::default().id, UserId::default());
    }
}
