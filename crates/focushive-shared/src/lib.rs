//! # focushive-shared
//!
//! Wire vocabulary shared by the FocusHive chat client crates: identifier
//! newtypes, the chat data model, named transport events and their JSON
//! payloads.

pub mod constants;
pub mod error;
pub mod model;
pub mod protocol;
pub mod types;

pub use error::ProtocolError;
pub use model::{AuthorSnapshot, Delivery, Message, MessageKind, Reaction, TypingIndicator};
pub use types::{ConversationId, MessageId, UserId};
