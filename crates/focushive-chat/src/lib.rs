//! # focushive-chat
//!
//! Real-time chat dispatch for the FocusHive client.
//!
//! A [`ChatSession`] owns the canonical [`ChatState`] for every conversation
//! the user has touched. Local actions (send, edit, react, typing, ...) are
//! turned into transport emissions plus optimistic state changes, and events
//! pushed by the server are folded into the state by the reducers in
//! [`reducer`]. The transport itself is injected through the [`Transport`]
//! trait so the whole layer runs against [`MemoryTransport`] in tests.

pub mod config;
pub mod error;
pub mod outbox;
pub mod reducer;
pub mod router;
pub mod session;
pub mod state;
pub mod store;
pub mod transport;
pub mod typing;

pub use config::ChatConfig;
pub use error::{ChatError, TransportError};
pub use reducer::ChatEvent;
pub use session::{ChatIdentity, ChatSession, SendMessageRequest, SendOutcome};
pub use state::{ChatState, ConversationChatState};
pub use store::ChatStore;
pub use transport::memory::{Emission, MemoryTransport};
pub use transport::{EventHandler, Subscription, Transport};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
