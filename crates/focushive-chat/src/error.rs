use thiserror::Error;

use focushive_shared::ProtocolError;

/// Failure reported by a [`Transport`](crate::Transport) emission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport is not connected")]
    NotConnected,

    #[error("Transport rejected the emission: {0}")]
    Rejected(String),
}

/// Errors surfaced by the public chat actions.
#[derive(Error, Debug)]
pub enum ChatError {
    /// No author identity is available; nothing was emitted.
    #[error("No user identity available for chat actions")]
    MissingIdentity,

    /// The transport is down.
    #[error("Not connected to the chat server")]
    NotConnected,

    /// The transport was up but refused the emission.
    #[error("Chat server rejected the request: {0}")]
    Rejected(String),

    #[error("Invalid chat request: {0}")]
    InvalidRequest(String),

    /// An identical message is still waiting for its server echo.
    ///
    /// Returned even though each send carries its own correlation id: a
    /// conversation holds at most one unconfirmed copy of a given body, so
    /// repeating a short reply ("+1") must wait for the first echo.
    #[error("An identical message is already pending in this conversation")]
    DuplicatePending,

    #[error("Outbox is full ({capacity} queued sends)")]
    OutboxFull { capacity: usize },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Chat session requires a running tokio runtime")]
    NoRuntime,
}

impl ChatError {
    /// Whether the failure is caused by missing connectivity, as opposed to a
    /// rejection by a reachable server. UIs offer "retry when online" for the
    /// former and surface the latter as a hard failure.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ChatError::NotConnected | ChatError::OutboxFull { .. })
    }
}

impl From<TransportError> for ChatError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::NotConnected => ChatError::NotConnected,
            TransportError::Rejected(reason) => ChatError::Rejected(reason),
        }
    }
}
