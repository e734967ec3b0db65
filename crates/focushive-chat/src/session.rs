//! Public chat actions.
//!
//! [`ChatSession`] is the single owner of chat state for one signed-in user.
//! It turns caller intents into transport emissions plus optimistic local
//! transitions, keeps the dispatch router in step with the transport's
//! connected state, and owns every timer it starts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use focushive_shared::protocol::{
    self, outbound, DeleteMessagePayload, EditMessagePayload, LoadHistoryPayload,
    MarkReadPayload, ReactionPayload, SendMessagePayload, TypingSignalPayload,
};
use focushive_shared::{
    AuthorSnapshot, ConversationId, Delivery, Message, MessageId, MessageKind, UserId,
};

use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::lock;
use crate::outbox::{correlation_id, temp_message_id, OptimisticBuffer, PendingSend};
use crate::reducer::ChatEvent;
use crate::router::DispatchRouter;
use crate::state::ChatState;
use crate::store::ChatStore;
use crate::transport::Transport;
use crate::typing::{TimerSet, TypingKey};

const QUEUED_NOTICE: &str = "Not connected; message queued for delivery";

/// The signed-in user chat actions are performed as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatIdentity {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl ChatIdentity {
    pub fn new(user_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            avatar_url: None,
        }
    }

    fn snapshot(&self) -> AuthorSnapshot {
        AuthorSnapshot {
            id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessageRequest {
    pub conversation_id: ConversationId,
    pub content: String,
    pub kind: MessageKind,
    pub reply_to_id: Option<MessageId>,
}

impl SendMessageRequest {
    pub fn text(conversation_id: impl Into<ConversationId>, content: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            content: content.into(),
            kind: MessageKind::Text,
            reply_to_id: None,
        }
    }

    pub fn reply_to(mut self, message_id: impl Into<MessageId>) -> Self {
        self.reply_to_id = Some(message_id.into());
        self
    }
}

/// How a send was handled. Permanent failures are returned as `Err` after
/// the optimistic copy has been rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Emitted; the optimistic copy waits for its server echo.
    Sent { temp_id: MessageId },
    /// Transport down; the optimistic copy stays visible and the send is
    /// emitted once the connection returns.
    Queued { temp_id: MessageId },
}

impl SendOutcome {
    pub fn temp_id(&self) -> &MessageId {
        match self {
            SendOutcome::Sent { temp_id } | SendOutcome::Queued { temp_id } => temp_id,
        }
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, SendOutcome::Queued { .. })
    }
}

/// State shared between the public actions, the inbound handlers and the
/// typing-expiry timers.
pub(crate) struct SessionCore {
    pub(crate) store: ChatStore,
    pub(crate) buffer: OptimisticBuffer,
    typing_expiry: TimerSet<TypingKey>,
    typing_expiry_after: Duration,
}

impl SessionCore {
    /// Fold one inbound transition into the store.
    pub(crate) fn apply_inbound(&mut self, event: ChatEvent, this: &Weak<Mutex<SessionCore>>) {
        match &event {
            ChatEvent::TypingStarted(indicator) if self.store.self_id() != Some(&indicator.user_id) => {
                let key: TypingKey = (indicator.conversation_id.clone(), indicator.user_id.clone());
                let expired = key.clone();
                let core = this.clone();
                self.typing_expiry.arm(key, self.typing_expiry_after, move || {
                    if let Some(core) = core.upgrade() {
                        let (conversation_id, user_id) = expired;
                        debug!(conversation = %conversation_id, user = %user_id, "Typing indicator expired");
                        lock(&core).store.dispatch(ChatEvent::TypingStopped {
                            conversation_id,
                            user_id,
                        });
                    }
                });
            }
            ChatEvent::TypingStopped {
                conversation_id,
                user_id,
            } => {
                self.typing_expiry
                    .cancel(&(conversation_id.clone(), user_id.clone()));
            }
            ChatEvent::Error(text) => {
                warn!(error = %text, "Chat server reported an error");
            }
            _ => {}
        }

        let reconciles = matches!(
            event,
            ChatEvent::MessageReceived(_) | ChatEvent::HistoryLoaded { .. }
        );
        self.store.dispatch(event);
        if reconciles {
            let snapshot = self.store.snapshot();
            self.buffer.prune(&snapshot);
        }
    }

    fn roll_back(&mut self, send: &PendingSend) {
        self.buffer.forget(send.conversation_id(), &send.temp_id);
        self.store.dispatch(ChatEvent::OptimisticRolledBack {
            conversation_id: send.conversation_id().clone(),
            temp_id: send.temp_id.clone(),
        });
    }

    fn mark(&mut self, send: &PendingSend, delivery: Delivery) {
        self.store.dispatch(ChatEvent::OptimisticDelivery {
            conversation_id: send.conversation_id().clone(),
            temp_id: send.temp_id.clone(),
            delivery,
        });
    }
}

pub struct ChatSession<T: Transport> {
    transport: Arc<T>,
    identity: Option<ChatIdentity>,
    config: ChatConfig,
    core: Arc<Mutex<SessionCore>>,
    router: Mutex<DispatchRouter>,
    typing: Mutex<TimerSet<ConversationId>>,
    disposed: AtomicBool,
}

impl<T: Transport> ChatSession<T> {
    /// Create a session and, if the transport is already up, attach the
    /// inbound handlers. Must be called from within a tokio runtime.
    pub fn new(
        transport: Arc<T>,
        identity: Option<ChatIdentity>,
        config: ChatConfig,
    ) -> Result<Self, ChatError> {
        let runtime = Handle::try_current().map_err(|_| ChatError::NoRuntime)?;
        let self_id = identity
            .as_ref()
            .map(|i| i.user_id.clone())
            .filter(|id| !id.is_empty());

        let core = SessionCore {
            store: ChatStore::new(self_id),
            buffer: OptimisticBuffer::new(config.max_queued_sends),
            typing_expiry: TimerSet::new(runtime.clone()),
            typing_expiry_after: config.typing_expiry,
        };

        let session = Self {
            transport,
            identity,
            config,
            core: Arc::new(Mutex::new(core)),
            router: Mutex::new(DispatchRouter::new()),
            typing: Mutex::new(TimerSet::new(runtime)),
            disposed: AtomicBool::new(false),
        };
        session.refresh_connection();
        Ok(session)
    }

    // -----------------------------------------------------------------------
    // Read side
    // -----------------------------------------------------------------------

    /// Current immutable snapshot.
    pub fn chat_state(&self) -> Arc<ChatState> {
        lock(&self.core).store.snapshot()
    }

    /// Receiver notified with every new snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ChatState>> {
        lock(&self.core).store.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn queued_sends(&self) -> usize {
        lock(&self.core).buffer.queued_len()
    }

    /// Outgoing typing timers that have not fired yet.
    pub fn pending_typing_timers(&self) -> usize {
        lock(&self.typing).pending_count()
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Bring the handler set in line with the transport's connected state.
    ///
    /// On a disconnected -> connected edge the handlers are attached and the
    /// offline queue is flushed, in submission order, before any inbound
    /// event can be applied. Returns the connected state.
    pub fn refresh_connection(&self) -> bool {
        let connected = self.transport.is_connected();
        if self.disposed.load(Ordering::SeqCst) {
            return connected;
        }

        let mut router = lock(&self.router);
        if connected {
            // Inbound handlers block on the core lock until the flush is done.
            let mut core = lock(&self.core);
            let reattached = !router.is_attached();
            if reattached {
                router.attach(self.transport.as_ref(), &self.core);
            }
            // A quick drop and reconnect may be observed as a single change.
            let flushed = self.flush_locked(&mut core);
            if reattached {
                info!(flushed, "Chat transport connected");
            }
        } else if router.is_attached() {
            router.detach();
            info!("Chat transport disconnected");
        }
        connected
    }

    /// Follow the transport's connection changes in a background task.
    /// Returns `None` when the transport cannot report them.
    pub fn spawn_connection_watcher(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut changes = self.transport.connection_changes()?;
        let session = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            if let Some(s) = session.upgrade() {
                s.refresh_connection();
            }
            while changes.changed().await.is_ok() {
                let Some(s) = session.upgrade() else {
                    break;
                };
                s.refresh_connection();
            }
            debug!("Connection watcher stopped");
        }))
    }

    /// Cancel every timer and release every transport handler. Idempotent;
    /// also runs on drop.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        lock(&self.typing).cancel_all();
        lock(&self.router).detach();
        lock(&self.core).typing_expiry.cancel_all();
        info!("Chat session disposed");
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    /// Send a message with an optimistic local copy.
    ///
    /// Any error is also recorded into `chat_state().error`.
    pub fn send_message(&self, request: SendMessageRequest) -> Result<SendOutcome, ChatError> {
        let result = self.try_send(request);
        if let Err(e) = &result {
            warn!(error = %e, "Send failed");
            lock(&self.core).store.dispatch(ChatEvent::Error(e.to_string()));
        }
        result
    }

    pub fn edit_message(&self, message_id: &MessageId, content: &str) -> Result<(), ChatError> {
        let author = self.author()?;
        if content.trim().is_empty() {
            return Err(ChatError::InvalidRequest("message content is empty".into()));
        }
        let conversation_id = self.confirmed_conversation_of(message_id)?;
        self.require_connection()?;

        let payload = EditMessagePayload {
            message_id: message_id.clone(),
            user_id: author.user_id.clone(),
            content: content.to_string(),
            conversation_id,
        };
        self.emit_recorded(outbound::EDIT_MESSAGE, &payload)
    }

    pub fn delete_message(&self, message_id: &MessageId) -> Result<(), ChatError> {
        let author = self.author()?;
        let conversation_id = self.confirmed_conversation_of(message_id)?;
        self.require_connection()?;

        let payload = DeleteMessagePayload {
            message_id: message_id.clone(),
            user_id: author.user_id.clone(),
            conversation_id,
        };
        self.emit_recorded(outbound::DELETE_MESSAGE, &payload)
    }

    pub fn add_reaction(&self, message_id: &MessageId, emoji: &str) -> Result<(), ChatError> {
        self.react(outbound::ADD_REACTION, message_id, emoji)
    }

    pub fn remove_reaction(&self, message_id: &MessageId, emoji: &str) -> Result<(), ChatError> {
        self.react(outbound::REMOVE_REACTION, message_id, emoji)
    }

    /// Request the page of history preceding the oldest held message.
    /// Returns `Ok(false)` without emitting when a page is already loading
    /// or the transport is down.
    pub fn load_more_messages(&self, conversation_id: &ConversationId) -> Result<bool, ChatError> {
        let author = self.author()?;
        if !self.transport.is_connected() {
            debug!(conversation = %conversation_id, "Skipping history load while disconnected");
            return Ok(false);
        }

        let mut core = lock(&self.core);
        let snapshot = core.store.snapshot();
        if snapshot.is_loading(conversation_id) {
            debug!(conversation = %conversation_id, "History page already loading");
            return Ok(false);
        }

        let before = snapshot
            .conversation(conversation_id)
            .and_then(|c| c.oldest_confirmed())
            .map(|m| m.id.clone());

        core.store.dispatch(ChatEvent::HistoryRequested {
            conversation_id: conversation_id.clone(),
        });

        let payload = LoadHistoryPayload {
            conversation_id: conversation_id.clone(),
            user_id: author.user_id.clone(),
            before,
            limit: self.config.history_page_size,
        };
        match emit(self.transport.as_ref(), outbound::LOAD_HISTORY, &payload) {
            Ok(()) => {
                debug!(conversation = %conversation_id, "Requested history page");
                Ok(true)
            }
            Err(e) => {
                core.store.dispatch(ChatEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Debounced typing signal. `true` emits a start and (re)arms the
    /// auto-stop timer; `false` emits a stop immediately.
    pub fn set_typing(&self, conversation_id: &ConversationId, is_typing: bool) -> Result<(), ChatError> {
        let author = self.author()?;
        let mut typing = lock(&self.typing);
        typing.cancel(conversation_id);

        if self.disposed.load(Ordering::SeqCst) {
            return Ok(());
        }
        if !self.transport.is_connected() {
            debug!(conversation = %conversation_id, "Typing signal skipped while disconnected");
            return Ok(());
        }

        let payload = TypingSignalPayload {
            conversation_id: conversation_id.clone(),
            user_id: author.user_id.clone(),
            username: Some(author.display_name.clone()),
        };

        if !is_typing {
            return emit(self.transport.as_ref(), outbound::TYPING_STOP, &payload);
        }

        emit(self.transport.as_ref(), outbound::TYPING_START, &payload)?;

        let transport = Arc::clone(&self.transport);
        typing.arm(
            conversation_id.clone(),
            self.config.typing_quiet_period,
            move || {
                if let Err(e) = emit(transport.as_ref(), outbound::TYPING_STOP, &payload) {
                    debug!(error = %e, "Automatic typing stop not delivered");
                }
            },
        );
        Ok(())
    }

    /// Fire-and-forget read receipt up to the newest confirmed message.
    pub fn mark_messages_as_read(&self, conversation_id: &ConversationId) {
        let Ok(author) = self.author() else {
            debug!("Read receipt skipped: no identity");
            return;
        };
        if !self.transport.is_connected() {
            debug!(conversation = %conversation_id, "Read receipt skipped while disconnected");
            return;
        }

        let up_to = self
            .chat_state()
            .conversation(conversation_id)
            .and_then(|c| c.newest_confirmed())
            .map(|m| m.id.clone());

        let payload = MarkReadPayload {
            conversation_id: conversation_id.clone(),
            user_id: author.user_id.clone(),
            up_to,
        };
        if let Err(e) = emit(self.transport.as_ref(), outbound::MARK_READ, &payload) {
            warn!(conversation = %conversation_id, error = %e, "Read receipt not delivered");
        }
    }

    /// Dismiss the shared error.
    pub fn clear_error(&self) {
        lock(&self.core).store.dispatch(ChatEvent::ErrorCleared);
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn author(&self) -> Result<&ChatIdentity, ChatError> {
        self.identity
            .as_ref()
            .filter(|i| !i.user_id.is_empty())
            .ok_or(ChatError::MissingIdentity)
    }

    fn require_connection(&self) -> Result<(), ChatError> {
        if self.transport.is_connected() {
            Ok(())
        } else {
            Err(ChatError::NotConnected)
        }
    }

    /// Conversation of a message the server already knows about. Unknown
    /// messages are passed through without a conversation; optimistic ones
    /// are refused since the server has no id for them yet.
    fn confirmed_conversation_of(&self, message_id: &MessageId) -> Result<Option<ConversationId>, ChatError> {
        if message_id.is_temporary() {
            return Err(ChatError::InvalidRequest(format!(
                "message {message_id} is not confirmed yet"
            )));
        }
        Ok(self
            .chat_state()
            .find_message(message_id)
            .map(|m| m.conversation_id.clone()))
    }

    fn react(&self, event: &'static str, message_id: &MessageId, emoji: &str) -> Result<(), ChatError> {
        let author = self.author()?;
        if emoji.trim().is_empty() {
            return Err(ChatError::InvalidRequest("emoji is empty".into()));
        }
        let conversation_id = self.confirmed_conversation_of(message_id)?;
        self.require_connection()?;

        let payload = ReactionPayload {
            message_id: message_id.clone(),
            user_id: author.user_id.clone(),
            emoji: emoji.to_string(),
            conversation_id,
        };
        self.emit_recorded(event, &payload)
    }

    /// Emit without retry, recording failures into the shared error.
    fn emit_recorded<P: Serialize>(&self, event: &str, payload: &P) -> Result<(), ChatError> {
        emit(self.transport.as_ref(), event, payload).map_err(|e| {
            warn!(event, error = %e, "Chat action failed");
            lock(&self.core).store.dispatch(ChatEvent::Error(e.to_string()));
            e
        })
    }

    fn try_send(&self, request: SendMessageRequest) -> Result<SendOutcome, ChatError> {
        let author = self.author()?;
        if request.conversation_id.is_empty() {
            return Err(ChatError::InvalidRequest("conversation id is empty".into()));
        }
        if request.content.trim().is_empty() {
            return Err(ChatError::InvalidRequest("message content is empty".into()));
        }

        let temp_id = temp_message_id();
        let client_message_id = correlation_id();
        let now = Utc::now();

        let optimistic = Message {
            id: temp_id.clone(),
            conversation_id: request.conversation_id.clone(),
            author_id: author.user_id.clone(),
            author: author.snapshot(),
            content: request.content.clone(),
            kind: request.kind,
            reply_to_id: request.reply_to_id.clone(),
            reactions: Vec::new(),
            edited: false,
            deleted: false,
            created_at: now,
            updated_at: now,
            client_message_id: Some(client_message_id.clone()),
            delivery: Delivery::Sending,
        };
        let send = PendingSend {
            temp_id: temp_id.clone(),
            payload: SendMessagePayload {
                conversation_id: request.conversation_id,
                user_id: author.user_id.clone(),
                content: request.content,
                kind: request.kind,
                reply_to_id: request.reply_to_id,
                client_message_id,
            },
        };

        // Handlers must be listening before anything goes out, or the echo is lost.
        let detached = !lock(&self.router).is_attached();
        if detached && self.transport.is_connected() {
            self.refresh_connection();
        }

        let mut core = lock(&self.core);
        if core
            .buffer
            .has_duplicate(send.conversation_id(), &send.payload.content)
        {
            return Err(ChatError::DuplicatePending);
        }

        // Earlier queued sends go out first.
        let connected = self.transport.is_connected();
        if connected && core.buffer.queued_len() > 0 {
            self.flush_locked(&mut core);
        }
        if !connected || core.buffer.queued_len() > 0 {
            return self.queue_locked(&mut core, optimistic, send);
        }

        core.buffer.track(send.clone());
        core.store.dispatch(ChatEvent::OptimisticAppended(optimistic));

        match emit(self.transport.as_ref(), outbound::SEND_MESSAGE, &send.payload) {
            Ok(()) => {
                debug!(temp_id = %temp_id, conversation = %send.conversation_id(), "Message emitted");
                Ok(SendOutcome::Sent { temp_id })
            }
            Err(ChatError::NotConnected) => {
                // Dropped between the connected check and the emission.
                if core.buffer.enqueue(temp_id.clone()).is_err() {
                    core.roll_back(&send);
                    return Err(ChatError::OutboxFull {
                        capacity: self.config.max_queued_sends,
                    });
                }
                core.mark(&send, Delivery::Queued);
                core.store.dispatch(ChatEvent::Error(QUEUED_NOTICE.to_string()));
                info!(temp_id = %temp_id, "Transport dropped during send, message queued");
                Ok(SendOutcome::Queued { temp_id })
            }
            Err(e) => {
                core.roll_back(&send);
                Err(e)
            }
        }
    }

    fn queue_locked(
        &self,
        core: &mut SessionCore,
        mut optimistic: Message,
        send: PendingSend,
    ) -> Result<SendOutcome, ChatError> {
        if !core.buffer.can_enqueue() {
            return Err(ChatError::OutboxFull {
                capacity: self.config.max_queued_sends,
            });
        }

        let temp_id = send.temp_id.clone();
        core.buffer.track(send);
        core.buffer.enqueue(temp_id.clone())?;
        optimistic.delivery = Delivery::Queued;
        core.store.dispatch(ChatEvent::OptimisticAppended(optimistic));
        core.store.dispatch(ChatEvent::Error(QUEUED_NOTICE.to_string()));

        info!(
            temp_id = %temp_id,
            queued = core.buffer.queued_len(),
            "Not connected, message queued"
        );
        Ok(SendOutcome::Queued { temp_id })
    }

    /// Emit every queued send once, oldest first. Stops and re-queues the
    /// remainder if the transport drops again mid-flush. Returns how many
    /// sends went out.
    fn flush_locked(&self, core: &mut SessionCore) -> usize {
        let queued = core.buffer.take_queue();
        if queued.is_empty() {
            return 0;
        }

        let mut sent = 0;
        for (i, send) in queued.iter().enumerate() {
            core.mark(send, Delivery::Sending);
            match emit(self.transport.as_ref(), outbound::SEND_MESSAGE, &send.payload) {
                Ok(()) => sent += 1,
                Err(ChatError::NotConnected) => {
                    let rest = &queued[i..];
                    for pending in rest {
                        core.mark(pending, Delivery::Queued);
                    }
                    core.buffer.requeue_front(rest);
                    warn!(remaining = rest.len(), "Transport dropped during flush");
                    break;
                }
                Err(e) => {
                    warn!(temp_id = %send.temp_id, error = %e, "Queued message rejected");
                    core.roll_back(send);
                    core.store.dispatch(ChatEvent::Error(e.to_string()));
                }
            }
        }

        debug!(sent, total = queued.len(), "Flushed outbox");
        sent
    }
}

impl<T: Transport> Drop for ChatSession<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn emit<T: Transport + ?Sized, P: Serialize>(
    transport: &T,
    event: &str,
    payload: &P,
) -> Result<(), ChatError> {
    let value = protocol::encode(event, payload)?;
    transport.emit(event, value)?;
    Ok(())
}
