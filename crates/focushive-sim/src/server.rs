//! Loopback stand-in for the FocusHive chat backend.
//!
//! Reads every emission the client makes on the in-memory transport and
//! answers it the way the real server broadcasts: sends are echoed with a
//! server id and the client's correlation id, edits and deletes come back as
//! update/delete events, and history requests are answered page by page
//! from a seeded backlog.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use focushive_chat::{Emission, MemoryTransport};
use focushive_shared::protocol::{
    self, inbound, outbound, DeleteMessagePayload, EditMessagePayload, ErrorPayload,
    HistoryPayload, LoadHistoryPayload, MarkReadPayload, MessageDeletedPayload, ReactionPayload,
    SendMessagePayload,
};
use focushive_shared::{
    AuthorSnapshot, ConversationId, Message, MessageId, MessageKind, Reaction, UserId,
};

/// Handle used to stop the loopback task.
pub struct ServerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "Loopback server task failed");
        }
    }
}

pub struct LoopbackServer {
    transport: Arc<MemoryTransport>,
    participants: HashMap<UserId, AuthorSnapshot>,
    /// Stored messages per conversation, oldest first.
    rooms: HashMap<ConversationId, Vec<Message>>,
    next_id: u64,
}

impl LoopbackServer {
    pub fn new(transport: Arc<MemoryTransport>) -> Self {
        Self {
            transport,
            participants: HashMap::new(),
            rooms: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn register(&mut self, user_id: &str, display_name: &str) {
        let id = UserId::from(user_id);
        self.participants.insert(
            id.clone(),
            AuthorSnapshot {
                id,
                display_name: display_name.to_string(),
                avatar_url: None,
            },
        );
    }

    /// Fill a conversation with `count` messages from the other participants,
    /// one minute apart, ending now.
    pub fn seed_backlog(&mut self, conversation_id: &ConversationId, count: usize, speakers: &[&str]) {
        if speakers.is_empty() {
            return;
        }
        let start = Utc::now() - ChronoDuration::minutes(count as i64);
        for i in 0..count {
            let author = UserId::from(speakers[i % speakers.len()]);
            let at = start + ChronoDuration::minutes(i as i64);
            let mut msg = self.new_message(conversation_id, &author, format!("Backlog message #{}", i + 1));
            msg.created_at = at;
            msg.updated_at = at;
            self.rooms.entry(conversation_id.clone()).or_default().push(msg);
        }
        info!(conversation = %conversation_id, count, "Seeded backlog");
    }

    /// Run the server until `ServerHandle::shutdown` or the outbound channel closes.
    pub fn spawn(mut self, mut outbound_rx: mpsc::UnboundedReceiver<Emission>) -> ServerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    emission = outbound_rx.recv() => {
                        match emission {
                            Some(emission) => self.handle(emission),
                            None => {
                                info!("Outbound channel closed, stopping loopback server");
                                break;
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("Loopback server shutdown requested");
                        break;
                    }
                }
            }
        });

        ServerHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    fn handle(&mut self, emission: Emission) {
        let Emission { event, payload } = emission;
        let result = match event.as_str() {
            outbound::SEND_MESSAGE => protocol::decode(&event, payload).map(|p| self.on_send(p)),
            outbound::EDIT_MESSAGE => protocol::decode(&event, payload).map(|p| self.on_edit(p)),
            outbound::DELETE_MESSAGE => protocol::decode(&event, payload).map(|p| self.on_delete(p)),
            outbound::ADD_REACTION => {
                protocol::decode(&event, payload).map(|p| self.on_reaction(inbound::REACTION_ADDED, p))
            }
            outbound::REMOVE_REACTION => {
                protocol::decode(&event, payload).map(|p| self.on_reaction(inbound::REACTION_REMOVED, p))
            }
            outbound::LOAD_HISTORY => protocol::decode(&event, payload).map(|p| self.on_history(p)),
            outbound::MARK_READ => protocol::decode::<MarkReadPayload>(&event, payload).map(|p| {
                debug!(conversation = %p.conversation_id, up_to = ?p.up_to, "Read receipt");
            }),
            // Typing signals are only relayed to the other participants.
            outbound::TYPING_START | outbound::TYPING_STOP => {
                debug!(event = %event, "Typing signal relayed");
                Ok(())
            }
            other => {
                debug!(event = other, "Unhandled emission");
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!(event = %event, error = %e, "Malformed emission");
            self.broadcast(
                inbound::ERROR,
                &ErrorPayload {
                    message: Some(format!("Malformed {event} request")),
                    error: None,
                },
            );
        }
    }

    fn on_send(&mut self, p: SendMessagePayload) {
        let mut msg = self.new_message(&p.conversation_id, &p.user_id, p.content);
        msg.kind = p.kind;
        msg.reply_to_id = p.reply_to_id;
        msg.client_message_id = Some(p.client_message_id);

        debug!(conversation = %msg.conversation_id, id = %msg.id, "Stored message");
        self.rooms
            .entry(msg.conversation_id.clone())
            .or_default()
            .push(msg.clone());
        self.broadcast(inbound::MESSAGE, &msg);
    }

    fn on_edit(&mut self, p: EditMessagePayload) {
        let Some(msg) = self.find_mut(&p.message_id) else {
            self.reject(format!("Message {} not found", p.message_id));
            return;
        };
        if msg.author_id != p.user_id {
            self.reject("Only the author can edit a message".to_string());
            return;
        }

        msg.content = p.content;
        msg.edited = true;
        msg.updated_at = Utc::now();
        let updated = msg.clone();
        self.broadcast(inbound::MESSAGE_UPDATED, &updated);
    }

    fn on_delete(&mut self, p: DeleteMessagePayload) {
        let located = self.rooms.iter().find_map(|(cid, list)| {
            list.iter()
                .position(|m| m.id == p.message_id)
                .map(|pos| (cid.clone(), pos))
        });
        let Some((conversation_id, pos)) = located else {
            self.reject(format!("Message {} not found", p.message_id));
            return;
        };

        if let Some(list) = self.rooms.get_mut(&conversation_id) {
            list.remove(pos);
        }
        self.broadcast(
            inbound::MESSAGE_DELETED,
            &MessageDeletedPayload {
                message_id: p.message_id,
                conversation_id,
            },
        );
    }

    fn on_reaction(&mut self, event: &str, mut p: ReactionPayload) {
        let Some(msg) = self.find_mut(&p.message_id) else {
            self.reject(format!("Message {} not found", p.message_id));
            return;
        };

        if event == inbound::REACTION_ADDED {
            if !msg.reactions.iter().any(|r| r.user_id == p.user_id && r.emoji == p.emoji) {
                msg.reactions.push(Reaction {
                    message_id: p.message_id.clone(),
                    user_id: p.user_id.clone(),
                    emoji: p.emoji.clone(),
                });
            }
        } else {
            msg.reactions
                .retain(|r| !(r.user_id == p.user_id && r.emoji == p.emoji));
        }

        p.conversation_id = Some(msg.conversation_id.clone());
        self.broadcast(event, &p);
    }

    fn on_history(&mut self, p: LoadHistoryPayload) {
        let list = self.rooms.get(&p.conversation_id).map(Vec::as_slice).unwrap_or(&[]);
        let end = match &p.before {
            Some(cursor) => list.iter().position(|m| &m.id == cursor).unwrap_or(list.len()),
            None => list.len(),
        };
        let limit = p.limit as usize;
        let start = end.saturating_sub(limit);

        let page = HistoryPayload {
            conversation_id: p.conversation_id.clone(),
            messages: list[start..end].to_vec(),
            has_more: start > 0,
        };
        debug!(
            conversation = %p.conversation_id,
            returned = page.messages.len(),
            has_more = page.has_more,
            "Serving history page"
        );
        self.broadcast(inbound::HISTORY, &page);
    }

    fn new_message(&mut self, conversation_id: &ConversationId, author_id: &UserId, content: String) -> Message {
        let id = MessageId(format!("msg-{:06}", self.next_id));
        self.next_id += 1;
        let now = Utc::now();
        let author = self.participants.get(author_id).cloned().unwrap_or_else(|| AuthorSnapshot {
            id: author_id.clone(),
            display_name: author_id.to_string(),
            avatar_url: None,
        });

        Message {
            id,
            conversation_id: conversation_id.clone(),
            author_id: author_id.clone(),
            author,
            content,
            kind: MessageKind::Text,
            reply_to_id: None,
            reactions: Vec::new(),
            edited: false,
            deleted: false,
            created_at: now,
            updated_at: now,
            client_message_id: None,
            delivery: Default::default(),
        }
    }

    fn find_mut(&mut self, message_id: &MessageId) -> Option<&mut Message> {
        self.rooms
            .values_mut()
            .flat_map(|list| list.iter_mut())
            .find(|m| &m.id == message_id)
    }

    fn reject(&self, reason: String) {
        warn!(reason = %reason, "Rejecting request");
        self.broadcast(
            inbound::ERROR,
            &ErrorPayload {
                message: Some(reason),
                error: None,
            },
        );
    }

    fn broadcast<P: Serialize>(&self, event: &str, payload: &P) {
        let value = match protocol::encode(event, payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(event, error = %e, "Failed to encode broadcast");
                return;
            }
        };
        let delivered = self.transport.deliver(event, value);
        if delivered == 0 {
            debug!(event, "Broadcast had no listeners");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use focushive_chat::Transport;

    #[test]
    fn test_history_pages_walk_backwards() {
        let transport = Arc::new(MemoryTransport::new(true));
        let conv = ConversationId::from("c1");
        let mut server = LoopbackServer::new(Arc::clone(&transport));
        server.seed_backlog(&conv, 5, &["ada"]);

        let pages = Arc::new(std::sync::Mutex::new(Vec::<HistoryPayload>::new()));
        let sink = Arc::clone(&pages);
        let _sub = transport.on(
            inbound::HISTORY,
            Box::new(move |payload| {
                sink.lock().unwrap().push(serde_json::from_value(payload).unwrap());
            }),
        );

        server.on_history(LoadHistoryPayload {
            conversation_id: conv.clone(),
            user_id: UserId::from("me"),
            before: None,
            limit: 3,
        });
        let first_oldest = pages.lock().unwrap()[0].messages[0].id.clone();
        server.on_history(LoadHistoryPayload {
            conversation_id: conv.clone(),
            user_id: UserId::from("me"),
            before: Some(first_oldest),
            limit: 3,
        });

        let pages = pages.lock().unwrap();
        assert_eq!(pages[0].messages.len(), 3);
        assert!(pages[0].has_more);
        assert_eq!(pages[1].messages.len(), 2);
        assert!(!pages[1].has_more);
    }

    #[test]
    fn test_send_is_echoed_with_correlation_id() {
        let transport = Arc::new(MemoryTransport::new(true));
        let mut server = LoopbackServer::new(Arc::clone(&transport));
        server.register("me", "Me");

        let echoes = Arc::new(std::sync::Mutex::new(Vec::<Message>::new()));
        let sink = Arc::clone(&echoes);
        let _sub = transport.on(
            inbound::MESSAGE,
            Box::new(move |payload| {
                sink.lock().unwrap().push(serde_json::from_value(payload).unwrap());
            }),
        );

        server.on_send(SendMessagePayload {
            conversation_id: ConversationId::from("c1"),
            user_id: UserId::from("me"),
            content: "hello".into(),
            kind: MessageKind::Text,
            reply_to_id: None,
            client_message_id: "corr-1".into(),
        });

        let echoes = echoes.lock().unwrap();
        assert_eq!(echoes.len(), 1);
        assert_eq!(echoes[0].client_message_id.as_deref(), Some("corr-1"));
        assert_eq!(echoes[0].author.display_name, "Me");
        assert!(!echoes[0].id.is_temporary());
    }

    #[test]
    fn test_edit_by_other_user_is_rejected() {
        let transport = Arc::new(MemoryTransport::new(true));
        let conv = ConversationId::from("c1");
        let mut server = LoopbackServer::new(Arc::clone(&transport));
        server.seed_backlog(&conv, 1, &["ada"]);

        let errors = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&errors);
        let _sub = transport.on(
            inbound::ERROR,
            Box::new(move |payload| {
                let p: ErrorPayload = serde_json::from_value(payload).unwrap();
                sink.lock().unwrap().push(p.text());
            }),
        );

        server.on_edit(EditMessagePayload {
            message_id: MessageId::from("msg-000001"),
            user_id: UserId::from("mallory"),
            content: "hijacked".into(),
            conversation_id: Some(conv),
        });

        assert_eq!(errors.lock().unwrap().len(), 1);
    }
}
