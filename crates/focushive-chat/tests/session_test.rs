use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use focushive_chat::{
    ChatConfig, ChatError, ChatIdentity, ChatSession, MemoryTransport, SendMessageRequest,
    SendOutcome, Transport,
};
use focushive_shared::protocol::{inbound, outbound};
use focushive_shared::{ConversationId, Delivery, MessageId, UserId};

const CONV: &str = "room-1";

fn identity() -> ChatIdentity {
    ChatIdentity::new("me", "Me")
}

fn conv() -> ConversationId {
    ConversationId::from(CONV)
}

fn session_on(transport: &Arc<MemoryTransport>) -> ChatSession<MemoryTransport> {
    ChatSession::new(Arc::clone(transport), Some(identity()), ChatConfig::default()).unwrap()
}

fn server_message(id: &str, author: &str, content: &str) -> serde_json::Value {
    json!({
        "id": id,
        "conversationId": CONV,
        "authorId": author,
        "author": { "id": author, "displayName": author },
        "content": content,
        "type": "text",
    })
}

/// Echo of the last `chat:send_message` emission, as the server would broadcast it.
fn echo_of_last_send(transport: &MemoryTransport, server_id: &str) -> serde_json::Value {
    let sends = transport.emitted_for(outbound::SEND_MESSAGE);
    let sent = &sends.last().unwrap().payload;
    let mut echo = server_message(server_id, "me", sent["content"].as_str().unwrap());
    echo["clientMessageId"] = sent["clientMessageId"].clone();
    echo
}

fn message_ids(session: &ChatSession<MemoryTransport>) -> Vec<String> {
    session
        .chat_state()
        .messages(&conv())
        .iter()
        .map(|m| m.id.to_string())
        .collect()
}

fn sent_contents(transport: &MemoryTransport) -> Vec<String> {
    transport
        .emitted_for(outbound::SEND_MESSAGE)
        .iter()
        .map(|e| e.payload["content"].as_str().unwrap().to_string())
        .collect()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

// ---------------------------------------------------------------------------
// Sending
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_echo_replaces_optimistic_copy_at_its_position() {
    let transport = Arc::new(MemoryTransport::new(true));
    let session = session_on(&transport);

    let outcome = session
        .send_message(SendMessageRequest::text(CONV, "hello"))
        .unwrap();
    assert!(matches!(outcome, SendOutcome::Sent { .. }));

    let state = session.chat_state();
    let optimistic = &state.messages(&conv())[0];
    assert_eq!(&optimistic.id, outcome.temp_id());
    assert!(optimistic.id.is_temporary());
    assert_eq!(optimistic.delivery, Delivery::Sending);

    transport.deliver(inbound::MESSAGE, server_message("m-other", "u2", "hi there"));
    transport.deliver(inbound::MESSAGE, echo_of_last_send(&transport, "m-1"));

    assert_eq!(message_ids(&session), vec!["m-1", "m-other"]);
    let state = session.chat_state();
    assert_eq!(state.messages(&conv())[0].delivery, Delivery::Sent);
}

#[tokio::test]
async fn test_repeated_echo_does_not_duplicate() {
    let transport = Arc::new(MemoryTransport::new(true));
    let session = session_on(&transport);

    session
        .send_message(SendMessageRequest::text(CONV, "once"))
        .unwrap();
    let echo = echo_of_last_send(&transport, "m-1");
    transport.deliver(inbound::MESSAGE, echo.clone());
    transport.deliver(inbound::MESSAGE, echo);

    assert_eq!(message_ids(&session), vec!["m-1"]);
}

#[tokio::test]
async fn test_send_without_identity_emits_nothing() {
    let transport = Arc::new(MemoryTransport::new(true));
    let session =
        ChatSession::new(Arc::clone(&transport), None, ChatConfig::default()).unwrap();

    let err = session
        .send_message(SendMessageRequest::text(CONV, "hello"))
        .unwrap_err();

    assert!(matches!(err, ChatError::MissingIdentity));
    assert!(transport.emitted().is_empty());
    assert!(session.chat_state().messages(&conv()).is_empty());
}

#[tokio::test]
async fn test_rejected_send_rolls_back_and_records_error() {
    let transport = Arc::new(MemoryTransport::new(true));
    transport.reject(outbound::SEND_MESSAGE, "muted");
    let session = session_on(&transport);

    let err = session
        .send_message(SendMessageRequest::text(CONV, "hello"))
        .unwrap_err();

    assert!(matches!(err, ChatError::Rejected(ref reason) if reason == "muted"));
    let state = session.chat_state();
    assert!(state.messages(&conv()).is_empty());
    assert!(state.error.as_deref().unwrap().contains("muted"));

    // The rolled-back body can be sent again.
    transport.clear_rejections();
    assert!(session
        .send_message(SendMessageRequest::text(CONV, "hello"))
        .is_ok());
}

#[tokio::test]
async fn test_identical_pending_message_is_refused() {
    let transport = Arc::new(MemoryTransport::new(true));
    let session = session_on(&transport);

    session
        .send_message(SendMessageRequest::text(CONV, "ping"))
        .unwrap();
    let err = session
        .send_message(SendMessageRequest::text(CONV, "ping"))
        .unwrap_err();

    assert!(matches!(err, ChatError::DuplicatePending));
    assert_eq!(session.chat_state().messages(&conv()).len(), 1);
    assert_eq!(transport.emitted_for(outbound::SEND_MESSAGE).len(), 1);

    // Once confirmed, the same body may be sent again.
    transport.deliver(inbound::MESSAGE, echo_of_last_send(&transport, "m-1"));
    assert!(session
        .send_message(SendMessageRequest::text(CONV, "ping"))
        .is_ok());
}

#[tokio::test]
async fn test_history_confirms_send_whose_echo_was_missed() {
    let transport = Arc::new(MemoryTransport::new(true));
    let session = session_on(&transport);

    session
        .send_message(SendMessageRequest::text(CONV, "hi"))
        .unwrap();
    let confirmed = echo_of_last_send(&transport, "srv-1");

    // The echo never arrives; the next history page carries the stored copy.
    transport.deliver(
        inbound::HISTORY,
        json!({
            "conversationId": CONV,
            "messages": [server_message("m-0", "u2", "earlier"), confirmed],
            "hasMore": false,
        }),
    );

    assert_eq!(message_ids(&session), vec!["m-0", "srv-1"]);
    assert!(session
        .chat_state()
        .messages(&conv())
        .iter()
        .all(|m| !m.is_optimistic()));
    assert!(session
        .send_message(SendMessageRequest::text(CONV, "hi"))
        .is_ok());
}

#[tokio::test]
async fn test_blank_message_is_invalid() {
    let transport = Arc::new(MemoryTransport::new(true));
    let session = session_on(&transport);

    let err = session
        .send_message(SendMessageRequest::text(CONV, "   "))
        .unwrap_err();
    assert!(matches!(err, ChatError::InvalidRequest(_)));
    assert!(transport.emitted().is_empty());
}

#[tokio::test]
async fn test_reply_reference_is_emitted() {
    let transport = Arc::new(MemoryTransport::new(true));
    let session = session_on(&transport);

    session
        .send_message(SendMessageRequest::text(CONV, "agreed").reply_to("m-9"))
        .unwrap();

    let sent = transport.emitted_for(outbound::SEND_MESSAGE);
    assert_eq!(sent[0].payload["replyToId"], "m-9");
    assert_eq!(sent[0].payload["userId"], "me");
}

// ---------------------------------------------------------------------------
// Offline queue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_offline_sends_are_flushed_once_in_order() {
    let transport = Arc::new(MemoryTransport::new(false));
    let session = session_on(&transport);

    let first = session
        .send_message(SendMessageRequest::text(CONV, "one"))
        .unwrap();
    let second = session
        .send_message(SendMessageRequest::text(CONV, "two"))
        .unwrap();
    assert!(first.is_queued() && second.is_queued());
    assert_eq!(session.queued_sends(), 2);

    let state = session.chat_state();
    assert!(state
        .messages(&conv())
        .iter()
        .all(|m| m.delivery == Delivery::Queued));
    assert!(state.error.is_some());
    assert!(transport.emitted().is_empty());

    transport.set_connected(true);
    assert!(session.refresh_connection());
    assert_eq!(sent_contents(&transport), vec!["one", "two"]);
    assert_eq!(session.queued_sends(), 0);
    assert!(session
        .chat_state()
        .messages(&conv())
        .iter()
        .all(|m| m.delivery == Delivery::Sending));

    // A second refresh (or reconnect) must not resend.
    session.refresh_connection();
    transport.set_connected(false);
    session.refresh_connection();
    transport.set_connected(true);
    session.refresh_connection();
    assert_eq!(sent_contents(&transport), vec!["one", "two"]);
}

#[tokio::test]
async fn test_connection_watcher_flushes_queue() {
    let transport = Arc::new(MemoryTransport::new(false));
    let session = Arc::new(session_on(&transport));
    let watcher = session.spawn_connection_watcher().unwrap();

    session
        .send_message(SendMessageRequest::text(CONV, "later"))
        .unwrap();
    assert_eq!(transport.handler_count(), 0);

    transport.set_connected(true);
    wait_until(|| transport.emitted_for(outbound::SEND_MESSAGE).len() == 1).await;
    assert_eq!(transport.handler_count(), inbound::ALL.len());

    transport.set_connected(false);
    wait_until(|| transport.handler_count() == 0).await;

    watcher.abort();
}

#[tokio::test]
async fn test_send_after_unobserved_reconnect_attaches_first() {
    let transport = Arc::new(MemoryTransport::new(true));
    let session = session_on(&transport);

    transport.set_connected(false);
    session.refresh_connection();
    session
        .send_message(SendMessageRequest::text(CONV, "queued"))
        .unwrap();
    assert_eq!(transport.handler_count(), 0);

    // Nobody calls refresh_connection after the link comes back.
    transport.set_connected(true);
    let outcome = session
        .send_message(SendMessageRequest::text(CONV, "now"))
        .unwrap();
    assert!(!outcome.is_queued());
    assert_eq!(transport.handler_count(), inbound::ALL.len());
    assert_eq!(sent_contents(&transport), vec!["queued", "now"]);

    let echoes: Vec<serde_json::Value> = transport
        .emitted_for(outbound::SEND_MESSAGE)
        .iter()
        .enumerate()
        .map(|(n, e)| {
            let content = e.payload["content"].as_str().unwrap();
            let mut echo = server_message(&format!("m-{n}"), "me", content);
            echo["clientMessageId"] = e.payload["clientMessageId"].clone();
            echo
        })
        .collect();
    for echo in echoes {
        transport.deliver(inbound::MESSAGE, echo);
    }

    assert_eq!(message_ids(&session), vec!["m-0", "m-1"]);
    assert_eq!(session.queued_sends(), 0);
}

#[tokio::test]
async fn test_outbox_capacity_is_enforced() {
    let transport = Arc::new(MemoryTransport::new(false));
    let config = ChatConfig {
        max_queued_sends: 1,
        ..ChatConfig::default()
    };
    let session = ChatSession::new(Arc::clone(&transport), Some(identity()), config).unwrap();

    session
        .send_message(SendMessageRequest::text(CONV, "a"))
        .unwrap();
    let err = session
        .send_message(SendMessageRequest::text(CONV, "b"))
        .unwrap_err();

    assert!(matches!(err, ChatError::OutboxFull { capacity: 1 }));
    assert!(err.is_connectivity());
    assert_eq!(session.chat_state().messages(&conv()).len(), 1);
}

// ---------------------------------------------------------------------------
// Edit / delete / reactions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_delete_while_disconnected_leaves_state_alone() {
    let transport = Arc::new(MemoryTransport::new(true));
    let session = session_on(&transport);
    transport.deliver(inbound::MESSAGE, server_message("m-1", "me", "keep me"));

    transport.set_connected(false);
    session.refresh_connection();
    let before = session.chat_state();

    let err = session.delete_message(&MessageId::from("m-1")).unwrap_err();

    assert!(matches!(err, ChatError::NotConnected));
    assert!(Arc::ptr_eq(&before, &session.chat_state()));
    assert!(transport.emitted_for(outbound::DELETE_MESSAGE).is_empty());
}

#[tokio::test]
async fn test_edit_and_delete_carry_conversation() {
    let transport = Arc::new(MemoryTransport::new(true));
    let session = session_on(&transport);
    transport.deliver(inbound::MESSAGE, server_message("m-1", "me", "typo"));

    session
        .edit_message(&MessageId::from("m-1"), "fixed")
        .unwrap();
    session.delete_message(&MessageId::from("m-1")).unwrap();

    let edit = &transport.emitted_for(outbound::EDIT_MESSAGE)[0].payload;
    assert_eq!(edit["content"], "fixed");
    assert_eq!(edit["conversationId"], CONV);
    let delete = &transport.emitted_for(outbound::DELETE_MESSAGE)[0].payload;
    assert_eq!(delete["messageId"], "m-1");

    // Nothing changes locally until the server broadcasts.
    assert_eq!(session.chat_state().messages(&conv())[0].content, "typo");

    let mut updated = server_message("m-1", "me", "fixed");
    updated["edited"] = json!(true);
    transport.deliver(inbound::MESSAGE_UPDATED, updated);
    assert!(session.chat_state().messages(&conv())[0].edited);

    transport.deliver(
        inbound::MESSAGE_DELETED,
        json!({ "messageId": "m-1", "conversationId": CONV }),
    );
    assert!(session.chat_state().messages(&conv()).is_empty());
}

#[tokio::test]
async fn test_actions_on_unconfirmed_message_are_refused() {
    let transport = Arc::new(MemoryTransport::new(true));
    let session = session_on(&transport);
    let outcome = session
        .send_message(SendMessageRequest::text(CONV, "pending"))
        .unwrap();

    let edit = session.edit_message(outcome.temp_id(), "changed");
    let react = session.add_reaction(outcome.temp_id(), "👍");

    assert!(matches!(edit, Err(ChatError::InvalidRequest(_))));
    assert!(matches!(react, Err(ChatError::InvalidRequest(_))));
    assert_eq!(transport.emitted().len(), 1);
}

#[tokio::test]
async fn test_rejected_reaction_is_recorded() {
    let transport = Arc::new(MemoryTransport::new(true));
    transport.reject(outbound::ADD_REACTION, "not a member");
    let session = session_on(&transport);
    transport.deliver(inbound::MESSAGE, server_message("m-1", "u2", "hi"));

    let err = session
        .add_reaction(&MessageId::from("m-1"), "🎉")
        .unwrap_err();

    assert!(matches!(err, ChatError::Rejected(_)));
    assert!(session.chat_state().error.is_some());

    session.clear_error();
    assert!(session.chat_state().error.is_none());
}

#[tokio::test]
async fn test_reaction_broadcasts_update_message() {
    let transport = Arc::new(MemoryTransport::new(true));
    let session = session_on(&transport);
    transport.deliver(inbound::MESSAGE, server_message("m-1", "u2", "hi"));

    session
        .add_reaction(&MessageId::from("m-1"), "👍")
        .unwrap();
    let reaction = json!({ "messageId": "m-1", "userId": "me", "emoji": "👍" });
    transport.deliver(inbound::REACTION_ADDED, reaction.clone());
    transport.deliver(inbound::REACTION_ADDED, reaction.clone());

    let state = session.chat_state();
    assert_eq!(state.messages(&conv())[0].reactions.len(), 1);

    transport.deliver(inbound::REACTION_REMOVED, reaction);
    assert!(session.chat_state().messages(&conv())[0].reactions.is_empty());
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_load_more_while_loading_emits_once() {
    let transport = Arc::new(MemoryTransport::new(true));
    let session = session_on(&transport);
    transport.deliver(inbound::MESSAGE, server_message("m-3", "u2", "newest"));

    assert!(session.load_more_messages(&conv()).unwrap());
    assert!(session.chat_state().is_loading(&conv()));
    assert!(!session.load_more_messages(&conv()).unwrap());

    let requests = transport.emitted_for(outbound::LOAD_HISTORY);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].payload["before"], "m-3");
    assert_eq!(requests[0].payload["limit"], 50);

    transport.deliver(
        inbound::HISTORY,
        json!({
            "conversationId": CONV,
            "messages": [
                server_message("m-1", "u2", "first"),
                server_message("m-2", "me", "second"),
            ],
            "hasMore": false,
        }),
    );

    let state = session.chat_state();
    assert!(!state.is_loading(&conv()));
    assert!(!state.has_more_messages(&conv()));
    assert_eq!(message_ids(&session), vec!["m-1", "m-2", "m-3"]);

    assert!(session.load_more_messages(&conv()).unwrap());
    let requests = transport.emitted_for(outbound::LOAD_HISTORY);
    assert_eq!(requests[1].payload["before"], "m-1");
}

#[tokio::test]
async fn test_load_more_while_disconnected_is_skipped() {
    let transport = Arc::new(MemoryTransport::new(false));
    let session = session_on(&transport);

    assert!(!session.load_more_messages(&conv()).unwrap());
    assert!(!session.chat_state().is_loading(&conv()));
}

#[tokio::test]
async fn test_server_error_ends_loading() {
    let transport = Arc::new(MemoryTransport::new(true));
    let session = session_on(&transport);

    session.load_more_messages(&conv()).unwrap();
    transport.deliver(inbound::ERROR, json!({ "error": "history unavailable" }));

    let state = session.chat_state();
    assert!(!state.is_loading(&conv()));
    assert_eq!(state.error.as_deref(), Some("history unavailable"));
}

// ---------------------------------------------------------------------------
// Typing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_typing_restart_resets_quiet_period() {
    let transport = Arc::new(MemoryTransport::new(true));
    let session = session_on(&transport);

    session.set_typing(&conv(), true).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    session.set_typing(&conv(), true).unwrap();
    assert_eq!(session.pending_typing_timers(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(transport.emitted_for(outbound::TYPING_STOP).is_empty());

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(transport.emitted_for(outbound::TYPING_START).len(), 2);
    assert_eq!(transport.emitted_for(outbound::TYPING_STOP).len(), 1);
    assert_eq!(session.pending_typing_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_stop_cancels_timer() {
    let transport = Arc::new(MemoryTransport::new(true));
    let session = session_on(&transport);

    session.set_typing(&conv(), true).unwrap();
    session.set_typing(&conv(), false).unwrap();
    assert_eq!(session.pending_typing_timers(), 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.emitted_for(outbound::TYPING_STOP).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_remote_typing_indicator_expires() {
    let transport = Arc::new(MemoryTransport::new(true));
    let session = session_on(&transport);

    let typing = json!({ "conversationId": CONV, "userId": "u2", "username": "Ada" });
    transport.deliver(inbound::TYPING_START, typing.clone());
    transport.deliver(inbound::TYPING_START, typing);
    transport.deliver(
        inbound::TYPING_START,
        json!({ "conversationId": CONV, "userId": "me" }),
    );

    let state = session.chat_state();
    assert_eq!(state.typing_users(&conv()), vec![&UserId::from("u2")]);

    tokio::time::sleep(Duration::from_millis(3_100)).await;
    assert!(session.chat_state().typing_users(&conv()).is_empty());
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_reconnect_does_not_duplicate_handlers() {
    let transport = Arc::new(MemoryTransport::new(true));
    let session = session_on(&transport);
    assert_eq!(transport.handler_count(), inbound::ALL.len());

    for _ in 0..3 {
        transport.set_connected(false);
        session.refresh_connection();
        assert_eq!(transport.handler_count(), 0);
        transport.set_connected(true);
        session.refresh_connection();
    }

    assert_eq!(transport.handler_count_for(inbound::MESSAGE), 1);
    assert_eq!(
        transport.deliver(inbound::MESSAGE, server_message("m-1", "u2", "hi")),
        1
    );
    assert_eq!(message_ids(&session), vec!["m-1"]);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_releases_handlers_and_timers() {
    let transport = Arc::new(MemoryTransport::new(true));
    let session = session_on(&transport);

    session.set_typing(&conv(), true).unwrap();
    transport.deliver(
        inbound::TYPING_START,
        json!({ "conversationId": CONV, "userId": "u2" }),
    );

    session.dispose();
    session.dispose();
    assert_eq!(transport.handler_count(), 0);
    assert_eq!(session.pending_typing_timers(), 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(transport.emitted_for(outbound::TYPING_STOP).is_empty());

    // Disposed sessions stay detached.
    session.refresh_connection();
    assert_eq!(transport.handler_count(), 0);
}

#[tokio::test]
async fn test_drop_releases_handlers() {
    let transport = Arc::new(MemoryTransport::new(true));
    {
        let _session = session_on(&transport);
        assert!(transport.handler_count() > 0);
    }
    assert_eq!(transport.handler_count(), 0);
}

#[tokio::test]
async fn test_malformed_inbound_payload_is_ignored() {
    let transport = Arc::new(MemoryTransport::new(true));
    let session = session_on(&transport);
    let before = session.chat_state();

    transport.deliver(inbound::MESSAGE, json!({ "content": "no id" }));

    assert!(Arc::ptr_eq(&before, &session.chat_state()));
}

#[tokio::test]
async fn test_subscribers_see_each_snapshot() {
    let transport = Arc::new(MemoryTransport::new(true));
    let session = session_on(&transport);
    let mut rx = session.subscribe();

    transport.deliver(inbound::MESSAGE, server_message("m-1", "u2", "hi"));

    assert!(rx.has_changed().unwrap());
    let seen = rx.borrow_and_update().clone();
    assert!(Arc::ptr_eq(&seen, &session.chat_state()));
}

#[tokio::test]
async fn test_mark_read_points_at_newest_confirmed() {
    let transport = Arc::new(MemoryTransport::new(true));
    let session = session_on(&transport);
    transport.deliver(inbound::MESSAGE, server_message("m-1", "u2", "hi"));
    session
        .send_message(SendMessageRequest::text(CONV, "pending"))
        .unwrap();

    session.mark_messages_as_read(&conv());

    let receipts = transport.emitted_for(outbound::MARK_READ);
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].payload["upTo"], "m-1");
    assert!(transport.is_connected());
}

#[test]
fn test_session_requires_runtime() {
    let transport = Arc::new(MemoryTransport::new(true));
    let result = ChatSession::new(transport, Some(identity()), ChatConfig::default());
    assert!(matches!(result, Err(ChatError::NoRuntime)));
}
