//! # focushive-sim
//!
//! Runs a FocusHive chat session against an in-process loopback server.
//!
//! The script walks the client through the flows a hive member hits in a
//! normal session:
//! - paging in history from a seeded backlog
//! - sending, editing, reacting and deleting with server echoes
//! - typing signals with the automatic stop
//! - losing the connection, queueing sends, and flushing on reconnect

mod config;
mod server;

use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use focushive_chat::{
    ChatConfig, ChatIdentity, ChatSession, ChatState, MemoryTransport, SendMessageRequest,
};
use focushive_shared::ConversationId;

use crate::config::SimConfig;
use crate::server::LoopbackServer;

const OTHER_MEMBERS: [(&str, &str); 2] = [("ada", "Ada"), ("grace", "Grace")];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Tracing (respects RUST_LOG)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,focushive_chat=debug")),
        )
        .init();

    info!("Starting FocusHive chat simulator v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Configuration
    // -----------------------------------------------------------------------
    let sim = SimConfig::from_env();
    let chat_config = ChatConfig::from_env();
    info!(?sim, ?chat_config, "Loaded configuration");

    let conversation = ConversationId::from(sim.conversation_id.as_str());

    // -----------------------------------------------------------------------
    // 3. Transport and loopback server
    // -----------------------------------------------------------------------
    let transport = Arc::new(MemoryTransport::new(true));
    let outbound = transport
        .take_outbound()
        .context("outbound channel already taken")?;

    let mut server = LoopbackServer::new(Arc::clone(&transport));
    server.register(&sim.user_id, &sim.display_name);
    for (id, name) in OTHER_MEMBERS {
        server.register(id, name);
    }
    let speakers: Vec<&str> = OTHER_MEMBERS.iter().map(|(id, _)| *id).collect();
    server.seed_backlog(&conversation, sim.backlog, &speakers);
    let server = server.spawn(outbound);

    // -----------------------------------------------------------------------
    // 4. Chat session
    // -----------------------------------------------------------------------
    let identity = ChatIdentity::new(sim.user_id.as_str(), sim.display_name.as_str());
    let session = Arc::new(ChatSession::new(
        Arc::clone(&transport),
        Some(identity),
        chat_config,
    )?);
    let watcher = session
        .spawn_connection_watcher()
        .context("transport does not report connection changes")?;
    let mut states = session.subscribe();

    // -----------------------------------------------------------------------
    // 5. Script
    // -----------------------------------------------------------------------
    let script = Script {
        session: &session,
        transport: &transport,
        conversation: &conversation,
        config: &sim,
    };
    let outcome = script.run(&mut states).await;

    // -----------------------------------------------------------------------
    // 6. Shutdown
    // -----------------------------------------------------------------------
    session.dispose();
    watcher.abort();
    server.shutdown().await;

    outcome?;
    info!("Simulation finished");
    Ok(())
}

struct Script<'a> {
    session: &'a ChatSession<MemoryTransport>,
    transport: &'a MemoryTransport,
    conversation: &'a ConversationId,
    config: &'a SimConfig,
}

impl Script<'_> {
    async fn run(&self, states: &mut watch::Receiver<Arc<ChatState>>) -> anyhow::Result<()> {
        let conv = self.conversation;

        // History: page until the backlog is exhausted.
        let mut pages = 0;
        while self.session.chat_state().has_more_messages(conv) {
            if !self.session.load_more_messages(conv)? {
                bail!("history request was not issued");
            }
            self.settle(states, "history page", |s| !s.is_loading(conv)).await?;
            pages += 1;
        }
        info!(
            pages,
            messages = self.session.chat_state().messages(conv).len(),
            "History loaded"
        );

        // Typing then send; the echo replaces the optimistic copy.
        self.session.set_typing(conv, true)?;
        let outcome = self
            .session
            .send_message(SendMessageRequest::text(conv.clone(), "Starting a 25 minute focus block"))?;
        let temp_id = outcome.temp_id().clone();
        self.settle(states, "send echo", |s| {
            s.conversation(conv).is_some_and(|c| c.get(&temp_id).is_none())
        })
        .await?;
        self.session.set_typing(conv, false)?;

        let mine = self.newest_own_message()?;
        info!(id = %mine, "Message confirmed");

        // Edit and react.
        self.session.edit_message(&mine, "Starting a 50 minute focus block")?;
        self.settle(states, "edit broadcast", |s| {
            s.find_message(&mine).is_some_and(|m| m.edited)
        })
        .await?;

        self.session.add_reaction(&mine, "🔥")?;
        self.settle(states, "reaction broadcast", |s| {
            s.find_message(&mine).is_some_and(|m| !m.reactions.is_empty())
        })
        .await?;

        // Offline: sends queue up and go out in order on reconnect.
        self.transport.set_connected(false);
        let queued = ["Break in 5", "Anyone up for a second block?"];
        for text in queued {
            let outcome = self
                .session
                .send_message(SendMessageRequest::text(conv.clone(), text))?;
            info!(temp_id = %outcome.temp_id(), queued = outcome.is_queued(), "Sent while offline");
        }
        info!(queued = self.session.queued_sends(), "Outbox filled");

        self.transport.set_connected(true);
        self.settle(states, "outbox flush", |s| {
            s.messages(conv).iter().all(|m| !m.is_optimistic())
        })
        .await?;
        self.session.clear_error();

        // Delete and acknowledge.
        self.session.delete_message(&mine)?;
        self.settle(states, "delete broadcast", |s| s.find_message(&mine).is_none())
            .await?;
        self.session.mark_messages_as_read(conv);

        let state = self.session.chat_state();
        info!(
            messages = state.messages(conv).len(),
            has_more = state.has_more_messages(conv),
            emitted = self.transport.emitted().len(),
            "Final state"
        );
        Ok(())
    }

    fn newest_own_message(&self) -> anyhow::Result<focushive_shared::MessageId> {
        let me = self.config.user_id.as_str();
        self.session
            .chat_state()
            .messages(self.conversation)
            .iter()
            .rev()
            .find(|m| m.author_id.as_str() == me && !m.is_optimistic())
            .map(|m| m.id.clone())
            .context("no confirmed message from this user")
    }

    /// Wait until the published state satisfies `done`.
    async fn settle(
        &self,
        states: &mut watch::Receiver<Arc<ChatState>>,
        step: &str,
        done: impl Fn(&ChatState) -> bool,
    ) -> anyhow::Result<()> {
        let wait = states.wait_for(|s| done(&**s));
        match tokio::time::timeout(self.config.step_timeout, wait).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => bail!("state channel closed during {step}"),
            Err(_) => bail!("timed out waiting for {step}"),
        }
    }
}
