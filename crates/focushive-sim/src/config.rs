//! Simulator configuration loaded from environment variables.
//!
//! Chat tuning (typing timers, page size, outbox bound) is read separately
//! by `ChatConfig::from_env`.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Account the simulated client signs in as.
    /// Env: `FOCUSHIVE_SIM_USER`
    /// Default: `sim-user`
    pub user_id: String,

    /// Env: `FOCUSHIVE_SIM_NAME`
    /// Default: `Sim User`
    pub display_name: String,

    /// Hive conversation the script talks in.
    /// Env: `FOCUSHIVE_SIM_CONVERSATION`
    /// Default: `hive-lobby`
    pub conversation_id: String,

    /// Number of messages the loopback server holds before the client joins.
    /// Env: `FOCUSHIVE_SIM_BACKLOG`
    /// Default: `120`
    pub backlog: usize,

    /// How long each scripted step may wait for the state to settle.
    /// Env: `FOCUSHIVE_SIM_STEP_TIMEOUT_MS`
    /// Default: `2000`
    pub step_timeout: Duration,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            user_id: "sim-user".to_string(),
            display_name: "Sim User".to_string(),
            conversation_id: "hive-lobby".to_string(),
            backlog: 120,
            step_timeout: Duration::from_millis(2_000),
        }
    }
}

impl SimConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(user) = std::env::var("FOCUSHIVE_SIM_USER") {
            if !user.trim().is_empty() {
                config.user_id = user;
            }
        }

        if let Ok(name) = std::env::var("FOCUSHIVE_SIM_NAME") {
            config.display_name = name;
        }

        if let Ok(conversation) = std::env::var("FOCUSHIVE_SIM_CONVERSATION") {
            if !conversation.trim().is_empty() {
                config.conversation_id = conversation;
            }
        }

        if let Ok(val) = std::env::var("FOCUSHIVE_SIM_BACKLOG") {
            match val.parse::<usize>() {
                Ok(n) => config.backlog = n,
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid FOCUSHIVE_SIM_BACKLOG, using default");
                }
            }
        }

        if let Ok(val) = std::env::var("FOCUSHIVE_SIM_STEP_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => config.step_timeout = Duration::from_millis(ms),
                _ => {
                    tracing::warn!(
                        value = %val,
                        "Invalid FOCUSHIVE_SIM_STEP_TIMEOUT_MS, using default"
                    );
                }
            }
        }

        config
    }
}
