//! Chat session configuration loaded from environment variables.
//!
//! Every setting has a default matching the server's expectations, so a
//! session works with zero configuration.

use std::str::FromStr;
use std::time::Duration;

use focushive_shared::constants::{
    HISTORY_PAGE_SIZE, MAX_QUEUED_SENDS, TYPING_EXPIRY_MS, TYPING_QUIET_PERIOD_MS,
};

/// Chat session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Quiet period after which an outgoing typing signal is stopped.
    /// Env: `FOCUSHIVE_TYPING_QUIET_MS`
    /// Default: 3000 ms
    pub typing_quiet_period: Duration,

    /// How long a remote typing indicator lives without a refresh.
    /// Env: `FOCUSHIVE_TYPING_EXPIRY_MS`
    /// Default: 3000 ms
    pub typing_expiry: Duration,

    /// Messages requested per history page.
    /// Env: `FOCUSHIVE_HISTORY_PAGE_SIZE`
    /// Default: 50
    pub history_page_size: u32,

    /// Sends held while disconnected before new sends fail.
    /// Env: `FOCUSHIVE_MAX_QUEUED_SENDS`
    /// Default: 100
    pub max_queued_sends: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            typing_quiet_period: Duration::from_millis(TYPING_QUIET_PERIOD_MS),
            typing_expiry: Duration::from_millis(TYPING_EXPIRY_MS),
            history_page_size: HISTORY_PAGE_SIZE,
            max_queued_sends: MAX_QUEUED_SENDS,
        }
    }
}

impl ChatConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64>(&lookup, "FOCUSHIVE_TYPING_QUIET_MS") {
            config.typing_quiet_period = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var::<u64>(&lookup, "FOCUSHIVE_TYPING_EXPIRY_MS") {
            config.typing_expiry = Duration::from_millis(ms);
        }

        if let Some(size) = parse_var::<u32>(&lookup, "FOCUSHIVE_HISTORY_PAGE_SIZE") {
            if size == 0 {
                tracing::warn!("FOCUSHIVE_HISTORY_PAGE_SIZE must be positive, using default");
            } else {
                config.history_page_size = size;
            }
        }

        if let Some(n) = parse_var::<usize>(&lookup, "FOCUSHIVE_MAX_QUEUED_SENDS") {
            config.max_queued_sends = n;
        }

        config
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ChatConfig::default();
        assert_eq!(config.typing_quiet_period, Duration::from_secs(3));
        assert_eq!(config.history_page_size, 50);
    }

    #[test]
    fn test_overrides() {
        let config = ChatConfig::from_lookup(lookup_from(&[
            ("FOCUSHIVE_TYPING_QUIET_MS", "1500"),
            ("FOCUSHIVE_HISTORY_PAGE_SIZE", "20"),
            ("FOCUSHIVE_MAX_QUEUED_SENDS", "5"),
        ]));

        assert_eq!(config.typing_quiet_period, Duration::from_millis(1500));
        assert_eq!(config.typing_expiry, Duration::from_secs(3));
        assert_eq!(config.history_page_size, 20);
        assert_eq!(config.max_queued_sends, 5);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ChatConfig::from_lookup(lookup_from(&[
            ("FOCUSHIVE_TYPING_EXPIRY_MS", "soon"),
            ("FOCUSHIVE_HISTORY_PAGE_SIZE", "0"),
        ]));

        assert_eq!(config, ChatConfig::default());
    }
}
