/// Prefix of locally generated ids for messages the server has not acknowledged yet
pub const TEMP_ID_PREFIX: &str = "temp_";

/// Quiet period after which an outgoing "typing" signal is automatically stopped
pub const TYPING_QUIET_PERIOD_MS: u64 = 3_000;

/// Lifetime of a remote typing indicator that is not refreshed
pub const TYPING_EXPIRY_MS: u64 = 3_000;

/// Number of older messages requested per history page
pub const HISTORY_PAGE_SIZE: u32 = 50;

/// Maximum number of sends held while the transport is down
pub const MAX_QUEUED_SENDS: usize = 100;

/// Length of the random suffix of a temporary message id
pub const TEMP_ID_RANDOM_LEN: usize = 9;
