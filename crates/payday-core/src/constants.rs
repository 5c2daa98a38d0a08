//! Policy constants
//!
//! Every limit, duration and threshold the engine enforces has a named default
//! here. `EngineConfig` starts from these values and may override any of them.

/// Minimum lifetime earnings (in cents) before any withdrawal is allowed.
pub const MIN_WITHDRAW_EARNED_CENTS: i64 = 1000 * 100;

/// Rolling quota window, measured from the last reset rather than midnight.
pub const RESET_WINDOW_SECS: u64 = 24 * 60 * 60;

// Daily limits
pub const DAILY_LIMIT_LIKE: u32 = 20;
pub const DAILY_LIMIT_INSPECTOR: u32 = 10;
pub const DAILY_LIMIT_WHEEL: u32 = 3;

// Cooldowns started when a quota is exhausted
pub const COOLDOWN_LIKE_SECS: u64 = 6 * 60 * 60;
pub const COOLDOWN_INSPECTOR_SECS: u64 = 6 * 60 * 60;
pub const COOLDOWN_WHEEL_SECS: u64 = 24 * 60 * 60;

// Reward ranges in cents (inclusive)
pub const REWARD_LIKE_CENTS: (i64, i64) = (50, 150);
pub const REWARD_INSPECTOR_CENTS: (i64, i64) = (100, 300);
pub const REWARD_WHEEL_CENTS: (i64, i64) = (100, 5000);

/// Hard deadline for the startup session resolution.
pub const BOOTSTRAP_DEADLINE_MS: u64 = 4000;

/// Shorter deadline used when an identity-change notification re-runs resolution.
pub const LISTENER_DEADLINE_MS: u64 = 1500;

/// How often the periodic reset check runs.
pub const RESET_CHECK_INTERVAL_SECS: u64 = 60;

/// Default directory for the local cache file.
pub const DEFAULT_DATA_DIR: &str = "payday_data";

// Local cache
pub mod cache {
    /// Prefix for every key the engine writes.
    pub const NAMESPACE: &str = "payday";
    /// File holding the key-value map inside the data directory.
    pub const FILE_NAME: &str = "payday_cache.json";
    /// Bump when the shape of any cached value changes; older files are discarded.
    pub const SCHEMA_VERSION: u32 = 1;

    pub const IDENTITY_KEY: &str = "identity";
    pub const PROGRESS_KEY: &str = "progress";
    pub const TRANSACTIONS_KEY: &str = "transactions";
}
