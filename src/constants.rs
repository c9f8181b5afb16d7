//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Centralized configuration constants for Ratewarden.
//!
//! All magic numbers are defined here with their purpose and usage context.

// ============================================================================
// Rate Limiter Constants
// ============================================================================

/// Default token bucket capacity (100 tokens).
pub const DEFAULT_TOKEN_BUCKET_CAPACITY: u64 = 100;

/// Default tokens added per refill period.
pub const DEFAULT_TOKEN_BUCKET_REFILL_RATE: f64 = 10.0;

/// Default refill period (1 second).
pub const DEFAULT_REFILL_PERIOD_SECS: u64 = 1;

// ============================================================================
// Distributed Store Constants
// ============================================================================

/// Key namespace used by the distributed sliding window.
pub const DEFAULT_DISTRIBUTED_KEY_PREFIX: &str = "rate_limit:";

/// Upper bound on a single store round-trip before the failure policy applies.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 250;

/// Maximum retry attempts for transient store failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Initial delay for exponential backoff (100 milliseconds).
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum Redis key length accepted by the store.
pub const MAX_STORE_KEY_LENGTH: usize = 1024;

// ============================================================================
// Tiered Quota Constants
// ============================================================================

/// Tier applied to credentials that were never registered.
pub const DEFAULT_TIER: &str = "free";

/// Refill period shared by the built-in tiers (1 hour).
pub const TIER_REFILL_PERIOD_SECS: u64 = 3600;

/// Maximum API key length (512 characters).
pub const MAX_API_KEY_LENGTH: usize = 512;

// ============================================================================
// Messaging Guard Constants
// ============================================================================

/// Default per-client message rate (messages per second).
pub const DEFAULT_MESSAGE_RATE_LIMIT: u64 = 1000;

/// Default global open-connection cap.
pub const DEFAULT_GLOBAL_CONNECTION_LIMIT: usize = 100;

/// Default per-client open-connection cap.
///
/// Legitimate clients have no reason to open more parallel sockets than this.
pub const DEFAULT_PER_CLIENT_CONNECTION_LIMIT: usize = 10;

/// Default ban duration for messaging violations (1 hour).
pub const DEFAULT_BAN_DURATION_SECS: u64 = 3600;

/// Trailing interval used for pattern analysis (1 minute).
pub const DEFAULT_PATTERN_WINDOW_SECS: u64 = 60;

/// Maximum timestamps retained per client for pattern analysis.
pub const DEFAULT_PATTERN_LOG_CAPACITY: usize = 1000;

/// Minimum samples before pattern analysis runs.
pub const DEFAULT_PATTERN_MIN_SAMPLES: usize = 100;

/// Trailing-window count above `multiplier × capacity` is treated as abuse.
pub const DEFAULT_SUSPICIOUS_MULTIPLIER: u64 = 2;

/// Background sweep interval (1 minute).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Pattern-log entries older than this are dropped by the sweep (5 minutes).
pub const DEFAULT_STALE_LOG_AGE_SECS: u64 = 300;

// ============================================================================
// Topic Throttle Constants
// ============================================================================

/// Default maximum topics one client may subscribe to.
pub const DEFAULT_TOPICS_PER_CLIENT: usize = 10;

/// Default publish rate per topic (messages per second).
pub const DEFAULT_MESSAGES_PER_TOPIC: u64 = 100;

// ============================================================================
// Time Conversion Constants
// ============================================================================

/// Seconds per minute.
pub const SECONDS_PER_MINUTE: u64 = 60;

/// Seconds per hour.
pub const SECONDS_PER_HOUR: u64 = 3600;

/// Seconds per day.
pub const SECONDS_PER_DAY: u64 = 86400;
