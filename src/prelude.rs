//! Prelude module - Commonly used types for quick imports
//!
//! Re-exports the types most callers need, so a single
//! `use ratewarden::prelude::*;` covers the common paths.

// Core types - always available
pub use crate::clock::{system_clock, Clock};
pub use crate::config::WardenConfig;
pub use crate::decision::{Decision, DenyReason};
pub use crate::error::WardenError;
pub use crate::key::KeyType;

// Strategies
pub use crate::limiters::{
    DistributedWindowStrategy, FailurePolicy, SlidingWindowStrategy, Strategy,
    TokenBucketStrategy,
};

// Composition
pub use crate::messaging_guard::MessagingGuard;
pub use crate::rate_limiter::RateLimiter;
pub use crate::regional::RegionalLimiter;
pub use crate::tiered_quota::{MemoryCredentialRegistry, TieredQuotaManager};
pub use crate::topic_throttle::TopicThrottle;

// Feature-gated exports
#[cfg(feature = "redis")]
pub use crate::redis_storage::RedisStore;
