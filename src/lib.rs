//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Ratewarden - Admission Control Engine
//!
//! Decides, per request, whether a keyed caller may proceed, and tells callers
//! how long to wait when they may not.
//!
//! # API Layers
//!
//! ## Prelude (Quick Start)
//!
//! Use `use ratewarden::prelude::*;` to import all commonly used types.
//!
//! ## Strategies
//!
//! Interchangeable admission algorithms behind the [`limiters::Strategy`] trait:
//! token bucket, sliding window log, and a distributed sliding window whose
//! state lives in a shared store.
//!
//! ## Composition
//!
//! - [`RateLimiter`] - one strategy plus a temporary ban table
//! - [`TieredQuotaManager`] - API-key tiers with hourly buckets and daily caps
//! - [`MessagingGuard`] - connection caps, message rates, abuse bans
//! - [`TopicThrottle`] - per-topic publish throttling
//! - [`RegionalLimiter`] - per-region limiters keyed by client IP
//!
//! Every check returns a [`Decision`] carrying `X-RateLimit-*` header values.
//!
//! # Examples
//!
//! ```rust
//! use ratewarden::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let bucket = TokenBucketStrategy::new(10, 10.0, Duration::from_secs(1), system_clock())
//!         .unwrap();
//!     let limiter = RateLimiter::new(bucket);
//!
//!     let decision = limiter.check_rate_limit("203.0.113.7", &KeyType::Ip).await;
//!     assert!(decision.allowed);
//!     assert_eq!(decision.remaining, 9);
//! }
//! ```
//!
//! # Features
//!
//! - `memory` (default): in-process strategies and stores
//! - `redis`: Redis-backed window store for the distributed strategy
//! - `telemetry`: `tracing-subscriber` initialisation helper

pub mod prelude;

pub mod ban_table;
pub mod clock;
pub mod config;
pub mod constants;
pub mod decision;
pub mod error;
pub mod factory;
pub mod key;
pub mod limiters;
#[cfg(feature = "redis")]
pub mod lua_scripts;
pub mod messaging_guard;
pub mod rate_limiter;
#[cfg(feature = "redis")]
pub mod redis_storage;
pub mod regional;
#[cfg(feature = "telemetry")]
pub mod telemetry;
pub mod tiered_quota;
pub mod topic_throttle;

// 重新导出常用类型
pub use ban_table::{BanRecord, BanTable};
pub use clock::{system_clock, Clock, ManualClock, SystemClock};
pub use config::{StoreConfig, StrategyConfig, WardenConfig};
pub use decision::{Decision, DenyReason, StrategyDecision};
pub use error::{StorageError, WardenError};
pub use factory::StrategyFactory;
pub use key::{hash_credential, KeyType, RateKey};
pub use limiters::{
    DistributedWindowStrategy, FailurePolicy, MemoryWindowStore, SlidingWindowStrategy, Strategy,
    TokenBucketStrategy, WindowStore, WindowVerdict,
};
pub use messaging_guard::{
    ConnectionDecision, GuardStats, MessagingGuard, MessagingGuardConfig, SweepReport,
};
pub use rate_limiter::{LimiterStats, RateLimiter};
#[cfg(feature = "redis")]
pub use redis_storage::{RedisConfig, RedisStore, RetryStats};
pub use regional::{RegionResolver, RegionalDecision, RegionalLimiter, StaticRegionResolver};
pub use tiered_quota::{
    CredentialRegistry, MemoryCredentialRegistry, QuotaDecision, TierDefinition,
    TieredQuotaConfig, TieredQuotaManager, UsageReport,
};
pub use topic_throttle::{TopicDecision, TopicStats, TopicThrottle, TopicThrottleConfig};
