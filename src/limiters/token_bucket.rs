//! 令牌桶策略
//!
//! 令牌以 `refill_rate / refill_period` 的速率连续补充，上限为 `capacity`。
//! 补充是惰性的：没有后台定时器，只在检查时按流逝时间推进状态。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use super::Strategy;
use crate::clock::{ceil_to_micros, duration_from_secs, seconds_between, Clock};
use crate::decision::StrategyDecision;
use crate::error::WardenError;

/// 单个键的桶状态
#[derive(Debug, Clone)]
struct BucketState {
    /// 当前令牌数（0 ≤ tokens ≤ capacity）
    tokens: f64,
    /// 最后补充时间
    last_refill: DateTime<Utc>,
}

/// 令牌桶限流策略
///
/// 每个键一个桶，首次使用时以满桶创建。
/// 状态存放在 `DashMap` 中，补充与扣减在同一个分片锁内完成。
///
/// # 示例
/// ```rust
/// use ratewarden::clock::system_clock;
/// use ratewarden::limiters::{Strategy, TokenBucketStrategy};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     // 容量 10，每秒补充 1 个令牌
///     let bucket = TokenBucketStrategy::new(10, 1.0, Duration::from_secs(1), system_clock()).unwrap();
///     let decision = bucket.is_allowed("ip:127.0.0.1").await;
///     assert!(decision.allowed);
///     assert_eq!(decision.remaining, 9);
/// }
/// ```
pub struct TokenBucketStrategy {
    /// 桶的最大容量
    capacity: u64,
    /// 每个周期补充的令牌数
    refill_rate: f64,
    /// 补充周期
    refill_period: Duration,
    buckets: DashMap<String, BucketState>,
    clock: Arc<dyn Clock>,
}

impl TokenBucketStrategy {
    /// 创建新的令牌桶策略
    ///
    /// # 参数
    /// - `capacity`: 桶的最大容量
    /// - `refill_rate`: 每个周期补充的令牌数
    /// - `refill_period`: 补充周期
    pub fn new(
        capacity: u64,
        refill_rate: f64,
        refill_period: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, WardenError> {
        if capacity == 0 {
            return Err(WardenError::ConfigError("令牌桶容量不能为0".to_string()));
        }
        if !refill_rate.is_finite() || refill_rate <= 0.0 {
            return Err(WardenError::ConfigError(format!(
                "补充速率必须为正数: {}",
                refill_rate
            )));
        }
        if refill_period.is_zero() {
            return Err(WardenError::ConfigError("补充周期不能为0".to_string()));
        }

        Ok(Self {
            capacity,
            refill_rate,
            refill_period,
            buckets: DashMap::new(),
            clock,
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    pub fn refill_period(&self) -> Duration {
        self.refill_period
    }

    /// 至少补充一个令牌所需的时间
    ///
    /// 向上取整到微秒，等待该时长后必定补满一个令牌。
    pub fn time_per_token(&self) -> Duration {
        ceil_to_micros(duration_from_secs(
            self.refill_period.as_secs_f64() / self.refill_rate,
        ))
    }

    fn refill(&self, bucket: &mut BucketState, now: DateTime<Utc>) {
        let elapsed = seconds_between(bucket.last_refill, now);
        let added = elapsed / self.refill_period.as_secs_f64() * self.refill_rate;
        bucket.tokens = (bucket.tokens + added).min(self.capacity as f64);
        bucket.last_refill = now;
    }

    /// 获取当前令牌数（仅用于测试）
    #[cfg(test)]
    fn tokens(&self, key: &str) -> Option<f64> {
        self.buckets.get(key).map(|bucket| bucket.tokens)
    }
}

#[async_trait]
impl Strategy for TokenBucketStrategy {
    async fn is_allowed(&self, key: &str) -> StrategyDecision {
        let now = self.clock.now();
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| BucketState {
                tokens: self.capacity as f64,
                last_refill: now,
            });

        self.refill(&mut bucket, now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            let remaining = bucket.tokens.floor() as u64;
            trace!(key, remaining, "令牌桶放行");
            StrategyDecision::allow(self.capacity, remaining)
        } else {
            trace!(key, tokens = bucket.tokens, "令牌不足");
            StrategyDecision::deny(self.capacity, self.time_per_token())
        }
    }

    async fn reset(&self, key: &str) {
        if let Some(mut bucket) = self.buckets.get_mut(key) {
            bucket.tokens = self.capacity as f64;
            bucket.last_refill = self.clock.now();
        }
    }

    fn limit(&self) -> u64 {
        self.capacity
    }

    fn name(&self) -> &'static str {
        "token_bucket"
    }

    fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}

// ============================================================================
// 单元测试
// ============================================================================
