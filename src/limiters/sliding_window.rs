//! 滑动窗口日志策略
//!
//! 记录每个键在最近 `window_size` 内被放行的请求时间戳，精确计数。
//! 内存占用与窗口内请求数成正比，上限为 `max_requests`。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use super::Strategy;
use crate::clock::{add_duration, Clock};
use crate::decision::StrategyDecision;
use crate::error::WardenError;

/// 滑动窗口限流策略
///
/// # 示例
/// ```rust
/// use ratewarden::clock::system_clock;
/// use ratewarden::limiters::{SlidingWindowStrategy, Strategy};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     // 10 秒内最多 5 个请求
///     let window = SlidingWindowStrategy::new(Duration::from_secs(10), 5, system_clock()).unwrap();
///     let decision = window.is_allowed("ip:192.168.1.1").await;
///     assert!(decision.allowed);
///     assert_eq!(decision.remaining, 4);
/// }
/// ```
pub struct SlidingWindowStrategy {
    /// 窗口大小
    window_size: Duration,
    /// 窗口内最大请求数
    max_requests: u64,
    /// 每个键的请求时间戳日志
    logs: DashMap<String, VecDeque<DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowStrategy {
    /// 创建新的滑动窗口策略
    pub fn new(
        window_size: Duration,
        max_requests: u64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, WardenError> {
        if window_size.is_zero() {
            return Err(WardenError::ConfigError("窗口大小不能为0".to_string()));
        }
        if max_requests == 0 {
            return Err(WardenError::ConfigError("最大请求数不能为0".to_string()));
        }
        chrono::Duration::from_std(window_size)
            .map_err(|_| WardenError::ConfigError("窗口大小超出范围".to_string()))?;

        Ok(Self {
            window_size,
            max_requests,
            logs: DashMap::new(),
            clock,
        })
    }

    pub fn window_size(&self) -> Duration {
        self.window_size
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    fn window_floor(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.window_size)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// 获取当前窗口内的请求数（仅用于测试）
    #[cfg(test)]
    fn occupancy(&self, key: &str) -> usize {
        self.logs.get(key).map(|log| log.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Strategy for SlidingWindowStrategy {
    async fn is_allowed(&self, key: &str) -> StrategyDecision {
        let now = self.clock.now();
        let floor = self.window_floor(now);
        let mut log = self.logs.entry(key.to_string()).or_default();

        // 移除窗口外的请求
        while let Some(&front) = log.front() {
            if front < floor {
                log.pop_front();
            } else {
                break;
            }
        }

        let count = log.len() as u64;
        if count < self.max_requests {
            log.push_back(now);
            let remaining = self.max_requests - count - 1;
            trace!(key, remaining, "滑动窗口放行");
            return StrategyDecision::allow(self.max_requests, remaining);
        }

        // 最早的请求离开窗口的时间
        let retry_after = log
            .front()
            .map(|&oldest| add_duration(oldest, self.window_size))
            .and_then(|expires| (expires - now).to_std().ok())
            .unwrap_or(Duration::ZERO);
        trace!(key, count, "滑动窗口已满");
        StrategyDecision::deny(self.max_requests, retry_after)
    }

    async fn reset(&self, key: &str) {
        self.logs.remove(key);
    }

    fn limit(&self) -> u64 {
        self.max_requests
    }

    fn name(&self) -> &'static str {
        "sliding_window"
    }

    fn tracked_keys(&self) -> usize {
        self.logs.len()
    }
}

// ============================================================================
// 单元测试
// ============================================================================
