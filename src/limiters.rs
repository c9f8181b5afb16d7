//! 限流策略模块
//!
//! 实现各种准入算法，统一由 [`Strategy`] trait 抽象：
//!
//! - [`TokenBucketStrategy`]: 固定容量、惰性连续补充的令牌桶
//! - [`SlidingWindowStrategy`]: 精确计数的滑动窗口日志
//! - [`DistributedWindowStrategy`]: 状态位于共享远程存储的滑动窗口
//!
//! 拒绝是正常的返回值，策略在请求路径上从不返回错误。

use async_trait::async_trait;

use crate::decision::StrategyDecision;

pub mod distributed;
pub mod sliding_window;
pub mod token_bucket;

pub use distributed::{
    DistributedWindowStrategy, FailurePolicy, MemoryWindowStore, WindowStore, WindowVerdict,
};
pub use sliding_window::SlidingWindowStrategy;
pub use token_bucket::TokenBucketStrategy;

/// 限流策略 trait
///
/// 令牌桶、滑动窗口和分布式策略可以互换，组合层无需类型判断。
#[async_trait]
pub trait Strategy: Send + Sync {
    /// 对单个键做一次准入判定
    async fn is_allowed(&self, key: &str) -> StrategyDecision;

    /// 清除某个键的状态
    async fn reset(&self, key: &str);

    /// 容量或窗口内最大请求数
    fn limit(&self) -> u64;

    /// 策略名称
    fn name(&self) -> &'static str;

    /// 本地跟踪的键数量（远程策略返回 0）
    fn tracked_keys(&self) -> usize {
        0
    }
}

#[async_trait]
impl<S: Strategy + ?Sized> Strategy for Box<S> {
    async fn is_allowed(&self, key: &str) -> StrategyDecision {
        (**self).is_allowed(key).await
    }

    async fn reset(&self, key: &str) {
        (**self).reset(key).await
    }

    fn limit(&self) -> u64 {
        (**self).limit()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn tracked_keys(&self) -> usize {
        (**self).tracked_keys()
    }
}
