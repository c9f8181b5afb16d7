//! 组合限流器
//!
//! 包装一个 [`Strategy`] 和一张 [`BanTable`]：先检查封禁，再委托策略，
//! 输出归一化的 [`Decision`]。

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::ban_table::{BanRecord, BanTable};
use crate::clock::{add_duration, system_clock, Clock};
use crate::decision::Decision;
use crate::key::{KeyType, RateKey};
use crate::limiters::Strategy;

/// 限流器运行时统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimiterStats {
    /// 策略名称
    pub strategy: &'static str,
    pub limit: u64,
    /// 策略内存中的键数量（远程策略为0）
    pub tracked_keys: usize,
    /// 封禁表中的记录数
    pub active_bans: usize,
    pub total_checks: u64,
    pub total_denied: u64,
}

/// 组合限流器
///
/// # 示例
/// ```rust
/// use ratewarden::key::KeyType;
/// use ratewarden::limiters::TokenBucketStrategy;
/// use ratewarden::rate_limiter::RateLimiter;
/// use ratewarden::clock::system_clock;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let bucket = TokenBucketStrategy::new(10, 1.0, Duration::from_secs(1), system_clock()).unwrap();
///     let limiter = RateLimiter::new(bucket);
///
///     let decision = limiter.check_rate_limit("192.168.1.1", &KeyType::Ip).await;
///     assert!(decision.allowed);
///     assert_eq!(decision.remaining, 9);
/// }
/// ```
pub struct RateLimiter {
    strategy: Box<dyn Strategy>,
    bans: BanTable,
    clock: Arc<dyn Clock>,
    total_checks: AtomicU64,
    total_denied: AtomicU64,
}

impl RateLimiter {
    /// 使用系统时钟创建
    ///
    /// 封禁表与策略应使用同一时钟，测试中请用 [`RateLimiter::with_clock`]。
    pub fn new(strategy: impl Strategy + 'static) -> Self {
        Self::with_clock(strategy, system_clock())
    }

    /// 使用指定时钟创建
    pub fn with_clock(strategy: impl Strategy + 'static, clock: Arc<dyn Clock>) -> Self {
        Self::from_boxed(Box::new(strategy), clock)
    }

    /// 由已装箱的策略创建（见 [`crate::factory::StrategyFactory`]）
    pub fn from_boxed(strategy: Box<dyn Strategy>, clock: Arc<dyn Clock>) -> Self {
        debug!(strategy = strategy.name(), limit = strategy.limit(), "创建限流器");
        Self {
            strategy,
            bans: BanTable::new(),
            clock,
            total_checks: AtomicU64::new(0),
            total_denied: AtomicU64::new(0),
        }
    }

    /// 检查是否允许请求
    ///
    /// # 参数
    /// - `identifier`: 标识符（IP、API Key哈希、客户端ID等）
    /// - `key_type`: 标识符类型
    ///
    /// # 返回
    /// 拒绝是正常结果；封禁期内返回 `blocked = true`。
    pub async fn check_rate_limit(&self, identifier: &str, key_type: &KeyType) -> Decision {
        let key = RateKey::new(key_type.clone(), identifier).storage_key();
        self.total_checks.fetch_add(1, Ordering::Relaxed);

        let now = self.clock.now();
        if let Some(ban) = self.bans.is_banned(&key, now) {
            self.total_denied.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, expires_at = %ban.expires_at, "请求被封禁拦截");
            return Decision::blocked(self.strategy.limit(), ban.expires_at, now, ban.reason);
        }

        let verdict = self.strategy.is_allowed(&key).await;
        if !verdict.allowed {
            self.total_denied.fetch_add(1, Ordering::Relaxed);
        }
        Decision::from_strategy(verdict, self.clock.now())
    }

    /// 临时封禁
    pub fn block_temporarily(
        &self,
        identifier: &str,
        duration: Duration,
        key_type: &KeyType,
    ) -> BanRecord {
        self.block_with_reason(identifier, duration, key_type, "temporary block")
    }

    /// 带原因的临时封禁
    pub fn block_with_reason(
        &self,
        identifier: &str,
        duration: Duration,
        key_type: &KeyType,
        reason: impl Into<String>,
    ) -> BanRecord {
        let key = RateKey::new(key_type.clone(), identifier).storage_key();
        let now = self.clock.now();
        let expires_at = add_duration(now, duration);
        let record = self.bans.ban(key.as_str(), expires_at, reason, now);
        warn!(key = %key, until = %expires_at, reason = %record.reason, "已封禁");
        record
    }

    /// 解除封禁，返回是否存在记录
    pub fn unblock(&self, identifier: &str, key_type: &KeyType) -> bool {
        let key = RateKey::new(key_type.clone(), identifier).storage_key();
        let removed = self.bans.unban(&key);
        if removed {
            info!(key = %key, "已解除封禁");
        }
        removed
    }

    /// 当前有效的封禁记录
    pub fn is_blocked(&self, identifier: &str, key_type: &KeyType) -> Option<BanRecord> {
        let key = RateKey::new(key_type.clone(), identifier).storage_key();
        self.bans.is_banned(&key, self.clock.now())
    }

    /// 清除封禁和策略状态，之后行为等同于新键
    pub async fn reset(&self, identifier: &str, key_type: &KeyType) {
        let key = RateKey::new(key_type.clone(), identifier).storage_key();
        self.bans.unban(&key);
        self.strategy.reset(&key).await;
        debug!(key = %key, "限流状态已重置");
    }

    /// 清理过期封禁
    pub fn purge_expired_bans(&self) -> usize {
        self.bans.purge_expired(self.clock.now())
    }

    /// 策略的容量或窗口内最大请求数
    pub fn limit(&self) -> u64 {
        self.strategy.limit()
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            strategy: self.strategy.name(),
            limit: self.strategy.limit(),
            tracked_keys: self.strategy.tracked_keys(),
            active_bans: self.bans.len(),
            total_checks: self.total_checks.load(Ordering::Relaxed),
            total_denied: self.total_denied.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// 单元测试
// ============================================================================
