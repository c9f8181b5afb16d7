//! 分布式滑动窗口策略
//!
//! 与 [`super::SlidingWindowStrategy`] 语义相同，但状态位于共享的远程存储中。
//! "清理-计数-插入" 必须由存储端原子执行（Redis 下为单个 Lua 脚本），
//! 客户端的先读后写在多进程并发下存在竞态。
//!
//! 存储不可用或超时时按 [`FailurePolicy`] 给出降级结果，并记录日志。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::Strategy;
use crate::clock::{add_duration, Clock};
use crate::constants::{DEFAULT_DISTRIBUTED_KEY_PREFIX, DEFAULT_STORE_TIMEOUT_MS};
use crate::decision::StrategyDecision;
use crate::error::{StorageError, WardenError};

/// 存储端一次原子判定的结果
#[derive(Debug, Clone, PartialEq)]
pub struct WindowVerdict {
    /// 是否放行
    pub admitted: bool,
    /// 判定后窗口内的请求数
    pub count: u64,
    /// 拒绝时距离最早请求过期的时间
    pub retry_after: Duration,
}

/// 远程窗口存储接口
///
/// 实现必须保证 `check_and_insert` 对所有并发调用者是原子的。
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// 清理窗口外的记录、计数，并在未超限时插入 `now`，同时刷新过期时间
    async fn check_and_insert(
        &self,
        key: &str,
        window: Duration,
        max_requests: u64,
        now: DateTime<Utc>,
    ) -> Result<WindowVerdict, StorageError>;

    /// 删除某个键
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// 存储故障时的处理策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// 放行（可用性优先）
    #[default]
    FailOpen,
    /// 拒绝（严格性优先）
    FailClosed,
}

/// 分布式滑动窗口策略
pub struct DistributedWindowStrategy {
    store: Arc<dyn WindowStore>,
    window_size: Duration,
    max_requests: u64,
    key_prefix: String,
    failure_policy: FailurePolicy,
    /// 单次存储调用的超时
    operation_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl DistributedWindowStrategy {
    /// 创建新的分布式策略，默认 fail-open
    pub fn new(
        store: Arc<dyn WindowStore>,
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

        Ok(Self {
            store,
            window_size,
            max_requests,
            key_prefix: DEFAULT_DISTRIBUTED_KEY_PREFIX.to_string(),
            failure_policy: FailurePolicy::default(),
            operation_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            clock,
        })
    }

    /// 设置故障策略
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// 设置存储调用超时
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// 设置键前缀
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    fn store_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn fallback(&self, key: &str, cause: &StorageError) -> StrategyDecision {
        match self.failure_policy {
            FailurePolicy::FailOpen => {
                warn!(key, error = %cause, "分布式限流存储不可用，按 fail-open 放行");
                StrategyDecision::allow(self.max_requests, self.max_requests).degraded()
            }
            FailurePolicy::FailClosed => {
                warn!(key, error = %cause, "分布式限流存储不可用，按 fail-closed 拒绝");
                let retry_after = self.operation_timeout.max(Duration::from_secs(1));
                StrategyDecision::deny(self.max_requests, retry_after).degraded()
            }
        }
    }
}

#[async_trait]
impl Strategy for DistributedWindowStrategy {
    async fn is_allowed(&self, key: &str) -> StrategyDecision {
        let now = self.clock.now();
        let store_key = self.store_key(key);

        let outcome = tokio::time::timeout(
            self.operation_timeout,
            self.store
                .check_and_insert(&store_key, self.window_size, self.max_requests, now),
        )
        .await;

        let verdict = match outcome {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                error!(key = %store_key, "分布式限流检查失败: {}", e);
                return self.fallback(key, &e);
            }
            Err(_) => {
                let e = StorageError::TimeoutError(format!(
                    "存储调用超过 {:?}",
                    self.operation_timeout
                ));
                error!(key = %store_key, "分布式限流检查超时");
                return self.fallback(key, &e);
            }
        };

        if verdict.admitted {
            let remaining = self.max_requests.saturating_sub(verdict.count);
            debug!(key = %store_key, remaining, "分布式窗口放行");
            StrategyDecision::allow(self.max_requests, remaining)
        } else {
            debug!(key = %store_key, count = verdict.count, "分布式窗口已满");
            StrategyDecision::deny(self.max_requests, verdict.retry_after)
        }
    }

    async fn reset(&self, key: &str) {
        let store_key = self.store_key(key);
        match tokio::time::timeout(self.operation_timeout, self.store.delete(&store_key)).await {
            Ok(Ok(())) => debug!(key = %store_key, "分布式窗口已重置"),
            Ok(Err(e)) => error!(key = %store_key, "重置分布式窗口失败: {}", e),
            Err(_) => error!(key = %store_key, "重置分布式窗口超时"),
        }
    }

    fn limit(&self) -> u64 {
        self.max_requests
    }

    fn name(&self) -> &'static str {
        "distributed_window"
    }
}

/// 进程内窗口存储
///
/// 与 Redis 脚本语义一致，整个判定在一把锁内完成。
/// 适用于单节点部署和测试。
#[derive(Default)]
pub struct MemoryWindowStore {
    entries: parking_lot::Mutex<ahash::AHashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前保存的键数量
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn check_and_insert(
        &self,
        key: &str,
        window: Duration,
        max_requests: u64,
        now: DateTime<Utc>,
    ) -> Result<WindowVerdict, StorageError> {
        let window_delta = chrono::Duration::from_std(window)
            .map_err(|_| StorageError::QueryError("窗口大小超出范围".to_string()))?;
        let floor = now - window_delta;

        let mut entries = self.entries.lock();
        let log = entries.entry(key.to_string()).or_default();
        while log.front().is_some_and(|&front| front < floor) {
            log.pop_front();
        }

        let count = log.len() as u64;
        if count < max_requests {
            log.push_back(now);
            return Ok(WindowVerdict {
                admitted: true,
                count: count + 1,
                retry_after: Duration::ZERO,
            });
        }

        let retry_after = log
            .front()
            .map(|&oldest| add_duration(oldest, window))
            .and_then(|expires| (expires - now).to_std().ok())
            .unwrap_or(Duration::ZERO);
        Ok(WindowVerdict {
            admitted: false,
            count,
            retry_after,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}
