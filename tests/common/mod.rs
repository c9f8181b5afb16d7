//! 测试通用工具模块
//!
//! 提供测试中常用的时钟、限流器和存储构造函数。

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ratewarden::{
    limiters::WindowVerdict, Clock, ManualClock, RateLimiter, SlidingWindowStrategy,
    StorageError, TokenBucketStrategy, WindowStore,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 安装测试日志输出，`RUST_LOG` 控制级别
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 固定起点的手动时钟（2026-03-01 12:00:00 UTC）
pub fn manual_clock() -> ManualClock {
    ManualClock::new(at(2026, 3, 1, 12, 0, 0))
}

pub fn at(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
        .single()
        .expect("valid test timestamp")
}

pub fn shared(clock: &ManualClock) -> Arc<dyn Clock> {
    Arc::new(clock.clone())
}

/// 令牌桶限流器
pub fn token_bucket_limiter(
    capacity: u64,
    refill_rate: f64,
    refill_period: Duration,
    clock: &ManualClock,
) -> RateLimiter {
    let bucket = TokenBucketStrategy::new(capacity, refill_rate, refill_period, shared(clock))
        .expect("valid token bucket");
    RateLimiter::with_clock(bucket, shared(clock))
}

/// 滑动窗口限流器
pub fn sliding_window_limiter(
    window_size: Duration,
    max_requests: u64,
    clock: &ManualClock,
) -> RateLimiter {
    let window = SlidingWindowStrategy::new(window_size, max_requests, shared(clock))
        .expect("valid sliding window");
    RateLimiter::with_clock(window, shared(clock))
}

/// 可切换故障状态的存储
///
/// 正常时委托给内存存储，故障时返回连接错误。
pub struct FlakyStore {
    inner: ratewarden::MemoryWindowStore,
    failing: std::sync::atomic::AtomicBool,
    calls: AtomicU64,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: ratewarden::MemoryWindowStore::new(),
            failing: std::sync::atomic::AtomicBool::new(false),
            calls: AtomicU64::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WindowStore for FlakyStore {
    async fn check_and_insert(
        &self,
        key: &str,
        window: Duration,
        max_requests: u64,
        now: DateTime<Utc>,
    ) -> Result<WindowVerdict, StorageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::ConnectionError("connection refused".to_string()));
        }
        self.inner
            .check_and_insert(key, window, max_requests, now)
            .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::ConnectionError("connection refused".to_string()));
        }
        self.inner.delete(key).await
    }
}
