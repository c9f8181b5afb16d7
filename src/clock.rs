//! 时间源
//!
//! 所有限流状态都通过 [`Clock`] 读取当前时间，测试中可替换为 [`ManualClock`]。

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// 时间源 trait
pub trait Clock: Send + Sync {
    /// 当前时间
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动推进的时钟
///
/// 克隆体共享同一时间，便于在测试中同时驱动多个组件。
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// 以给定时间创建
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// 以当前系统时间创建
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// 向前推进
    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
        let mut now = self.now.lock();
        *now += delta;
    }

    /// 直接设定时间
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// 默认时钟
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// 两个时间点之间的秒数（负值截断为 0）
pub(crate) fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let delta = later - earlier;
    match delta.num_nanoseconds() {
        Some(nanos) => (nanos.max(0) as f64) / 1_000_000_000.0,
        None => (delta.num_microseconds().unwrap_or(i64::MAX).max(0) as f64) / 1_000_000.0,
    }
}

/// 向上取整到整微秒
pub(crate) fn ceil_to_micros(duration: Duration) -> Duration {
    let micros = duration.as_nanos().div_ceil(1_000);
    Duration::from_micros(u64::try_from(micros).unwrap_or(u64::MAX))
}

/// 秒数（f64）转 Duration，非法值截断为 0
pub(crate) fn duration_from_secs(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        Duration::ZERO
    }
}

/// `at + by`，溢出时返回 `at`
pub(crate) fn add_duration(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(at)
}
