//! 决策结果
//!
//! 策略返回 [`StrategyDecision`]，组合层统一为 [`Decision`]，
//! 无论底层使用哪种策略，调用方都能渲染一致的背压信号。

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::clock::add_duration;

/// `X-RateLimit-Limit`
pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
/// `X-RateLimit-Remaining`
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
/// `X-RateLimit-Reset`
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
/// `Retry-After`
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// 单个策略的判定
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyDecision {
    pub allowed: bool,
    /// 容量或窗口内最大请求数
    pub limit: u64,
    pub remaining: u64,
    /// 拒绝时距离可重试的时间
    pub retry_after: Option<Duration>,
    /// 后端不可用，结果来自降级策略
    pub degraded: bool,
}

impl StrategyDecision {
    pub fn allow(limit: u64, remaining: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            retry_after: None,
            degraded: false,
        }
    }

    pub fn deny(limit: u64, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            retry_after: Some(retry_after),
            degraded: false,
        }
    }

    /// 标记为降级结果
    pub fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }
}

/// 拒绝原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum DenyReason {
    /// 策略拒绝
    RateLimited,
    /// 处于封禁期
    Banned(String),
    /// 超出每日配额
    DailyLimitExceeded,
    /// 全局连接数已满
    ConnectionLimitReached,
    /// 单客户端连接数超限
    TooManyConnections,
    /// 可疑流量模式
    SuspiciousPattern,
    /// 后端不可用且策略为 fail-closed
    BackendUnavailable,
}

/// 归一化的准入决策
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub retry_after: Option<Duration>,
    pub reset_at: Option<DateTime<Utc>>,
    pub blocked: bool,
    pub degraded: bool,
    pub reason: Option<DenyReason>,
}

impl Decision {
    /// 由策略判定生成
    pub fn from_strategy(decision: StrategyDecision, now: DateTime<Utc>) -> Self {
        let reason = if decision.allowed {
            None
        } else if decision.degraded {
            Some(DenyReason::BackendUnavailable)
        } else {
            Some(DenyReason::RateLimited)
        };
        let reset_at = if decision.allowed {
            None
        } else {
            decision.retry_after.map(|after| add_duration(now, after))
        };

        Self {
            allowed: decision.allowed,
            limit: decision.limit,
            remaining: decision.remaining,
            retry_after: if decision.allowed {
                None
            } else {
                decision.retry_after
            },
            reset_at,
            blocked: false,
            degraded: decision.degraded,
            reason,
        }
    }

    /// 封禁中的拒绝
    pub fn blocked(
        limit: u64,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Self {
        let retry_after = (expires_at - now).to_std().unwrap_or(Duration::ZERO);
        Self {
            allowed: false,
            limit,
            remaining: 0,
            retry_after: Some(retry_after),
            reset_at: Some(expires_at),
            blocked: true,
            degraded: false,
            reason: Some(DenyReason::Banned(reason.into())),
        }
    }

    /// 非策略原因的拒绝（配额、连接数等）
    pub fn denied(
        limit: u64,
        retry_after: Option<Duration>,
        now: DateTime<Utc>,
        reason: DenyReason,
    ) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            retry_after,
            reset_at: retry_after.map(|after| add_duration(now, after)),
            blocked: false,
            degraded: false,
            reason: Some(reason),
        }
    }

    /// 向上取整的重试秒数，至少 1 秒
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after.map(|after| {
            let secs = after.as_secs() + u64::from(after.subsec_nanos() > 0);
            secs.max(1)
        })
    }

    /// 渲染标准限流响应头
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
        ];

        if !self.allowed {
            if let Some(reset_at) = self.reset_at {
                headers.push((HEADER_RESET, reset_at.timestamp().to_string()));
            }
            if let Some(secs) = self.retry_after_secs() {
                headers.push((HEADER_RETRY_AFTER, secs.to_string()));
            }
        }

        headers
    }
}
