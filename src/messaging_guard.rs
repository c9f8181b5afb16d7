//! 消息通道防护
//!
//! 面向消息总线的准入控制：
//!
//! - 单客户端连接数上限（超限即自动封禁）与全局连接数上限；
//! - 按客户端的消息速率（令牌桶，容量 = 每秒速率）；
//! - 可疑流量检测：最近 `pattern_window` 内的消息数超过
//!   `suspicious_multiplier × 容量` 时自动封禁；
//! - 后台清理任务定期移除过期封禁和陈旧的流量日志。

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::ban_table::BanRecord;
use crate::clock::Clock;
use crate::config::duration_format;
use crate::constants::{
    DEFAULT_BAN_DURATION_SECS, DEFAULT_GLOBAL_CONNECTION_LIMIT, DEFAULT_MESSAGE_RATE_LIMIT,
    DEFAULT_PATTERN_LOG_CAPACITY, DEFAULT_PATTERN_MIN_SAMPLES, DEFAULT_PATTERN_WINDOW_SECS,
    DEFAULT_PER_CLIENT_CONNECTION_LIMIT, DEFAULT_STALE_LOG_AGE_SECS, DEFAULT_SUSPICIOUS_MULTIPLIER,
    DEFAULT_SWEEP_INTERVAL_SECS,
};
use crate::decision::{Decision, DenyReason};
use crate::error::WardenError;
use crate::key::KeyType;
use crate::limiters::TokenBucketStrategy;
use crate::rate_limiter::RateLimiter;

const REASON_TOO_MANY_CONNECTIONS: &str = "too many connections";
const REASON_SUSPICIOUS_PATTERN: &str = "suspicious pattern";

/// 消息通道防护配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingGuardConfig {
    /// 每个客户端每秒消息数
    pub message_rate_limit: u64,
    /// 全局连接数上限
    pub global_connection_limit: usize,
    /// 单客户端连接数上限
    pub per_client_connection_limit: usize,
    #[serde(with = "duration_format")]
    pub ban_duration: Duration,
    /// 可疑流量统计窗口
    #[serde(with = "duration_format")]
    pub pattern_window: Duration,
    /// 每个客户端保留的时间戳上限
    pub pattern_log_capacity: usize,
    /// 开始检测前的最少样本数
    pub pattern_min_samples: usize,
    pub suspicious_multiplier: u64,
    #[serde(with = "duration_format")]
    pub sweep_interval: Duration,
    /// 早于此时长的日志在清理时丢弃
    #[serde(with = "duration_format")]
    pub stale_log_age: Duration,
}

impl Default for MessagingGuardConfig {
    fn default() -> Self {
        Self {
            message_rate_limit: DEFAULT_MESSAGE_RATE_LIMIT,
            global_connection_limit: DEFAULT_GLOBAL_CONNECTION_LIMIT,
            per_client_connection_limit: DEFAULT_PER_CLIENT_CONNECTION_LIMIT,
            ban_duration: Duration::from_secs(DEFAULT_BAN_DURATION_SECS),
            pattern_window: Duration::from_secs(DEFAULT_PATTERN_WINDOW_SECS),
            pattern_log_capacity: DEFAULT_PATTERN_LOG_CAPACITY,
            pattern_min_samples: DEFAULT_PATTERN_MIN_SAMPLES,
            suspicious_multiplier: DEFAULT_SUSPICIOUS_MULTIPLIER,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            stale_log_age: Duration::from_secs(DEFAULT_STALE_LOG_AGE_SECS),
        }
    }
}

impl MessagingGuardConfig {
    pub fn validate(&self) -> Result<(), WardenError> {
        if self.message_rate_limit == 0 {
            return Err(WardenError::ConfigError("消息速率不能为0".to_string()));
        }
        if self.global_connection_limit == 0 || self.per_client_connection_limit == 0 {
            return Err(WardenError::ConfigError("连接数上限不能为0".to_string()));
        }
        if self.ban_duration.is_zero() {
            return Err(WardenError::ConfigError("封禁时长不能为0".to_string()));
        }
        if self.pattern_window.is_zero() || self.sweep_interval.is_zero() {
            return Err(WardenError::ConfigError(
                "统计窗口和清理间隔不能为0".to_string(),
            ));
        }
        if self.suspicious_multiplier == 0 {
            return Err(WardenError::ConfigError("可疑倍数不能为0".to_string()));
        }
        Ok(())
    }

    /// 可疑流量阈值（严格大于才触发）
    pub fn suspicious_threshold(&self) -> u64 {
        self.suspicious_multiplier
            .saturating_mul(self.message_rate_limit)
    }

    /// 实际使用的日志容量，保证阈值可达
    fn effective_log_capacity(&self) -> usize {
        let reachable = usize::try_from(self.suspicious_threshold())
            .unwrap_or(usize::MAX)
            .saturating_add(1);
        self.pattern_log_capacity.max(reachable)
    }
}

/// 连接检查结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConnectionDecision {
    /// 已登记（或该连接本已打开）
    Accepted { client_connections: usize },
    /// 拒绝
    Rejected { reason: DenyReason },
}

impl ConnectionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ConnectionDecision::Accepted { .. })
    }
}

/// 一次清理的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_bans: usize,
    /// 丢弃的陈旧时间戳数量
    pub trimmed_entries: usize,
    /// 删除的空日志数量
    pub dropped_logs: usize,
}

/// 运行时统计
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardStats {
    pub open_connections: usize,
    pub connected_clients: usize,
    pub banned_clients: usize,
    pub tracked_clients: usize,
}

/// 连接登记表，受一把锁保护以维持全局上限
#[derive(Debug, Default)]
struct ConnectionRegistry {
    by_client: ahash::AHashMap<String, ahash::AHashSet<String>>,
    total: usize,
}

impl ConnectionRegistry {
    fn drop_client(&mut self, client_id: &str) -> usize {
        let dropped = self
            .by_client
            .remove(client_id)
            .map(|connections| connections.len())
            .unwrap_or(0);
        self.total -= dropped;
        dropped
    }
}

/// 消息通道防护
pub struct MessagingGuard {
    config: MessagingGuardConfig,
    /// 消息速率限流器，封禁也记录在其中
    limiter: RateLimiter,
    connections: parking_lot::Mutex<ConnectionRegistry>,
    pattern_logs: DashMap<String, VecDeque<DateTime<Utc>>>,
    pattern_log_capacity: usize,
    clock: Arc<dyn Clock>,
}

impl MessagingGuard {
    /// 创建消息通道防护
    pub fn new(config: MessagingGuardConfig, clock: Arc<dyn Clock>) -> Result<Self, WardenError> {
        config.validate()?;

        let bucket = TokenBucketStrategy::new(
            config.message_rate_limit,
            config.message_rate_limit as f64,
            Duration::from_secs(1),
            clock.clone(),
        )?;
        let pattern_log_capacity = config.effective_log_capacity();
        if pattern_log_capacity > config.pattern_log_capacity {
            debug!(
                configured = config.pattern_log_capacity,
                effective = pattern_log_capacity,
                "流量日志容量已提高到可疑阈值以上"
            );
        }

        Ok(Self {
            limiter: RateLimiter::with_clock(bucket, clock.clone()),
            config,
            connections: parking_lot::Mutex::new(ConnectionRegistry::default()),
            pattern_logs: DashMap::new(),
            pattern_log_capacity,
            clock,
        })
    }

    pub fn config(&self) -> &MessagingGuardConfig {
        &self.config
    }

    /// 检查并登记新连接
    ///
    /// 单客户端连接数已满时拒绝并自动封禁该客户端。
    pub fn check_connection_limit(&self, client_id: &str, connection_id: &str) -> ConnectionDecision {
        if let Some(ban) = self.is_banned(client_id) {
            return ConnectionDecision::Rejected {
                reason: DenyReason::Banned(ban.reason),
            };
        }

        {
            let mut registry = self.connections.lock();

            if let Some(existing) = registry.by_client.get(client_id) {
                if existing.contains(connection_id) {
                    return ConnectionDecision::Accepted {
                        client_connections: existing.len(),
                    };
                }
            }

            if registry.total >= self.config.global_connection_limit {
                warn!(total = registry.total, "已达全局连接数上限");
                return ConnectionDecision::Rejected {
                    reason: DenyReason::ConnectionLimitReached,
                };
            }

            let held = registry
                .by_client
                .get(client_id)
                .map(|connections| connections.len())
                .unwrap_or(0);
            if held < self.config.per_client_connection_limit {
                let connections = registry.by_client.entry(client_id.to_string()).or_default();
                connections.insert(connection_id.to_string());
                let client_connections = connections.len();
                registry.total += 1;
                trace!(client_id, connection_id, client_connections, "连接已登记");
                return ConnectionDecision::Accepted { client_connections };
            }
        }

        warn!(client_id, "客户端连接数超限");
        self.ban_client(client_id, REASON_TOO_MANY_CONNECTIONS);
        ConnectionDecision::Rejected {
            reason: DenyReason::TooManyConnections,
        }
    }

    /// 为客户端生成连接ID并登记
    pub fn open_connection(&self, client_id: &str) -> (String, ConnectionDecision) {
        let connection_id = uuid::Uuid::new_v4().to_string();
        let decision = self.check_connection_limit(client_id, &connection_id);
        (connection_id, decision)
    }

    /// 移除连接，返回连接是否存在
    pub fn remove_connection(&self, client_id: &str, connection_id: &str) -> bool {
        let mut registry = self.connections.lock();
        let Some(connections) = registry.by_client.get_mut(client_id) else {
            return false;
        };
        let removed = connections.remove(connection_id);
        let now_empty = connections.is_empty();
        if now_empty {
            registry.by_client.remove(client_id);
        }
        if removed {
            registry.total -= 1;
        }
        removed
    }

    /// 封禁客户端并断开其所有连接
    pub fn ban_client(&self, client_id: &str, reason: &str) -> BanRecord {
        let record = self.limiter.block_with_reason(
            client_id,
            self.config.ban_duration,
            &KeyType::Client,
            reason,
        );
        let dropped = self.connections.lock().drop_client(client_id);
        warn!(client_id, reason, dropped, "已封禁客户端");
        record
    }

    /// 解除客户端封禁
    pub fn unban_client(&self, client_id: &str) -> bool {
        self.limiter.unblock(client_id, &KeyType::Client)
    }

    /// 有效的封禁记录
    pub fn is_banned(&self, client_id: &str) -> Option<BanRecord> {
        self.limiter.is_blocked(client_id, &KeyType::Client)
    }

    /// 检查客户端能否发送消息
    ///
    /// 无论令牌桶结果如何都会记录流量；触发可疑阈值时返回封禁拒绝。
    pub async fn check_message_rate(&self, client_id: &str) -> Decision {
        let decision = self.limiter.check_rate_limit(client_id, &KeyType::Client).await;
        if decision.blocked {
            return decision;
        }

        let now = self.clock.now();
        let recent = self.record_message(client_id, now);

        if let Some(recent) = recent {
            if recent > self.config.suspicious_threshold() {
                let reason = format!(
                    "{}: {} msgs in {:?}",
                    REASON_SUSPICIOUS_PATTERN, recent, self.config.pattern_window
                );
                let record = self.ban_client(client_id, &reason);
                let mut denied =
                    Decision::blocked(self.limiter.limit(), record.expires_at, now, record.reason);
                denied.reason = Some(DenyReason::SuspiciousPattern);
                return denied;
            }
        }

        decision
    }

    /// 追加时间戳；样本足够时返回窗口内的消息数
    fn record_message(&self, client_id: &str, now: DateTime<Utc>) -> Option<u64> {
        let mut log = self.pattern_logs.entry(client_id.to_string()).or_default();
        log.push_back(now);
        while log.len() > self.pattern_log_capacity {
            log.pop_front();
        }

        if log.len() < self.config.pattern_min_samples {
            return None;
        }

        let floor = chrono::Duration::from_std(self.config.pattern_window)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let recent = log.iter().rev().take_while(|&&at| at > floor).count();
        Some(recent as u64)
    }

    /// 清理过期封禁和陈旧日志
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let cutoff = chrono::Duration::from_std(self.config.stale_log_age)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut report = SweepReport {
            expired_bans: self.limiter.purge_expired_bans(),
            ..SweepReport::default()
        };

        self.pattern_logs.retain(|_, log| {
            while log.front().is_some_and(|&at| at <= cutoff) {
                log.pop_front();
                report.trimmed_entries += 1;
            }
            if log.is_empty() {
                report.dropped_logs += 1;
                false
            } else {
                true
            }
        });

        if report != SweepReport::default() {
            info!(
                expired_bans = report.expired_bans,
                trimmed = report.trimmed_entries,
                dropped = report.dropped_logs,
                "消息通道清理完成"
            );
        }
        report
    }

    /// 启动后台清理任务
    ///
    /// 任务持有 `Arc`，通过返回的句柄 `abort()` 停止。
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.config.sweep_interval;
        info!("消息通道清理任务已启动 (间隔: {:?})", period);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // 第一次 tick 立即返回
            interval.tick().await;
            loop {
                interval.tick().await;
                debug!("运行消息通道清理");
                self.sweep();
            }
        })
    }

    pub fn stats(&self) -> GuardStats {
        let registry = self.connections.lock();
        GuardStats {
            open_connections: registry.total,
            connected_clients: registry.by_client.len(),
            banned_clients: self.limiter.stats().active_bans,
            tracked_clients: self.pattern_logs.len(),
        }
    }

    #[cfg(test)]
    fn pattern_log_capacity(&self) -> usize {
        self.pattern_log_capacity
    }
}

// ============================================================================
// 单元测试
// ============================================================================
