//! 分级配额管理
//!
//! 按 API Key 所属等级限流：每个等级共享一个令牌桶限流器（按凭证分键），
//! 外加按 UTC 自然日计算的每日配额。凭证只以 SHA-256 哈希形式保存。
//!
//! 检查顺序：
//! 1. 每日计数已达上限时直接拒绝，不消耗令牌；
//! 2. 预占一次每日计数，再检查令牌桶；
//! 3. 令牌桶拒绝时回滚预占。
//!
//! 预占在 `DashMap` 的条目锁内完成，并发调用不会超出每日上限。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::duration_format;
use crate::constants::{DEFAULT_TIER, MAX_API_KEY_LENGTH, TIER_REFILL_PERIOD_SECS};
use crate::decision::{Decision, DenyReason};
use crate::error::WardenError;
use crate::key::{hash_credential, KeyType};
use crate::limiters::TokenBucketStrategy;
use crate::rate_limiter::RateLimiter;

/// 等级定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierDefinition {
    /// 令牌桶容量
    pub capacity: u64,
    /// 每个周期补充的令牌数
    pub refill_rate: f64,
    /// 补充周期
    #[serde(with = "duration_format")]
    pub refill_period: Duration,
    /// 每日上限，`None` 表示不限
    #[serde(default)]
    pub daily_limit: Option<u64>,
}

impl TierDefinition {
    pub fn new(
        capacity: u64,
        refill_rate: f64,
        refill_period: Duration,
        daily_limit: Option<u64>,
    ) -> Self {
        Self {
            capacity,
            refill_rate,
            refill_period,
            daily_limit,
        }
    }

    /// 每小时补满的等级
    fn hourly(capacity: u64, daily_limit: Option<u64>) -> Self {
        Self::new(
            capacity,
            capacity as f64,
            Duration::from_secs(TIER_REFILL_PERIOD_SECS),
            daily_limit,
        )
    }

    /// 100 次/小时，1 000 次/天
    pub fn free() -> Self {
        Self::hourly(100, Some(1_000))
    }

    /// 1 000 次/小时，10 000 次/天
    pub fn basic() -> Self {
        Self::hourly(1_000, Some(10_000))
    }

    /// 10 000 次/小时，100 000 次/天
    pub fn premium() -> Self {
        Self::hourly(10_000, Some(100_000))
    }

    /// 100 000 次/小时，不限每日
    pub fn enterprise() -> Self {
        Self::hourly(100_000, None)
    }

    /// 验证参数
    pub fn validate(&self) -> Result<(), WardenError> {
        if self.capacity == 0 {
            return Err(WardenError::ConfigError("等级容量不能为0".to_string()));
        }
        if !self.refill_rate.is_finite() || self.refill_rate <= 0.0 {
            return Err(WardenError::ConfigError(format!(
                "等级补充速率必须为正数: {}",
                self.refill_rate
            )));
        }
        if self.refill_period.is_zero() {
            return Err(WardenError::ConfigError("等级补充周期不能为0".to_string()));
        }
        if self.daily_limit == Some(0) {
            return Err(WardenError::ConfigError(
                "每日上限不能为0，不限请留空".to_string(),
            ));
        }
        Ok(())
    }
}

/// 分级配额配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TieredQuotaConfig {
    /// 等级名 → 定义
    pub tiers: BTreeMap<String, TierDefinition>,
    /// 未注册凭证使用的等级
    #[serde(default = "default_tier_name")]
    pub default_tier: String,
}

fn default_tier_name() -> String {
    DEFAULT_TIER.to_string()
}

impl Default for TieredQuotaConfig {
    fn default() -> Self {
        let mut tiers = BTreeMap::new();
        tiers.insert("free".to_string(), TierDefinition::free());
        tiers.insert("basic".to_string(), TierDefinition::basic());
        tiers.insert("premium".to_string(), TierDefinition::premium());
        tiers.insert("enterprise".to_string(), TierDefinition::enterprise());
        Self {
            tiers,
            default_tier: default_tier_name(),
        }
    }
}

impl TieredQuotaConfig {
    pub fn validate(&self) -> Result<(), WardenError> {
        if self.tiers.is_empty() {
            return Err(WardenError::ConfigError("至少需要一个等级".to_string()));
        }
        if !self.tiers.contains_key(&self.default_tier) {
            return Err(WardenError::ConfigError(format!(
                "默认等级不存在: {}",
                self.default_tier
            )));
        }
        for (name, tier) in &self.tiers {
            if name.trim().is_empty() {
                return Err(WardenError::ConfigError("等级名不能为空".to_string()));
            }
            tier.validate()
                .map_err(|e| WardenError::ConfigError(format!("等级 {}: {}", name, e)))?;
        }
        Ok(())
    }
}

/// 凭证登记表
///
/// 只保存凭证哈希到等级名的映射。
#[async_trait]
pub trait CredentialRegistry: Send + Sync {
    /// 查询凭证哈希对应的等级
    async fn tier_for(&self, key_hash: &str) -> Option<String>;

    /// 登记（或覆盖）凭证哈希的等级
    async fn register(&self, key_hash: &str, tier: &str);

    /// 已登记的凭证数量
    async fn len(&self) -> usize;
}

/// 进程内凭证登记表
#[derive(Debug, Default)]
pub struct MemoryCredentialRegistry {
    entries: DashMap<String, String>,
}

impl MemoryCredentialRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialRegistry for MemoryCredentialRegistry {
    async fn tier_for(&self, key_hash: &str) -> Option<String> {
        self.entries.get(key_hash).map(|tier| tier.clone())
    }

    async fn register(&self, key_hash: &str, tier: &str) {
        self.entries.insert(key_hash.to_string(), tier.to_string());
    }

    async fn len(&self) -> usize {
        self.entries.len()
    }
}

/// 配额检查结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaDecision {
    pub decision: Decision,
    /// 生效的等级
    pub tier: String,
    pub daily_limit: Option<u64>,
    /// 本次检查后的当日用量
    pub daily_used: u64,
    /// 当日剩余，不限时为 `None`
    pub daily_remaining: Option<u64>,
}

/// 凭证用量报告
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    pub tier: String,
    pub date: NaiveDate,
    pub daily_limit: Option<u64>,
    pub used_today: u64,
    pub remaining_today: Option<u64>,
}

/// 分级配额管理器
pub struct TieredQuotaManager {
    tiers: HashMap<String, TierDefinition>,
    /// 每个等级一个限流器，由该等级的所有凭证共享
    limiters: HashMap<String, RateLimiter>,
    default_tier: String,
    registry: Arc<dyn CredentialRegistry>,
    /// (日期, 凭证哈希) → 当日用量
    daily_usage: DashMap<(NaiveDate, String), u64>,
    clock: Arc<dyn Clock>,
}

impl TieredQuotaManager {
    /// 创建配额管理器
    ///
    /// # 返回
    /// - `Err(WardenError::ConfigError)`: 等级定义无效
    pub fn new(
        config: TieredQuotaConfig,
        registry: Arc<dyn CredentialRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, WardenError> {
        config.validate()?;

        let mut limiters = HashMap::with_capacity(config.tiers.len());
        for (name, tier) in &config.tiers {
            let bucket = TokenBucketStrategy::new(
                tier.capacity,
                tier.refill_rate,
                tier.refill_period,
                clock.clone(),
            )?;
            limiters.insert(name.clone(), RateLimiter::with_clock(bucket, clock.clone()));
        }

        info!(
            tiers = config.tiers.len(),
            default_tier = %config.default_tier,
            "分级配额管理器已创建"
        );

        Ok(Self {
            tiers: config.tiers.into_iter().collect(),
            limiters,
            default_tier: config.default_tier,
            registry,
            daily_usage: DashMap::new(),
            clock,
        })
    }

    /// 登记 API Key
    ///
    /// # 返回
    /// 凭证的 SHA-256 哈希；原始凭证不会被保存。
    pub async fn register_api_key(&self, api_key: &str, tier: &str) -> Result<String, WardenError> {
        if api_key.is_empty() {
            return Err(WardenError::ValidationError("API Key不能为空".to_string()));
        }
        if api_key.len() > MAX_API_KEY_LENGTH {
            return Err(WardenError::ValidationError(format!(
                "API Key长度超过限制（最大 {} 字符）",
                MAX_API_KEY_LENGTH
            )));
        }
        if !self.tiers.contains_key(tier) {
            return Err(WardenError::InvalidTier(tier.to_string()));
        }

        let key_hash = hash_credential(api_key);
        self.registry.register(&key_hash, tier).await;
        info!(tier, key_prefix = &key_hash[..8], "已登记API Key");
        Ok(key_hash)
    }

    /// 检查 API Key 的配额
    pub async fn check_limit(&self, api_key: &str) -> QuotaDecision {
        let key_hash = hash_credential(api_key);
        let (tier_name, tier) = self.resolve_tier(&key_hash).await;
        let now = self.clock.now();
        let today = now.date_naive();
        let usage_key = (today, key_hash.clone());

        let Some(limiter) = self.limiters.get(&tier_name) else {
            // new() 为每个等级都建立了限流器
            warn!(tier = %tier_name, "等级缺少限流器");
            return QuotaDecision {
                decision: Decision::denied(tier.capacity, None, now, DenyReason::RateLimited),
                tier: tier_name,
                daily_limit: tier.daily_limit,
                daily_used: 0,
                daily_remaining: tier.daily_limit,
            };
        };

        // 预占每日计数
        if let Some(daily_limit) = tier.daily_limit {
            let mut used = self.daily_usage.entry(usage_key.clone()).or_insert(0);
            if *used >= daily_limit {
                let used_today = *used;
                drop(used);
                debug!(tier = %tier_name, used_today, "已达每日上限");
                let until_midnight = (next_midnight(now) - now).to_std().unwrap_or(Duration::ZERO);
                return QuotaDecision {
                    decision: Decision::denied(
                        tier.capacity,
                        Some(until_midnight),
                        now,
                        DenyReason::DailyLimitExceeded,
                    ),
                    tier: tier_name,
                    daily_limit: Some(daily_limit),
                    daily_used: used_today,
                    daily_remaining: Some(0),
                };
            }
            *used += 1;
        }

        let decision = limiter.check_rate_limit(&key_hash, &KeyType::ApiKey).await;

        let daily_used = if decision.allowed {
            match tier.daily_limit {
                Some(_) => self.used_on(&usage_key),
                None => {
                    let mut used = self.daily_usage.entry(usage_key.clone()).or_insert(0);
                    *used += 1;
                    *used
                }
            }
        } else {
            // 令牌桶拒绝，回滚预占
            if tier.daily_limit.is_some() {
                if let Some(mut used) = self.daily_usage.get_mut(&usage_key) {
                    *used = used.saturating_sub(1);
                }
            }
            self.used_on(&usage_key)
        };

        QuotaDecision {
            decision,
            tier: tier_name,
            daily_limit: tier.daily_limit,
            daily_used,
            daily_remaining: tier
                .daily_limit
                .map(|limit| limit.saturating_sub(daily_used)),
        }
    }

    /// 查询 API Key 当日用量
    pub async fn usage(&self, api_key: &str) -> UsageReport {
        let key_hash = hash_credential(api_key);
        let (tier_name, tier) = self.resolve_tier(&key_hash).await;
        let today = self.clock.now().date_naive();
        let used_today = self.used_on(&(today, key_hash));

        UsageReport {
            tier: tier_name,
            date: today,
            daily_limit: tier.daily_limit,
            used_today,
            remaining_today: tier.daily_limit.map(|limit| limit.saturating_sub(used_today)),
        }
    }

    /// API Key 的生效等级
    pub async fn tier_of(&self, api_key: &str) -> String {
        self.resolve_tier(&hash_credential(api_key)).await.0
    }

    /// 删除今天以前的用量计数
    pub fn purge_stale_usage(&self) -> usize {
        let today = self.clock.now().date_naive();
        let before = self.daily_usage.len();
        self.daily_usage.retain(|(date, _), _| *date >= today);
        let purged = before.saturating_sub(self.daily_usage.len());
        if purged > 0 {
            debug!(purged, "已清理过期的每日计数");
        }
        purged
    }

    /// 所有等级名
    pub fn tier_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tiers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn default_tier(&self) -> &str {
        &self.default_tier
    }

    /// 等级使用的限流器
    pub fn limiter_for(&self, tier: &str) -> Option<&RateLimiter> {
        self.limiters.get(tier)
    }

    /// 已登记的凭证数量
    pub async fn registered_keys(&self) -> usize {
        self.registry.len().await
    }

    fn used_on(&self, usage_key: &(NaiveDate, String)) -> u64 {
        self.daily_usage.get(usage_key).map(|used| *used).unwrap_or(0)
    }

    /// 查找等级，未登记或等级已不存在时回落到默认等级
    async fn resolve_tier(&self, key_hash: &str) -> (String, TierDefinition) {
        if let Some(name) = self.registry.tier_for(key_hash).await {
            if let Some(tier) = self.tiers.get(&name) {
                return (name, tier.clone());
            }
            debug!(tier = %name, "登记的等级已不存在，使用默认等级");
        }

        let tier = self
            .tiers
            .get(&self.default_tier)
            .cloned()
            .unwrap_or_else(TierDefinition::free);
        (self.default_tier.clone(), tier)
    }
}

/// 下一个 UTC 零点
fn next_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .succ_opt()
        .and_then(|tomorrow| tomorrow.and_hms_opt(0, 0, 0))
        .map(|midnight| Utc.from_utc_datetime(&midnight))
        .unwrap_or_else(|| now + chrono::Duration::days(1))
}

// ============================================================================
// 单元测试
// ============================================================================
