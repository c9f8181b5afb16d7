//! 按地区限流
//!
//! 先把 IP 解析为地区代码（国家代码），再交给该地区的限流器；
//! 无法解析或没有专属限流器的地区使用默认限流器。

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::clock::Clock;
use crate::decision::Decision;
use crate::error::WardenError;
use crate::key::KeyType;
use crate::limiters::TokenBucketStrategy;
use crate::rate_limiter::RateLimiter;

/// 地区解析接口
pub trait RegionResolver: Send + Sync {
    /// 返回 IP 所在地区代码，未知时返回 `None`
    fn resolve(&self, ip: &str) -> Option<String>;
}

/// 静态地区表
///
/// 精确匹配优先，其次是最长前缀匹配。
#[derive(Debug, Clone, Default)]
pub struct StaticRegionResolver {
    exact: HashMap<String, String>,
    prefixes: Vec<(String, String)>,
}

impl StaticRegionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 精确 IP → 地区
    pub fn with_ip(mut self, ip: impl Into<String>, region: impl Into<String>) -> Self {
        self.exact.insert(ip.into(), normalize_region(region.into()));
        self
    }

    /// 地址前缀（如 `"203.0.113."`）→ 地区
    pub fn with_prefix(mut self, prefix: impl Into<String>, region: impl Into<String>) -> Self {
        self.prefixes
            .push((prefix.into(), normalize_region(region.into())));
        // 最长前缀排在前面
        self.prefixes
            .sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        self
    }
}

impl RegionResolver for StaticRegionResolver {
    fn resolve(&self, ip: &str) -> Option<String> {
        if let Some(region) = self.exact.get(ip) {
            return Some(region.clone());
        }
        self.prefixes
            .iter()
            .find(|(prefix, _)| ip.starts_with(prefix.as_str()))
            .map(|(_, region)| region.clone())
    }
}

fn normalize_region(region: String) -> String {
    region.trim().to_ascii_uppercase()
}

/// 地区限流结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionalDecision {
    pub decision: Decision,
    /// 解析出的地区，未知时为 `None`
    pub region: Option<String>,
    /// 是否使用了默认限流器
    pub used_default: bool,
}

/// 按地区限流器
pub struct RegionalLimiter {
    default: RateLimiter,
    regions: HashMap<String, RateLimiter>,
    resolver: Arc<dyn RegionResolver>,
}

impl RegionalLimiter {
    pub fn new(default: RateLimiter, resolver: Arc<dyn RegionResolver>) -> Self {
        Self {
            default,
            regions: HashMap::new(),
            resolver,
        }
    }

    /// 为地区设置专属限流器
    pub fn with_region(mut self, code: impl Into<String>, limiter: RateLimiter) -> Self {
        self.regions.insert(normalize_region(code.into()), limiter);
        self
    }

    /// 默认地区表：默认 1000，US 2000，CN 500，RU 500（每 60 秒补充 10%）
    pub fn with_default_table(
        resolver: Arc<dyn RegionResolver>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, WardenError> {
        let build = |capacity: u64| -> Result<RateLimiter, WardenError> {
            let bucket = TokenBucketStrategy::new(
                capacity,
                (capacity / 10) as f64,
                Duration::from_secs(60),
                clock.clone(),
            )?;
            Ok(RateLimiter::with_clock(bucket, clock.clone()))
        };

        Ok(Self::new(build(1000)?, resolver)
            .with_region("US", build(2000)?)
            .with_region("CN", build(500)?)
            .with_region("RU", build(500)?))
    }

    /// 检查 IP 的限流
    pub async fn check_limit(&self, ip: &str) -> RegionalDecision {
        let region = self.resolver.resolve(ip).map(normalize_region);
        let dedicated = region.as_ref().and_then(|code| self.regions.get(code));
        trace!(ip, region = ?region, dedicated = dedicated.is_some(), "地区限流");

        let limiter = dedicated.unwrap_or(&self.default);
        RegionalDecision {
            decision: limiter.check_rate_limit(ip, &KeyType::Ip).await,
            region,
            used_default: dedicated.is_none(),
        }
    }

    /// 地区对应的限流器
    pub fn limiter_for(&self, region: Option<&str>) -> &RateLimiter {
        region
            .and_then(|code| self.regions.get(&code.to_ascii_uppercase()))
            .unwrap_or(&self.default)
    }

    /// 已配置的地区代码
    pub fn regions(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self.regions.keys().map(String::as_str).collect();
        codes.sort_unstable();
        codes
    }
}
