//! 配置模块
//!
//! 定义可从 YAML / TOML 加载的准入控制配置，时长支持 `"500ms"`、`"1s"`、
//! `"5m"`、`"1h"`、`"1d"` 等写法，也可以直接写秒数。

use secrecy::Secret;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::constants::{
    DEFAULT_DISTRIBUTED_KEY_PREFIX, DEFAULT_REFILL_PERIOD_SECS, DEFAULT_STORE_TIMEOUT_MS,
    SECONDS_PER_DAY, SECONDS_PER_HOUR, SECONDS_PER_MINUTE,
};
use crate::error::WardenError;
use crate::factory::StrategyFactory;
use crate::limiters::FailurePolicy;
use crate::messaging_guard::{MessagingGuard, MessagingGuardConfig};
use crate::rate_limiter::RateLimiter;
use crate::tiered_quota::{CredentialRegistry, TieredQuotaConfig, TieredQuotaManager};
use crate::topic_throttle::{TopicThrottle, TopicThrottleConfig};

/// 准入控制配置
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// 通用限流策略
    pub limiter: StrategyConfig,
    /// API Key 分级配额
    pub tiers: TieredQuotaConfig,
    /// 消息通道防护
    pub messaging: MessagingGuardConfig,
    /// 主题发布限流
    pub topics: TopicThrottleConfig,
}

impl WardenConfig {
    /// 从 YAML 字符串解析并校验
    pub fn from_yaml_str(yaml: &str) -> Result<Self, WardenError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 字符串解析并校验
    pub fn from_toml_str(toml: &str) -> Result<Self, WardenError> {
        let config: Self = toml::from_str(toml)?;
        config.validate()?;
        Ok(config)
    }

    /// 按扩展名（`.yaml` / `.yml` / `.toml`）读取配置文件
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, WardenError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        debug!("加载配置文件: {}", path.display());
        let config = match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml_str(&content)?,
            "toml" => Self::from_toml_str(&content)?,
            other => {
                return Err(WardenError::ConfigError(format!(
                    "不支持的配置文件格式: {}",
                    other
                )))
            }
        };
        info!("配置文件已加载: {}", path.display());
        Ok(config)
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), WardenError> {
        self.limiter.validate()?;
        self.tiers.validate()?;
        self.messaging.validate()?;
        self.topics.validate()?;
        Ok(())
    }

    /// 按 `limiter` 段构建限流器
    pub fn build_limiter(&self, clock: Arc<dyn Clock>) -> Result<RateLimiter, WardenError> {
        let strategy = StrategyFactory::create(&self.limiter, clock.clone())?;
        Ok(RateLimiter::from_boxed(strategy, clock))
    }

    pub fn build_quota_manager(
        &self,
        registry: Arc<dyn CredentialRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Result<TieredQuotaManager, WardenError> {
        TieredQuotaManager::new(self.tiers.clone(), registry, clock)
    }

    pub fn build_messaging_guard(&self, clock: Arc<dyn Clock>) -> Result<MessagingGuard, WardenError> {
        MessagingGuard::new(self.messaging.clone(), clock)
    }

    pub fn build_topic_throttle(&self, clock: Arc<dyn Clock>) -> Result<TopicThrottle, WardenError> {
        TopicThrottle::new(self.topics.clone(), clock)
    }
}

/// 限流策略配置
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum StrategyConfig {
    TokenBucket {
        capacity: u64,
        refill_rate: f64,
        #[serde(with = "duration_format", default = "default_refill_period")]
        refill_period: Duration,
    },
    SlidingWindow {
        #[serde(with = "duration_format")]
        window_size: Duration,
        max_requests: u64,
    },
    Distributed {
        #[serde(with = "duration_format")]
        window_size: Duration,
        max_requests: u64,
        #[serde(default)]
        store: StoreConfig,
    },
}

fn default_refill_period() -> Duration {
    Duration::from_secs(DEFAULT_REFILL_PERIOD_SECS)
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::TokenBucket {
            capacity: crate::constants::DEFAULT_TOKEN_BUCKET_CAPACITY,
            refill_rate: crate::constants::DEFAULT_TOKEN_BUCKET_REFILL_RATE,
            refill_period: default_refill_period(),
        }
    }
}

impl StrategyConfig {
    /// 校验策略参数
    pub fn validate(&self) -> Result<(), WardenError> {
        match self {
            StrategyConfig::TokenBucket {
                capacity,
                refill_rate,
                refill_period,
            } => {
                if *capacity == 0 {
                    return Err(WardenError::ConfigError("令牌桶容量不能为0".to_string()));
                }
                if !refill_rate.is_finite() || *refill_rate <= 0.0 {
                    return Err(WardenError::ConfigError("补充速率必须为正数".to_string()));
                }
                if refill_period.is_zero() {
                    return Err(WardenError::ConfigError("补充周期不能为0".to_string()));
                }
            }
            StrategyConfig::SlidingWindow {
                window_size,
                max_requests,
            } => {
                Self::validate_window(*window_size, *max_requests)?;
            }
            StrategyConfig::Distributed {
                window_size,
                max_requests,
                store,
            } => {
                Self::validate_window(*window_size, *max_requests)?;
                store.validate()?;
            }
        }
        Ok(())
    }

    fn validate_window(window_size: Duration, max_requests: u64) -> Result<(), WardenError> {
        if window_size.is_zero() {
            return Err(WardenError::ConfigError("窗口大小不能为0".to_string()));
        }
        if max_requests == 0 {
            return Err(WardenError::ConfigError("最大请求数不能为0".to_string()));
        }
        Ok(())
    }
}

/// 分布式窗口的存储配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Redis 地址；为空时使用进程内存储
    pub redis_url: Option<String>,
    pub db: i64,
    pub password: Option<Secret<String>>,
    pub key_prefix: String,
    pub failure_policy: FailurePolicy,
    /// 单次存储调用超时
    #[serde(with = "duration_format")]
    pub operation_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            db: 0,
            password: None,
            key_prefix: DEFAULT_DISTRIBUTED_KEY_PREFIX.to_string(),
            failure_policy: FailurePolicy::default(),
            operation_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), WardenError> {
        if self.operation_timeout.is_zero() {
            return Err(WardenError::ConfigError("存储超时不能为0".to_string()));
        }
        if self.redis_url.as_deref().is_some_and(|url| url.trim().is_empty()) {
            return Err(WardenError::ConfigError("Redis地址不能为空字符串".to_string()));
        }
        Ok(())
    }

    /// 转换为 Redis 连接配置
    #[cfg(feature = "redis")]
    pub fn redis_config(&self) -> Option<crate::redis_storage::RedisConfig> {
        let url = self.redis_url.as_ref()?;
        let mut config = crate::redis_storage::RedisConfig::new(url.clone()).db(self.db);
        if let Some(password) = &self.password {
            config = config.password_secret(password.clone());
        }
        Some(config)
    }
}

/// 解析时长字符串
///
/// # 支持的格式
///
/// - `500ms` - 500毫秒
/// - `10s` - 10秒
/// - `5m` - 5分钟
/// - `2h` - 2小时
/// - `1d` - 1天
///
/// # 示例
///
/// ```rust
/// use ratewarden::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
/// ```
pub fn parse_duration(input: &str) -> Result<Duration, WardenError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(WardenError::ConfigError("时长不能为空".to_string()));
    }

    let (num_part, unit_part) =
        input.split_at(input.find(|c: char| c.is_alphabetic()).unwrap_or(input.len()));

    let num_str = num_part.trim();
    let unit = unit_part.trim().to_lowercase();

    if num_str.is_empty() {
        return Err(WardenError::ConfigError(
            "时长格式错误：缺少数字部分".to_string(),
        ));
    }

    let num: u64 = num_str
        .parse()
        .map_err(|_| WardenError::ConfigError(format!("无效的数字格式: {}", num_str)))?;

    if num == 0 {
        return Err(WardenError::ConfigError("时长必须大于0".to_string()));
    }

    let secs = |multiplier: u64| {
        num.checked_mul(multiplier)
            .map(Duration::from_secs)
            .ok_or_else(|| WardenError::ConfigError(format!("时长过大: {}", input)))
    };

    match unit.as_str() {
        "ms" | "millis" | "milliseconds" => Ok(Duration::from_millis(num)),
        "s" | "sec" | "second" | "seconds" => secs(1),
        "m" | "min" | "minute" | "minutes" => secs(SECONDS_PER_MINUTE),
        "h" | "hr" | "hour" | "hours" => secs(SECONDS_PER_HOUR),
        "d" | "day" | "days" => secs(SECONDS_PER_DAY),
        _ => Err(WardenError::ConfigError(format!(
            "不支持的单位: {}。支持的单位: ms, s, m, h, d",
            unit
        ))),
    }
}

/// 把时长渲染为最粗的整数单位
pub fn format_duration(duration: Duration) -> String {
    if duration.subsec_nanos() != 0 || duration.is_zero() {
        return format!("{}ms", duration.as_millis());
    }
    let secs = duration.as_secs();
    if secs % SECONDS_PER_DAY == 0 {
        format!("{}d", secs / SECONDS_PER_DAY)
    } else if secs % SECONDS_PER_HOUR == 0 {
        format!("{}h", secs / SECONDS_PER_HOUR)
    } else if secs % SECONDS_PER_MINUTE == 0 {
        format!("{}m", secs / SECONDS_PER_MINUTE)
    } else {
        format!("{}s", secs)
    }
}

/// serde 适配：时长既可写成字符串也可写成秒数
pub(crate) mod duration_format {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Seconds(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match RawDuration::deserialize(deserializer)? {
            RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
            RawDuration::Text(text) => super::parse_duration(&text).map_err(de::Error::custom),
        }
    }
}
