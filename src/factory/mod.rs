//! 策略工厂模块
//!
//! 根据 [`StrategyConfig`] 创建限流策略。
//!
//! # 示例
//!
//! ```rust
//! use ratewarden::clock::system_clock;
//! use ratewarden::config::StrategyConfig;
//! use ratewarden::factory::StrategyFactory;
//! use std::time::Duration;
//!
//! let config = StrategyConfig::SlidingWindow {
//!     window_size: Duration::from_secs(60),
//!     max_requests: 100,
//! };
//! let strategy = StrategyFactory::create(&config, system_clock()).unwrap();
//! assert_eq!(strategy.limit(), 100);
//! ```

use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::{StoreConfig, StrategyConfig};
use crate::error::WardenError;
use crate::limiters::{
    DistributedWindowStrategy, MemoryWindowStore, SlidingWindowStrategy, Strategy,
    TokenBucketStrategy, WindowStore,
};

/// 策略工厂
pub struct StrategyFactory;

impl StrategyFactory {
    /// 从配置创建策略
    ///
    /// 分布式策略在这里使用进程内存储；需要共享存储时使用
    /// [`StrategyFactory::create_with_store`]（或 `redis` 特性下的 `connect`）。
    pub fn create(
        config: &StrategyConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Box<dyn Strategy>, WardenError> {
        if let StrategyConfig::Distributed { store, .. } = config {
            if store.redis_url.is_some() {
                warn!("同步创建忽略 redis_url，分布式窗口使用进程内存储");
            }
        }
        Self::create_with_store(config, Arc::new(MemoryWindowStore::new()), clock)
    }

    /// 从配置创建策略，分布式策略使用给定的存储
    pub fn create_with_store(
        config: &StrategyConfig,
        store: Arc<dyn WindowStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Box<dyn Strategy>, WardenError> {
        config.validate()?;

        match config {
            StrategyConfig::TokenBucket {
                capacity,
                refill_rate,
                refill_period,
            } => {
                debug!(capacity, refill_rate, ?refill_period, "创建令牌桶策略");
                Ok(Box::new(TokenBucketStrategy::new(
                    *capacity,
                    *refill_rate,
                    *refill_period,
                    clock,
                )?))
            }
            StrategyConfig::SlidingWindow {
                window_size,
                max_requests,
            } => {
                debug!(?window_size, max_requests, "创建滑动窗口策略");
                Ok(Box::new(SlidingWindowStrategy::new(
                    *window_size,
                    *max_requests,
                    clock,
                )?))
            }
            StrategyConfig::Distributed {
                window_size,
                max_requests,
                store: store_config,
            } => {
                debug!(?window_size, max_requests, "创建分布式窗口策略");
                Ok(Box::new(Self::distributed(
                    store,
                    *window_size,
                    *max_requests,
                    store_config,
                    clock,
                )?))
            }
        }
    }

    fn distributed(
        store: Arc<dyn WindowStore>,
        window_size: std::time::Duration,
        max_requests: u64,
        store_config: &StoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<DistributedWindowStrategy, WardenError> {
        Ok(
            DistributedWindowStrategy::new(store, window_size, max_requests, clock)?
                .failure_policy(store_config.failure_policy)
                .operation_timeout(store_config.operation_timeout)
                .key_prefix(store_config.key_prefix.clone()),
        )
    }

    /// 从配置创建策略，配置了 `redis_url` 的分布式策略连接 Redis
    #[cfg(feature = "redis")]
    pub async fn connect(
        config: &StrategyConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Box<dyn Strategy>, WardenError> {
        let redis_config = match config {
            StrategyConfig::Distributed { store, .. } => store.redis_config(),
            _ => None,
        };

        match redis_config {
            Some(redis_config) => {
                let store = crate::redis_storage::RedisStore::connect(redis_config).await?;
                Self::create_with_store(config, Arc::new(store), clock)
            }
            None => Self::create(config, clock),
        }
    }
}
