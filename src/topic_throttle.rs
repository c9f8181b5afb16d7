//! 主题发布限流
//!
//! 每个主题一个令牌桶限流器（首次订阅时创建），限制向该主题发布的速率；
//! 同时限制每个客户端可订阅的主题数量。

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace};

use crate::clock::Clock;
use crate::constants::{DEFAULT_MESSAGES_PER_TOPIC, DEFAULT_TOPICS_PER_CLIENT};
use crate::decision::{Decision, StrategyDecision};
use crate::error::WardenError;
use crate::key::KeyType;
use crate::limiters::TokenBucketStrategy;
use crate::rate_limiter::RateLimiter;

/// 主题限流配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicThrottleConfig {
    /// 每个客户端最多订阅的主题数
    pub topics_per_client: usize,
    /// 每个主题每秒可发布的消息数
    pub messages_per_topic: u64,
}

impl Default for TopicThrottleConfig {
    fn default() -> Self {
        Self {
            topics_per_client: DEFAULT_TOPICS_PER_CLIENT,
            messages_per_topic: DEFAULT_MESSAGES_PER_TOPIC,
        }
    }
}

impl TopicThrottleConfig {
    pub fn validate(&self) -> Result<(), WardenError> {
        if self.topics_per_client == 0 {
            return Err(WardenError::ConfigError("每客户端主题数不能为0".to_string()));
        }
        if self.messages_per_topic == 0 {
            return Err(WardenError::ConfigError("主题发布速率不能为0".to_string()));
        }
        Ok(())
    }
}

/// 发布检查结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicDecision {
    pub decision: Decision,
    /// 当前订阅者数量
    pub subscribers: usize,
}

/// 运行时统计
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicStats {
    /// 已创建限流器的主题数
    pub topics: usize,
    pub subscribed_clients: usize,
    pub subscriptions: usize,
}

#[derive(Debug, Default)]
struct Subscriptions {
    by_client: ahash::AHashMap<String, ahash::AHashSet<String>>,
    subscribers: ahash::AHashMap<String, usize>,
}

/// 主题发布限流器
pub struct TopicThrottle {
    config: TopicThrottleConfig,
    subscriptions: parking_lot::Mutex<Subscriptions>,
    limiters: DashMap<String, Arc<RateLimiter>>,
    clock: Arc<dyn Clock>,
}

impl TopicThrottle {
    pub fn new(config: TopicThrottleConfig, clock: Arc<dyn Clock>) -> Result<Self, WardenError> {
        config.validate()?;
        Ok(Self {
            config,
            subscriptions: parking_lot::Mutex::new(Subscriptions::default()),
            limiters: DashMap::new(),
            clock,
        })
    }

    fn build_limiter(&self) -> Result<Arc<RateLimiter>, WardenError> {
        let bucket = TokenBucketStrategy::new(
            self.config.messages_per_topic,
            self.config.messages_per_topic as f64,
            Duration::from_secs(1),
            self.clock.clone(),
        )?;
        Ok(Arc::new(RateLimiter::with_clock(bucket, self.clock.clone())))
    }

    /// 订阅主题
    ///
    /// 已订阅的主题重复订阅视为成功；超过订阅数上限返回 `false`。
    pub fn subscribe(&self, client_id: &str, topic: &str) -> bool {
        let mut subscriptions = self.subscriptions.lock();

        let held = subscriptions.by_client.get(client_id);
        if held.is_some_and(|topics| topics.contains(topic)) {
            return true;
        }
        if held.map(|topics| topics.len()).unwrap_or(0) >= self.config.topics_per_client {
            debug!(client_id, topic, "订阅主题数已达上限");
            return false;
        }

        if let Err(e) = self
            .limiters
            .entry(topic.to_string())
            .or_try_insert_with(|| self.build_limiter())
        {
            error!(topic, "创建主题限流器失败: {}", e);
            return false;
        }

        subscriptions
            .by_client
            .entry(client_id.to_string())
            .or_default()
            .insert(topic.to_string());
        *subscriptions.subscribers.entry(topic.to_string()).or_insert(0) += 1;
        trace!(client_id, topic, "已订阅");
        true
    }

    /// 取消订阅，返回之前是否订阅
    pub fn unsubscribe(&self, client_id: &str, topic: &str) -> bool {
        let mut subscriptions = self.subscriptions.lock();

        let Some(topics) = subscriptions.by_client.get_mut(client_id) else {
            return false;
        };
        if !topics.remove(topic) {
            return false;
        }
        if topics.is_empty() {
            subscriptions.by_client.remove(client_id);
        }

        if let Some(count) = subscriptions.subscribers.get_mut(topic) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                subscriptions.subscribers.remove(topic);
            }
        }
        true
    }

    /// 当前订阅者数量
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscriptions
            .lock()
            .subscribers
            .get(topic)
            .copied()
            .unwrap_or(0)
    }

    /// 检查能否向主题发布
    ///
    /// 没有订阅者的主题总是放行。
    pub async fn check_publish(&self, topic: &str) -> TopicDecision {
        let subscribers = self.subscriber_count(topic);
        let limiter = self.limiters.get(topic).map(|limiter| Arc::clone(&limiter));

        match limiter {
            Some(limiter) if subscribers > 0 => TopicDecision {
                decision: limiter.check_rate_limit(topic, &KeyType::Topic).await,
                subscribers,
            },
            _ => {
                let limit = self.config.messages_per_topic;
                TopicDecision {
                    decision: Decision::from_strategy(
                        StrategyDecision::allow(limit, limit),
                        self.clock.now(),
                    ),
                    subscribers,
                }
            }
        }
    }

    pub fn stats(&self) -> TopicStats {
        let subscriptions = self.subscriptions.lock();
        TopicStats {
            topics: self.limiters.len(),
            subscribed_clients: subscriptions.by_client.len(),
            subscriptions: subscriptions.subscribers.values().sum(),
        }
    }
}
