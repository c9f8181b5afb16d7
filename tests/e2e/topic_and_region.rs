//! 端到端测试：主题发布限流与地区限流

use crate::common::*;
use ratewarden::{
    RegionalLimiter, StaticRegionResolver, TopicThrottle, TopicThrottleConfig,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_topic_publish_lifecycle() {
    let clock = manual_clock();
    let throttle = TopicThrottle::new(
        TopicThrottleConfig {
            topics_per_client: 2,
            messages_per_topic: 3,
        },
        shared(&clock),
    )
    .unwrap();

    // 无订阅者时不限流
    for _ in 0..10 {
        assert!(throttle.check_publish("orders").await.decision.allowed);
    }

    assert!(throttle.subscribe("alice", "orders"));
    assert!(throttle.subscribe("bob", "orders"));
    assert!(throttle.subscribe("alice", "fills"));
    assert!(!throttle.subscribe("alice", "quotes"));

    for _ in 0..3 {
        let result = throttle.check_publish("orders").await;
        assert!(result.decision.allowed);
        assert_eq!(result.subscribers, 2);
    }
    let denied = throttle.check_publish("orders").await;
    assert!(!denied.decision.allowed);
    assert!(denied.decision.retry_after.is_some());

    clock.advance(Duration::from_secs(1));
    assert!(throttle.check_publish("orders").await.decision.allowed);

    let stats = throttle.stats();
    assert_eq!(stats.subscribed_clients, 2);
    assert_eq!(stats.subscriptions, 3);
}

#[tokio::test]
async fn test_regional_limits() {
    let clock = manual_clock();
    let resolver = Arc::new(
        StaticRegionResolver::new()
            .with_prefix("203.0.113.", "US")
            .with_prefix("198.51.100.", "CN"),
    );
    let limiter = RegionalLimiter::new(token_bucket_limiter(2, 2.0, Duration::from_secs(60), &clock), resolver)
        .with_region("US", token_bucket_limiter(4, 4.0, Duration::from_secs(60), &clock))
        .with_region("CN", token_bucket_limiter(1, 1.0, Duration::from_secs(60), &clock));

    let mut allowed_us = 0;
    for _ in 0..6 {
        if limiter.check_limit("203.0.113.5").await.decision.allowed {
            allowed_us += 1;
        }
    }
    assert_eq!(allowed_us, 4);

    let cn = limiter.check_limit("198.51.100.5").await;
    assert_eq!(cn.region.as_deref(), Some("CN"));
    assert!(cn.decision.allowed);
    assert!(!limiter.check_limit("198.51.100.5").await.decision.allowed);

    let unknown = limiter.check_limit("192.0.2.1").await;
    assert!(unknown.used_default);
    assert_eq!(unknown.decision.limit, 2);
}
