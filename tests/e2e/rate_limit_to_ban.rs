//! 端到端测试：限流到封禁的完整流程
//!
//! 测试场景：
//! 1. 令牌桶容量 10，连续请求耗尽令牌
//! 2. 第 11 个请求被拒绝并给出重试时间
//! 3. 手动封禁 2 秒，期间所有请求被拦截
//! 4. 封禁到期后恢复正常访问

use crate::common::*;
use ratewarden::{DenyReason, KeyType};
use std::time::Duration;

#[tokio::test]
async fn test_burst_then_deny_then_refill() {
    let clock = manual_clock();
    let limiter = token_bucket_limiter(10, 10.0, Duration::from_secs(1), &clock);

    for expected_remaining in (0..10).rev() {
        let decision = limiter.check_rate_limit("203.0.113.7", &KeyType::Ip).await;
        assert!(decision.allowed);
        assert_eq!(decision.limit, 10);
        assert_eq!(decision.remaining, expected_remaining);
        assert!(decision.retry_after.is_none());
    }

    let denied = limiter.check_rate_limit("203.0.113.7", &KeyType::Ip).await;
    assert!(!denied.allowed);
    assert!(!denied.blocked);
    assert_eq!(denied.remaining, 0);
    assert_eq!(denied.reason, Some(DenyReason::RateLimited));
    let retry_after = denied.retry_after.expect("retry hint");
    assert!(retry_after > Duration::ZERO && retry_after <= Duration::from_millis(100));

    let headers = denied.headers();
    assert!(headers.contains(&("X-RateLimit-Limit", "10".to_string())));
    assert!(headers.contains(&("X-RateLimit-Remaining", "0".to_string())));
    assert!(headers.contains(&("Retry-After", "1".to_string())));
    assert!(headers.iter().any(|(name, _)| *name == "X-RateLimit-Reset"));

    // 其他 IP 不受影响
    assert!(limiter.check_rate_limit("203.0.113.8", &KeyType::Ip).await.allowed);
    // 同一标识的不同类型也是不同的键
    assert!(limiter.check_rate_limit("203.0.113.7", &KeyType::Client).await.allowed);

    clock.advance(Duration::from_secs(1));
    let refilled = limiter.check_rate_limit("203.0.113.7", &KeyType::Ip).await;
    assert!(refilled.allowed);
    assert_eq!(refilled.remaining, 9);
}

#[tokio::test]
async fn test_temporary_block_expires() {
    let clock = manual_clock();
    let limiter = token_bucket_limiter(10, 10.0, Duration::from_secs(1), &clock);

    let record = limiter.block_temporarily("198.51.100.4", Duration::from_secs(2), &KeyType::Ip);
    assert_eq!(record.reason, "temporary block");

    for _ in 0..3 {
        let decision = limiter.check_rate_limit("198.51.100.4", &KeyType::Ip).await;
        assert!(!decision.allowed);
        assert!(decision.blocked);
        assert_eq!(decision.reset_at, Some(record.expires_at));
        assert_eq!(decision.retry_after, Some(Duration::from_secs(2)));
    }

    clock.advance(Duration::from_millis(1999));
    assert!(limiter.is_blocked("198.51.100.4", &KeyType::Ip).is_some());
    assert!(!limiter.check_rate_limit("198.51.100.4", &KeyType::Ip).await.allowed);

    clock.advance(Duration::from_millis(1));
    assert!(limiter.is_blocked("198.51.100.4", &KeyType::Ip).is_none());
    let decision = limiter.check_rate_limit("198.51.100.4", &KeyType::Ip).await;
    assert!(decision.allowed);
    // 封禁期间的请求不消耗令牌
    assert_eq!(decision.remaining, 9);

    let stats = limiter.stats();
    assert_eq!(stats.total_checks, 5);
    assert_eq!(stats.total_denied, 4);
}

#[tokio::test]
async fn test_reset_behaves_like_new_key() {
    let clock = manual_clock();
    let limiter = sliding_window_limiter(Duration::from_secs(60), 3, &clock);

    for _ in 0..3 {
        assert!(limiter.check_rate_limit("client-a", &KeyType::Client).await.allowed);
    }
    assert!(!limiter.check_rate_limit("client-a", &KeyType::Client).await.allowed);
    limiter.block_temporarily("client-a", Duration::from_secs(600), &KeyType::Client);

    limiter.reset("client-a", &KeyType::Client).await;

    let fresh = limiter.check_rate_limit("client-a", &KeyType::Client).await;
    assert!(fresh.allowed);
    assert_eq!(fresh.remaining, 2);
}

#[tokio::test]
async fn test_sliding_window_retry_after_points_at_oldest() {
    let clock = manual_clock();
    let limiter = sliding_window_limiter(Duration::from_secs(10), 2, &clock);
    let route = KeyType::Custom("route".to_string());

    assert!(limiter.check_rate_limit("k", &route).await.allowed);
    clock.advance(Duration::from_secs(4));
    assert!(limiter.check_rate_limit("k", &route).await.allowed);

    let denied = limiter.check_rate_limit("k", &route).await;
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after, Some(Duration::from_secs(6)));

    // 最早的请求滑出窗口后恢复一个名额
    clock.advance(Duration::from_secs(6) + Duration::from_millis(1));
    assert!(limiter.check_rate_limit("k", &route).await.allowed);
    assert!(!limiter.check_rate_limit("k", &route).await.allowed);
}

#[tokio::test]
async fn test_ten_token_bucket_one_per_second() {
    let clock = manual_clock();
    let limiter = token_bucket_limiter(10, 1.0, Duration::from_secs(1), &clock);

    let mut remaining = Vec::new();
    for _ in 0..10 {
        let decision = limiter.check_rate_limit("user-1", &KeyType::ApiKey).await;
        assert!(decision.allowed);
        remaining.push(decision.remaining);
    }
    assert_eq!(remaining, vec![9, 8, 7, 6, 5, 4, 3, 2, 1, 0]);

    let denied = limiter.check_rate_limit("user-1", &KeyType::ApiKey).await;
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after, Some(Duration::from_secs(1)));
    assert_eq!(denied.retry_after_secs(), Some(1));

    clock.advance(Duration::from_secs(5));
    for _ in 0..5 {
        assert!(limiter.check_rate_limit("user-1", &KeyType::ApiKey).await.allowed);
    }
    assert!(!limiter.check_rate_limit("user-1", &KeyType::ApiKey).await.allowed);
}
