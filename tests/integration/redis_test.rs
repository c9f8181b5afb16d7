//! Redis集成测试
//!
//! 需要本地 Redis 服务器，默认忽略：
//! `cargo test --features redis --test integration_tests -- --ignored`

use ratewarden::{
    system_clock, DistributedWindowStrategy, KeyType, RateLimiter, RedisConfig, RedisStore,
    WindowStore,
};
use std::sync::Arc;
use std::time::Duration;

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// 测试Redis连接
#[tokio::test]
#[ignore] // 需要Redis服务器运行
async fn test_redis_connection() {
    let store = RedisStore::connect(RedisConfig::new(redis_url())).await.unwrap();
    assert!(store.ping().await.is_ok());
    assert!(!store.is_degraded());
}

/// 测试两个节点共享窗口
#[tokio::test]
#[ignore]
async fn test_redis_shared_window() {
    let store: Arc<dyn WindowStore> =
        Arc::new(RedisStore::connect(RedisConfig::new(redis_url())).await.unwrap());
    let prefix = format!("ratewarden_test:{}:", uuid::Uuid::new_v4());

    let build = || {
        let strategy =
            DistributedWindowStrategy::new(store.clone(), Duration::from_secs(30), 5, system_clock())
                .unwrap()
                .key_prefix(prefix.clone());
        RateLimiter::new(strategy)
    };
    let a = build();
    let b = build();

    let mut admitted = 0;
    for i in 0..10 {
        let node = if i % 2 == 0 { &a } else { &b };
        if node.check_rate_limit("shared", &KeyType::Client).await.allowed {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 5);

    let denied = a.check_rate_limit("shared", &KeyType::Client).await;
    assert!(!denied.allowed);
    assert!(denied.retry_after.is_some_and(|after| after <= Duration::from_secs(30)));

    a.reset("shared", &KeyType::Client).await;
    assert!(b.check_rate_limit("shared", &KeyType::Client).await.allowed);
}

/// 测试无法连接时返回错误
#[tokio::test]
async fn test_redis_unreachable() {
    let config = RedisConfig::new("redis://127.0.0.1:1")
        .connection_timeout(Duration::from_millis(200))
        .max_retries(0);
    assert!(RedisStore::connect(config).await.is_err());
}
