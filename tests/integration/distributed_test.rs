//! 分布式窗口集成测试
//!
//! 多个限流器实例共享同一存储；存储故障时按故障策略降级

use crate::common::*;
use ratewarden::{
    Clock, DenyReason, DistributedWindowStrategy, FailurePolicy, KeyType, MemoryWindowStore,
    RateLimiter, WindowStore,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn node(store: Arc<dyn WindowStore>, clock: Arc<dyn Clock>, policy: FailurePolicy) -> RateLimiter {
    let strategy = DistributedWindowStrategy::new(store, Duration::from_secs(60), 10, clock.clone())
        .unwrap()
        .failure_policy(policy);
    RateLimiter::with_clock(strategy, clock)
}

#[tokio::test]
async fn test_nodes_share_quota() {
    let clock = manual_clock();
    let store: Arc<dyn WindowStore> = Arc::new(MemoryWindowStore::new());
    let nodes: Vec<Arc<RateLimiter>> = (0..3)
        .map(|_| Arc::new(node(store.clone(), shared(&clock), FailurePolicy::FailOpen)))
        .collect();

    let admitted = Arc::new(AtomicU64::new(0));
    let mut handles = Vec::new();
    for i in 0..60 {
        let node = nodes[i % nodes.len()].clone();
        let admitted = admitted.clone();
        handles.push(tokio::spawn(async move {
            if node.check_rate_limit("tenant-42", &KeyType::ApiKey).await.allowed {
                admitted.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(admitted.load(Ordering::Relaxed), 10);

    let denied = nodes[0].check_rate_limit("tenant-42", &KeyType::ApiKey).await;
    assert!(!denied.allowed);
    assert_eq!(denied.retry_after, Some(Duration::from_secs(60)));

    clock.advance(Duration::from_secs(60) + Duration::from_millis(1));
    assert!(nodes[1].check_rate_limit("tenant-42", &KeyType::ApiKey).await.allowed);
}

#[tokio::test]
async fn test_store_failure_policies() {
    init_test_logging();
    let clock = manual_clock();
    let store = Arc::new(FlakyStore::new());
    let open = node(store.clone(), shared(&clock), FailurePolicy::FailOpen);
    let closed = node(store.clone(), shared(&clock), FailurePolicy::FailClosed);

    assert!(open.check_rate_limit("k", &KeyType::Ip).await.allowed);

    store.set_failing(true);
    let degraded_open = open.check_rate_limit("k", &KeyType::Ip).await;
    assert!(degraded_open.allowed);
    assert!(degraded_open.degraded);

    let degraded_closed = closed.check_rate_limit("k", &KeyType::Ip).await;
    assert!(!degraded_closed.allowed);
    assert!(degraded_closed.degraded);
    assert_eq!(
        degraded_closed.reason,
        Some(DenyReason::BackendUnavailable)
    );

    store.set_failing(false);
    let recovered = closed.check_rate_limit("k", &KeyType::Ip).await;
    assert!(recovered.allowed);
    assert!(!recovered.degraded);
    assert_eq!(store.calls(), 4);
}

#[tokio::test]
async fn test_reset_clears_shared_window() {
    let clock = manual_clock();
    let store = Arc::new(MemoryWindowStore::new());
    let limiter = node(store.clone(), shared(&clock), FailurePolicy::FailOpen);

    for _ in 0..10 {
        limiter.check_rate_limit("k", &KeyType::Ip).await;
    }
    assert!(!limiter.check_rate_limit("k", &KeyType::Ip).await.allowed);
    assert_eq!(store.len(), 1);

    limiter.reset("k", &KeyType::Ip).await;
    assert!(store.is_empty());
    assert!(limiter.check_rate_limit("k", &KeyType::Ip).await.allowed);
}
