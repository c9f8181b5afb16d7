//! 端到端测试：分级配额与每日上限
//!
//! 测试场景：
//! 1. 每日上限耗尽后拒绝，重试时间指向 UTC 零点
//! 2. 跨日后计数清零
//! 3. 令牌桶拒绝的请求不计入每日用量
//! 4. 未登记的凭证使用默认等级

use crate::common::*;
use ratewarden::{
    DenyReason, MemoryCredentialRegistry, TierDefinition, TieredQuotaConfig, TieredQuotaManager,
    WardenError,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn manager(clock: &ratewarden::ManualClock) -> TieredQuotaManager {
    let mut tiers = BTreeMap::new();
    tiers.insert(
        "trial".to_string(),
        TierDefinition::new(100, 100.0, Duration::from_secs(3600), Some(5)),
    );
    tiers.insert(
        "tiny".to_string(),
        TierDefinition::new(2, 2.0, Duration::from_secs(3600), Some(10)),
    );
    tiers.insert("enterprise".to_string(), TierDefinition::enterprise());

    TieredQuotaManager::new(
        TieredQuotaConfig {
            tiers,
            default_tier: "trial".to_string(),
        },
        Arc::new(MemoryCredentialRegistry::new()),
        shared(clock),
    )
    .unwrap()
}

#[tokio::test]
async fn test_daily_limit_rolls_over_at_midnight() {
    let clock = manual_clock();
    clock.set(at(2026, 3, 1, 23, 59, 0));
    let manager = manager(&clock);
    manager.register_api_key("sk_trial", "trial").await.unwrap();

    for used in 1..=5 {
        let result = manager.check_limit("sk_trial").await;
        assert!(result.decision.allowed);
        assert_eq!(result.tier, "trial");
        assert_eq!(result.daily_used, used);
        assert_eq!(result.daily_remaining, Some(5 - used));
    }

    let denied = manager.check_limit("sk_trial").await;
    assert!(!denied.decision.allowed);
    assert_eq!(denied.decision.reason, Some(DenyReason::DailyLimitExceeded));
    assert_eq!(denied.decision.retry_after, Some(Duration::from_secs(60)));
    assert_eq!(denied.daily_used, 5);
    assert_eq!(denied.daily_remaining, Some(0));

    // 拒绝不改变用量
    assert_eq!(manager.usage("sk_trial").await.used_today, 5);

    clock.advance(Duration::from_secs(61));
    let next_day = manager.check_limit("sk_trial").await;
    assert!(next_day.decision.allowed);
    assert_eq!(next_day.daily_used, 1);

    let usage = manager.usage("sk_trial").await;
    assert_eq!(usage.date, at(2026, 3, 2, 0, 0, 0).date_naive());
    assert_eq!(usage.remaining_today, Some(4));
    assert_eq!(manager.purge_stale_usage(), 1);
}

#[tokio::test]
async fn test_bucket_denial_does_not_count_toward_daily() {
    let clock = manual_clock();
    let manager = manager(&clock);
    manager.register_api_key("sk_tiny", "tiny").await.unwrap();

    assert!(manager.check_limit("sk_tiny").await.decision.allowed);
    assert!(manager.check_limit("sk_tiny").await.decision.allowed);

    let denied = manager.check_limit("sk_tiny").await;
    assert!(!denied.decision.allowed);
    assert_eq!(denied.decision.reason, Some(DenyReason::RateLimited));
    assert_eq!(denied.daily_used, 2);
    assert_eq!(manager.usage("sk_tiny").await.used_today, 2);

    // 一小时后令牌补满
    clock.advance(Duration::from_secs(3600));
    assert!(manager.check_limit("sk_tiny").await.decision.allowed);
    assert_eq!(manager.usage("sk_tiny").await.used_today, 3);
}

#[tokio::test]
async fn test_unlimited_tier_and_default_fallback() {
    let clock = manual_clock();
    let manager = manager(&clock);
    let key_hash = manager
        .register_api_key("sk_big", "enterprise")
        .await
        .unwrap();
    assert_eq!(key_hash.len(), 64);
    assert!(!key_hash.contains("sk_big"));

    let result = manager.check_limit("sk_big").await;
    assert!(result.decision.allowed);
    assert_eq!(result.daily_limit, None);
    assert_eq!(result.daily_remaining, None);
    assert_eq!(result.daily_used, 1);
    assert_eq!(result.decision.limit, 100_000);

    // 未登记的凭证回落到默认等级
    let anonymous = manager.check_limit("sk_unknown").await;
    assert_eq!(anonymous.tier, "trial");
    assert_eq!(anonymous.daily_limit, Some(5));
    assert_eq!(manager.tier_of("sk_unknown").await, "trial");
}

#[tokio::test]
async fn test_registration_errors() {
    let clock = manual_clock();
    let manager = manager(&clock);

    assert!(matches!(
        manager.register_api_key("sk_x", "platinum").await,
        Err(WardenError::InvalidTier(tier)) if tier == "platinum"
    ));
    assert!(matches!(
        manager.register_api_key("", "trial").await,
        Err(WardenError::ValidationError(_))
    ));
    assert!(matches!(
        manager.register_api_key(&"k".repeat(513), "trial").await,
        Err(WardenError::ValidationError(_))
    ));
    assert_eq!(manager.registered_keys().await, 0);

    // 重新登记覆盖等级
    manager.register_api_key("sk_x", "tiny").await.unwrap();
    manager.register_api_key("sk_x", "enterprise").await.unwrap();
    assert_eq!(manager.tier_of("sk_x").await, "enterprise");
    assert_eq!(manager.registered_keys().await, 1);
}
