//! 配置加载集成测试
//!
//! 从配置文件构建各组件并验证行为

use crate::common::*;
use ratewarden::{KeyType, MemoryCredentialRegistry, StrategyConfig, WardenConfig, WardenError};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

const YAML: &str = r#"
limiter:
  type: SlidingWindow
  window_size: "10s"
  max_requests: 3
tiers:
  default_tier: free
  tiers:
    free:
      capacity: 2
      refill_rate: 2
      refill_period: "1h"
      daily_limit: 2
messaging:
  message_rate_limit: 50
  per_client_connection_limit: 1
topics:
  topics_per_client: 1
  messages_per_topic: 1
"#;

#[tokio::test]
async fn test_components_from_yaml_file() {
    let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
    file.write_all(YAML.as_bytes()).unwrap();

    let config = WardenConfig::from_file(file.path()).unwrap();
    let clock = manual_clock();

    let limiter = config.build_limiter(shared(&clock)).unwrap();
    assert_eq!(limiter.strategy_name(), "sliding_window");
    for _ in 0..3 {
        assert!(limiter.check_rate_limit("k", &KeyType::Ip).await.allowed);
    }
    assert!(!limiter.check_rate_limit("k", &KeyType::Ip).await.allowed);
    clock.advance(Duration::from_secs(11));
    assert!(limiter.check_rate_limit("k", &KeyType::Ip).await.allowed);

    let quota = config
        .build_quota_manager(Arc::new(MemoryCredentialRegistry::new()), shared(&clock))
        .unwrap();
    assert_eq!(quota.tier_names(), vec!["free".to_string()]);
    assert!(quota.check_limit("sk").await.decision.allowed);
    assert!(quota.check_limit("sk").await.decision.allowed);
    assert!(!quota.check_limit("sk").await.decision.allowed);

    let guard = config.build_messaging_guard(shared(&clock)).unwrap();
    assert!(guard.open_connection("c").1.is_allowed());
    assert!(!guard.open_connection("c").1.is_allowed());

    let topics = config.build_topic_throttle(shared(&clock)).unwrap();
    assert!(topics.subscribe("c", "t1"));
    assert!(!topics.subscribe("c", "t2"));
}

#[test]
fn test_toml_distributed_section() {
    let toml = r#"
[limiter]
type = "Distributed"
window_size = 30
max_requests = 10

[limiter.store]
failure_policy = "fail_open"
"#;
    let config = WardenConfig::from_toml_str(toml).unwrap();
    match config.limiter {
        StrategyConfig::Distributed {
            window_size, store, ..
        } => {
            assert_eq!(window_size, Duration::from_secs(30));
            assert_eq!(store.key_prefix, "rate_limit:");
            assert_eq!(store.operation_timeout, Duration::from_millis(250));
            assert!(store.redis_url.is_none());
        }
        other => panic!("unexpected strategy: {:?}", other),
    }
}

#[test]
fn test_invalid_files_are_rejected() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(b"messaging:\n  message_rate_limit: 0\n").unwrap();
    assert!(matches!(
        WardenConfig::from_file(file.path()),
        Err(WardenError::ConfigError(_))
    ));

    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(b"[limiter\n").unwrap();
    assert!(matches!(
        WardenConfig::from_file(file.path()),
        Err(WardenError::TomlError(_))
    ));
}
