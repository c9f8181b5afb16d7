//! 端到端测试：消息通道滥用防护
//!
//! 测试场景：
//! 1. 单客户端连接数超限后被封禁并断开所有连接
//! 2. 全局连接数上限
//! 3. 消息洪泛触发可疑模式封禁，封禁到期后恢复

use crate::common::*;
use ratewarden::{ConnectionDecision, DenyReason, MessagingGuard, MessagingGuardConfig};
use std::time::Duration;

fn guard_config() -> MessagingGuardConfig {
    MessagingGuardConfig {
        message_rate_limit: 5,
        global_connection_limit: 3,
        per_client_connection_limit: 2,
        ban_duration: Duration::from_secs(60),
        pattern_window: Duration::from_secs(60),
        pattern_min_samples: 3,
        suspicious_multiplier: 2,
        ..MessagingGuardConfig::default()
    }
}

#[test]
fn test_too_many_connections_bans_client() {
    let clock = manual_clock();
    let guard = MessagingGuard::new(guard_config(), shared(&clock)).unwrap();

    assert_eq!(
        guard.check_connection_limit("bot", "c1"),
        ConnectionDecision::Accepted {
            client_connections: 1
        }
    );
    // 同一连接重复登记不重复计数
    assert_eq!(
        guard.check_connection_limit("bot", "c1"),
        ConnectionDecision::Accepted {
            client_connections: 1
        }
    );
    assert!(guard.check_connection_limit("bot", "c2").is_allowed());
    assert_eq!(guard.stats().open_connections, 2);

    assert_eq!(
        guard.check_connection_limit("bot", "c3"),
        ConnectionDecision::Rejected {
            reason: DenyReason::TooManyConnections
        }
    );

    let ban = guard.is_banned("bot").expect("client should be banned");
    assert_eq!(ban.reason, "too many connections");
    let stats = guard.stats();
    assert_eq!(stats.open_connections, 0);
    assert_eq!(stats.connected_clients, 0);
    assert_eq!(stats.banned_clients, 1);

    // 封禁期间任何连接都被拒绝
    assert!(matches!(
        guard.check_connection_limit("bot", "c4"),
        ConnectionDecision::Rejected {
            reason: DenyReason::Banned(_)
        }
    ));

    clock.advance(Duration::from_secs(60));
    assert!(guard.check_connection_limit("bot", "c5").is_allowed());
}

#[test]
fn test_global_connection_limit() {
    let clock = manual_clock();
    let guard = MessagingGuard::new(guard_config(), shared(&clock)).unwrap();

    let (first, decision) = guard.open_connection("a");
    assert!(decision.is_allowed());
    assert!(guard.open_connection("b").1.is_allowed());
    assert!(guard.open_connection("c").1.is_allowed());

    assert_eq!(
        guard.open_connection("d").1,
        ConnectionDecision::Rejected {
            reason: DenyReason::ConnectionLimitReached
        }
    );
    // 全局上限不会封禁客户端
    assert!(guard.is_banned("d").is_none());

    assert!(guard.remove_connection("a", &first));
    assert!(!guard.remove_connection("a", &first));
    assert!(guard.open_connection("d").1.is_allowed());
}

#[tokio::test]
async fn test_message_flood_triggers_pattern_ban() {
    init_test_logging();
    let clock = manual_clock();
    let guard = MessagingGuard::new(guard_config(), shared(&clock)).unwrap();

    // 令牌桶放行前 5 条
    for _ in 0..5 {
        assert!(guard.check_message_rate("flooder").await.allowed);
    }
    // 第 6-10 条被限流，但仍计入流量
    for _ in 0..5 {
        let decision = guard.check_message_rate("flooder").await;
        assert!(!decision.allowed);
        assert!(!decision.blocked);
        assert_eq!(decision.reason, Some(DenyReason::RateLimited));
    }

    // 第 11 条超过 2 × 5 的阈值
    let banned = guard.check_message_rate("flooder").await;
    assert!(!banned.allowed);
    assert!(banned.blocked);
    assert_eq!(banned.reason, Some(DenyReason::SuspiciousPattern));
    assert_eq!(banned.retry_after, Some(Duration::from_secs(60)));

    let record = guard.is_banned("flooder").expect("flooder should be banned");
    assert!(record.reason.starts_with("suspicious pattern: 11 msgs"));

    let blocked = guard.check_message_rate("flooder").await;
    assert!(blocked.blocked);
    assert!(matches!(blocked.reason, Some(DenyReason::Banned(_))));

    // 其他客户端不受影响
    assert!(guard.check_message_rate("polite").await.allowed);

    clock.advance(Duration::from_secs(60));
    let report = guard.sweep();
    assert_eq!(report.expired_bans, 1);
    assert!(guard.is_banned("flooder").is_none());
    assert!(guard.check_message_rate("flooder").await.allowed);
}

#[tokio::test]
async fn test_sweep_drops_stale_logs() {
    let clock = manual_clock();
    let config = MessagingGuardConfig {
        stale_log_age: Duration::from_secs(300),
        ..guard_config()
    };
    let guard = MessagingGuard::new(config, shared(&clock)).unwrap();

    guard.check_message_rate("a").await;
    guard.check_message_rate("b").await;
    assert_eq!(guard.stats().tracked_clients, 2);

    clock.advance(Duration::from_secs(200));
    guard.check_message_rate("b").await;

    clock.advance(Duration::from_secs(100));
    let report = guard.sweep();
    assert_eq!(report.trimmed_entries, 2);
    assert_eq!(report.dropped_logs, 1);
    assert_eq!(guard.stats().tracked_clients, 1);
}
