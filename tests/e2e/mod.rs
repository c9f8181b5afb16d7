//! 端到端测试模块
//!
//! 测试完整的业务流程和场景

mod messaging_abuse;
mod quota_daily_rollover;
mod rate_limit_to_ban;
mod topic_and_region;
