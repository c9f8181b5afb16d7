//! 集成测试模块
//!
//! 测试配置、工厂和存储之间的集成

mod config_test;
mod distributed_test;
#[cfg(feature = "redis")]
mod redis_test;
