//! 日志初始化
//!
//! 基于 `tracing-subscriber` 的 fmt 输出，过滤规则优先读取 `RUST_LOG`。
//!
//! # 示例
//!
//! ```rust,no_run
//! ratewarden::telemetry::init_tracing("ratewarden=debug").unwrap();
//! ```

use tracing_subscriber::EnvFilter;

use crate::error::WardenError;

/// 默认过滤规则
pub const DEFAULT_FILTER: &str = "ratewarden=info";

/// 安装全局 tracing subscriber
///
/// `RUST_LOG` 存在时覆盖 `default_filter`；重复安装返回错误。
pub fn init_tracing(default_filter: &str) -> Result<(), WardenError> {
    let filter = build_filter(default_filter)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| WardenError::ConfigError(format!("日志初始化失败: {}", e)))
}

fn build_filter(default_filter: &str) -> Result<EnvFilter, WardenError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_filter)
            .map_err(|e| WardenError::ConfigError(format!("无效的日志过滤规则: {}", e))),
    }
}
