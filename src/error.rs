//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 错误类型定义
//!
//! 使用thiserror定义所有错误类型。拒绝（Denied）是正常的决策结果，
//! 不属于错误，见 [`crate::decision::Decision`]。

use thiserror::Error;

/// Ratewarden 错误类型
#[derive(Error, Debug)]
pub enum WardenError {
    /// 配置错误（构造阶段立即失败，不会出现在请求路径上）
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 无效的等级
    #[error("无效的等级: {0}")]
    InvalidTier(String),

    /// 存储错误
    #[error("存储错误: {0}")]
    Storage(#[from] StorageError),

    /// 后端不可用
    #[error("后端不可用: {0}")]
    BackendUnavailable(String),

    /// 验证错误
    #[error("验证错误: {0}")]
    ValidationError(String),

    /// IO错误
    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML解析错误
    #[error("YAML解析错误: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML解析错误
    #[error("TOML解析错误: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// 存储错误
#[derive(Error, Debug, Clone)]
pub enum StorageError {
    /// 连接错误
    #[error("连接错误: {0}")]
    ConnectionError(String),

    /// 查询错误
    #[error("查询错误: {0}")]
    QueryError(String),

    /// 超时错误
    #[error("超时错误: {0}")]
    TimeoutError(String),
}
