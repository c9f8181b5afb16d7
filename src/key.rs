//! 限流键
//!
//! 组合键 `(key_type, identifier)`，渲染为 `"{key_type}:{identifier}"`。
//! 对策略而言键只是不透明的字符串。

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// 标识符类型
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    /// IP 地址
    #[default]
    Ip,
    /// API Key（仅存哈希）
    ApiKey,
    /// 消息客户端
    Client,
    /// 发布主题
    Topic,
    /// 自定义类型
    Custom(String),
}

impl KeyType {
    /// 键前缀
    pub fn as_str(&self) -> &str {
        match self {
            KeyType::Ip => "ip",
            KeyType::ApiKey => "api_key",
            KeyType::Client => "client",
            KeyType::Topic => "topic",
            KeyType::Custom(name) => name.as_str(),
        }
    }

    /// 从字符串解析，未知值视为自定义类型
    pub fn parse(s: &str) -> Self {
        match s {
            "ip" => KeyType::Ip,
            "api_key" => KeyType::ApiKey,
            "client" => KeyType::Client,
            "topic" => KeyType::Topic,
            other => KeyType::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 组合限流键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey {
    pub key_type: KeyType,
    pub identifier: String,
}

impl RateKey {
    pub fn new(key_type: KeyType, identifier: impl Into<String>) -> Self {
        Self {
            key_type,
            identifier: identifier.into(),
        }
    }

    /// 策略使用的存储键
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.key_type, self.identifier)
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.key_type, self.identifier)
    }
}

/// 计算凭证的 SHA-256 十六进制摘要
///
/// 原始凭证不会被保留。
pub fn hash_credential(credential: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(credential.as_bytes());
    hex::encode(hasher.finalize())
}
