//! 封禁表
//!
//! 按键保存临时封禁记录。过期记录在读取时惰性删除，
//! 也可以通过 [`BanTable::purge_expired`] 批量清理。

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 封禁记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanRecord {
    /// 封禁时间
    pub banned_at: DateTime<Utc>,
    /// 过期时间
    pub expires_at: DateTime<Utc>,
    /// 封禁原因
    pub reason: String,
}

impl BanRecord {
    /// 在给定时间是否仍然有效
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// 封禁表
#[derive(Debug, Default)]
pub struct BanTable {
    records: DashMap<String, BanRecord>,
}

impl BanTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 封禁某个键，已有记录会被覆盖
    pub fn ban(
        &self,
        key: impl Into<String>,
        expires_at: DateTime<Utc>,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> BanRecord {
        let record = BanRecord {
            banned_at: now,
            expires_at,
            reason: reason.into(),
        };
        self.records.insert(key.into(), record.clone());
        record
    }

    /// 查询有效的封禁记录，过期记录会被删除
    pub fn is_banned(&self, key: &str, now: DateTime<Utc>) -> Option<BanRecord> {
        if let Some(record) = self.records.get(key) {
            if record.is_active(now) {
                return Some(record.clone());
            }
        }

        // 释放读锁后再删除，避免同一分片上的死锁
        if self
            .records
            .remove_if(key, |_, record| !record.is_active(now))
            .is_some()
        {
            debug!(key, "封禁已过期，移除记录");
        }
        None
    }

    /// 解除封禁，返回是否存在记录
    pub fn unban(&self, key: &str) -> bool {
        self.records.remove(key).is_some()
    }

    /// 清理所有过期记录，返回清理数量
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| record.is_active(now));
        before.saturating_sub(self.records.len())
    }

    /// 当前记录数（可能包含尚未清理的过期记录）
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
