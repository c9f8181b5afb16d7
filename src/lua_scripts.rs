//! Lua脚本管理器
//!
//! 提供Redis Lua脚本的预加载、SHA缓存和版本管理功能。
//!
//! # 特性
//!
//! - **脚本预加载**: 避免重复传输脚本
//! - **SHA缓存**: 缓存脚本SHA避免重复计算
//! - **原子性操作**: 清理、计数、插入在一次脚本调用中完成
//! - **NOSCRIPT恢复**: Redis重启丢失脚本缓存后自动重新加载

use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, trace};

use crate::error::StorageError;

/// Lua脚本类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LuaScriptType {
    /// 滑动窗口日志（清理-计数-条件插入）
    SlidingWindowLog,
}

impl LuaScriptType {
    /// 获取脚本名称
    pub fn name(&self) -> &str {
        match self {
            LuaScriptType::SlidingWindowLog => "sliding_window_log",
        }
    }

    /// 获取脚本版本
    pub fn version(&self) -> &str {
        match self {
            LuaScriptType::SlidingWindowLog => "1.0",
        }
    }

    /// 所有脚本类型
    pub fn all() -> &'static [LuaScriptType] {
        &[LuaScriptType::SlidingWindowLog]
    }
}

/// 滑动窗口日志Lua脚本
///
/// 使用Redis Sorted Set保存放行时间戳（毫秒）。
/// 参数: KEYS[1] - key, ARGV[1] - now (ms), ARGV[2] - window (ms), ARGV[3] - max_requests, ARGV[4] - member
/// 返回: {admitted: 0|1, count: int, retry_after_ms: int}
pub const SLIDING_WINDOW_LOG_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max_requests = tonumber(ARGV[3])
local member = ARGV[4]

-- 移除窗口下界之前的记录
redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. (now - window))

local count = redis.call('ZCARD', key)

if count < max_requests then
    redis.call('ZADD', key, now, member)
    redis.call('PEXPIRE', key, window + 1000)
    return {1, count + 1, 0}
end

-- 最早的记录离开窗口的时间
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local retry_after = 0
if #oldest > 0 then
    retry_after = tonumber(oldest[2]) + window - now
    if retry_after < 0 then
        retry_after = 0
    end
end

return {0, count, retry_after}
"#;

/// Lua脚本信息
#[derive(Debug, Clone)]
pub struct LuaScriptInfo {
    /// 脚本类型
    pub script_type: LuaScriptType,
    /// 脚本内容
    pub script: &'static str,
    /// SHA哈希（预加载后填充）
    pub sha: Arc<parking_lot::Mutex<Option<String>>>,
}

impl LuaScriptInfo {
    /// 创建新的脚本信息
    pub fn new(script_type: LuaScriptType, script: &'static str) -> Self {
        Self {
            script_type,
            script,
            sha: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// 获取脚本SHA，如果未计算则返回None
    pub fn get_sha(&self) -> Option<String> {
        self.sha.lock().clone()
    }

    /// 设置脚本SHA
    pub fn set_sha(&self, sha: String) {
        *self.sha.lock() = Some(sha);
    }
}

/// Lua脚本管理器
pub struct LuaScriptManager {
    scripts: HashMap<LuaScriptType, LuaScriptInfo>,
}

impl LuaScriptManager {
    /// 创建新的脚本管理器
    pub fn new() -> Self {
        let mut scripts = HashMap::new();
        for &script_type in LuaScriptType::all() {
            let source = match script_type {
                LuaScriptType::SlidingWindowLog => SLIDING_WINDOW_LOG_SCRIPT,
            };
            scripts.insert(script_type, LuaScriptInfo::new(script_type, source));
        }

        Self { scripts }
    }

    /// 获取脚本信息
    pub fn get_script(&self, script_type: LuaScriptType) -> Option<&LuaScriptInfo> {
        self.scripts.get(&script_type)
    }

    /// 获取所有脚本
    pub fn get_all_scripts(&self) -> Vec<&LuaScriptInfo> {
        self.scripts.values().collect()
    }

    /// 预加载所有脚本到Redis
    pub async fn preload_all_scripts<C>(&self, conn: &mut C) -> Result<(), StorageError>
    where
        C: AsyncCommands + redis::aio::ConnectionLike,
    {
        info!("开始预加载Lua脚本到Redis");

        for script_info in self.get_all_scripts() {
            self.preload_script(conn, script_info).await?;
        }

        info!("Lua脚本预加载完成");
        Ok(())
    }

    /// 预加载单个脚本
    pub async fn preload_script<C>(
        &self,
        conn: &mut C,
        script_info: &LuaScriptInfo,
    ) -> Result<(), StorageError>
    where
        C: AsyncCommands + redis::aio::ConnectionLike,
    {
        let sha = Script::new(script_info.script).get_hash().to_string();

        let _: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(script_info.script)
            .query_async(conn)
            .await
            .map_err(|e| {
                error!("预加载脚本失败: {:?}, 错误: {}", script_info.script_type, e);
                StorageError::ConnectionError(format!("预加载脚本失败: {}", e))
            })?;

        script_info.set_sha(sha.clone());
        debug!(
            "脚本预加载成功: {} v{}, SHA: {}",
            script_info.script_type.name(),
            script_info.script_type.version(),
            sha
        );

        Ok(())
    }

    /// 执行脚本（使用SHA）
    ///
    /// SHA不存在（NOSCRIPT）时重新加载并重试一次。
    pub async fn execute_script<C, T>(
        &self,
        conn: &mut C,
        script_type: LuaScriptType,
        keys: &[&str],
        args: &[&str],
    ) -> Result<T, StorageError>
    where
        C: AsyncCommands + redis::aio::ConnectionLike,
        T: redis::FromRedisValue,
    {
        let script_info = self
            .get_script(script_type)
            .ok_or_else(|| StorageError::QueryError(format!("未找到脚本: {:?}", script_type)))?;

        if script_info.get_sha().is_none() {
            self.preload_script(conn, script_info).await?;
        }
        let sha = script_info
            .get_sha()
            .ok_or_else(|| StorageError::QueryError("脚本SHA未初始化".to_string()))?;

        trace!("执行脚本: {:?}, SHA: {}", script_type, sha);

        match redis::cmd("EVALSHA")
            .arg(&sha)
            .arg(keys.len())
            .arg(keys)
            .arg(args)
            .query_async::<_, T>(conn)
            .await
        {
            Ok(result) => Ok(result),
            Err(e) if e.kind() == redis::ErrorKind::NoScriptError => {
                debug!("脚本SHA不存在，重新加载: {:?}", script_type);
                self.preload_script(conn, script_info).await?;

                redis::cmd("EVALSHA")
                    .arg(&sha)
                    .arg(keys.len())
                    .arg(keys)
                    .arg(args)
                    .query_async::<_, T>(conn)
                    .await
                    .map_err(|e| {
                        error!("脚本执行失败: {:?}, 错误: {}", script_type, e);
                        classify_redis_error(e)
                    })
            }
            Err(e) => {
                error!("脚本执行失败: {:?}, 错误: {}", script_type, e);
                Err(classify_redis_error(e))
            }
        }
    }

    /// 清除所有脚本的SHA缓存
    pub fn clear_sha_cache(&self) {
        for script_info in self.get_all_scripts() {
            *script_info.sha.lock() = None;
        }
        debug!("已清除所有脚本的SHA缓存");
    }
}

impl Default for LuaScriptManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 把Redis错误映射为存储错误，连接类错误触发重连
pub(crate) fn classify_redis_error(e: redis::RedisError) -> StorageError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
        StorageError::ConnectionError(e.to_string())
    } else if e.is_timeout() {
        StorageError::TimeoutError(e.to_string())
    } else {
        StorageError::QueryError(e.to_string())
    }
}
