//! Redis客户端封装
//!
//! 基于Redis的分布式滑动窗口存储，实现 [`WindowStore`]。
//!
//! # 特性
//!
//! - **连接管理**: 使用ConnectionManager管理连接
//! - **重试机制**: 指数退避重试，连接错误时重新建立连接
//! - **Lua脚本**: 预加载脚本，清理-计数-插入原子执行
//! - **降级状态**: 重试耗尽后标记降级，由上层的故障策略决定放行或拒绝
//!

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, Client, IntoConnectionInfo};
use secrecy::{ExposeSecret, Secret};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::constants::{DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_MAX_RETRIES, MAX_STORE_KEY_LENGTH};
use crate::error::{StorageError, WardenError};
use crate::limiters::{WindowStore, WindowVerdict};
use crate::lua_scripts::{classify_redis_error, LuaScriptManager, LuaScriptType};

/// 验证完整键
///
/// # 返回
/// - `Ok(())`: 验证通过
/// - `Err(StorageError)`: 验证失败
fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::QueryError("键不能为空".to_string()));
    }

    if key.len() > MAX_STORE_KEY_LENGTH {
        return Err(StorageError::QueryError(format!(
            "键长度超过限制（最大 {} 字符）",
            MAX_STORE_KEY_LENGTH
        )));
    }

    // 检查是否包含空字节
    if key.contains('\0') {
        return Err(StorageError::QueryError("键包含非法字符".to_string()));
    }

    Ok(())
}

/// Redis配置
#[derive(Clone)]
pub struct RedisConfig {
    /// Redis连接URL
    pub url: String,
    /// 数据库索引
    pub db: i64,
    /// 密码（使用 Secret 包装以防止意外泄露）
    pub password: Option<Secret<String>>,
    /// 连接超时
    pub connection_timeout: Duration,
    /// 单条命令的读写超时
    pub io_timeout: Duration,
    /// 最大重试次数
    pub max_retries: u32,
    /// 重试初始退避时间
    pub retry_initial_backoff: Duration,
}

impl std::fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConfig")
            .field("url", &self.url)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connection_timeout", &self.connection_timeout)
            .field("io_timeout", &self.io_timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_initial_backoff", &self.retry_initial_backoff)
            .finish()
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            db: 0,
            password: None,
            connection_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(1),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_initial_backoff: Duration::from_millis(DEFAULT_INITIAL_BACKOFF_MS),
        }
    }
}

impl RedisConfig {
    /// 创建新的Redis配置
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// 设置数据库索引
    pub fn db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    /// 设置密码
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Secret::new(password.into()));
        self
    }

    /// 设置密码（使用 Secret）
    pub fn password_secret(mut self, password: Secret<String>) -> Self {
        self.password = Some(password);
        self
    }

    /// 设置连接超时
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// 设置IO超时
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// 设置最大重试次数
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// 设置重试初始退避时间
    pub fn retry_initial_backoff(mut self, backoff: Duration) -> Self {
        self.retry_initial_backoff = backoff;
        self
    }

    /// 构造连接信息，URL中的认证信息会被配置中的密码覆盖
    fn connection_info(&self) -> Result<redis::ConnectionInfo, StorageError> {
        let mut info = self.url.as_str().into_connection_info().map_err(|e| {
            error!("无效的Redis URL: {}", e);
            StorageError::ConnectionError(format!("无效的Redis URL: {}", e))
        })?;

        info.redis.db = self.db;
        if let Some(password) = &self.password {
            info.redis.password = Some(password.expose_secret().clone());
        }
        Ok(info)
    }
}

/// 重试统计
#[derive(Debug, Default, Clone)]
pub struct RetryStats {
    /// 总重试次数
    pub total_retries: Arc<AtomicU64>,
    /// 成功重试次数
    pub successful_retries: Arc<AtomicU64>,
    /// 失败重试次数
    pub failed_retries: Arc<AtomicU64>,
}

impl RetryStats {
    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }

    pub fn successful_retries(&self) -> u64 {
        self.successful_retries.load(Ordering::Relaxed)
    }

    pub fn failed_retries(&self) -> u64 {
        self.failed_retries.load(Ordering::Relaxed)
    }

    /// 记录重试成功
    pub fn record_success(&self) {
        self.total_retries.fetch_add(1, Ordering::Relaxed);
        self.successful_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录重试失败
    pub fn record_failure(&self) {
        self.total_retries.fetch_add(1, Ordering::Relaxed);
        self.failed_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// 重置统计
    pub fn reset(&self) {
        self.total_retries.store(0, Ordering::Relaxed);
        self.successful_retries.store(0, Ordering::Relaxed);
        self.failed_retries.store(0, Ordering::Relaxed);
    }
}

/// Redis窗口存储
///
/// 每个键是一个Sorted Set，成员为 `"{now_ms}-{uuid}"`，分数为放行时间（毫秒）。
/// 同一毫秒内的多个请求因此不会互相覆盖。
#[derive(Clone)]
pub struct RedisStore {
    /// 连接管理器
    conn_manager: Arc<Mutex<Option<ConnectionManager>>>,
    config: RedisConfig,
    lua_manager: Arc<LuaScriptManager>,
    retry_stats: RetryStats,
    /// 降级状态
    degraded: Arc<AtomicBool>,
    /// 最后降级时间
    last_degraded_at: Arc<parking_lot::Mutex<Option<Instant>>>,
}

impl RedisStore {
    /// 连接Redis并预加载Lua脚本
    ///
    /// # 返回
    /// - `Err(WardenError::BackendUnavailable)`: 无法建立连接
    pub async fn connect(config: RedisConfig) -> Result<Self, WardenError> {
        info!("创建Redis存储, URL: {}", config.url);

        let store = Self::disconnected(config);
        store
            .establish()
            .await
            .map_err(|e| WardenError::BackendUnavailable(e.to_string()))?;

        let mut conn = store
            .connection()
            .await
            .map_err(|e| WardenError::BackendUnavailable(e.to_string()))?;
        store
            .lua_manager
            .preload_all_scripts(&mut conn)
            .await
            .map_err(|e| WardenError::BackendUnavailable(e.to_string()))?;

        info!("Redis存储创建成功");
        Ok(store)
    }

    fn disconnected(config: RedisConfig) -> Self {
        Self {
            conn_manager: Arc::new(Mutex::new(None)),
            config,
            lua_manager: Arc::new(LuaScriptManager::new()),
            retry_stats: RetryStats::default(),
            degraded: Arc::new(AtomicBool::new(false)),
            last_degraded_at: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// 检查Redis连接
    pub async fn ping(&self) -> Result<(), WardenError> {
        let io_timeout = self.config.io_timeout;
        self.execute_with_retry(|| async move {
            let mut conn = self.connection().await?;
            let reply = tokio::time::timeout(
                io_timeout,
                redis::cmd("PING").query_async::<_, String>(&mut conn),
            )
            .await
            .map_err(|_| StorageError::TimeoutError("PING超时".to_string()))?;

            reply.map(|_| ()).map_err(|e| {
                error!("Redis PING失败: {}", e);
                classify_redis_error(e)
            })
        })
        .await
        .map_err(|e| WardenError::BackendUnavailable(e.to_string()))
    }

    /// 建立连接
    async fn establish(&self) -> Result<(), StorageError> {
        debug!("建立Redis连接");

        let client = Client::open(self.config.connection_info()?).map_err(|e| {
            error!("创建Redis客户端失败: {}", e);
            StorageError::ConnectionError(format!("创建Redis客户端失败: {}", e))
        })?;

        let conn_manager =
            tokio::time::timeout(self.config.connection_timeout, ConnectionManager::new(client))
                .await
                .map_err(|_| {
                    error!("连接Redis超时: {:?}", self.config.connection_timeout);
                    StorageError::TimeoutError("连接Redis超时".to_string())
                })?
                .map_err(|e| {
                    error!("创建Redis连接管理器失败: {}", e);
                    StorageError::ConnectionError(format!("创建Redis连接管理器失败: {}", e))
                })?;

        *self.conn_manager.lock().await = Some(conn_manager);
        self.set_degraded(false);

        info!("Redis连接建立成功");
        Ok(())
    }

    /// 获取连接（ConnectionManager 可廉价克隆）
    async fn connection(&self) -> Result<ConnectionManager, StorageError> {
        self.conn_manager
            .lock()
            .await
            .as_ref()
            .cloned()
            .ok_or_else(|| StorageError::ConnectionError("连接未初始化".to_string()))
    }

    /// 带重试的执行
    async fn execute_with_retry<F, Fut, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, StorageError>>,
    {
        let mut last_error = None;
        let mut backoff = self.config.retry_initial_backoff;

        for attempt in 0..=self.config.max_retries {
            match f().await {
                Ok(result) => {
                    if attempt > 0 {
                        self.retry_stats.record_success();
                        debug!("重试成功，尝试次数: {}", attempt);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    if attempt < self.config.max_retries {
                        warn!(
                            "操作失败，将在 {:?} 后重试 (尝试 {}/{}): {}",
                            backoff,
                            attempt + 1,
                            self.config.max_retries,
                            e
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.saturating_mul(2);

                        if matches!(e, StorageError::ConnectionError(_)) {
                            if let Err(reconnect_err) = self.reconnect().await {
                                error!("重新连接失败: {}", reconnect_err);
                            }
                        }
                    }
                    last_error = Some(e);
                }
            }
        }

        self.retry_stats.record_failure();
        error!("操作失败，已达最大重试次数: {:?}", last_error);

        if matches!(last_error, Some(StorageError::ConnectionError(_))) {
            self.set_degraded(true);
        }

        Err(last_error.unwrap_or_else(|| StorageError::TimeoutError("操作超时".to_string())))
    }

    /// 重新连接
    async fn reconnect(&self) -> Result<(), StorageError> {
        debug!("尝试重新连接Redis");
        *self.conn_manager.lock().await = None;
        // Redis重启后脚本缓存可能丢失
        self.lua_manager.clear_sha_cache();
        self.establish().await
    }

    /// 设置降级状态
    fn set_degraded(&self, degraded: bool) {
        let previous = self.degraded.swap(degraded, Ordering::SeqCst);
        if previous != degraded {
            if degraded {
                *self.last_degraded_at.lock() = Some(Instant::now());
                warn!("Redis存储已降级");
            } else {
                info!("Redis存储已恢复正常");
            }
        }
    }

    /// 检查是否降级
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// 最后一次进入降级状态的时间
    pub fn last_degraded_at(&self) -> Option<Instant> {
        *self.last_degraded_at.lock()
    }

    /// 获取重试统计
    pub fn retry_stats(&self) -> &RetryStats {
        &self.retry_stats
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }
}

#[async_trait]
impl WindowStore for RedisStore {
    async fn check_and_insert(
        &self,
        key: &str,
        window: Duration,
        max_requests: u64,
        now: DateTime<Utc>,
    ) -> Result<WindowVerdict, StorageError> {
        validate_key(key)?;

        let now_ms = now.timestamp_millis().to_string();
        let window_ms = (window.as_millis() as i64).to_string();
        let max_requests = max_requests.to_string();
        let member = format!("{}-{}", now_ms, uuid::Uuid::new_v4());
        let io_timeout = self.config.io_timeout;

        let (admitted, count, retry_ms): (i64, i64, i64) = self
            .execute_with_retry(|| {
                let args = [
                    now_ms.as_str(),
                    window_ms.as_str(),
                    max_requests.as_str(),
                    member.as_str(),
                ];
                async move {
                    let mut conn = self.connection().await?;
                    tokio::time::timeout(
                        io_timeout,
                        self.lua_manager.execute_script(
                            &mut conn,
                            LuaScriptType::SlidingWindowLog,
                            &[key],
                            &args,
                        ),
                    )
                    .await
                    .map_err(|_| StorageError::TimeoutError("滑动窗口脚本超时".to_string()))?
                }
            })
            .await?;

        trace!(key, admitted, count, retry_ms, "滑动窗口脚本返回");

        Ok(WindowVerdict {
            admitted: admitted == 1,
            count: count.max(0) as u64,
            retry_after: Duration::from_millis(retry_ms.max(0) as u64),
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        let io_timeout = self.config.io_timeout;

        self.execute_with_retry(|| async move {
            let mut conn = self.connection().await?;
            let reply = tokio::time::timeout(
                io_timeout,
                redis::cmd("DEL").arg(key).query_async::<_, i64>(&mut conn),
            )
            .await
            .map_err(|_| StorageError::TimeoutError("DEL超时".to_string()))?;
            reply.map(|_| ()).map_err(classify_redis_error)
        })
        .await
    }
}
