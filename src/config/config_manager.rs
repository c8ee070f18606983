// ==========================================
// 水资源风险监测平台 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::error::ConfigError;
use crate::config::import_config_trait::ImportConfigReader;
use crate::config::settings::{ImportSettings, RetryPolicy};
use crate::db::{configure_sqlite_connection, init_schema, open_sqlite_connection};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
    defaults: ImportSettings,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例（自动建表）
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, ConfigError> {
        let conn = open_sqlite_connection(db_path)?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            defaults: ImportSettings::default(),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, ConfigError> {
        {
            let guard = conn
                .lock()
                .map_err(|e| ConfigError::LockError(e.to_string()))?;
            configure_sqlite_connection(&guard)?;
            init_schema(&guard)?;
        }

        Ok(Self {
            conn,
            defaults: ImportSettings::default(),
        })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_config_value(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConfigError::LockError(e.to_string()))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(ConfigError::ReadError {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// 写入配置（UPSERT）
    pub fn update_config(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConfigError::LockError(e.to_string()))?;

        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at)
             VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )
        .map_err(|e| ConfigError::WriteError {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        tracing::info!(config_key = key, value = value, "配置已更新");
        Ok(())
    }

    /// 读取并解析配置，缺失或格式错误时回退默认值
    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + std::fmt::Display,
    {
        let raw = match self.get_config_value(key)? {
            Some(v) => v,
            None => return Ok(default),
        };

        match raw.trim().parse::<T>() {
            Ok(v) => Ok(v),
            Err(_) => {
                tracing::warn!(
                    config_key = key,
                    raw_value = %raw,
                    default = %default,
                    "配置值格式错误，使用默认值"
                );
                Ok(default)
            }
        }
    }
}

#[async_trait]
impl ImportConfigReader for ConfigManager {
    async fn get_max_workers(&self) -> Result<usize, ConfigError> {
        let value = self.get_parsed_or_default(config_keys::MAX_WORKERS, self.defaults.max_workers)?;
        Ok(value.max(1))
    }

    async fn get_history_limit(&self) -> Result<usize, ConfigError> {
        self.get_parsed_or_default(config_keys::HISTORY_LIMIT, self.defaults.history_limit)
    }

    async fn get_history_query_limit(&self) -> Result<usize, ConfigError> {
        self.get_parsed_or_default(
            config_keys::HISTORY_QUERY_LIMIT,
            self.defaults.default_history_query_limit,
        )
    }

    async fn get_request_timeout_secs(&self) -> Result<u64, ConfigError> {
        self.get_parsed_or_default(
            config_keys::REQUEST_TIMEOUT_SECS,
            self.defaults.request_timeout_secs,
        )
    }

    async fn get_connect_timeout_secs(&self) -> Result<u64, ConfigError> {
        self.get_parsed_or_default(
            config_keys::CONNECT_TIMEOUT_SECS,
            self.defaults.connect_timeout_secs,
        )
    }

    async fn get_max_pages(&self) -> Result<u32, ConfigError> {
        self.get_parsed_or_default(config_keys::MAX_PAGES, self.defaults.max_pages)
    }

    async fn get_user_agent(&self) -> Result<String, ConfigError> {
        Ok(self
            .get_config_value(config_keys::USER_AGENT)?
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.defaults.user_agent.clone()))
    }

    async fn get_retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        let d = &self.defaults.retry;
        Ok(RetryPolicy {
            max_retries: self.get_parsed_or_default(config_keys::RETRY_MAX_RETRIES, d.max_retries)?,
            initial_backoff_ms: self
                .get_parsed_or_default(config_keys::RETRY_INITIAL_BACKOFF_MS, d.initial_backoff_ms)?,
            max_backoff_ms: self
                .get_parsed_or_default(config_keys::RETRY_MAX_BACKOFF_MS, d.max_backoff_ms)?,
            multiplier: self.get_parsed_or_default(config_keys::RETRY_MULTIPLIER, d.multiplier)?,
        })
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 并发与历史
    pub const MAX_WORKERS: &str = "import_max_workers";
    pub const HISTORY_LIMIT: &str = "import_history_limit";
    pub const HISTORY_QUERY_LIMIT: &str = "import_history_query_limit";

    // 远程请求
    pub const REQUEST_TIMEOUT_SECS: &str = "import_request_timeout_secs";
    pub const CONNECT_TIMEOUT_SECS: &str = "import_connect_timeout_secs";
    pub const MAX_PAGES: &str = "import_max_pages";
    pub const USER_AGENT: &str = "import_user_agent";

    // 重试退避
    pub const RETRY_MAX_RETRIES: &str = "import_retry_max_retries";
    pub const RETRY_INITIAL_BACKOFF_MS: &str = "import_retry_initial_backoff_ms";
    pub const RETRY_MAX_BACKOFF_MS: &str = "import_retry_max_backoff_ms";
    pub const RETRY_MULTIPLIER: &str = "import_retry_multiplier";
}
