// ==========================================
// 水资源风险监测平台 - 导入配置读取 Trait
// ==========================================
// 职责: 定义导入管道所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::config::error::ConfigError;
use crate::config::settings::{ImportSettings, RetryPolicy};
use async_trait::async_trait;

// ==========================================
// ImportConfigReader Trait
// ==========================================
// 用途: 导入管道所需的配置读取接口
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait ImportConfigReader: Send + Sync {
    /// 批量导入并发数
    ///
    /// # 默认值
    /// - 4（最小 1）
    async fn get_max_workers(&self) -> Result<usize, ConfigError>;

    /// 历史记录保留上限
    ///
    /// # 默认值
    /// - 1000
    async fn get_history_limit(&self) -> Result<usize, ConfigError>;

    /// 历史查询默认返回条数
    async fn get_history_query_limit(&self) -> Result<usize, ConfigError>;

    /// 单次 HTTP 请求超时（秒）
    async fn get_request_timeout_secs(&self) -> Result<u64, ConfigError>;

    /// HTTP 建连超时（秒）
    async fn get_connect_timeout_secs(&self) -> Result<u64, ConfigError>;

    /// 远程分页上限
    async fn get_max_pages(&self) -> Result<u32, ConfigError>;

    async fn get_user_agent(&self) -> Result<String, ConfigError>;

    /// 远程请求重试策略
    async fn get_retry_policy(&self) -> Result<RetryPolicy, ConfigError>;

    /// 组装完整导入配置
    async fn load_settings(&self) -> Result<ImportSettings, ConfigError> {
        Ok(ImportSettings {
            max_workers: self.get_max_workers().await?,
            history_limit: self.get_history_limit().await?,
            default_history_query_limit: self.get_history_query_limit().await?,
            request_timeout_secs: self.get_request_timeout_secs().await?,
            connect_timeout_secs: self.get_connect_timeout_secs().await?,
            max_pages: self.get_max_pages().await?,
            user_agent: self.get_user_agent().await?,
            retry: self.get_retry_policy().await?,
        })
    }
}
