// ==========================================
// 水资源风险监测平台 - 导入配置项
// ==========================================
// 职责: 导入管道运行参数（并发、历史容量、HTTP 超时、重试退避）
// 来源: config_kv 表（缺省使用 Default）
// ==========================================

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 远程请求重试策略（指数退避，带上限）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,        // 首次请求之外的重试次数
    pub initial_backoff_ms: u64, // 第一次重试前等待
    pub max_backoff_ms: u64,     // 单次等待上限
    pub multiplier: f64,         // 退避倍数
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 第 `retry` 次重试前的等待时间（retry 从 1 开始）
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(32) as i32;
        let factor = self.multiplier.max(1.0).powi(exp);
        let ms = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(ms.max(0.0) as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportSettings {
    pub max_workers: usize,                 // 批量导入工作池大小
    pub history_limit: usize,               // 历史记录保留条数
    pub default_history_query_limit: usize, // 历史查询默认条数
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_pages: u32, // 远程分页上限
    pub user_agent: String,
    pub retry: RetryPolicy,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            max_workers: 4,
            history_limit: 1000,
            default_history_query_limit: 100,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            max_pages: 100,
            user_agent: "WaterRisk-DataImporter/1.0".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ImportSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
