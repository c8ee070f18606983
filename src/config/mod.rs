// ==========================================
// 水资源风险监测平台 - 配置层
// ==========================================
// 职责: 导入管道运行参数的读取与覆写
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod error;
pub mod import_config_trait;
pub mod settings;

// 重导出核心配置类型
pub use config_manager::{config_keys, ConfigManager};
pub use error::ConfigError;
pub use import_config_trait::ImportConfigReader;
pub use settings::{ImportSettings, RetryPolicy};
