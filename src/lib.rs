// ==========================================
// 水资源风险监测平台 - 数据导入核心库
// ==========================================
// 技术栈: Tokio + Reqwest + SQLite
// 系统定位: 多源监测数据的统一导入管道
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 任务、记录、规则、结果
pub mod domain;

// 写入端层 - 记录持久化
pub mod repository;

// 导入层 - 适配器与管道
pub mod importer;

// 配置层 - 运行参数
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// ==========================================
// 重导出核心类型
// ==========================================

pub use domain::{
    BatchResult, CanonicalRecord, FormatType, ImportHistoryRecord, ImportResult, ImportStats,
    ImportTask, ModuleName, TaskDescriptor, TaskOptions,
};

pub use importer::{ImportError, ImportManager};

pub use repository::{MemoryRecordSink, RecordSink, SqliteRecordSink};

pub use config::ImportSettings;

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "水资源风险监测平台数据导入";
