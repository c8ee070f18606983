// ==========================================
// 水资源风险监测平台 - 导入层
// ==========================================
// 职责: 多格式数据导入管道
// 流程: 任务 → 适配器解码 → 字段映射 → 清洗 → 校验 → 写入端
// 支持: 表格、嵌套文档、GeoJSON、远程 API、遥感影像、设备流、气象预报、矢量 GIS
// ==========================================

// 模块声明
pub mod adapter_trait;
pub mod adapters;
pub mod data_cleaner;
pub mod dq_validator;
pub mod error;
pub mod executor;
pub mod field_mapper;
pub mod http_client;
pub mod indices;
pub mod manager;
pub mod sample_data;

// 重导出核心类型
pub use adapter_trait::{stream_from_vec, FormatAdapter, RecordStream};
pub use adapters::AdapterRegistry;
pub use error::{ImportError, ImportOutcome};
pub use executor::ImportExecutor;
pub use http_client::{HttpFetcher, RateLimiter, RequestSpec};
pub use indices::{BandValues, IndexRegistry};
pub use manager::ImportManager;
