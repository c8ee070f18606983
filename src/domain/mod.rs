// ==========================================
// 水资源风险监测平台 - 领域模型层
// ==========================================
// 职责: 定义任务、记录、规则、结果等纯数据类型
// 红线: 不含 I/O,不含适配器逻辑
// ==========================================

pub mod record;
pub mod result;
pub mod rules;
pub mod task;
pub mod types;

// 重导出核心类型
pub use record::{CanonicalRecord, FieldValue, RawRecord};
pub use result::{
    BatchResult, ImportHistoryRecord, ImportResult, ImportStats, ModuleStats, RecordError,
};
pub use rules::{CoordinateRule, DateRangeRule, RangeRule, RuleSet};
pub use task::{ImportTask, TaskDescriptor, TaskOptions, TaskValidationError};
pub use types::{FormatType, ModuleName, ScalarType};
