// ==========================================
// 水资源风险监测平台 - 写入端层
// ==========================================
// 职责: 已校验记录的持久化边界
// ==========================================

pub mod error;
pub mod memory_sink;
pub mod record_sink;
pub mod sqlite_sink;

pub use error::{SinkError, SinkResult};
pub use memory_sink::MemoryRecordSink;
pub use record_sink::RecordSink;
pub use sqlite_sink::SqliteRecordSink;
