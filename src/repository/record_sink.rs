// ==========================================
// 水资源风险监测平台 - 写入端接口
// ==========================================
// 职责: 导入管道与持久化之间的窄接口
// 红线: 管道只依赖 write(module, record)，不感知存储细节
// ==========================================

use crate::domain::record::CanonicalRecord;
use crate::domain::types::ModuleName;
use crate::repository::error::SinkResult;

// ==========================================
// RecordSink Trait
// ==========================================
// 实现者: MemoryRecordSink, SqliteRecordSink
// 调用方: ImportExecutor（在阻塞线程池中调用）
pub trait RecordSink: Send + Sync {
    /// 写入一条已通过校验的规范化记录
    fn write(&self, module: ModuleName, record: &CanonicalRecord) -> SinkResult<()>;
}
