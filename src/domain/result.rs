// ==========================================
// 水资源风险监测平台 - 导入结果与统计
// ==========================================
// ImportResult: 单任务结果（创建后不可变）
// BatchResult: 批量结果（保持提交顺序）
// ImportHistoryRecord / ImportStats: 进程级读模型
// ==========================================

use crate::domain::task::ImportTask;
use crate::domain::types::{FormatType, ModuleName};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;

/// 单条记录错误
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordError {
    pub record_index: usize, // 源内序号（从 0 开始）
    pub reason: String,
}

// ==========================================
// ImportResult - 单任务导入结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportResult {
    pub task_id: String,
    pub module_name: ModuleName,
    pub format_type: FormatType,
    pub data_source: String,
    pub total_records: usize,
    pub imported_records: usize,
    pub error_count: usize,
    pub errors: Vec<RecordError>,
    pub success_rate: f64, // imported / total；total = 0 时为 0.0
    #[serde(serialize_with = "serialize_duration_ms", rename = "processing_time_ms")]
    pub processing_time: Duration,
    pub source_error: Option<String>, // 数据源级错误（任务终止）
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ImportResult {
    /// 根据记录级统计构造结果
    pub fn from_counts(
        task: &ImportTask,
        total_records: usize,
        imported_records: usize,
        errors: Vec<RecordError>,
        started_at: DateTime<Utc>,
        processing_time: Duration,
    ) -> Self {
        Self {
            task_id: task.task_id().to_string(),
            module_name: task.module_name(),
            format_type: task.format_type(),
            data_source: task.data_source().to_string(),
            total_records,
            imported_records,
            error_count: errors.len(),
            errors,
            success_rate: success_rate(imported_records, total_records),
            processing_time,
            source_error: None,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// 数据源级失败（打不开 / 连不上 / 认证失败）
    pub fn source_failure(
        task: &ImportTask,
        message: impl Into<String>,
        started_at: DateTime<Utc>,
        processing_time: Duration,
    ) -> Self {
        let mut result = Self::from_counts(task, 0, 0, Vec::new(), started_at, processing_time);
        result.source_error = Some(message.into());
        result
    }

    /// 任务是否完整执行（未被数据源错误终止）
    pub fn is_completed(&self) -> bool {
        self.source_error.is_none()
    }

    /// 统计口径：导入条数 > 0 记为成功
    pub fn is_successful(&self) -> bool {
        self.imported_records > 0
    }
}

/// 成功率：total 为 0 时约定为 0.0
pub fn success_rate(imported: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        imported as f64 / total as f64
    }
}

fn serialize_duration_ms<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

// ==========================================
// BatchResult - 批量导入结果
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchResult {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub results: Vec<ImportResult>, // 与提交顺序一致
}

impl BatchResult {
    pub fn from_results(results: Vec<ImportResult>) -> Self {
        let completed = results.iter().filter(|r| r.is_completed()).count();
        Self {
            total_tasks: results.len(),
            completed_tasks: completed,
            failed_tasks: results.len() - completed,
            results,
        }
    }
}

// ==========================================
// 历史与统计
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportHistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub task: ImportTask,
    pub result: ImportResult,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModuleStats {
    pub imports: usize,
    pub records: usize,
    pub last_import: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportStats {
    pub total_imports: usize,
    pub successful_imports: usize,
    pub failed_imports: usize,
    pub total_records: usize, // 累计导入条数
    pub modules: BTreeMap<ModuleName, ModuleStats>,
}

impl ImportStats {
    /// 累加一次导入（调用方负责串行化）
    pub fn record(&mut self, result: &ImportResult, at: DateTime<Utc>) {
        self.total_imports += 1;
        if result.is_successful() {
            self.successful_imports += 1;
        } else {
            self.failed_imports += 1;
        }
        self.total_records += result.imported_records;

        let module = self.modules.entry(result.module_name).or_default();
        module.imports += 1;
        module.records += result.imported_records;
        module.last_import = Some(at);
    }
}
