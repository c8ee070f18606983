// ==========================================
// 水资源风险监测平台 - 导入执行器
// ==========================================
// 职责: 驱动单个适配器完成单个任务
// 流程: 解码 → 字段映射 → 清洗 → 校验 → 写入 → 汇总结果
// 错误归属:
// - 解码失败 → source_failure（任务终止）
// - 记录解码/校验/写入失败 → errors 中一条，继续下一条
// ==========================================

use crate::domain::result::{ImportResult, RecordError};
use crate::domain::rules::RuleSet;
use crate::domain::task::{ImportTask, TaskOptions};
use crate::domain::types::ModuleName;
use crate::importer::adapter_trait::{FormatAdapter, RecordStream};
use crate::importer::data_cleaner::clean_record;
use crate::importer::dq_validator::{validate_raw_types, validate_record, ValidationOutcome};
use crate::importer::error::{ImportError, ImportOutcome};
use crate::importer::field_mapper::apply_field_mapping;
use crate::repository::RecordSink;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// 记录级循环的汇总
struct RecordTally {
    total: usize,
    imported: usize,
    errors: Vec<RecordError>,
}

// ==========================================
// ImportExecutor
// ==========================================
#[derive(Clone)]
pub struct ImportExecutor {
    sink: Arc<dyn RecordSink>,
}

impl ImportExecutor {
    pub fn new(sink: Arc<dyn RecordSink>) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> Arc<dyn RecordSink> {
        self.sink.clone()
    }

    /// 组合任务生效规则：模块默认 ∪ 适配器默认 → 适配器调整 → 任务 options
    ///
    /// # 返回
    /// - Err(InvalidTask): options 中的规则声明不合法（调用方错误）
    pub fn resolve_rules(
        module: ModuleName,
        adapter: &dyn FormatAdapter,
        options: &TaskOptions,
    ) -> ImportOutcome<RuleSet> {
        let mut rules = RuleSet::for_module(module);
        rules.merge_defaults(&adapter.default_required_fields(), &adapter.default_field_types());
        adapter.adjust_rules(&mut rules, options);
        rules
            .apply_options(options)
            .map_err(|e| ImportError::InvalidTask(e.to_string()))
    }

    /// 执行单个任务（不会返回 Err，数据源错误体现在结果中）
    #[instrument(
        skip(self, task, adapter, rules),
        fields(task_id = %task.task_id(), module = %task.module_name(), format = %task.format_type())
    )]
    pub async fn execute(&self, task: &ImportTask, adapter: &dyn FormatAdapter, rules: &RuleSet) -> ImportResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(data_source = %task.data_source(), "开始导入");

        let stream = match adapter.decode(task.data_source(), task.options()).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "数据源打开失败，任务终止");
                return ImportResult::source_failure(task, e.to_string(), started_at, clock.elapsed());
            }
        };

        self.run_records(task, stream, rules, started_at, clock).await
    }

    /// 对已解码的记录序列执行映射/清洗/校验/写入
    pub async fn run_records(
        &self,
        task: &ImportTask,
        stream: RecordStream,
        rules: &RuleSet,
        started_at: DateTime<Utc>,
        clock: Instant,
    ) -> ImportResult {
        let sink = self.sink.clone();
        let module = task.module_name();
        let mapping = task.field_mapping().clone();
        let rules = rules.clone();
        let max_text_length = task.options().get_u64("max_text_length").map(|v| v as usize);

        // 解码迭代器可能阻塞在文件读取上
        let joined = tokio::task::spawn_blocking(move || {
            process_records(stream, sink.as_ref(), module, &mapping, &rules, max_text_length)
        })
        .await;

        match joined {
            Ok(tally) => {
                let result = ImportResult::from_counts(
                    task,
                    tally.total,
                    tally.imported,
                    tally.errors,
                    started_at,
                    clock.elapsed(),
                );
                info!(
                    total = result.total_records,
                    imported = result.imported_records,
                    errors = result.error_count,
                    elapsed_ms = result.processing_time.as_millis() as u64,
                    "导入完成"
                );
                result
            }
            Err(e) => {
                error!(error = %e, "记录处理线程异常退出");
                ImportResult::source_failure(
                    task,
                    format!("记录处理异常: {}", e),
                    started_at,
                    clock.elapsed(),
                )
            }
        }
    }
}

fn process_records(
    stream: RecordStream,
    sink: &dyn RecordSink,
    module: ModuleName,
    mapping: &BTreeMap<String, String>,
    rules: &RuleSet,
    max_text_length: Option<usize>,
) -> RecordTally {
    let mut tally = RecordTally {
        total: 0,
        imported: 0,
        errors: Vec::new(),
    };

    for (record_index, item) in stream.enumerate() {
        tally.total += 1;

        let raw = match item {
            Ok(raw) => raw,
            Err(reason) => {
                debug!(record_index, reason = %reason, "记录解码失败");
                tally.errors.push(RecordError { record_index, reason });
                continue;
            }
        };

        let mapped = apply_field_mapping(raw, mapping);
        // 清洗会把无法转换的值落为 Absent，类型错误需在清洗前判定
        if let ValidationOutcome::Rejected(reason) = validate_raw_types(&mapped, &rules.field_types) {
            debug!(record_index, reason = %reason, "记录类型校验未通过");
            tally.errors.push(RecordError { record_index, reason });
            continue;
        }
        let record = clean_record(&mapped, &rules.field_types, max_text_length);

        if let ValidationOutcome::Rejected(reason) = validate_record(&record, rules) {
            debug!(record_index, reason = %reason, "记录校验未通过");
            tally.errors.push(RecordError { record_index, reason });
            continue;
        }

        match sink.write(module, &record) {
            Ok(()) => tally.imported += 1,
            Err(e) => {
                warn!(record_index, error = %e, "记录写入失败");
                tally.errors.push(RecordError {
                    record_index,
                    reason: format!("写入失败: {}", e),
                });
            }
        }
    }

    tally
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::RawRecord;
    use crate::domain::types::FormatType;
    use crate::importer::adapter_trait::stream_from_vec;
    use crate::repository::MemoryRecordSink;
    use async_trait::async_trait;
    use serde_json::json;

    /// 固定返回若干记录的适配器
    struct FixedAdapter {
        records: Vec<Result<RawRecord, String>>,
    }

    #[async_trait]
    impl FormatAdapter for FixedAdapter {
        fn format_type(&self) -> FormatType {
            FormatType::NestedDocument
        }

        async fn decode(&self, _data_source: &str, _options: &TaskOptions) -> ImportOutcome<RecordStream> {
            Ok(stream_from_vec(self.records.clone()))
        }
    }

    struct BrokenAdapter;

    #[async_trait]
    impl FormatAdapter for BrokenAdapter {
        fn format_type(&self) -> FormatType {
            FormatType::Tabular
        }

        async fn decode(&self, data_source: &str, _options: &TaskOptions) -> ImportOutcome<RecordStream> {
            Err(ImportError::SourceNotFound(data_source.to_string()))
        }
    }

    fn raw(value: serde_json::Value) -> RawRecord {
        value.as_object().cloned().unwrap()
    }

    fn iot_task() -> ImportTask {
        ImportTask::new(FormatType::NestedDocument, ModuleName::IotWaterConsumption, "mem").unwrap()
    }

    #[tokio::test]
    async fn test_execute_counts_and_errors() {
        let sink = Arc::new(MemoryRecordSink::new());
        let executor = ImportExecutor::new(sink.clone());
        let adapter = FixedAdapter {
            records: vec![
                Ok(raw(json!({"device_id": "d1", "timestamp": "2024-01-01T00:00:00", "consumption": "100.5"}))),
                Ok(raw(json!({"device_id": "d2", "timestamp": "2024-01-01T01:00:00", "consumption": "invalid"}))),
                Err("第 3 行解析失败".to_string()),
            ],
        };
        let task = iot_task();
        let rules = ImportExecutor::resolve_rules(task.module_name(), &adapter, task.options()).unwrap();

        let result = executor.execute(&task, &adapter, &rules).await;
        assert_eq!(result.total_records, 3);
        assert_eq!(result.imported_records, 1);
        assert_eq!(result.error_count, 2);
        assert_eq!(result.errors[0].record_index, 1);
        assert_eq!(result.errors[1].record_index, 2);
        assert_eq!(sink.count(ModuleName::IotWaterConsumption), 1);
        assert_eq!(
            result.imported_records + result.error_count,
            result.total_records
        );
    }

    #[tokio::test]
    async fn test_field_mapping_applied_before_validation() {
        let sink = Arc::new(MemoryRecordSink::new());
        let executor = ImportExecutor::new(sink.clone());
        let adapter = FixedAdapter {
            records: vec![Ok(raw(json!({"meter": "m1", "ts": "2024-01-01", "usage": 3})))],
        };
        let mapping = BTreeMap::from([
            ("device_id".to_string(), "meter".to_string()),
            ("timestamp".to_string(), "ts".to_string()),
            ("consumption".to_string(), "usage".to_string()),
        ]);
        let task = iot_task().with_field_mapping(mapping).unwrap();
        let rules = ImportExecutor::resolve_rules(task.module_name(), &adapter, task.options()).unwrap();

        let result = executor.execute(&task, &adapter, &rules).await;
        assert_eq!(result.imported_records, 1);
        let stored = sink.records(ModuleName::IotWaterConsumption);
        assert!(stored[0].is_present("device_id"));
        assert!(!stored[0].is_present("meter"));
    }

    #[tokio::test]
    async fn test_source_error_becomes_result() {
        let executor = ImportExecutor::new(Arc::new(MemoryRecordSink::new()));
        let task = iot_task();
        let rules = RuleSet::default();
        let result = executor.execute(&task, &BrokenAdapter, &rules).await;
        assert!(!result.is_completed());
        assert_eq!(result.total_records, 0);
        assert_eq!(result.success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_sink_failure_is_record_error() {
        let sink = Arc::new(MemoryRecordSink::new().rejecting(ModuleName::IotWaterConsumption));
        let executor = ImportExecutor::new(sink);
        let adapter = FixedAdapter {
            records: vec![Ok(raw(json!({"device_id": "d1", "timestamp": "2024-01-01", "consumption": 1})))],
        };
        let task = iot_task();
        let rules = ImportExecutor::resolve_rules(task.module_name(), &adapter, task.options()).unwrap();

        let result = executor.execute(&task, &adapter, &rules).await;
        assert!(result.is_completed());
        assert_eq!(result.imported_records, 0);
        assert!(result.errors[0].reason.starts_with("写入失败"));
    }

    #[tokio::test]
    async fn test_declared_type_mismatch_rejected() {
        let sink = Arc::new(MemoryRecordSink::new());
        let executor = ImportExecutor::new(sink.clone());
        let adapter = FixedAdapter {
            records: vec![
                Ok(raw(json!({"timestamp": "2024-01-01T00:00:00", "pm25": "abc"}))),
                Ok(raw(json!({"timestamp": "2024-01-01T01:00:00", "pm25": ""}))),
            ],
        };
        let task = ImportTask::new(FormatType::NestedDocument, ModuleName::EnvironmentalHealth, "mem")
            .unwrap()
            .with_options(TaskOptions::new(
                json!({"field_types": {"pm25": "numeric"}}).as_object().cloned().unwrap(),
            ));
        let rules = ImportExecutor::resolve_rules(task.module_name(), &adapter, task.options()).unwrap();

        let result = executor.execute(&task, &adapter, &rules).await;
        assert_eq!(result.imported_records, 1, "空值的非必填字段仍可导入");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].record_index, 0);
        assert!(result.errors[0].reason.contains("类型错误"));
    }

    #[test]
    fn test_resolve_rules_rejects_bad_options() {
        let adapter = FixedAdapter { records: Vec::new() };
        let options = TaskOptions::new(
            json!({"min_date": "2024-12-01", "max_date": "2024-01-01"})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let err = ImportExecutor::resolve_rules(ModuleName::EnvironmentalHealth, &adapter, &options).unwrap_err();
        assert!(err.is_caller_error());
    }
}
