// ==========================================
// 导入管道集成测试
// ==========================================
// 测试目标: 单任务/批量导入、错误隔离、历史与统计
// ==========================================


use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{options, path_of, write_temp_file, SlowAdapter};
use water_risk_import::config::ImportSettings;
use water_risk_import::domain::{FormatType, ImportTask, ModuleName, TaskDescriptor};
use water_risk_import::importer::{AdapterRegistry, ImportError, ImportManager};
use water_risk_import::logging;
use water_risk_import::repository::MemoryRecordSink;

const IOT_CSV: &str = "device_id,timestamp,consumption\n\
iot_001,2024-01-01T00:00:00,100.5\n\
iot_002,2024-01-01T01:00:00,invalid\n";

fn create_manager() -> (ImportManager, Arc<MemoryRecordSink>) {
    let sink = Arc::new(MemoryRecordSink::new());
    let manager = ImportManager::new(ImportSettings::default(), sink.clone()).unwrap();
    (manager, sink)
}

fn csv_task(path: &str) -> ImportTask {
    ImportTask::new(FormatType::Tabular, ModuleName::IotWaterConsumption, path).unwrap()
}

#[tokio::test]
async fn test_csv_scenario_half_imported() {
    logging::init_test();
    let (manager, sink) = create_manager();
    let file = write_temp_file(".csv", IOT_CSV);

    let result = manager.import_single(csv_task(&path_of(&file))).await.unwrap();

    assert_eq!(result.total_records, 2);
    assert_eq!(result.imported_records, 1);
    assert_eq!(result.error_count, 1);
    assert!((result.success_rate - 0.5).abs() < f64::EPSILON);
    assert_eq!(result.errors[0].record_index, 1);
    assert!(result.errors[0].reason.contains("consumption"));

    let stored = sink.records(ModuleName::IotWaterConsumption);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].to_json()["consumption"], json!(100.5));
}

#[tokio::test]
async fn test_empty_batch() {
    let (manager, _) = create_manager();
    let batch = manager.batch_import(Vec::new(), true).await;

    assert_eq!(batch.total_tasks, 0);
    assert_eq!(batch.completed_tasks, 0);
    assert_eq!(batch.failed_tasks, 0);
    assert!(batch.results.is_empty());
    assert!(manager.get_import_history(None, None).is_empty());
}

#[tokio::test]
async fn test_missing_file_terminates_only_that_task() {
    let (manager, sink) = create_manager();
    let good = write_temp_file(".csv", IOT_CSV);
    let tasks = vec![
        csv_task("/nonexistent/dir/readings.csv"),
        csv_task(&path_of(&good)),
    ];

    let batch = manager.batch_import(tasks, true).await;

    assert_eq!(batch.total_tasks, 2);
    assert_eq!(batch.completed_tasks, 1);
    assert_eq!(batch.failed_tasks, 1);

    let failed = &batch.results[0];
    assert!(!failed.is_completed());
    assert_eq!(failed.imported_records, 0);
    assert_eq!(failed.success_rate, 0.0);
    assert!(failed.source_error.as_deref().unwrap().contains("readings.csv"));

    assert_eq!(batch.results[1].imported_records, 1);
    assert_eq!(sink.count(ModuleName::IotWaterConsumption), 1);
}

#[tokio::test]
async fn test_parallel_batch_preserves_submission_order() {
    let sink = Arc::new(MemoryRecordSink::new());
    let mut registry = AdapterRegistry::empty();
    registry.register(slow_adapter());
    let settings = ImportSettings {
        max_workers: 3,
        ..ImportSettings::default()
    };
    let manager = ImportManager::with_registry(settings, registry, sink.clone());

    // 第一个任务最慢，结果仍排在第一位
    let delays = ["200", "10", "50", "0"];
    let tasks: Vec<ImportTask> = delays
        .iter()
        .map(|d| {
            ImportTask::new(FormatType::NestedDocument, ModuleName::DroughtPrediction, *d)
                .unwrap()
                .with_task_id(format!("task_{}", d))
        })
        .collect();

    let batch = manager.batch_import(tasks, true).await;

    let ids: Vec<&str> = batch.results.iter().map(|r| r.task_id.as_str()).collect();
    assert_eq!(ids, vec!["task_200", "task_10", "task_50", "task_0"]);
    assert_eq!(batch.completed_tasks, 4);
    assert_eq!(sink.count(ModuleName::DroughtPrediction), 4);
}

fn slow_adapter() -> Arc<SlowAdapter> {
    SlowAdapter::new(
        FormatType::NestedDocument,
        Duration::from_millis(10),
        vec![json!({"timestamp": "2024-03-01T00:00:00"}).as_object().cloned().unwrap()],
    )
}

fn slow_tasks(count: usize, delay_ms: &str) -> Vec<ImportTask> {
    (0..count)
        .map(|i| {
            ImportTask::new(FormatType::NestedDocument, ModuleName::DroughtPrediction, delay_ms)
                .unwrap()
                .with_task_id(format!("slow_{}", i))
        })
        .collect()
}

#[tokio::test]
async fn test_parallel_batch_respects_worker_limit() {
    let sink = Arc::new(MemoryRecordSink::new());
    let adapter = slow_adapter();
    let mut registry = AdapterRegistry::empty();
    registry.register(adapter.clone());
    let settings = ImportSettings {
        max_workers: 2,
        ..ImportSettings::default()
    };
    let manager = ImportManager::with_registry(settings, registry, sink.clone());

    let batch = manager.batch_import(slow_tasks(8, "50"), true).await;

    assert_eq!(batch.completed_tasks, 8);
    assert!(adapter.peak() <= 2, "并发峰值 {} 超过 max_workers", adapter.peak());
    assert!(adapter.peak() >= 1);
    assert_eq!(sink.count(ModuleName::DroughtPrediction), 8);
}

#[tokio::test]
async fn test_sequential_batch_runs_one_at_a_time() {
    let sink = Arc::new(MemoryRecordSink::new());
    let adapter = slow_adapter();
    let mut registry = AdapterRegistry::empty();
    registry.register(adapter.clone());
    let settings = ImportSettings {
        max_workers: 4,
        ..ImportSettings::default()
    };
    let manager = ImportManager::with_registry(settings, registry, sink);

    let batch = manager.batch_import(slow_tasks(4, "20"), false).await;

    assert_eq!(batch.completed_tasks, 4);
    assert_eq!(adapter.peak(), 1);
}

#[tokio::test]
async fn test_declared_numeric_field_rejects_text() {
    let (manager, sink) = create_manager();
    let file = write_temp_file(".csv", "timestamp,pm25\n2024-01-01T00:00:00,abc\n");
    let task = ImportTask::new(FormatType::Tabular, ModuleName::EnvironmentalHealth, path_of(&file))
        .unwrap()
        .with_options(options(json!({"field_types": {"pm25": "numeric"}})));

    let result = manager.import_single(task).await.unwrap();

    assert_eq!(result.total_records, 1);
    assert_eq!(result.imported_records, 0);
    assert_eq!(result.error_count, 1);
    assert!(result.errors[0].reason.contains("pm25"));
    assert_eq!(sink.count(ModuleName::EnvironmentalHealth), 0);
}

#[tokio::test]
async fn test_sequential_batch() {
    let (manager, _) = create_manager();
    let file = write_temp_file(".csv", IOT_CSV);
    let tasks = vec![csv_task(&path_of(&file)), csv_task(&path_of(&file))];

    let batch = manager.batch_import(tasks, false).await;

    assert_eq!(batch.completed_tasks, 2);
    let history = manager.get_import_history(None, None);
    assert_eq!(history.len(), 2);
    assert!(history[0].timestamp <= history[1].timestamp);
}

#[tokio::test]
async fn test_caller_errors_rejected_before_execution() {
    let (manager, _) = create_manager();

    let err = manager
        .import_descriptor(TaskDescriptor {
            format_type: "csv".to_string(),
            module_name: "lunar_water".to_string(),
            data_source: "a.csv".to_string(),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::UnknownModule(_)));

    let bad_range = csv_task("a.csv").with_options(options(json!({
        "date_field": "timestamp",
        "min_date": "2024-12-31",
        "max_date": "2024-01-01"
    })));
    let err = manager.import_single(bad_range).await.unwrap_err();
    assert!(err.is_caller_error());

    // 调用方错误不计入历史与统计
    assert!(manager.get_import_history(None, None).is_empty());
    assert_eq!(manager.get_import_stats().total_imports, 0);
}

#[tokio::test]
async fn test_caller_error_in_batch_is_isolated() {
    let (manager, _) = create_manager();
    let file = write_temp_file(".csv", IOT_CSV);
    let bad = ImportTask::new(FormatType::RemoteApi, ModuleName::DroughtPrediction, "not-a-url").unwrap();

    let batch = manager.batch_import(vec![bad, csv_task(&path_of(&file))], true).await;

    assert_eq!(batch.failed_tasks, 1);
    assert!(batch.results[0].source_error.is_some());
    assert_eq!(batch.results[1].imported_records, 1);
}

#[tokio::test]
async fn test_sink_failure_counts_as_record_error() {
    let sink = Arc::new(MemoryRecordSink::new().rejecting(ModuleName::IotWaterConsumption));
    let manager = ImportManager::new(ImportSettings::default(), sink).unwrap();
    let file = write_temp_file(".csv", IOT_CSV);

    let result = manager.import_single(csv_task(&path_of(&file))).await.unwrap();

    assert!(result.is_completed());
    assert_eq!(result.imported_records, 0);
    assert_eq!(result.error_count, 2);
    assert!(result.errors.iter().any(|e| e.reason.starts_with("写入失败")));
}

#[tokio::test]
async fn test_field_mapping_renames_source_columns() {
    let (manager, sink) = create_manager();
    let file = write_temp_file(
        ".csv",
        "meter,read_at,litres\nm1,2024-02-01T00:00:00,12\nm2,2024-02-01T01:00:00,13\n",
    );
    let mapping = BTreeMap::from([
        ("device_id".to_string(), "meter".to_string()),
        ("timestamp".to_string(), "read_at".to_string()),
        ("consumption".to_string(), "litres".to_string()),
    ]);
    let task = csv_task(&path_of(&file)).with_field_mapping(mapping).unwrap();

    let result = manager.import_single(task).await.unwrap();

    assert_eq!(result.imported_records, 2);
    let stored = sink.records(ModuleName::IotWaterConsumption);
    assert!(stored[0].is_present("device_id"));
    assert!(!stored[0].is_present("meter"));
}

#[tokio::test]
async fn test_out_of_range_latitude_rejected() {
    let (manager, _) = create_manager();
    let file = write_temp_file(
        ".csv",
        "timestamp,lat,lng,pm25\n2024-01-01T00:00:00,95,10,12\n2024-01-01T01:00:00,45,10,12\n",
    );
    let task = ImportTask::new(FormatType::Tabular, ModuleName::EnvironmentalHealth, path_of(&file)).unwrap();

    let result = manager.import_single(task).await.unwrap();

    assert_eq!(result.imported_records, 1);
    assert_eq!(result.errors[0].record_index, 0);
}

#[tokio::test]
async fn test_stricter_date_range_never_imports_more() {
    let (manager, _) = create_manager();
    let file = write_temp_file(
        ".csv",
        "device_id,timestamp,consumption\n\
         a,2024-01-05T00:00:00,1\n\
         b,2024-02-05T00:00:00,2\n\
         c,2024-03-05T00:00:00,3\n",
    );
    let wide = csv_task(&path_of(&file)).with_options(options(json!({
        "date_field": "timestamp", "min_date": "2024-01-01", "max_date": "2024-12-31"
    })));
    let narrow = csv_task(&path_of(&file)).with_options(options(json!({
        "date_field": "timestamp", "min_date": "2024-02-01", "max_date": "2024-02-28"
    })));

    let wide_result = manager.import_single(wide).await.unwrap();
    let narrow_result = manager.import_single(narrow).await.unwrap();

    assert_eq!(wide_result.imported_records, 3);
    assert_eq!(narrow_result.imported_records, 1);
    assert!(narrow_result.imported_records <= wide_result.imported_records);
}

#[tokio::test]
async fn test_history_and_stats_accumulate() {
    let (manager, _) = create_manager();
    let file = write_temp_file(".csv", IOT_CSV);

    manager.import_single(csv_task(&path_of(&file))).await.unwrap();
    manager.import_single(csv_task("/missing.csv")).await.unwrap();
    manager
        .create_sample_data(ModuleName::UrbanWaterNetwork, 5)
        .await
        .unwrap();

    let stats = manager.get_import_stats();
    assert_eq!(stats.total_imports, 3);
    assert_eq!(stats.successful_imports, 2);
    assert_eq!(stats.failed_imports, 1);
    assert_eq!(stats.total_records, 6);
    assert_eq!(stats.modules[&ModuleName::IotWaterConsumption].imports, 2);
    assert_eq!(stats.modules[&ModuleName::UrbanWaterNetwork].records, 5);

    let iot = manager.get_import_history(Some(ModuleName::IotWaterConsumption), None);
    assert_eq!(iot.len(), 2);
    let last = manager.get_import_history(None, Some(1));
    assert_eq!(last.len(), 1);
    assert_eq!(last[0].task.module_name(), ModuleName::UrbanWaterNetwork);
}

#[tokio::test]
async fn test_result_serializes_to_json() {
    let (manager, _) = create_manager();
    let file = write_temp_file(".csv", IOT_CSV);
    let batch = manager.batch_import(vec![csv_task(&path_of(&file))], true).await;

    let value = serde_json::to_value(&batch).unwrap();
    assert_eq!(value["total_tasks"], json!(1));
    assert_eq!(value["results"][0]["imported_records"], json!(1));
    assert!(value["results"][0]["processing_time_ms"].is_number());
}
