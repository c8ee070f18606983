// ==========================================
// 持久化与定时导入测试
// ==========================================
// 测试目标:
// - config_kv 覆写导入参数，SQLite 写入端落库
// - 定时导入钩子的注册/执行/取消
// ==========================================


use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_helpers::{create_test_db, path_of, write_temp_file};
use water_risk_import::config::{config_keys, ConfigManager, ImportConfigReader, ImportSettings};
use water_risk_import::db::open_sqlite_connection;
use water_risk_import::domain::{FormatType, ImportTask, ModuleName};
use water_risk_import::importer::{ImportError, ImportManager};
use water_risk_import::repository::{MemoryRecordSink, SqliteRecordSink};

const IOT_CSV: &str = "device_id,timestamp,consumption\n\
iot_001,2024-01-01T00:00:00,100.5\n\
iot_002,2024-01-01T01:00:00,98\n";

fn shared_connection(db_path: &str) -> Arc<Mutex<Connection>> {
    Arc::new(Mutex::new(open_sqlite_connection(db_path).unwrap()))
}

#[tokio::test]
async fn test_config_overrides_loaded_from_database() {
    let (_file, db_path) = create_test_db();
    let config = ConfigManager::new(&db_path).unwrap();
    config.update_config(config_keys::MAX_WORKERS, "8").unwrap();
    config.update_config(config_keys::HISTORY_LIMIT, "50").unwrap();
    config.update_config(config_keys::RETRY_MAX_RETRIES, "not-a-number").unwrap();

    let settings = config.load_settings().await.unwrap();

    assert_eq!(settings.max_workers, 8);
    assert_eq!(settings.history_limit, 50);
    assert_eq!(settings.retry.max_retries, ImportSettings::default().retry.max_retries);
}

#[tokio::test]
async fn test_sqlite_sink_shares_connection_with_config() {
    let (_file, db_path) = create_test_db();
    let conn = shared_connection(&db_path);
    let config = ConfigManager::from_connection(conn.clone()).unwrap();
    let sink = Arc::new(SqliteRecordSink::from_connection(conn).unwrap());

    let manager = ImportManager::new(config.load_settings().await.unwrap(), sink.clone()).unwrap();
    let csv = write_temp_file(".csv", IOT_CSV);
    let task = ImportTask::new(FormatType::Tabular, ModuleName::IotWaterConsumption, path_of(&csv)).unwrap();

    let result = manager.import_single(task).await.unwrap();

    assert_eq!(result.imported_records, 2);
    assert_eq!(sink.count_by_module(ModuleName::IotWaterConsumption).unwrap(), 2);
    let rows = sink.list_by_module(ModuleName::IotWaterConsumption, 10).unwrap();
    assert_eq!(rows[0]["device_id"], "iot_001");
    assert_eq!(rows[1]["consumption"], 98.0);
}

#[tokio::test]
async fn test_sample_data_persisted() {
    let (_file, db_path) = create_test_db();
    let sink = Arc::new(SqliteRecordSink::new(&db_path).unwrap());
    let manager = ImportManager::new(ImportSettings::default(), sink.clone()).unwrap();

    let result = manager
        .create_sample_data(ModuleName::UrbanGreenSpace, 12)
        .await
        .unwrap();

    assert_eq!(result.total_records, 12);
    assert_eq!(result.imported_records, 12);
    assert_eq!(sink.count_by_module(ModuleName::UrbanGreenSpace).unwrap(), 12);
}

#[tokio::test]
async fn test_recurring_import_runs_until_cancelled() {
    let sink = Arc::new(MemoryRecordSink::new());
    let manager = ImportManager::new(ImportSettings::default(), sink.clone()).unwrap();
    let csv = write_temp_file(".csv", IOT_CSV);
    let task = ImportTask::new(FormatType::Tabular, ModuleName::IotWaterConsumption, path_of(&csv)).unwrap();

    let schedule_id = manager
        .schedule_recurring_import(task, Duration::from_millis(40))
        .unwrap();
    assert!(schedule_id.starts_with("scheduled_"));
    assert_eq!(manager.scheduled_imports(), vec![schedule_id.clone()]);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(manager.cancel_scheduled_import(&schedule_id));
    assert!(!manager.cancel_scheduled_import(&schedule_id));
    assert!(manager.scheduled_imports().is_empty());

    let history = manager.get_import_history(None, None);
    assert!(history.len() >= 2, "至少执行两次，实际 {}", history.len());
    // 每次执行使用独立的任务 ID
    assert_ne!(history[0].task.task_id(), history[1].task.task_id());

    let runs = history.len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.get_import_history(None, None).len(), runs);
}

#[tokio::test]
async fn test_zero_interval_rejected() {
    let manager = ImportManager::new(ImportSettings::default(), Arc::new(MemoryRecordSink::new())).unwrap();
    let task = ImportTask::new(FormatType::Tabular, ModuleName::IotWaterConsumption, "a.csv").unwrap();

    let err = manager
        .schedule_recurring_import(task, Duration::ZERO)
        .unwrap_err();

    assert!(matches!(err, ImportError::InvalidTask(_)));
}
