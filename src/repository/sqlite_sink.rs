// ==========================================
// 水资源风险监测平台 - SQLite 写入端
// ==========================================
// 职责: 将规范化记录以 JSON 写入 imported_records 表
// 红线: 不做业务校验（校验在导入管道完成）
// ==========================================

use crate::db::{configure_sqlite_connection, init_schema, open_sqlite_connection};
use crate::domain::record::CanonicalRecord;
use crate::domain::types::ModuleName;
use crate::repository::error::{SinkError, SinkResult};
use crate::repository::record_sink::RecordSink;
use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};

pub struct SqliteRecordSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordSink {
    /// 打开数据库文件（自动建表）
    pub fn new(db_path: &str) -> SinkResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 复用已有连接（与 ConfigManager 共用同一库）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> SinkResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| SinkError::LockError(e.to_string()))?;
            configure_sqlite_connection(&guard)?;
            init_schema(&guard)?;
        }
        Ok(Self { conn })
    }

    fn get_conn(&self) -> SinkResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SinkError::LockError(e.to_string()))
    }

    /// 按模块统计已写入条数
    pub fn count_by_module(&self, module: ModuleName) -> SinkResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM imported_records WHERE module_name = ?1",
            params![module.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// 按模块读取记录（写入顺序）
    pub fn list_by_module(&self, module: ModuleName, limit: usize) -> SinkResult<Vec<Value>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT payload_json FROM imported_records WHERE module_name = ?1 ORDER BY id LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![module.as_str(), limit as i64], |row| {
            row.get::<_, String>(0)
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(serde_json::from_str(&row?)?);
        }
        Ok(out)
    }
}

impl RecordSink for SqliteRecordSink {
    fn write(&self, module: ModuleName, record: &CanonicalRecord) -> SinkResult<()> {
        let payload = serde_json::to_string(record)?;
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO imported_records (module_name, payload_json, imported_at) VALUES (?1, ?2, ?3)",
            params![module.as_str(), payload, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::FieldValue;
    use tempfile::NamedTempFile;

    #[test]
    fn test_write_and_count() {
        let file = NamedTempFile::new().unwrap();
        let sink = SqliteRecordSink::new(file.path().to_str().unwrap()).unwrap();

        let record: CanonicalRecord = vec![
            ("device_id", FieldValue::from("iot_001")),
            ("consumption", FieldValue::Number(100.5)),
            ("note", FieldValue::Absent),
        ]
        .into_iter()
        .collect();

        sink.write(ModuleName::IotWaterConsumption, &record).unwrap();

        assert_eq!(sink.count_by_module(ModuleName::IotWaterConsumption).unwrap(), 1);
        assert_eq!(sink.count_by_module(ModuleName::UrbanGreenSpace).unwrap(), 0);

        let rows = sink.list_by_module(ModuleName::IotWaterConsumption, 10).unwrap();
        assert_eq!(rows[0]["device_id"], "iot_001");
        assert_eq!(rows[0]["consumption"], 100.5);
        assert!(rows[0]["note"].is_null());
    }
}
