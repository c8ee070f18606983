// ==========================================
// 水资源风险监测平台 - 写入端错误类型
// ==========================================
// 工具: thiserror 派生宏
// 约定: 写入失败在导入管道中按记录级拒绝处理
// ==========================================

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("写入被拒绝: {0}")]
    Rejected(String),

    #[error("数据库锁获取失败: {0}")]
    LockError(String),

    #[error("唯一约束违反: {0}")]
    UniqueConstraintViolation(String),

    #[error("数据库写入失败: {0}")]
    DatabaseWriteError(String),

    #[error("记录序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),
}

// 实现 From<rusqlite::Error>
impl From<rusqlite::Error> for SinkError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("UNIQUE") => {
                SinkError::UniqueConstraintViolation(msg)
            }
            other => SinkError::DatabaseWriteError(other.to_string()),
        }
    }
}

pub type SinkResult<T> = Result<T, SinkError>;
