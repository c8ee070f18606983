// ==========================================
// 水资源风险监测平台 - 导入模块错误类型
// ==========================================
// 分类: 调用方错误 / 数据源错误 / 瞬时远程错误
// 记录级与写入错误不走这里，直接进入 ImportResult.errors
// 工具: thiserror 派生宏
// ==========================================

use crate::domain::task::TaskValidationError;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 调用方错误（适配器执行前拒绝） =====
    #[error("未知的导入格式: {0}")]
    UnknownFormat(String),

    #[error("未知的业务模块: {0}")]
    UnknownModule(String),

    #[error("任务描述不合法: {0}")]
    InvalidTask(String),

    #[error("适配器参数不合法 (key: {key}): {message}")]
    InvalidOption { key: String, message: String },

    // ===== 数据源错误（终止单个任务） =====
    #[error("数据源不存在: {0}")]
    SourceNotFound(String),

    #[error("数据源格式不支持: {0}")]
    UnsupportedFormat(String),

    #[error("数据源读取失败: {0}")]
    SourceRead(String),

    #[error("数据解析失败: {0}")]
    Parse(String),

    #[error("认证失败 (HTTP {status}): {message}")]
    Authentication { status: u16, message: String },

    #[error("远程服务返回错误 (HTTP {status}): {message}")]
    RemoteStatus { status: u16, message: String },

    #[error("远程服务返回错误内容: {0}")]
    RemotePayload(String),

    #[error("重试 {attempts} 次后仍失败: {message}")]
    RetriesExhausted { attempts: u32, message: String },

    // ===== 瞬时错误（适配器内部可重试） =====
    #[error("请求超时: {0}")]
    Timeout(String),

    #[error("连接失败: {0}")]
    Connection(String),

    #[error("请求被限流 (HTTP 429): {0}")]
    RateLimited(String),

    #[error("远程服务暂不可用 (HTTP {status}): {message}")]
    ServerUnavailable { status: u16, message: String },

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    Internal(String),
}

impl ImportError {
    /// 调用方错误：永不重试，由 ImportManager 直接返回
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            ImportError::UnknownFormat(_)
                | ImportError::UnknownModule(_)
                | ImportError::InvalidTask(_)
                | ImportError::InvalidOption { .. }
        )
    }

    /// 瞬时远程错误：可在适配器内有限重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ImportError::Timeout(_)
                | ImportError::Connection(_)
                | ImportError::RateLimited(_)
                | ImportError::ServerUnavailable { .. }
        )
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self, ImportError::Authentication { .. })
    }

    pub fn invalid_option(key: &str, message: impl Into<String>) -> Self {
        ImportError::InvalidOption {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

impl From<TaskValidationError> for ImportError {
    fn from(err: TaskValidationError) -> Self {
        match err {
            TaskValidationError::UnknownFormat(f) => ImportError::UnknownFormat(f),
            TaskValidationError::UnknownModule(m) => ImportError::UnknownModule(m),
            TaskValidationError::Malformed(msg) => ImportError::InvalidTask(msg),
        }
    }
}

// 实现 From<std::io::Error>
impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ImportError::SourceNotFound(err.to_string()),
            std::io::ErrorKind::TimedOut => ImportError::Timeout(err.to_string()),
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => ImportError::Connection(err.to_string()),
            _ => ImportError::SourceRead(err.to_string()),
        }
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::Parse(format!("CSV: {}", err))
    }
}

// 实现 From<calamine::Error>
impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::Parse(format!("Excel: {}", err))
    }
}

// 实现 From<serde_json::Error>
impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        ImportError::Parse(format!("JSON: {}", err))
    }
}

// 实现 From<tiff::TiffError>
impl From<tiff::TiffError> for ImportError {
    fn from(err: tiff::TiffError) -> Self {
        ImportError::Parse(format!("TIFF: {}", err))
    }
}

// 实现 From<reqwest::Error>
impl From<reqwest::Error> for ImportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ImportError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            ImportError::Connection(err.to_string())
        } else if err.is_decode() {
            ImportError::Parse(err.to_string())
        } else {
            ImportError::SourceRead(err.to_string())
        }
    }
}

/// Result 类型别名
pub type ImportOutcome<T> = Result<T, ImportError>;
