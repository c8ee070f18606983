// ==========================================
// 水资源风险监测平台 - 导入任务
// ==========================================
// TaskDescriptor: 外部提交的松散描述（字符串形式）
// ImportTask: 边界处一次性校验后的不可变任务
// ==========================================

use crate::domain::types::{FormatType, ModuleName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// 任务描述校验错误（调用方错误）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskValidationError {
    #[error("未知的导入格式: {0}")]
    UnknownFormat(String),

    #[error("未知的业务模块: {0}")]
    UnknownModule(String),

    #[error("任务描述不合法: {0}")]
    Malformed(String),
}

// ==========================================
// TaskDescriptor - 入站任务描述
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDescriptor {
    #[serde(default, alias = "type")]
    pub format_type: String,
    #[serde(default, alias = "module")]
    pub module_name: String,
    #[serde(default, alias = "source")]
    pub data_source: String,
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(default)]
    pub field_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub task_id: Option<String>,
}

// ==========================================
// TaskOptions - 适配器配置（只读访问器）
// ==========================================
/// 支持两种写法: 扁平 `"retry.max_retries": 5` 或嵌套 `"retry": {"max_retries": 5}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskOptions(Map<String, Value>);

impl TaskOptions {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// 按点分路径取值
    pub fn get(&self, key: &str) -> Option<&Value> {
        if let Some(v) = self.0.get(key) {
            return Some(v);
        }
        let mut parts = key.split('.');
        let first = parts.next()?;
        let mut current = self.0.get(first)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str).map(str::trim)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// u32 参数，超出范围时取 u32::MAX
    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get_u64(key)
            .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// 字符串列表（接受数组或逗号分隔字符串）
    pub fn get_str_list(&self, key: &str) -> Option<Vec<String>> {
        match self.get(key)? {
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
            Value::String(s) => Some(
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn get_object(&self, key: &str) -> Option<&Map<String, Value>> {
        self.get(key).and_then(Value::as_object)
    }
}

impl From<Map<String, Value>> for TaskOptions {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

// ==========================================
// ImportTask - 已校验的不可变任务
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportTask {
    task_id: String,
    format_type: FormatType,
    module_name: ModuleName,
    data_source: String,
    options: TaskOptions,
    field_mapping: BTreeMap<String, String>, // 规范字段名 → 源字段名
    submitted_at: DateTime<Utc>,
}

impl ImportTask {
    /// 构造任务（数据源不能为空）
    pub fn new(
        format_type: FormatType,
        module_name: ModuleName,
        data_source: impl Into<String>,
    ) -> Result<Self, TaskValidationError> {
        let data_source = data_source.into();
        if data_source.trim().is_empty() {
            return Err(TaskValidationError::Malformed(
                "data_source 不能为空".to_string(),
            ));
        }

        Ok(Self {
            task_id: Uuid::new_v4().to_string(),
            format_type,
            module_name,
            data_source: data_source.trim().to_string(),
            options: TaskOptions::default(),
            field_mapping: BTreeMap::new(),
            submitted_at: Utc::now(),
        })
    }

    pub fn with_options(mut self, options: impl Into<TaskOptions>) -> Self {
        self.options = options.into();
        self
    }

    /// 设置字段映射（空名称、同一源字段映射多次视为调用方错误）
    pub fn with_field_mapping(
        mut self,
        mapping: BTreeMap<String, String>,
    ) -> Result<Self, TaskValidationError> {
        let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
        for (canonical, source) in &mapping {
            if canonical.trim().is_empty() || source.trim().is_empty() {
                return Err(TaskValidationError::Malformed(format!(
                    "field_mapping 含空字段名: '{}' → '{}'",
                    canonical, source
                )));
            }
            if let Some(first) = seen.insert(source.as_str(), canonical.as_str()) {
                return Err(TaskValidationError::Malformed(format!(
                    "field_mapping 中源字段 '{}' 同时映射到 '{}' 和 '{}'",
                    source, first, canonical
                )));
            }
        }
        self.field_mapping = mapping;
        Ok(self)
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn format_type(&self) -> FormatType {
        self.format_type
    }

    pub fn module_name(&self) -> ModuleName {
        self.module_name
    }

    pub fn data_source(&self) -> &str {
        &self.data_source
    }

    pub fn options(&self) -> &TaskOptions {
        &self.options
    }

    pub fn field_mapping(&self) -> &BTreeMap<String, String> {
        &self.field_mapping
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }
}

impl TryFrom<TaskDescriptor> for ImportTask {
    type Error = TaskValidationError;

    fn try_from(desc: TaskDescriptor) -> Result<Self, Self::Error> {
        if desc.format_type.trim().is_empty() {
            return Err(TaskValidationError::Malformed(
                "缺少 format_type".to_string(),
            ));
        }
        if desc.module_name.trim().is_empty() {
            return Err(TaskValidationError::Malformed(
                "缺少 module_name".to_string(),
            ));
        }

        let format_type: FormatType = desc
            .format_type
            .parse()
            .map_err(TaskValidationError::UnknownFormat)?;
        let module_name: ModuleName = desc
            .module_name
            .parse()
            .map_err(TaskValidationError::UnknownModule)?;

        let mut task = ImportTask::new(format_type, module_name, desc.data_source)?
            .with_options(desc.options)
            .with_field_mapping(desc.field_mapping)?;
        if let Some(id) = desc.task_id.filter(|id| !id.trim().is_empty()) {
            task = task.with_task_id(id);
        }
        Ok(task)
    }
}
