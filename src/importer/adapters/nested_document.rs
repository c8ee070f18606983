// ==========================================
// 水资源风险监测平台 - 嵌套文档适配器 (JSON)
// ==========================================
// 支持: .json（整体文档）/ .jsonl .ndjson（逐行）
// 选项:
// - record_path: 记录数组所在的点分路径（缺省自动探测）
// - separator: 扁平化分隔符（默认 "."）
// - select: {输出字段: 点分路径}，路径缺失时跳过
// ==========================================

use crate::domain::record::RawRecord;
use crate::domain::task::TaskOptions;
use crate::domain::types::FormatType;
use crate::importer::adapter_trait::{stream_from_vec, FormatAdapter, RecordStream};
use crate::importer::adapters::{existing_path, extension_of, run_blocking};
use crate::importer::error::{ImportError, ImportOutcome};
use crate::importer::field_mapper::{flatten_object, lookup_path};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::warn;

/// 自动探测记录数组时依次尝试的键
pub const DEFAULT_RECORD_KEYS: &[&str] = &["data", "records", "features", "items"];

/// 记录投影方式
#[derive(Debug, Clone)]
pub struct Projection {
    pub separator: String,
    pub select: Option<Map<String, Value>>,
}

impl Projection {
    pub fn from_options(options: &TaskOptions) -> Self {
        Self {
            separator: options.get_str("separator").unwrap_or(".").to_string(),
            select: options.get_object("select").cloned(),
        }
    }

    /// 将一个 JSON 节点转为原始记录
    pub fn project(&self, item: &Value) -> Result<RawRecord, String> {
        let obj = match item {
            Value::Object(obj) => obj,
            other => return Err(format!("记录不是对象: {}", type_name(other))),
        };

        match &self.select {
            Some(select) => {
                let mut out = RawRecord::new();
                for (field, path) in select {
                    let path = path.as_str().unwrap_or_default();
                    if let Some(v) = lookup_path(item, path) {
                        out.insert(field.clone(), v.clone());
                    }
                }
                Ok(out)
            }
            None => Ok(flatten_object(obj, &self.separator)),
        }
    }
}

/// 从文档中定位记录数组
///
/// - 指定 record_path: 按路径取值（路径不存在返回空）
/// - 未指定: 顶层数组 → fallback_keys 中第一个数组 → 整个对象作为单条
pub fn locate_records<'a>(doc: &'a Value, record_path: Option<&str>, fallback_keys: &[&str]) -> Vec<&'a Value> {
    if let Some(path) = record_path {
        return match lookup_path(doc, path) {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(v @ Value::Object(_)) => vec![v],
            Some(_) | None => {
                warn!(record_path = path, "record_path 在文档中不存在");
                Vec::new()
            }
        };
    }

    match doc {
        Value::Array(items) => items.iter().collect(),
        Value::Object(obj) => {
            for key in fallback_keys {
                if let Some(Value::Array(items)) = obj.get(*key) {
                    return items.iter().collect();
                }
            }
            vec![doc]
        }
        _ => Vec::new(),
    }
}

/// 文档 → 原始记录列表（记录级错误保留在序列中）
pub fn records_from_document(
    doc: &Value,
    options: &TaskOptions,
    fallback_keys: &[&str],
) -> Vec<Result<RawRecord, String>> {
    let projection = Projection::from_options(options);
    locate_records(doc, options.get_str("record_path"), fallback_keys)
        .into_iter()
        .map(|item| projection.project(item))
        .collect()
}

/// 读取并解析整个 JSON 文件
pub fn read_json_file(path: &Path) -> ImportOutcome<Value> {
    let file = File::open(path)?;
    let doc = serde_json::from_reader(BufReader::new(file))?;
    Ok(doc)
}

/// JSON Lines 逐行惰性解析（空行跳过）
pub fn open_json_lines(path: &Path, projection: Projection) -> ImportOutcome<RecordStream> {
    let file = File::open(path)?;
    let lines = BufReader::new(file)
        .lines()
        .enumerate()
        .filter_map(move |(idx, line)| match line {
            Err(e) => Some(Err(format!("第 {} 行读取失败: {}", idx + 1, e))),
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(
                serde_json::from_str::<Value>(&line)
                    .map_err(|e| format!("第 {} 行不是合法 JSON: {}", idx + 1, e))
                    .and_then(|v| projection.project(&v)),
            ),
        });
    Ok(Box::new(lines))
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ==========================================
// NestedDocumentAdapter
// ==========================================
pub struct NestedDocumentAdapter;

#[async_trait]
impl FormatAdapter for NestedDocumentAdapter {
    fn format_type(&self) -> FormatType {
        FormatType::NestedDocument
    }

    fn validate_options(&self, _data_source: &str, options: &TaskOptions) -> ImportOutcome<()> {
        if let Some(select) = options.get("select") {
            let valid = select
                .as_object()
                .map_or(false, |m| m.values().all(Value::is_string));
            if !valid {
                return Err(ImportError::invalid_option("select", "必须是 {字段: 路径字符串} 对象"));
            }
        }
        Ok(())
    }

    async fn decode(&self, data_source: &str, options: &TaskOptions) -> ImportOutcome<RecordStream> {
        let path = existing_path(data_source)?;
        let options = options.clone();

        match extension_of(&path).as_str() {
            "jsonl" | "ndjson" => {
                let projection = Projection::from_options(&options);
                run_blocking(move || open_json_lines(&path, projection)).await
            }
            _ => {
                run_blocking(move || {
                    let doc = read_json_file(&path)?;
                    Ok(stream_from_vec(records_from_document(
                        &doc,
                        &options,
                        DEFAULT_RECORD_KEYS,
                    )))
                })
                .await
            }
        }
    }
}
