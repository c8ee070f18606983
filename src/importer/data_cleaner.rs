// ==========================================
// 水资源风险监测平台 - 数据清洗器
// ==========================================
// 职责: 标量清洗 + 按声明类型清洗整条记录
// 红线: 无效值一律落为 Absent,绝不落为 0
// ==========================================

use crate::domain::record::{CanonicalRecord, FieldValue, RawRecord};
use crate::domain::types::ScalarType;
use serde_json::Value;
use std::collections::BTreeMap;

/// 数值清洗
///
/// - `"100.5"` → 100.5, `"0"` → 0.0
/// - 非数值 / 空串 / null / 布尔 / 非有限值 → Absent
pub fn clean_value(raw: &Value) -> FieldValue {
    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => FieldValue::Number(v),
        _ => FieldValue::Absent,
    }
}

/// 文本清洗：TRIM，空串 → Absent，可选最大长度截断
pub fn clean_text(raw: &Value, max_length: Option<usize>) -> FieldValue {
    let text = match raw {
        Value::Null => return FieldValue::Absent,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    };
    if text.is_empty() {
        return FieldValue::Absent;
    }
    match max_length {
        Some(max) if text.chars().count() > max => FieldValue::Text(text.chars().take(max).collect()),
        _ => FieldValue::Text(text),
    }
}

/// 布尔清洗：true/false/1/0/yes/no（大小写不敏感）
pub fn clean_bool(raw: &Value) -> FieldValue {
    match raw {
        Value::Bool(b) => FieldValue::Bool(*b),
        Value::Number(n) => match n.as_f64() {
            Some(v) if v == 1.0 => FieldValue::Bool(true),
            Some(v) if v == 0.0 => FieldValue::Bool(false),
            _ => FieldValue::Absent,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "y" => FieldValue::Bool(true),
            "false" | "0" | "no" | "n" => FieldValue::Bool(false),
            _ => FieldValue::Absent,
        },
        _ => FieldValue::Absent,
    }
}

/// 未声明类型的字段：保留原始语义，仅做 TRIM / 空值标准化
fn clean_untyped(raw: &Value) -> FieldValue {
    match raw {
        Value::Null => FieldValue::Absent,
        Value::Bool(b) => FieldValue::Bool(*b),
        Value::Number(n) => n.as_f64().map(FieldValue::Number).unwrap_or(FieldValue::Absent),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                FieldValue::Absent
            } else {
                FieldValue::Text(trimmed.to_string())
            }
        }
        // 扁平化后残留的数组/对象以 JSON 文本保存
        other => FieldValue::Text(other.to_string()),
    }
}

/// 清洗整条记录
///
/// # 参数
/// - mapped: 字段映射后的记录
/// - field_types: 声明的字段类型（未声明字段走宽松清洗）
/// - max_text_length: 文本字段最大长度（None 不截断）
pub fn clean_record(
    mapped: &RawRecord,
    field_types: &BTreeMap<String, ScalarType>,
    max_text_length: Option<usize>,
) -> CanonicalRecord {
    mapped
        .iter()
        .map(|(field, raw)| {
            let value = match field_types.get(field) {
                Some(ScalarType::Numeric) => clean_value(raw),
                Some(ScalarType::Text) => clean_text(raw, max_text_length),
                Some(ScalarType::Boolean) => clean_bool(raw),
                None => clean_untyped(raw),
            };
            (field.clone(), value)
        })
        .collect()
}
