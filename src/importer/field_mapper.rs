// ==========================================
// 水资源风险监测平台 - 字段映射器
// ==========================================
// 职责: 源字段名 → 规范字段名（未映射的键原样透传）
// 附带: 嵌套对象扁平化（点分键），供文档类适配器复用
// ==========================================

use crate::domain::record::RawRecord;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 应用字段映射
///
/// # 参数
/// - raw: 原始记录
/// - mapping: 规范字段名 → 源字段名
///
/// # 返回
/// - 重命名后的记录；源字段被映射后不再以原名保留。
///   若映射目标已存在，映射值覆盖原值；映射源缺失时不产生目标键。
pub fn apply_field_mapping(raw: RawRecord, mapping: &BTreeMap<String, String>) -> RawRecord {
    if mapping.is_empty() {
        return raw;
    }

    let mut source = raw;
    let mut mapped = Map::with_capacity(source.len());

    for (canonical, source_name) in mapping {
        if let Some(value) = source.remove(source_name) {
            mapped.insert(canonical.clone(), value);
        }
    }

    for (key, value) in source {
        if !mapped.contains_key(&key) {
            mapped.insert(key, value);
        }
    }

    mapped
}

/// 将嵌套对象扁平化为点分键
///
/// # 示例
/// `{"main": {"temp": 20}}` → `{"main.temp": 20}`；数组保持原值
pub fn flatten_object(value: &Map<String, Value>, separator: &str) -> RawRecord {
    let mut out = Map::new();
    flatten_into(&mut out, None, value, separator);
    out
}

fn flatten_into(out: &mut RawRecord, prefix: Option<&str>, value: &Map<String, Value>, sep: &str) {
    for (key, v) in value {
        let full_key = match prefix {
            Some(p) => format!("{}{}{}", p, sep, key),
            None => key.clone(),
        };
        match v {
            Value::Object(inner) if !inner.is_empty() => {
                flatten_into(out, Some(&full_key), inner, sep)
            }
            _ => {
                out.insert(full_key, v.clone());
            }
        }
    }
}

/// 按点分路径取嵌套值（路径缺失返回 None）
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, part| match current {
        Value::Object(map) => map.get(part),
        Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RawRecord {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_mapping_renames_and_passes_through() {
        let raw = record(json!({"sensor_id": "A1", "reading": 3}));
        let mapping = BTreeMap::from([("device_id".to_string(), "sensor_id".to_string())]);

        let mapped = apply_field_mapping(raw, &mapping);

        assert_eq!(mapped.get("device_id"), Some(&json!("A1")));
        assert_eq!(mapped.get("reading"), Some(&json!(3)));
        assert!(!mapped.contains_key("sensor_id"), "源字段名不应保留");
        assert_eq!(mapped.len(), 2);
    }

    #[test]
    fn test_mapping_missing_source_is_ignored() {
        let raw = record(json!({"a": 1}));
        let mapping = BTreeMap::from([("b".to_string(), "missing".to_string())]);
        let mapped = apply_field_mapping(raw, &mapping);
        assert_eq!(mapped, record(json!({"a": 1})));
    }

    #[test]
    fn test_mapping_value_wins_over_existing_key() {
        let raw = record(json!({"device_id": "old", "sensor_id": "new"}));
        let mapping = BTreeMap::from([("device_id".to_string(), "sensor_id".to_string())]);
        let mapped = apply_field_mapping(raw, &mapping);
        assert_eq!(mapped.get("device_id"), Some(&json!("new")));
    }

    #[test]
    fn test_flatten_object() {
        let nested = record(json!({
            "station": "S1",
            "main": {"temp": 21.5, "wind": {"speed": 3}},
            "tags": ["a", "b"],
            "empty": {}
        }));
        let flat = flatten_object(&nested, ".");
        assert_eq!(flat.get("main.temp"), Some(&json!(21.5)));
        assert_eq!(flat.get("main.wind.speed"), Some(&json!(3)));
        assert_eq!(flat.get("tags"), Some(&json!(["a", "b"])));
        assert_eq!(flat.get("empty"), Some(&json!({})));
    }

    #[test]
    fn test_lookup_path() {
        let doc = json!({"data": {"items": [{"id": 1}, {"id": 2}]}});
        assert_eq!(lookup_path(&doc, "data.items.1.id"), Some(&json!(2)));
        assert_eq!(lookup_path(&doc, "data.missing"), None);
    }
}
