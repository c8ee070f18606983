// ==========================================
// 水资源风险监测平台 - 记录校验器
// ==========================================
// 职责: 必填 / 类型 / 坐标 / 日期区间 / 数值区间 / 多边形
// 约定: 坏数据是正常结果，校验器只返回 Accepted / Rejected(原因)
// ==========================================

use crate::domain::record::{CanonicalRecord, FieldValue};
use crate::domain::rules::{parse_datetime, RuleSet};
use crate::domain::record::RawRecord;
use crate::domain::types::ScalarType;
use crate::importer::data_cleaner::{clean_bool, clean_text, clean_value};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;

pub const LAT_RANGE: (f64, f64) = (-90.0, 90.0);
pub const LNG_RANGE: (f64, f64) = (-180.0, 180.0);

/// 校验结果
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Accepted,
    Rejected(String),
}

impl ValidationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationOutcome::Accepted)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ValidationOutcome::Accepted => None,
            ValidationOutcome::Rejected(r) => Some(r),
        }
    }

    fn reject(reason: String) -> Self {
        ValidationOutcome::Rejected(reason)
    }
}

/// 必填字段：缺失 / Absent / 空文本均视为缺失
pub fn validate_required_fields(record: &CanonicalRecord, required: &[String]) -> ValidationOutcome {
    let missing: Vec<&str> = required
        .iter()
        .filter(|f| !record.is_present(f))
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        ValidationOutcome::Accepted
    } else {
        ValidationOutcome::reject(format!("缺少必填字段: {}", missing.join(", ")))
    }
}

/// 清洗前的类型校验
///
/// 声明字段的非空原始值若无法转换为声明类型则拒绝；null / 空串留给必填校验
pub fn validate_raw_types(
    raw: &RawRecord,
    field_types: &BTreeMap<String, ScalarType>,
) -> ValidationOutcome {
    for (field, expected) in field_types {
        let value = match raw.get(field) {
            None | Some(serde_json::Value::Null) => continue,
            Some(serde_json::Value::String(s)) if s.trim().is_empty() => continue,
            Some(v) => v,
        };

        let coerced = match expected {
            ScalarType::Numeric => clean_value(value),
            ScalarType::Text => clean_text(value, None),
            ScalarType::Boolean => clean_bool(value),
        };
        if coerced == FieldValue::Absent {
            return ValidationOutcome::reject(format!(
                "字段 '{}' 类型错误: 期望 {}, 实际 {}",
                field, expected, value
            ));
        }
    }
    ValidationOutcome::Accepted
}

/// 类型校验：仅检查已出现且非 Absent 的声明字段
pub fn validate_data_types(
    record: &CanonicalRecord,
    field_types: &BTreeMap<String, ScalarType>,
) -> ValidationOutcome {
    for (field, expected) in field_types {
        let value = match record.get(field) {
            None | Some(FieldValue::Absent) => continue,
            Some(v) => v,
        };

        let ok = match expected {
            ScalarType::Numeric => value.as_f64().is_some(),
            ScalarType::Text => matches!(value, FieldValue::Text(_) | FieldValue::Number(_)),
            ScalarType::Boolean => match value {
                FieldValue::Bool(_) => true,
                FieldValue::Text(s) => matches!(
                    s.trim().to_ascii_lowercase().as_str(),
                    "true" | "false" | "1" | "0" | "yes" | "no"
                ),
                FieldValue::Number(n) => *n == 0.0 || *n == 1.0,
                FieldValue::Absent => true,
            },
        };

        if !ok {
            return ValidationOutcome::reject(format!(
                "字段 '{}' 类型错误: 期望 {}, 实际 {}",
                field,
                expected,
                describe(value)
            ));
        }
    }
    ValidationOutcome::Accepted
}

/// 坐标校验：两字段均须存在、为数值且在合法范围内
pub fn validate_coordinates(
    record: &CanonicalRecord,
    lat_field: &str,
    lng_field: &str,
) -> ValidationOutcome {
    let lat = match numeric_field(record, lat_field) {
        Ok(v) => v,
        Err(reason) => return ValidationOutcome::reject(reason),
    };
    let lng = match numeric_field(record, lng_field) {
        Ok(v) => v,
        Err(reason) => return ValidationOutcome::reject(reason),
    };

    if !in_range(lat, LAT_RANGE) {
        return ValidationOutcome::reject(format!(
            "纬度 {}={} 超出范围 [-90, 90]",
            lat_field, lat
        ));
    }
    if !in_range(lng, LNG_RANGE) {
        return ValidationOutcome::reject(format!(
            "经度 {}={} 超出范围 [-180, 180]",
            lng_field, lng
        ));
    }
    ValidationOutcome::Accepted
}

/// 日期区间校验（闭区间，任一边界可省略）
pub fn validate_date_range(
    record: &CanonicalRecord,
    field: &str,
    min_date: Option<DateTime<Utc>>,
    max_date: Option<DateTime<Utc>>,
) -> ValidationOutcome {
    let parsed = match record.get(field) {
        Some(FieldValue::Text(s)) => parse_datetime(s),
        // 数值视为 Unix 秒
        Some(FieldValue::Number(n)) => Utc.timestamp_opt(*n as i64, 0).single(),
        _ => return ValidationOutcome::reject(format!("日期字段 '{}' 缺失", field)),
    };

    let ts = match parsed {
        Some(ts) => ts,
        None => {
            return ValidationOutcome::reject(format!(
                "日期字段 '{}' 无法解析: {}",
                field,
                record.get(field).map(describe).unwrap_or_default()
            ))
        }
    };

    if let Some(min) = min_date {
        if ts < min {
            return ValidationOutcome::reject(format!("日期 {}={} 早于下限 {}", field, ts, min));
        }
    }
    if let Some(max) = max_date {
        if ts > max {
            return ValidationOutcome::reject(format!("日期 {}={} 晚于上限 {}", field, ts, max));
        }
    }
    ValidationOutcome::Accepted
}

/// 数值区间校验（闭区间）
pub fn validate_numeric_range(
    record: &CanonicalRecord,
    field: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> ValidationOutcome {
    let value = match numeric_field(record, field) {
        Ok(v) => v,
        Err(reason) => return ValidationOutcome::reject(reason),
    };
    if min.map_or(false, |m| value < m) || max.map_or(false, |m| value > m) {
        return ValidationOutcome::reject(format!(
            "数值 {}={} 超出范围 [{}, {}]",
            field,
            value,
            min.map(|v| v.to_string()).unwrap_or_else(|| "-∞".to_string()),
            max.map(|v| v.to_string()).unwrap_or_else(|| "+∞".to_string()),
        ));
    }
    ValidationOutcome::Accepted
}

/// 多边形环校验（坐标顺序为 [lng, lat]）
///
/// 至少 4 个点、首尾闭合、所有顶点在合法范围内
pub fn validate_polygon(ring: &[(f64, f64)]) -> ValidationOutcome {
    if ring.len() < 4 {
        return ValidationOutcome::reject(format!("多边形顶点不足: {} < 4", ring.len()));
    }
    if ring.first() != ring.last() {
        return ValidationOutcome::reject("多边形未闭合".to_string());
    }
    for (i, (lng, lat)) in ring.iter().enumerate() {
        if !in_range(*lat, LAT_RANGE) || !in_range(*lng, LNG_RANGE) {
            return ValidationOutcome::reject(format!(
                "多边形第 {} 个顶点越界: ({}, {})",
                i, lng, lat
            ));
        }
    }
    ValidationOutcome::Accepted
}

/// 按规则集依次校验：必填 → 类型 → 坐标 → 日期 → 数值区间
///
/// 坐标/日期/区间字段缺失且非必填时跳过
pub fn validate_record(record: &CanonicalRecord, rules: &RuleSet) -> ValidationOutcome {
    let outcome = validate_required_fields(record, &rules.required_fields);
    if !outcome.is_accepted() {
        return outcome;
    }

    let outcome = validate_data_types(record, &rules.field_types);
    if !outcome.is_accepted() {
        return outcome;
    }

    if let Some(coords) = &rules.coordinates {
        let any_present = record.is_present(&coords.lat_field) || record.is_present(&coords.lng_field);
        if coords.required || any_present {
            let outcome = validate_coordinates(record, &coords.lat_field, &coords.lng_field);
            if !outcome.is_accepted() {
                return outcome;
            }
        }
    }

    if let Some(range) = &rules.date_range {
        if record.is_present(&range.field) {
            let outcome = validate_date_range(record, &range.field, range.min, range.max);
            if !outcome.is_accepted() {
                return outcome;
            }
        }
    }

    for range in &rules.ranges {
        if record.is_present(&range.field) {
            let outcome = validate_numeric_range(record, &range.field, range.min, range.max);
            if !outcome.is_accepted() {
                return outcome;
            }
        }
    }

    ValidationOutcome::Accepted
}

// ===== 辅助函数 =====

fn in_range(v: f64, (min, max): (f64, f64)) -> bool {
    v >= min && v <= max
}

fn numeric_field(record: &CanonicalRecord, field: &str) -> Result<f64, String> {
    match record.get(field) {
        None | Some(FieldValue::Absent) => Err(format!("字段 '{}' 缺失", field)),
        Some(v) => v
            .as_f64()
            .ok_or_else(|| format!("字段 '{}' 不是数值: {}", field, describe(v))),
    }
}

fn describe(value: &FieldValue) -> String {
    match value {
        FieldValue::Number(n) => n.to_string(),
        FieldValue::Text(s) => format!("'{}'", s),
        FieldValue::Bool(b) => b.to_string(),
        FieldValue::Absent => "<absent>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rules::{CoordinateRule, DateRangeRule};

    fn record(pairs: &[(&str, FieldValue)]) -> CanonicalRecord {
        pairs.iter().map(|(k, v)| (*k, v.clone())).collect()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_required_fields() {
        let r = record(&[
            ("device_id", "iot_002".into()),
            ("timestamp", "2024-01-01T01:00:00".into()),
            ("consumption", FieldValue::Absent),
        ]);
        let outcome = validate_required_fields(&r, &strings(&["device_id", "timestamp", "consumption"]));
        assert!(!outcome.is_accepted());
        assert!(outcome.reason().unwrap().contains("consumption"));

        let outcome = validate_required_fields(&r, &strings(&["device_id"]));
        assert!(outcome.is_accepted());
    }

    #[test]
    fn test_raw_types_reject_uncoercible_values() {
        let types = BTreeMap::from([
            ("pm25".to_string(), ScalarType::Numeric),
            ("online".to_string(), ScalarType::Boolean),
        ]);
        let raw = |v: serde_json::Value| -> RawRecord { v.as_object().cloned().unwrap() };

        let outcome = validate_raw_types(&raw(serde_json::json!({"pm25": "abc"})), &types);
        assert!(outcome.reason().unwrap().contains("pm25"));
        let outcome = validate_raw_types(&raw(serde_json::json!({"online": "maybe"})), &types);
        assert!(!outcome.is_accepted());

        // 空值交给必填校验
        let blank = raw(serde_json::json!({"pm25": " ", "online": null}));
        assert!(validate_raw_types(&blank, &types).is_accepted());
        let good = raw(serde_json::json!({"pm25": "12.5", "online": "yes"}));
        assert!(validate_raw_types(&good, &types).is_accepted());
    }

    #[test]
    fn test_coordinates_out_of_range() {
        let r = record(&[("lat", "95".into()), ("lng", "10".into())]);
        let outcome = validate_coordinates(&r, "lat", "lng");
        assert!(!outcome.is_accepted(), "纬度 95 应被拒绝");
        assert!(outcome.reason().unwrap().contains("纬度"));

        let r = record(&[("lat", 45.0.into()), ("lng", (-181.0).into())]);
        assert!(!validate_coordinates(&r, "lat", "lng").is_accepted());

        let r = record(&[("lat", (-90.0).into()), ("lng", 180.0.into())]);
        assert!(validate_coordinates(&r, "lat", "lng").is_accepted(), "边界值应通过");
    }

    #[test]
    fn test_coordinates_missing_or_non_numeric() {
        let r = record(&[("lat", 10.0.into())]);
        assert!(!validate_coordinates(&r, "lat", "lng").is_accepted());

        let r = record(&[("lat", "north".into()), ("lng", 10.0.into())]);
        assert!(!validate_coordinates(&r, "lat", "lng").is_accepted());
    }

    #[test]
    fn test_data_types() {
        let types = BTreeMap::from([
            ("consumption".to_string(), ScalarType::Numeric),
            ("active".to_string(), ScalarType::Boolean),
        ]);
        let r = record(&[("consumption", "12.5".into()), ("active", "yes".into())]);
        assert!(validate_data_types(&r, &types).is_accepted());

        let r = record(&[("consumption", "lots".into())]);
        let outcome = validate_data_types(&r, &types);
        assert!(outcome.reason().unwrap().contains("consumption"));

        // 缺失字段交给必填校验
        let r = record(&[("consumption", FieldValue::Absent)]);
        assert!(validate_data_types(&r, &types).is_accepted());
    }

    #[test]
    fn test_date_range_inclusive() {
        let min = parse_datetime("2024-01-01T00:00:00");
        let max = parse_datetime("2024-01-31T00:00:00");

        let r = record(&[("timestamp", "2024-01-01T00:00:00".into())]);
        assert!(validate_date_range(&r, "timestamp", min, max).is_accepted());

        let r = record(&[("timestamp", "2024-01-31T00:00:00Z".into())]);
        assert!(validate_date_range(&r, "timestamp", min, max).is_accepted());

        let r = record(&[("timestamp", "2024-02-01".into())]);
        assert!(!validate_date_range(&r, "timestamp", min, max).is_accepted());

        let r = record(&[("timestamp", "not a date".into())]);
        assert!(!validate_date_range(&r, "timestamp", min, max).is_accepted());
    }

    #[test]
    fn test_numeric_range() {
        let r = record(&[("cloud_cover", 35.0.into())]);
        assert!(!validate_numeric_range(&r, "cloud_cover", Some(0.0), Some(20.0)).is_accepted());
        assert!(validate_numeric_range(&r, "cloud_cover", None, Some(35.0)).is_accepted());
    }

    #[test]
    fn test_polygon() {
        let square = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)];
        assert!(validate_polygon(&square).is_accepted());

        let open = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];
        assert!(!validate_polygon(&open).is_accepted());

        let out = [(0.0, 0.0), (200.0, 0.0), (1.0, 1.0), (0.0, 0.0)];
        assert!(!validate_polygon(&out).is_accepted());
    }

    #[test]
    fn test_validate_record_order_and_skips() {
        let rules = RuleSet {
            required_fields: strings(&["timestamp"]),
            coordinates: Some(CoordinateRule::default()),
            date_range: Some(DateRangeRule {
                field: "timestamp".to_string(),
                min: parse_datetime("2024-01-01"),
                max: None,
            }),
            ..RuleSet::default()
        };

        // 非必填坐标缺失 → 跳过
        let r = record(&[("timestamp", "2024-03-01".into())]);
        assert!(validate_record(&r, &rules).is_accepted());

        // 必填先于日期
        let r = record(&[("lat", 10.0.into())]);
        assert!(validate_record(&r, &rules).reason().unwrap().contains("必填"));

        // 只给一半坐标 → 拒绝
        let r = record(&[("timestamp", "2024-03-01".into()), ("lat", 10.0.into())]);
        assert!(!validate_record(&r, &rules).is_accepted());

        let r = record(&[("timestamp", "2023-12-31".into())]);
        assert!(!validate_record(&r, &rules).is_accepted());
    }

    #[test]
    fn test_narrower_rules_never_accept_more() {
        let records: Vec<CanonicalRecord> = ["2024-01-05", "2024-02-10", "2024-03-15", "bad"]
            .iter()
            .map(|d| record(&[("timestamp", (*d).into())]))
            .collect();

        let wide = RuleSet {
            date_range: Some(DateRangeRule {
                field: "timestamp".into(),
                min: parse_datetime("2024-01-01"),
                max: parse_datetime("2024-12-31"),
            }),
            ..RuleSet::default()
        };
        let mut narrow = wide.clone();
        narrow.date_range.as_mut().unwrap().max = parse_datetime("2024-02-28");

        let accepted = |rules: &RuleSet| records.iter().filter(|r| validate_record(r, rules).is_accepted()).count();
        assert!(accepted(&narrow) <= accepted(&wide));
        assert_eq!(accepted(&wide), 3);
        assert_eq!(accepted(&narrow), 2);
    }
}
