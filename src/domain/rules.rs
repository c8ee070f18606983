// ==========================================
// 水资源风险监测平台 - 校验规则（数据而非代码）
// ==========================================
// 职责: 声明必填字段 / 字段类型 / 坐标 / 日期区间 / 数值区间
// 组合: 模块默认 ∪ 适配器默认 → 任务 options 覆写
// ==========================================

use crate::domain::task::{TaskOptions, TaskValidationError};
use crate::domain::types::{ModuleName, ScalarType};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// 坐标规则
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinateRule {
    pub lat_field: String,
    pub lng_field: String,
    pub required: bool, // false: 两个字段都缺失时跳过
}

impl Default for CoordinateRule {
    fn default() -> Self {
        Self {
            lat_field: "lat".to_string(),
            lng_field: "lng".to_string(),
            required: false,
        }
    }
}

/// 日期区间规则（闭区间）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateRangeRule {
    pub field: String,
    pub min: Option<DateTime<Utc>>,
    pub max: Option<DateTime<Utc>>,
}

/// 数值区间规则（闭区间）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeRule {
    pub field: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

// ==========================================
// RuleSet - 一个任务实际生效的规则集合
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleSet {
    pub required_fields: Vec<String>,
    pub field_types: BTreeMap<String, ScalarType>,
    pub coordinates: Option<CoordinateRule>,
    pub date_range: Option<DateRangeRule>,
    pub ranges: Vec<RangeRule>,
}

impl RuleSet {
    /// 模块默认规则
    pub fn for_module(module: ModuleName) -> Self {
        let (required, numeric): (&[&str], &[&str]) = match module {
            ModuleName::IotWaterConsumption => {
                (&["device_id", "timestamp", "consumption"], &["consumption"])
            }
            ModuleName::UrbanGreenSpace => (
                &["green_space_type", "lat", "lng", "area"],
                &["lat", "lng", "area"],
            ),
            ModuleName::UrbanWaterNetwork => (
                &["network_id", "timestamp", "pressure", "flow_rate"],
                &["pressure", "flow_rate"],
            ),
            _ => (&["timestamp"], &[]),
        };

        let mut rules = RuleSet::default();
        rules.add_required(required.iter().map(|s| s.to_string()));
        for field in numeric {
            rules.field_types.insert(field.to_string(), ScalarType::Numeric);
        }

        if module.is_spatial() {
            rules.coordinates = Some(CoordinateRule {
                required: module == ModuleName::UrbanGreenSpace,
                ..CoordinateRule::default()
            });
        }

        rules
    }

    /// 追加必填字段（去重，保持声明顺序）
    pub fn add_required<I: IntoIterator<Item = String>>(&mut self, fields: I) {
        for field in fields {
            if !self.required_fields.contains(&field) {
                self.required_fields.push(field);
            }
        }
    }

    /// 合并另一组默认规则（已有声明优先）
    pub fn merge_defaults(&mut self, required: &[String], field_types: &BTreeMap<String, ScalarType>) {
        self.add_required(required.iter().cloned());
        for (field, ty) in field_types {
            self.field_types.entry(field.clone()).or_insert(*ty);
        }
    }

    pub fn require_coordinates(&mut self) {
        let mut rule = self.coordinates.take().unwrap_or_default();
        rule.required = true;
        self.coordinates = Some(rule);
    }

    /// 应用任务 options 覆写
    ///
    /// # 支持的键
    /// - skip_default_rules: 清空已有默认规则
    /// - required_fields / field_types
    /// - lat_field / lng_field / require_coordinates
    /// - date_field / min_date / max_date
    /// - ranges: {field: {min, max}}
    pub fn apply_options(mut self, options: &TaskOptions) -> Result<Self, TaskValidationError> {
        if options.get_bool("skip_default_rules").unwrap_or(false) {
            self = RuleSet::default();
        }

        if let Some(fields) = options.get_str_list("required_fields") {
            self.add_required(fields);
        }

        if let Some(types) = options.get_object("field_types") {
            for (field, ty) in types {
                let ty_name = ty.as_str().unwrap_or_default();
                let parsed: ScalarType = ty_name.parse().map_err(|_| {
                    TaskValidationError::Malformed(format!(
                        "field_types.{} 类型不支持: {}",
                        field, ty
                    ))
                })?;
                self.field_types.insert(field.clone(), parsed);
            }
        }

        let lat = options.get_str("lat_field");
        let lng = options.get_str("lng_field");
        if lat.is_some() || lng.is_some() || options.get_bool("require_coordinates").is_some() {
            let mut rule = self.coordinates.take().unwrap_or_default();
            if let Some(lat) = lat {
                rule.lat_field = lat.to_string();
            }
            if let Some(lng) = lng {
                rule.lng_field = lng.to_string();
            }
            if let Some(required) = options.get_bool("require_coordinates") {
                rule.required = required;
            }
            self.coordinates = Some(rule);
        }

        let min_date = parse_date_option(options, "min_date")?;
        let max_date = parse_date_option(options, "max_date")?;
        if min_date.is_some() || max_date.is_some() {
            let field = options
                .get_str("date_field")
                .unwrap_or("timestamp")
                .to_string();
            if let (Some(min), Some(max)) = (min_date, max_date) {
                if min > max {
                    return Err(TaskValidationError::Malformed(format!(
                        "min_date 晚于 max_date: {} > {}",
                        min, max
                    )));
                }
            }
            self.date_range = Some(DateRangeRule {
                field,
                min: min_date,
                max: max_date,
            });
        }

        if let Some(ranges) = options.get_object("ranges") {
            for (field, bounds) in ranges {
                let min = bounds.get("min").and_then(Value::as_f64);
                let max = bounds.get("max").and_then(Value::as_f64);
                self.add_range(field, min, max);
            }
        }

        Ok(self)
    }

    /// 新增数值区间（同字段覆盖）
    pub fn add_range(&mut self, field: &str, min: Option<f64>, max: Option<f64>) {
        self.ranges.retain(|r| r.field != field);
        self.ranges.push(RangeRule {
            field: field.to_string(),
            min,
            max,
        });
    }
}

fn parse_date_option(
    options: &TaskOptions,
    key: &str,
) -> Result<Option<DateTime<Utc>>, TaskValidationError> {
    match options.get_str(key) {
        None => Ok(None),
        Some(raw) => parse_datetime(raw)
            .map(Some)
            .ok_or_else(|| TaskValidationError::Malformed(format!("{} 无法解析为日期: {}", key, raw))),
    }
}

/// 解析日期时间
///
/// # 支持格式
/// - RFC 3339（含 `Z` 后缀）
/// - `YYYY-MM-DDTHH:MM:SS` / `YYYY-MM-DD HH:MM:SS`（按 UTC）
/// - `YYYY-MM-DD` / `YYYYMMDD`（当天 00:00 UTC）
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for fmt in ["%Y-%m-%d", "%Y%m%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(value: Value) -> TaskOptions {
        TaskOptions::new(value.as_object().cloned().unwrap())
    }

    #[test]
    fn test_module_defaults() {
        let iot = RuleSet::for_module(ModuleName::IotWaterConsumption);
        assert_eq!(iot.required_fields, vec!["device_id", "timestamp", "consumption"]);
        assert_eq!(iot.field_types.get("consumption"), Some(&ScalarType::Numeric));
        assert!(iot.coordinates.is_none());

        let green = RuleSet::for_module(ModuleName::UrbanGreenSpace);
        assert!(green.coordinates.as_ref().unwrap().required);

        let env = RuleSet::for_module(ModuleName::EnvironmentalHealth);
        assert_eq!(env.required_fields, vec!["timestamp"]);
        assert!(!env.coordinates.as_ref().unwrap().required);
    }

    #[test]
    fn test_apply_options_overrides() {
        let rules = RuleSet::for_module(ModuleName::EnvironmentalHealth)
            .apply_options(&options(json!({
                "required_fields": ["pm25"],
                "field_types": {"pm25": "float"},
                "lat_field": "latitude",
                "min_date": "2024-01-01",
                "max_date": "2024-12-31T23:59:59Z",
                "ranges": {"pm25": {"min": 0, "max": 500}}
            })))
            .unwrap();

        assert_eq!(rules.required_fields, vec!["timestamp", "pm25"]);
        assert_eq!(rules.field_types.get("pm25"), Some(&ScalarType::Numeric));
        assert_eq!(rules.coordinates.as_ref().unwrap().lat_field, "latitude");
        let range = rules.date_range.unwrap();
        assert_eq!(range.field, "timestamp");
        assert!(range.min.unwrap() < range.max.unwrap());
        assert_eq!(rules.ranges.len(), 1);
    }

    #[test]
    fn test_apply_options_rejects_bad_values() {
        let err = RuleSet::default()
            .apply_options(&options(json!({"min_date": "not-a-date"})))
            .unwrap_err();
        assert!(matches!(err, TaskValidationError::Malformed(_)));

        let err = RuleSet::default()
            .apply_options(&options(json!({"field_types": {"x": "geometry"}})))
            .unwrap_err();
        assert!(matches!(err, TaskValidationError::Malformed(_)));

        let err = RuleSet::default()
            .apply_options(&options(json!({"min_date": "2025-01-01", "max_date": "2024-01-01"})))
            .unwrap_err();
        assert!(matches!(err, TaskValidationError::Malformed(_)));
    }

    #[test]
    fn test_skip_default_rules() {
        let rules = RuleSet::for_module(ModuleName::IotWaterConsumption)
            .apply_options(&options(json!({"skip_default_rules": true})))
            .unwrap();
        assert!(rules.required_fields.is_empty());
        assert!(rules.field_types.is_empty());
    }

    #[test]
    fn test_parse_datetime_formats() {
        assert!(parse_datetime("2024-01-01T00:00:00").is_some());
        assert!(parse_datetime("2024-01-01T00:00:00Z").is_some());
        assert!(parse_datetime("2024-01-01 08:30:00").is_some());
        assert!(parse_datetime("2024-01-01").is_some());
        assert!(parse_datetime("20240101").is_some());
        assert!(parse_datetime("yesterday").is_none());
        assert!(parse_datetime("").is_none());
    }
}
