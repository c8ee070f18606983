// ==========================================
// 水资源风险监测平台 - GeoJSON 适配器
// ==========================================
// 支持: FeatureCollection / 单个 Feature
// 几何归约:
// - Point → lat / lng
// - LineString / MultiPoint / Polygon / MultiPolygon → 质心 lat / lng + 外包框
// 多边形顶点越界 → 该要素记为记录级错误
// ==========================================

use crate::domain::record::RawRecord;
use crate::domain::rules::RuleSet;
use crate::domain::task::TaskOptions;
use crate::domain::types::{FormatType, ScalarType};
use crate::importer::adapter_trait::{stream_from_vec, FormatAdapter, RecordStream};
use crate::importer::adapters::nested_document::read_json_file;
use crate::importer::adapters::{existing_path, run_blocking};
use crate::importer::dq_validator::{validate_polygon, ValidationOutcome};
use crate::importer::error::{ImportError, ImportOutcome};
use crate::importer::field_mapper::flatten_object;
use async_trait::async_trait;
use geo::{BoundingRect, Centroid, LineString, MultiPoint, MultiPolygon, Point, Polygon, Rect};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// 几何归约结果
struct ReducedGeometry {
    kind: String,
    anchor: Point<f64>,
    bbox: Option<Rect<f64>>,
}

// ==========================================
// GeoDocumentAdapter
// ==========================================
pub struct GeoDocumentAdapter;

impl GeoDocumentAdapter {
    /// 读取 GeoJSON 文件并逐要素转换
    pub fn decode_file(path: &Path, separator: &str) -> ImportOutcome<Vec<Result<RawRecord, String>>> {
        let doc = read_json_file(path)?;
        let features = features_of(&doc)?;
        Ok(features
            .into_iter()
            .map(|f| feature_to_record(f, separator))
            .collect())
    }
}

#[async_trait]
impl FormatAdapter for GeoDocumentAdapter {
    fn format_type(&self) -> FormatType {
        FormatType::GeoDocument
    }

    async fn decode(&self, data_source: &str, options: &TaskOptions) -> ImportOutcome<RecordStream> {
        let path = existing_path(data_source)?;
        let separator = options.get_str("separator").unwrap_or(".").to_string();
        let records = run_blocking(move || GeoDocumentAdapter::decode_file(&path, &separator)).await?;
        Ok(stream_from_vec(records))
    }

    fn default_field_types(&self) -> BTreeMap<String, ScalarType> {
        BTreeMap::from([
            ("lat".to_string(), ScalarType::Numeric),
            ("lng".to_string(), ScalarType::Numeric),
        ])
    }

    fn adjust_rules(&self, rules: &mut RuleSet, _options: &TaskOptions) {
        rules.require_coordinates();
    }
}

/// 取出要素列表
pub(crate) fn features_of(doc: &Value) -> ImportOutcome<Vec<&Value>> {
    match doc.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => Ok(doc
            .get("features")
            .and_then(Value::as_array)
            .map(|f| f.iter().collect())
            .unwrap_or_default()),
        Some("Feature") => Ok(vec![doc]),
        other => Err(ImportError::Parse(format!(
            "不是 GeoJSON FeatureCollection/Feature (type = {:?})",
            other
        ))),
    }
}

/// 单个要素 → 原始记录
pub(crate) fn feature_to_record(feature: &Value, separator: &str) -> Result<RawRecord, String> {
    let mut record = match feature.get("properties") {
        Some(Value::Object(props)) => flatten_object(props, separator),
        _ => RawRecord::new(),
    };

    if let Some(id) = feature.get("id") {
        record.insert("feature_id".to_string(), id.clone());
    }

    let geometry = match feature.get("geometry") {
        Some(g @ Value::Object(_)) => g,
        // 无几何：交给坐标校验拒绝
        _ => return Ok(record),
    };

    let reduced = reduce_geometry(geometry)?;
    record.insert("geometry_type".to_string(), Value::String(reduced.kind));
    insert_number(&mut record, "lat", reduced.anchor.y());
    insert_number(&mut record, "lng", reduced.anchor.x());
    if let Some(bbox) = reduced.bbox {
        insert_number(&mut record, "bbox_min_lng", bbox.min().x);
        insert_number(&mut record, "bbox_min_lat", bbox.min().y);
        insert_number(&mut record, "bbox_max_lng", bbox.max().x);
        insert_number(&mut record, "bbox_max_lat", bbox.max().y);
    }
    Ok(record)
}

fn reduce_geometry(geometry: &Value) -> Result<ReducedGeometry, String> {
    let kind = geometry
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| "几何缺少 type".to_string())?
        .to_string();
    let coords = geometry
        .get("coordinates")
        .ok_or_else(|| format!("{} 几何缺少 coordinates", kind))?;

    let (anchor, bbox) = match kind.as_str() {
        "Point" => {
            let (lng, lat) = position(coords)?;
            (Some(Point::new(lng, lat)), None)
        }
        "MultiPoint" => {
            let points = MultiPoint::from(positions(coords)?);
            (points.centroid(), points.bounding_rect())
        }
        "LineString" => {
            let line = LineString::from(positions(coords)?);
            (line.centroid(), line.bounding_rect())
        }
        "Polygon" => {
            let polygon = polygon_from(coords)?;
            (polygon.centroid(), polygon.bounding_rect())
        }
        "MultiPolygon" => {
            let parts = coords
                .as_array()
                .ok_or_else(|| "MultiPolygon coordinates 不是数组".to_string())?
                .iter()
                .map(polygon_from)
                .collect::<Result<Vec<_>, _>>()?;
            let multi = MultiPolygon::new(parts);
            (multi.centroid(), multi.bounding_rect())
        }
        other => return Err(format!("不支持的几何类型: {}", other)),
    };

    let anchor = anchor.ok_or_else(|| format!("{} 几何为空，无法计算质心", kind))?;
    Ok(ReducedGeometry { kind, anchor, bbox })
}

/// 构造多边形并校验每个环
fn polygon_from(coords: &Value) -> Result<Polygon<f64>, String> {
    let rings = coords
        .as_array()
        .ok_or_else(|| "Polygon coordinates 不是数组".to_string())?
        .iter()
        .map(positions)
        .collect::<Result<Vec<_>, _>>()?;

    for ring in &rings {
        if let ValidationOutcome::Rejected(reason) = validate_polygon(ring) {
            return Err(reason);
        }
    }

    let mut iter = rings.into_iter();
    let exterior = iter
        .next()
        .ok_or_else(|| "Polygon 缺少外环".to_string())?;
    let interiors = iter.map(LineString::from).collect();
    Ok(Polygon::new(LineString::from(exterior), interiors))
}

/// GeoJSON 坐标位置 [lng, lat, (alt)]
fn position(value: &Value) -> Result<(f64, f64), String> {
    let arr = value
        .as_array()
        .filter(|a| a.len() >= 2)
        .ok_or_else(|| format!("坐标位置格式错误: {}", value))?;
    match (arr[0].as_f64(), arr[1].as_f64()) {
        (Some(lng), Some(lat)) => Ok((lng, lat)),
        _ => Err(format!("坐标位置不是数值: {}", value)),
    }
}

fn positions(value: &Value) -> Result<Vec<(f64, f64)>, String> {
    value
        .as_array()
        .ok_or_else(|| format!("坐标序列格式错误: {}", value))?
        .iter()
        .map(position)
        .collect()
}

fn insert_number(record: &mut Map<String, Value>, key: &str, v: f64) {
    if let Some(n) = serde_json::Number::from_f64(v) {
        record.insert(key.to_string(), Value::Number(n));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_point_feature() {
        let feature = json!({
            "type": "Feature",
            "id": 7,
            "geometry": {"type": "Point", "coordinates": [116.4, 39.9]},
            "properties": {"name": "公园", "stats": {"area": 1200}}
        });
        let record = feature_to_record(&feature, ".").unwrap();
        assert_eq!(record["lat"], json!(39.9));
        assert_eq!(record["lng"], json!(116.4));
        assert_eq!(record["stats.area"], json!(1200));
        assert_eq!(record["feature_id"], json!(7));
        assert_eq!(record["geometry_type"], json!("Point"));
    }

    #[test]
    fn test_polygon_centroid_and_bbox() {
        let feature = json!({
            "type": "Feature",
            "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 2.0], [0.0, 0.0]]]},
            "properties": null
        });
        let record = feature_to_record(&feature, ".").unwrap();
        assert_eq!(record["lat"], json!(1.0));
        assert_eq!(record["lng"], json!(1.0));
        assert_eq!(record["bbox_max_lat"], json!(2.0));
    }

    #[test]
    fn test_polygon_out_of_bounds_rejected() {
        let feature = json!({
            "type": "Feature",
            "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [0.0, 95.0], [1.0, 1.0], [0.0, 0.0]]]},
            "properties": {}
        });
        let err = feature_to_record(&feature, ".").unwrap_err();
        assert!(err.contains("越界"), "实际: {}", err);
    }

    #[test]
    fn test_missing_geometry_keeps_properties() {
        let feature = json!({"type": "Feature", "geometry": null, "properties": {"a": 1}});
        let record = feature_to_record(&feature, ".").unwrap();
        assert!(!record.contains_key("lat"));
        assert_eq!(record["a"], json!(1));
    }

    #[test]
    fn test_features_of_rejects_plain_json() {
        assert!(features_of(&json!({"type": "Topology"})).is_err());
        assert_eq!(
            features_of(&json!({"type": "FeatureCollection", "features": [{}, {}]})).unwrap().len(),
            2
        );
    }
}
