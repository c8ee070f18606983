// ==========================================
// 水资源风险监测平台 - 矢量 GIS 适配器
// ==========================================
// .geojson / .json → GeoJSON 解码
// .csv             → 表格解码 + 坐标列归一化 (latitude/lat/y, longitude/lon/lng/x)
// .shp .kml .kmz .gpx → 暂不支持
// ==========================================

use crate::domain::record::RawRecord;
use crate::domain::rules::RuleSet;
use crate::domain::task::TaskOptions;
use crate::domain::types::{FormatType, ScalarType};
use crate::importer::adapter_trait::{stream_from_vec, FormatAdapter, RecordStream};
use crate::importer::adapters::geo_document::GeoDocumentAdapter;
use crate::importer::adapters::tabular::{CsvOptions, TabularAdapter};
use crate::importer::adapters::{existing_path, extension_of, run_blocking};
use crate::importer::error::{ImportError, ImportOutcome};
use async_trait::async_trait;
use std::collections::BTreeMap;

const LAT_COLUMNS: &[&str] = &["latitude", "lat", "y"];
const LNG_COLUMNS: &[&str] = &["longitude", "lon", "lng", "x"];

/// 坐标列归一化（列名大小写不敏感，已有 lat/lng 时保持不变）
fn normalize_columns(record: RawRecord) -> RawRecord {
    let mut out = RawRecord::new();
    let mut lat = None;
    let mut lng = None;

    for (key, value) in record {
        let lower = key.to_ascii_lowercase();
        if LAT_COLUMNS.contains(&lower.as_str()) {
            if lower == "lat" || lat.is_none() {
                lat = Some(value);
            }
        } else if LNG_COLUMNS.contains(&lower.as_str()) {
            if lower == "lng" || lng.is_none() {
                lng = Some(value);
            }
        } else {
            out.insert(key, value);
        }
    }

    if let Some(v) = lat {
        out.insert("lat".to_string(), v);
    }
    if let Some(v) = lng {
        out.insert("lng".to_string(), v);
    }
    out
}

pub struct VectorGisAdapter;

#[async_trait]
impl FormatAdapter for VectorGisAdapter {
    fn format_type(&self) -> FormatType {
        FormatType::VectorGis
    }

    async fn decode(&self, data_source: &str, options: &TaskOptions) -> ImportOutcome<RecordStream> {
        let path = existing_path(data_source)?;

        match extension_of(&path).as_str() {
            "geojson" | "json" => {
                let separator = options.get_str("separator").unwrap_or(".").to_string();
                let records =
                    run_blocking(move || GeoDocumentAdapter::decode_file(&path, &separator)).await?;
                Ok(stream_from_vec(records))
            }
            "csv" => {
                let opts = CsvOptions::from_task_options(&path, options)?;
                let rows = run_blocking(move || TabularAdapter::open_csv(&path, &opts)).await?;
                Ok(Box::new(rows.map(|r| r.map(normalize_columns))))
            }
            ext @ ("shp" | "kml" | "kmz" | "gpx") => Err(ImportError::UnsupportedFormat(format!(
                ".{} 需先转换为 GeoJSON 或 CSV",
                ext
            ))),
            other => Err(ImportError::UnsupportedFormat(format!(
                "矢量 GIS 适配器不支持 .{} 文件",
                other
            ))),
        }
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
