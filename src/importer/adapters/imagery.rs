// ==========================================
// 水资源风险监测平台 - 遥感影像适配器
// ==========================================
// 支持:
// - .tif / .tiff: 多波段栅格，按像素块采样，每块一条记录
// - .json: 场景元数据文档（bands 为波段值或波段数组）
// 每条记录携带: 元数据 + band_<名称> 均值 + 派生指数均值 + cloud_cover
// 选项: band_order, block_size, indices, cloud_threshold,
//       reflectance_scale, max_cloud_cover
// ==========================================

use crate::domain::record::RawRecord;
use crate::domain::rules::RuleSet;
use crate::domain::task::TaskOptions;
use crate::domain::types::{FormatType, ScalarType};
use crate::importer::adapter_trait::{stream_from_vec, FormatAdapter, RecordStream};
use crate::importer::adapters::nested_document::{locate_records, read_json_file};
use crate::importer::adapters::{existing_path, extension_of, json_number, run_blocking};
use crate::importer::error::{ImportError, ImportOutcome};
use crate::importer::field_mapper::flatten_object;
use crate::importer::indices::{BandValues, IndexRegistry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tiff::decoder::{Decoder, DecodingResult};
use tracing::{debug, warn};

const DEFAULT_BAND_ORDER: &[&str] = &["blue", "green", "red", "nir", "swir"];
const VISIBLE_BANDS: &[&str] = &["blue", "green", "red"];
const SCENE_KEYS: &[&str] = &["scenes", "data", "records"];
/// 可由 sidecar 或 options 提供的元数据键
const METADATA_KEYS: &[&str] = &[
    "timestamp",
    "satellite_id",
    "data_type",
    "processing_level",
    "resolution",
    "lat",
    "lng",
    "cloud_cover",
    "scene_id",
];

/// 影像解码参数
#[derive(Debug, Clone)]
struct ImageryOptions {
    band_order: Vec<String>,
    block_size: Option<u32>,
    indices: Option<Vec<String>>,
    cloud_threshold: f64,
    reflectance_scale: f64,
}

impl ImageryOptions {
    fn from_options(options: &TaskOptions) -> Self {
        let band_order = options
            .get_str_list("band_order")
            .filter(|list| !list.is_empty())
            .map(|list| list.into_iter().map(|b| b.to_ascii_lowercase()).collect())
            .unwrap_or_else(|| DEFAULT_BAND_ORDER.iter().map(|b| b.to_string()).collect());

        Self {
            band_order,
            block_size: options.get_u32("block_size"),
            indices: options.get_str_list("indices"),
            cloud_threshold: options.get_f64("cloud_threshold").unwrap_or(0.3),
            reflectance_scale: options
                .get_f64("reflectance_scale")
                .filter(|s| *s > 0.0)
                .unwrap_or(10000.0),
        }
    }

    fn band_name(&self, index: usize) -> String {
        self.band_order
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("b{}", index + 1))
    }
}

/// 交错存储的栅格
struct Raster {
    width: usize,
    height: usize,
    bands: usize,
    samples: Vec<f64>,
}

impl Raster {
    fn sample(&self, x: usize, y: usize, band: usize) -> f64 {
        self.samples[(y * self.width + x) * self.bands + band]
    }
}

/// 单个像素块的累加器
struct BlockAccumulator {
    pixels: usize,
    band_sums: Vec<f64>,
    index_sums: BTreeMap<String, (f64, usize)>,
    cloudy: usize,
}

impl BlockAccumulator {
    fn new(bands: usize) -> Self {
        Self {
            pixels: 0,
            band_sums: vec![0.0; bands],
            index_sums: BTreeMap::new(),
            cloudy: 0,
        }
    }
}

// ==========================================
// ImageryAdapter
// ==========================================
pub struct ImageryAdapter {
    indices: Arc<IndexRegistry>,
}

impl ImageryAdapter {
    pub fn new(indices: Arc<IndexRegistry>) -> Self {
        Self { indices }
    }

    /// 场景文档 → 记录
    fn decode_scene_document(
        path: &Path,
        options: &TaskOptions,
        registry: &IndexRegistry,
    ) -> ImportOutcome<Vec<Result<RawRecord, String>>> {
        let doc = read_json_file(path)?;
        let selected = options.get_str_list("indices");
        Ok(locate_records(&doc, options.get_str("record_path"), SCENE_KEYS)
            .into_iter()
            .map(|scene| scene_to_record(scene, registry, selected.as_deref()))
            .collect())
    }

    /// GeoTIFF → 按块采样的记录
    fn decode_raster(
        path: &Path,
        options: &TaskOptions,
        registry: &IndexRegistry,
    ) -> ImportOutcome<Vec<Result<RawRecord, String>>> {
        let opts = ImageryOptions::from_options(options);
        let raster = read_raster(path)?;
        let metadata = scene_metadata(path, options)?;
        let cloud_from_metadata = metadata.contains_key("cloud_cover");

        let block = opts
            .block_size
            .map(|b| b as usize)
            .unwrap_or_else(|| raster.width.max(raster.height))
            .max(1);
        let band_names: Vec<String> = (0..raster.bands).map(|i| opts.band_name(i)).collect();
        let visible: Vec<usize> = band_names
            .iter()
            .enumerate()
            .filter(|(_, name)| VISIBLE_BANDS.contains(&name.as_str()))
            .map(|(i, _)| i)
            .collect();

        debug!(
            path = %path.display(),
            width = raster.width,
            height = raster.height,
            bands = raster.bands,
            block,
            "开始影像分块采样"
        );

        let mut pixel_values: BandValues = band_names.iter().map(|n| (n.clone(), 0.0)).collect();
        let mut records = Vec::new();

        for (block_row, y0) in (0..raster.height).step_by(block).enumerate() {
            for (block_col, x0) in (0..raster.width).step_by(block).enumerate() {
                let mut acc = BlockAccumulator::new(raster.bands);

                for y in y0..(y0 + block).min(raster.height) {
                    for x in x0..(x0 + block).min(raster.width) {
                        acc.pixels += 1;
                        for (b, name) in band_names.iter().enumerate() {
                            let raw = raster.sample(x, y, b);
                            acc.band_sums[b] += raw;
                            if let Some(slot) = pixel_values.get_mut(name) {
                                *slot = raw / opts.reflectance_scale;
                            }
                        }

                        for (index, v) in registry.compute(&pixel_values, opts.indices.as_deref()) {
                            let entry = acc.index_sums.entry(index).or_insert((0.0, 0));
                            entry.0 += v;
                            entry.1 += 1;
                        }

                        if !visible.is_empty() {
                            let brightness = visible
                                .iter()
                                .map(|&b| raster.sample(x, y, b) / opts.reflectance_scale)
                                .sum::<f64>()
                                / visible.len() as f64;
                            if brightness >= opts.cloud_threshold {
                                acc.cloudy += 1;
                            }
                        }
                    }
                }

                if acc.pixels == 0 {
                    continue;
                }

                let mut record = metadata.clone();
                record.insert("block_row".to_string(), Value::from(block_row));
                record.insert("block_col".to_string(), Value::from(block_col));
                record.insert("pixel_count".to_string(), Value::from(acc.pixels));
                for (b, name) in band_names.iter().enumerate() {
                    record.insert(
                        format!("band_{}", name),
                        json_number(acc.band_sums[b] / acc.pixels as f64),
                    );
                }
                for (index, (sum, n)) in &acc.index_sums {
                    record.insert(index.clone(), json_number(sum / *n as f64));
                }
                if !cloud_from_metadata && !visible.is_empty() {
                    let pct = acc.cloudy as f64 / acc.pixels as f64 * 100.0;
                    record.insert("cloud_cover".to_string(), json_number((pct * 100.0).round() / 100.0));
                }
                records.push(Ok(record));
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl FormatAdapter for ImageryAdapter {
    fn format_type(&self) -> FormatType {
        FormatType::Imagery
    }

    fn validate_options(&self, _data_source: &str, options: &TaskOptions) -> ImportOutcome<()> {
        if let Some(selected) = options.get_str_list("indices") {
            if let Some(unknown) = selected.iter().find(|name| !self.indices.contains(name)) {
                return Err(ImportError::invalid_option(
                    "indices",
                    format!("未知指数 {}，可选: {}", unknown, self.indices.names().join(", ")),
                ));
            }
        }
        if options.get("block_size").is_some() && options.get_u64("block_size").unwrap_or(0) == 0 {
            return Err(ImportError::invalid_option("block_size", "必须是正整数"));
        }
        if let Some(max) = options.get("max_cloud_cover") {
            if options.get_f64("max_cloud_cover").is_none() {
                return Err(ImportError::invalid_option(
                    "max_cloud_cover",
                    format!("必须是数值，实际 {}", max),
                ));
            }
        }
        Ok(())
    }

    async fn decode(&self, data_source: &str, options: &TaskOptions) -> ImportOutcome<RecordStream> {
        let path = existing_path(data_source)?;
        let options = options.clone();
        let registry = self.indices.clone();

        let records = match extension_of(&path).as_str() {
            "tif" | "tiff" => {
                run_blocking(move || ImageryAdapter::decode_raster(&path, &options, &registry)).await?
            }
            "json" => {
                run_blocking(move || ImageryAdapter::decode_scene_document(&path, &options, &registry))
                    .await?
            }
            ext @ ("jp2" | "hdf" | "nc") => {
                return Err(ImportError::UnsupportedFormat(format!(
                    ".{} 影像需要 GDAL 解码，当前仅支持 GeoTIFF",
                    ext
                )))
            }
            other => {
                return Err(ImportError::UnsupportedFormat(format!(
                    "影像适配器不支持 .{} 文件",
                    other
                )))
            }
        };
        Ok(stream_from_vec(records))
    }

    fn default_field_types(&self) -> BTreeMap<String, ScalarType> {
        ["cloud_cover", "resolution", "lat", "lng"]
            .into_iter()
            .map(|f| (f.to_string(), ScalarType::Numeric))
            .collect()
    }

    fn default_required_fields(&self) -> Vec<String> {
        vec![
            "timestamp".to_string(),
            "satellite_id".to_string(),
            "data_type".to_string(),
        ]
    }

    fn adjust_rules(&self, rules: &mut RuleSet, options: &TaskOptions) {
        if let Some(max) = options.get_f64("max_cloud_cover") {
            rules.add_range("cloud_cover", Some(0.0), Some(max));
        }
    }
}

// ===== 栅格读取 =====

fn read_raster(path: &Path) -> ImportOutcome<Raster> {
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file))?;
    let (width, height) = decoder.dimensions()?;

    let samples: Vec<f64> = match decoder.read_image()? {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|s| s as f64).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
        _ => {
            return Err(ImportError::UnsupportedFormat(
                "不支持的 GeoTIFF 采样类型（仅支持无符号整数与浮点）".to_string(),
            ))
        }
    };

    let (width, height) = (width as usize, height as usize);
    let pixels = width * height;
    if pixels == 0 || samples.len() % pixels != 0 {
        return Err(ImportError::Parse(format!(
            "栅格尺寸 {}x{} 与采样数 {} 不一致",
            width,
            height,
            samples.len()
        )));
    }

    Ok(Raster {
        width,
        height,
        bands: samples.len() / pixels,
        samples,
    })
}

/// 元数据合并: 默认值 < sidecar JSON < 任务 options
fn scene_metadata(path: &Path, options: &TaskOptions) -> ImportOutcome<RawRecord> {
    let mut metadata = RawRecord::new();
    metadata.insert("satellite_id".to_string(), Value::from("unknown"));
    metadata.insert("data_type".to_string(), Value::from("multispectral"));
    metadata.insert("processing_level".to_string(), Value::from("L2A"));
    metadata.insert("resolution".to_string(), Value::from(10));
    metadata.insert("timestamp".to_string(), Value::from(file_timestamp(path)));
    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
        metadata.insert("scene_id".to_string(), Value::from(stem));
    }

    if let Some(sidecar) = sidecar_path(path) {
        match read_json_file(&sidecar)? {
            Value::Object(obj) => metadata.extend(flatten_object(&obj, ".")),
            _ => warn!(path = %sidecar.display(), "影像元数据文件不是 JSON 对象，已忽略"),
        }
    }

    for key in METADATA_KEYS {
        if let Some(v) = options.get(key) {
            metadata.insert(key.to_string(), v.clone());
        }
    }
    Ok(metadata)
}

fn sidecar_path(path: &Path) -> Option<PathBuf> {
    let appended = PathBuf::from(format!("{}.json", path.display()));
    [appended, path.with_extension("json")]
        .into_iter()
        .find(|p| p.is_file())
}

fn file_timestamp(path: &Path) -> String {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
        .to_rfc3339()
}

// ===== 场景文档 =====

fn scene_to_record(scene: &Value, registry: &IndexRegistry, selected: Option<&[String]>) -> Result<RawRecord, String> {
    let obj = scene
        .as_object()
        .ok_or_else(|| format!("场景记录不是对象: {}", scene))?;

    let mut rest: Map<String, Value> = obj.clone();
    let bands = rest.remove("bands");
    let mut record = flatten_object(&rest, ".");

    let mut band_values = BandValues::new();
    if let Some(Value::Object(bands)) = bands {
        for (name, value) in bands {
            let mean = match value {
                Value::Number(n) => n.as_f64(),
                Value::Array(items) => {
                    let nums: Vec<f64> = items.iter().filter_map(Value::as_f64).collect();
                    (!nums.is_empty()).then(|| nums.iter().sum::<f64>() / nums.len() as f64)
                }
                _ => None,
            };
            match mean {
                Some(v) => {
                    record.insert(format!("band_{}", name), json_number(v));
                    band_values.insert(name.to_ascii_lowercase(), v);
                }
                None => return Err(format!("波段 {} 的取值不是数值或数值数组", name)),
            }
        }
    }

    for (index, v) in registry.compute(&band_values, selected) {
        record.entry(index).or_insert_with(|| json_number(v));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tiff::encoder::{colortype, TiffEncoder};

    fn options(value: Value) -> TaskOptions {
        TaskOptions::new(value.as_object().cloned().unwrap())
    }

    fn adapter() -> ImageryAdapter {
        ImageryAdapter::new(Arc::new(IndexRegistry::with_defaults()))
    }

    /// 4x4 四波段影像，左上 2x2 为高亮（云）
    fn write_tiff(path: &Path) {
        let mut data = Vec::new();
        for y in 0..4u16 {
            for x in 0..4u16 {
                if x < 2 && y < 2 {
                    data.extend_from_slice(&[5000, 5000, 5000, 6000]);
                } else {
                    data.extend_from_slice(&[500, 800, 600, 3000]);
                }
            }
        }
        let file = File::create(path).unwrap();
        let mut encoder = TiffEncoder::new(file).unwrap();
        encoder.write_image::<colortype::RGBA16>(4, 4, &data).unwrap();
    }

    #[tokio::test]
    async fn test_tiff_block_sampling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.tif");
        write_tiff(&path);
        let mut sidecar = File::create(dir.path().join("scene.json")).unwrap();
        sidecar
            .write_all(br#"{"satellite_id": "S2A", "timestamp": "2024-06-01T00:00:00Z"}"#)
            .unwrap();

        let records: Vec<_> = adapter()
            .decode(path.to_str().unwrap(), &options(json!({"block_size": 2})))
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(records.len(), 4);
        let cloudy = &records[0];
        assert_eq!(cloudy["satellite_id"], json!("S2A"));
        assert_eq!(cloudy["cloud_cover"], json!(100.0));
        assert_eq!(cloudy["pixel_count"], json!(4));

        let clear = &records[3];
        assert_eq!(clear["cloud_cover"], json!(0.0));
        assert_eq!(clear["band_nir"], json!(3000.0));
        let ndvi = clear["ndvi"].as_f64().unwrap();
        assert!((ndvi - 0.24 / 0.36).abs() < 1e-9);
        assert_eq!(clear["processing_level"], json!("L2A"));
    }

    #[tokio::test]
    async fn test_tiff_whole_scene_and_selected_indices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("whole.tiff");
        write_tiff(&path);

        let records: Vec<_> = adapter()
            .decode(
                path.to_str().unwrap(),
                &options(json!({"indices": ["ndwi"], "cloud_cover": 12.5})),
            )
            .await
            .unwrap()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record["pixel_count"], json!(16));
        assert_eq!(record["cloud_cover"], json!(12.5));
        assert!(record.contains_key("ndwi"));
        assert!(!record.contains_key("ndvi"));
        assert_eq!(record["scene_id"], json!("whole"));
    }

    #[test]
    fn test_scene_document_bands() {
        let registry = IndexRegistry::with_defaults();
        let scene = json!({
            "timestamp": "2024-05-01T00:00:00Z",
            "satellite_id": "L8",
            "data_type": "optical",
            "cloud_cover": 8,
            "bands": {"red": [0.1, 0.1], "nir": 0.5, "green": 0.2}
        });
        let record = scene_to_record(&scene, &registry, None).unwrap();
        assert_eq!(record["band_red"], json!(0.1));
        assert!(record.contains_key("ndvi"));
        assert!(!record.contains_key("bands"));

        let bad = json!({"bands": {"red": "high"}});
        assert!(scene_to_record(&bad, &registry, None).is_err());
    }

    #[tokio::test]
    async fn test_unsupported_raster_formats() {
        let file = tempfile::Builder::new().suffix(".jp2").tempfile().unwrap();
        let err = adapter()
            .decode(file.path().to_str().unwrap(), &TaskOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ImportError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_options_validation_and_cloud_rule() {
        let adapter = adapter();
        assert!(adapter
            .validate_options("a.tif", &options(json!({"indices": ["ndvi", "xyz"]})))
            .unwrap_err()
            .is_caller_error());
        assert!(adapter
            .validate_options("a.tif", &options(json!({"block_size": 0})))
            .is_err());

        let mut rules = RuleSet::default();
        adapter.adjust_rules(&mut rules, &options(json!({"max_cloud_cover": 20})));
        assert_eq!(rules.ranges.len(), 1);
        assert_eq!(rules.ranges[0].field, "cloud_cover");
        assert_eq!(rules.ranges[0].max, Some(20.0));
    }
}
