// ==========================================
// 水资源风险监测平台 - 气象预报适配器
// ==========================================
// 数据源: http(s) URL / 命名服务商 / 本地 .json .csv
// 服务商方言:
// - openweathermap: list[]，坐标 city.coord
// - weather_api:    forecast.forecastday[].hour[]，坐标 location
// - noaa:           properties.periods[]
// - generic:        list / hourly / forecast / data / records
// 统一输出: timestamp, temperature, humidity, pressure, wind_speed,
//           wind_direction, precipitation, lat, lng
// ==========================================

use crate::domain::record::RawRecord;
use crate::domain::task::TaskOptions;
use crate::domain::types::{FormatType, ScalarType};
use crate::importer::adapter_trait::{stream_from_vec, FormatAdapter, RecordStream};
use crate::importer::adapters::nested_document::{locate_records, read_json_file};
use crate::importer::adapters::remote_api::{build_request, check_error_payload};
use crate::importer::adapters::tabular::{CsvOptions, TabularAdapter};
use crate::importer::adapters::{existing_path, extension_of, is_http_url, run_blocking};
use crate::importer::error::{ImportError, ImportOutcome};
use crate::importer::field_mapper::{flatten_object, lookup_path};
use crate::importer::http_client::HttpFetcher;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

const GENERIC_KEYS: &[&str] = &["list", "hourly", "forecast", "data", "records"];
const NUMERIC_FIELDS: &[&str] = &[
    "temperature",
    "humidity",
    "pressure",
    "wind_speed",
    "wind_direction",
    "precipitation",
    "precipitation_probability",
    "lat",
    "lng",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Provider {
    OpenWeatherMap,
    WeatherApi,
    Noaa,
    Generic,
}

impl Provider {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openweathermap" | "owm" => Some(Provider::OpenWeatherMap),
            "weather_api" | "weatherapi" => Some(Provider::WeatherApi),
            "noaa" => Some(Provider::Noaa),
            "generic" => Some(Provider::Generic),
            _ => None,
        }
    }

    /// 规范字段 ← 扁平化源路径
    fn field_map(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Provider::OpenWeatherMap => &[
                ("temperature", "main.temp"),
                ("humidity", "main.humidity"),
                ("pressure", "main.pressure"),
                ("wind_speed", "wind.speed"),
                ("wind_direction", "wind.deg"),
                ("precipitation", "rain.3h"),
                ("timestamp", "dt_txt"),
            ],
            Provider::WeatherApi => &[
                ("timestamp", "time"),
                ("temperature", "temp_c"),
                ("humidity", "humidity"),
                ("pressure", "pressure_mb"),
                ("wind_speed", "wind_kph"),
                ("wind_direction", "wind_degree"),
                ("precipitation", "precip_mm"),
            ],
            Provider::Noaa => &[
                ("timestamp", "startTime"),
                ("temperature", "temperature"),
                ("humidity", "relativeHumidity.value"),
                ("precipitation_probability", "probabilityOfPrecipitation.value"),
            ],
            Provider::Generic => &[
                ("temperature", "temp"),
                ("temperature", "main.temp"),
                ("humidity", "main.humidity"),
                ("timestamp", "time"),
            ],
        }
    }

    /// 服务商默认的 API key 查询参数名
    fn default_key_param(&self) -> Option<&'static str> {
        match self {
            Provider::OpenWeatherMap => Some("appid"),
            Provider::WeatherApi => Some("key"),
            Provider::Noaa | Provider::Generic => None,
        }
    }
}

/// 一份预报文档的条目 + 文档级坐标
struct ForecastItems<'a> {
    items: Vec<&'a Value>,
    lat: Option<f64>,
    lng: Option<f64>,
}

fn coordinate(doc: &Value, paths: &[&str]) -> Option<f64> {
    paths.iter().find_map(|p| lookup_path(doc, p).and_then(Value::as_f64))
}

fn extract_items<'a>(doc: &'a Value, provider: Provider, record_path: Option<&str>) -> ForecastItems<'a> {
    let items = match (provider, record_path) {
        (_, Some(path)) => locate_records(doc, Some(path), &[]),
        (Provider::OpenWeatherMap, None) => locate_records(doc, Some("list"), &[]),
        (Provider::WeatherApi, None) => lookup_path(doc, "forecast.forecastday")
            .and_then(Value::as_array)
            .map(|days| {
                days.iter()
                    .filter_map(|day| day.get("hour").and_then(Value::as_array))
                    .flatten()
                    .collect()
            })
            .unwrap_or_default(),
        (Provider::Noaa, None) => locate_records(doc, Some("properties.periods"), &[]),
        (Provider::Generic, None) => locate_records(doc, None, GENERIC_KEYS),
    };

    let (lat_paths, lng_paths): (&[&str], &[&str]) = match provider {
        Provider::OpenWeatherMap => (&["city.coord.lat"], &["city.coord.lon"]),
        Provider::WeatherApi => (&["location.lat"], &["location.lon"]),
        Provider::Noaa => (&["geometry.coordinates.1"], &["geometry.coordinates.0"]),
        Provider::Generic => (
            &["lat", "latitude", "location.lat", "coord.lat"],
            &["lon", "lng", "longitude", "location.lon", "location.lng", "coord.lon"],
        ),
    };

    ForecastItems {
        items,
        lat: coordinate(doc, lat_paths),
        lng: coordinate(doc, lng_paths),
    }
}

/// 单个预报条目 → 统一字段
fn normalize_item(
    mut record: RawRecord,
    provider: Provider,
    feed_lat: Option<f64>,
    feed_lng: Option<f64>,
) -> RawRecord {
    for (canonical, source) in provider.field_map() {
        if record.contains_key(*canonical) {
            continue;
        }
        if let Some(v) = record.get(*source).filter(|v| !v.is_null()).cloned() {
            record.insert(canonical.to_string(), v);
        }
    }

    if !record.contains_key("timestamp") {
        let epoch = record.get("dt").and_then(|v| match v {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        });
        if let Some(ts) = epoch.and_then(|secs| Utc.timestamp_opt(secs, 0).single()) {
            record.insert("timestamp".to_string(), Value::from(ts.to_rfc3339()));
        }
    }

    for (key, aliases, feed) in [
        ("lat", ["latitude", "location.lat"], feed_lat),
        ("lng", ["longitude", "location.lon"], feed_lng),
    ] {
        if record.contains_key(key) {
            continue;
        }
        let value = aliases
            .iter()
            .find_map(|a| record.get(*a).cloned())
            .or_else(|| feed.map(Value::from));
        if let Some(v) = value {
            record.insert(key.to_string(), v);
        }
    }
    record
}

/// 文档 → 记录
fn records_from_feed(doc: &Value, provider: Provider, options: &TaskOptions) -> Vec<Result<RawRecord, String>> {
    let feed = extract_items(doc, provider, options.get_str("record_path"));
    let lat = options.get_f64("lat").or(feed.lat);
    let lng = options.get_f64("lng").or(feed.lng);
    debug!(provider = ?provider, items = feed.items.len(), "解析预报条目");

    feed.items
        .into_iter()
        .map(|item| match item {
            Value::Object(obj) => Ok(normalize_item(flatten_object(obj, "."), provider, lat, lng)),
            other => Err(format!("预报条目不是对象: {}", other)),
        })
        .collect()
}

// ==========================================
// ForecastFeedAdapter
// ==========================================
pub struct ForecastFeedAdapter {
    fetcher: HttpFetcher,
}

impl ForecastFeedAdapter {
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self { fetcher }
    }

    /// 数据源为服务商名时返回 (服务商, options.url)
    fn named_provider<'a>(data_source: &str, options: &'a TaskOptions) -> Option<(Provider, Option<&'a str>)> {
        Provider::parse(data_source)
            .filter(|p| *p != Provider::Generic)
            .map(|p| (p, options.get_str("url")))
    }

    fn provider_option(options: &TaskOptions) -> ImportOutcome<Provider> {
        match options.get_str("provider") {
            None => Ok(Provider::Generic),
            Some(name) => Provider::parse(name).ok_or_else(|| {
                ImportError::invalid_option("provider", format!("未知的气象服务商: {}", name))
            }),
        }
    }

    async fn fetch(&self, url: &str, provider: Provider, options: &TaskOptions) -> ImportOutcome<Vec<Result<RawRecord, String>>> {
        let mut map: Map<String, Value> = options.as_map().clone();
        let has_key_placement = options.get("api_key_param").is_some() || options.get("header_name").is_some();
        if let (Some(param), false) = (provider.default_key_param(), has_key_placement) {
            map.insert("api_key_param".to_string(), Value::from(param));
        }
        let effective = TaskOptions::new(map);

        let spec = build_request(url, &effective)?;
        let policy = self.fetcher.retry_policy(&effective);
        let body = self.fetcher.fetch_json(&spec, &policy).await?;
        check_error_payload(&body)?;
        Ok(records_from_feed(&body, provider, options))
    }
}

#[async_trait]
impl FormatAdapter for ForecastFeedAdapter {
    fn format_type(&self) -> FormatType {
        FormatType::ForecastFeed
    }

    fn validate_options(&self, data_source: &str, options: &TaskOptions) -> ImportOutcome<()> {
        Self::provider_option(options)?;
        if let Some((provider, url)) = Self::named_provider(data_source, options) {
            match url {
                Some(url) if is_http_url(url) => {}
                _ => {
                    return Err(ImportError::invalid_option(
                        "url",
                        format!("服务商 {:?} 需要 http(s) 接口地址", provider),
                    ))
                }
            }
        }
        Ok(())
    }

    async fn decode(&self, data_source: &str, options: &TaskOptions) -> ImportOutcome<RecordStream> {
        if let Some((provider, url)) = Self::named_provider(data_source, options) {
            let url = url.ok_or_else(|| ImportError::invalid_option("url", "缺少接口地址"))?;
            return Ok(stream_from_vec(self.fetch(url, provider, options).await?));
        }

        let provider = Self::provider_option(options)?;
        if is_http_url(data_source) {
            return Ok(stream_from_vec(self.fetch(data_source, provider, options).await?));
        }

        let path = existing_path(data_source)?;
        let options = options.clone();
        match extension_of(&path).as_str() {
            "json" => {
                let records = run_blocking(move || {
                    let doc = read_json_file(&path)?;
                    Ok(records_from_feed(&doc, provider, &options))
                })
                .await?;
                Ok(stream_from_vec(records))
            }
            "csv" => {
                let opts = CsvOptions::from_task_options(&path, &options)?;
                let rows = run_blocking(move || TabularAdapter::open_csv(&path, &opts)).await?;
                let (lat, lng) = (options.get_f64("lat"), options.get_f64("lng"));
                Ok(Box::new(rows.map(move |r| r.map(|rec| normalize_item(rec, provider, lat, lng)))))
            }
            other => Err(ImportError::UnsupportedFormat(format!(
                "气象预报适配器不支持 .{} 文件",
                other
            ))),
        }
    }

    fn default_field_types(&self) -> BTreeMap<String, ScalarType> {
        NUMERIC_FIELDS
            .iter()
            .map(|f| (f.to_string(), ScalarType::Numeric))
            .collect()
    }

    fn default_required_fields(&self) -> Vec<String> {
        vec![
            "timestamp".to_string(),
            "temperature".to_string(),
            "humidity".to_string(),
        ]
    }
}
