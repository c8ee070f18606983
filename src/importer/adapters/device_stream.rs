// ==========================================
// 水资源风险监测平台 - 传感器设备流适配器
// ==========================================
// 数据源:
// - tcp://host:port   逐行 NDJSON，读到 EOF / max_records / read_timeout_secs
// - http(s)://...     通过共享 HttpFetcher 拉取 JSON
// - 本地 .ndjson / .jsonl / .json / .csv
// - mqtt:// ws:// wss:// 暂不支持（数据源错误）
// 归一化: measurements.x → x；location.lat/lon → lat/lng
// ==========================================

use crate::domain::record::RawRecord;
use crate::domain::task::TaskOptions;
use crate::domain::types::{FormatType, ScalarType};
use crate::importer::adapter_trait::{stream_from_vec, FormatAdapter, RecordStream};
use crate::importer::adapters::nested_document::{
    open_json_lines, read_json_file, records_from_document, Projection,
};
use crate::importer::adapters::remote_api::{build_request, check_error_payload};
use crate::importer::adapters::tabular::{CsvOptions, TabularAdapter};
use crate::importer::adapters::{existing_path, extension_of, is_http_url, run_blocking};
use crate::importer::error::{ImportError, ImportOutcome};
use crate::importer::http_client::HttpFetcher;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{info, warn};

const READING_KEYS: &[&str] = &["readings", "data", "records", "items"];
const DEFAULT_READ_TIMEOUT_SECS: f64 = 30.0;
const UNSUPPORTED_SCHEMES: &[&str] = &["mqtt://", "mqtts://", "ws://", "wss://"];

const LAT_ALIASES: &[&str] = &["latitude", "location.lat", "location.latitude"];
const LNG_ALIASES: &[&str] = &[
    "lon",
    "longitude",
    "location.lng",
    "location.lon",
    "location.longitude",
];

/// 读数归一化（输入为已扁平化的记录）
pub(crate) fn normalize_reading(record: RawRecord, separator: &str) -> RawRecord {
    let prefix = format!("measurements{}", separator);
    let mut out = RawRecord::new();
    let mut lifted = Vec::new();

    for (key, value) in record {
        match key.strip_prefix(&prefix) {
            Some(name) if !name.is_empty() => lifted.push((name.to_string(), value)),
            _ => {
                out.insert(key, value);
            }
        }
    }
    // 顶层字段优先于 measurements 中的同名字段
    for (name, value) in lifted {
        out.entry(name).or_insert(value);
    }

    canonical_coordinate(&mut out, "lat", LAT_ALIASES, separator);
    canonical_coordinate(&mut out, "lng", LNG_ALIASES, separator);
    out
}

fn canonical_coordinate(record: &mut RawRecord, target: &str, aliases: &[&str], separator: &str) {
    for alias in aliases {
        let key = alias.replace('.', separator);
        if let Some(v) = record.remove(&key) {
            record.entry(target.to_string()).or_insert(v);
        }
    }
}

// ==========================================
// DeviceStreamAdapter
// ==========================================
pub struct DeviceStreamAdapter {
    fetcher: HttpFetcher,
    connect_timeout: Duration,
}

impl DeviceStreamAdapter {
    pub fn new(fetcher: HttpFetcher, connect_timeout: Duration) -> Self {
        Self {
            fetcher,
            connect_timeout,
        }
    }

    /// TCP 逐行读取；读超时视为流结束
    async fn read_tcp(&self, address: &str, options: &TaskOptions) -> ImportOutcome<Vec<Result<RawRecord, String>>> {
        let read_timeout = Duration::from_secs_f64(
            options
                .get_f64("read_timeout_secs")
                .filter(|s| *s > 0.0)
                .unwrap_or(DEFAULT_READ_TIMEOUT_SECS),
        );
        let max_records = options.get_u64("max_records").map(|v| v as usize);
        let projection = Projection::from_options(options);

        let stream = timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| ImportError::Timeout(format!("连接 {} 超时", address)))??;
        let mut lines = BufReader::new(stream).lines();
        let deadline = Instant::now() + read_timeout;

        let mut records = Vec::new();
        let mut line_no = 0usize;
        loop {
            if max_records.map_or(false, |max| records.len() >= max) {
                break;
            }
            let line = match timeout_at(deadline, lines.next_line()).await {
                Err(_) => {
                    info!(address, records = records.len(), "设备流读取超时，按已收到的数据结束");
                    break;
                }
                Ok(Ok(None)) => break,
                Ok(Ok(Some(line))) => line,
                Ok(Err(e)) if records.is_empty() => return Err(e.into()),
                Ok(Err(e)) => {
                    warn!(address, error = %e, "设备流中断");
                    records.push(Err(format!("设备流中断: {}", e)));
                    break;
                }
            };
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str::<Value>(&line)
                .map_err(|e| format!("第 {} 行不是合法 JSON: {}", line_no, e))
                .and_then(|v| projection.project(&v))
                .map(|r| normalize_reading(r, &projection.separator));
            records.push(record);
        }

        Ok(records)
    }

    async fn fetch_http(&self, url: &str, options: &TaskOptions) -> ImportOutcome<Vec<Result<RawRecord, String>>> {
        let spec = build_request(url, options)?;
        let policy = self.fetcher.retry_policy(options);
        let body = self.fetcher.fetch_json(&spec, &policy).await?;
        check_error_payload(&body)?;

        let separator = Projection::from_options(options).separator;
        Ok(records_from_document(&body, options, READING_KEYS)
            .into_iter()
            .map(|r| r.map(|rec| normalize_reading(rec, &separator)))
            .collect())
    }

    async fn read_file(data_source: &str, options: &TaskOptions) -> ImportOutcome<RecordStream> {
        let path = existing_path(data_source)?;
        let options = options.clone();
        let separator = Projection::from_options(&options).separator;

        let stream: RecordStream = match extension_of(&path).as_str() {
            "ndjson" | "jsonl" => {
                let projection = Projection::from_options(&options);
                run_blocking(move || open_json_lines(&path, projection)).await?
            }
            "json" => {
                run_blocking(move || {
                    let doc = read_json_file(&path)?;
                    Ok(stream_from_vec(records_from_document(&doc, &options, READING_KEYS)))
                })
                .await?
            }
            "csv" => {
                let opts = CsvOptions::from_task_options(&path, &options)?;
                run_blocking(move || TabularAdapter::open_csv(&path, &opts)).await?
            }
            other => {
                return Err(ImportError::UnsupportedFormat(format!(
                    "设备流适配器不支持 .{} 文件",
                    other
                )))
            }
        };

        Ok(Box::new(
            stream.map(move |r| r.map(|rec| normalize_reading(rec, &separator))),
        ))
    }
}

#[async_trait]
impl FormatAdapter for DeviceStreamAdapter {
    fn format_type(&self) -> FormatType {
        FormatType::DeviceStream
    }

    fn validate_options(&self, _data_source: &str, options: &TaskOptions) -> ImportOutcome<()> {
        if options.get("read_timeout_secs").is_some()
            && options.get_f64("read_timeout_secs").map_or(true, |s| s <= 0.0)
        {
            return Err(ImportError::invalid_option("read_timeout_secs", "必须是正数"));
        }
        Ok(())
    }

    async fn decode(&self, data_source: &str, options: &TaskOptions) -> ImportOutcome<RecordStream> {
        let lower = data_source.to_ascii_lowercase();

        if let Some(scheme) = UNSUPPORTED_SCHEMES.iter().find(|s| lower.starts_with(**s)) {
            return Err(ImportError::UnsupportedFormat(format!(
                "不支持的设备协议: {}",
                scheme.trim_end_matches("://")
            )));
        }
        if let Some(address) = lower.strip_prefix("tcp://").map(|_| &data_source[6..]) {
            return Ok(stream_from_vec(self.read_tcp(address, options).await?));
        }
        if is_http_url(data_source) {
            return Ok(stream_from_vec(self.fetch_http(data_source, options).await?));
        }
        Self::read_file(data_source, options).await
    }

    fn default_field_types(&self) -> BTreeMap<String, ScalarType> {
        BTreeMap::from([
            ("lat".to_string(), ScalarType::Numeric),
            ("lng".to_string(), ScalarType::Numeric),
        ])
    }

    fn default_required_fields(&self) -> Vec<String> {
        vec!["timestamp".to_string()]
    }
}
