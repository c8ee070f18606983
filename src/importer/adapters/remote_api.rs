// ==========================================
// 水资源风险监测平台 - 远程 API 适配器
// ==========================================
// 认证: api_key → Authorization: Bearer
//       api_key + header_name → 自定义请求头
//       api_key + api_key_param → 查询参数
// 分页: none | page | offset | cursor | next_link
// 终止: 空页 / 不足一页 / 无游标 / 达到 max_pages / max_records
// ==========================================

use crate::domain::record::RawRecord;
use crate::domain::task::TaskOptions;
use crate::domain::types::FormatType;
use crate::importer::adapter_trait::{stream_from_vec, FormatAdapter, RecordStream};
use crate::importer::adapters::is_http_url;
use crate::importer::adapters::nested_document::Projection;
use crate::importer::error::{ImportError, ImportOutcome};
use crate::importer::field_mapper::lookup_path;
use crate::importer::http_client::{HttpFetcher, RateLimiter, RequestSpec};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// 自动探测条目数组时依次尝试的键
const ITEM_KEYS: &[&str] = &["data", "results", "items", "records"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PaginationMode {
    None,
    Page,
    Offset,
    Cursor,
    NextLink,
}

impl PaginationMode {
    fn parse(raw: Option<&str>) -> ImportOutcome<Self> {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            None | Some("none") => Ok(PaginationMode::None),
            Some("page") => Ok(PaginationMode::Page),
            Some("offset") => Ok(PaginationMode::Offset),
            Some("cursor") => Ok(PaginationMode::Cursor),
            Some("next_link") | Some("link") => Ok(PaginationMode::NextLink),
            Some(other) => Err(ImportError::invalid_option(
                "pagination.type",
                format!("不支持的分页方式: {}", other),
            )),
        }
    }
}

/// 分页参数
#[derive(Debug, Clone)]
struct Pagination {
    mode: PaginationMode,
    page_param: String,
    size_param: String,
    page_size: Option<u64>,
    start_page: u64,
    cursor_param: String,
    cursor_path: String,
    next_path: String,
}

impl Pagination {
    fn from_options(options: &TaskOptions) -> ImportOutcome<Self> {
        let mode = PaginationMode::parse(options.get_str("pagination.type"))?;
        let default_size_param = if mode == PaginationMode::Offset { "limit" } else { "page_size" };
        Ok(Self {
            mode,
            page_param: options
                .get_str("pagination.page_param")
                .unwrap_or(if mode == PaginationMode::Offset { "offset" } else { "page" })
                .to_string(),
            size_param: options
                .get_str("pagination.size_param")
                .unwrap_or(default_size_param)
                .to_string(),
            page_size: options.get_u64("pagination.page_size"),
            start_page: options.get_u64("pagination.start_page").unwrap_or(1),
            cursor_param: options
                .get_str("pagination.cursor_param")
                .unwrap_or("cursor")
                .to_string(),
            cursor_path: options
                .get_str("pagination.cursor_path")
                .unwrap_or("next_cursor")
                .to_string(),
            next_path: options
                .get_str("pagination.next_path")
                .unwrap_or("next")
                .to_string(),
        })
    }
}

/// 构造带认证/参数的基础请求
pub(crate) fn build_request(url: &str, options: &TaskOptions) -> ImportOutcome<RequestSpec> {
    let method = match options.get_str("method").map(str::to_ascii_uppercase).as_deref() {
        None | Some("GET") => Method::GET,
        Some("POST") => Method::POST,
        Some(other) => {
            return Err(ImportError::invalid_option(
                "method",
                format!("仅支持 GET/POST，实际 {}", other),
            ))
        }
    };

    let mut spec = RequestSpec::get(url);
    spec.method = method;
    spec.body = options.get("body").cloned();
    spec.timeout = options.get_u64("timeout_secs").map(Duration::from_secs);

    if let Some(params) = options.get_object("params") {
        for (k, v) in params {
            spec.query.push((k.clone(), scalar_to_string(v)));
        }
    }
    if let Some(headers) = options.get_object("headers") {
        for (k, v) in headers {
            spec.headers.push((k.clone(), scalar_to_string(v)));
        }
    }

    if let Some(key) = options.get_str("api_key").filter(|k| !k.is_empty()) {
        if let Some(param) = options.get_str("api_key_param") {
            spec.query.push((param.to_string(), key.to_string()));
        } else if let Some(header) = options.get_str("header_name") {
            spec.headers.push((header.to_string(), key.to_string()));
        } else {
            spec.headers
                .push(("Authorization".to_string(), format!("Bearer {}", key)));
        }
    }

    Ok(spec)
}

/// 响应体中的业务错误（error / errors / status=error）
pub(crate) fn check_error_payload(body: &Value) -> ImportOutcome<()> {
    let obj = match body.as_object() {
        Some(obj) => obj,
        None => return Ok(()),
    };

    if let Some(err) = obj.get("error").filter(|v| !v.is_null() && *v != &Value::Bool(false)) {
        return Err(ImportError::RemotePayload(scalar_to_string(err)));
    }
    if let Some(Value::Array(errors)) = obj.get("errors") {
        if !errors.is_empty() {
            return Err(ImportError::RemotePayload(Value::Array(errors.clone()).to_string()));
        }
    }
    if obj.get("status").and_then(Value::as_str) == Some("error") {
        let message = obj
            .get("message")
            .map(scalar_to_string)
            .unwrap_or_else(|| "status=error".to_string());
        return Err(ImportError::RemotePayload(message));
    }
    Ok(())
}

/// 取出一页条目
fn extract_items<'a>(body: &'a Value, items_path: Option<&str>) -> Vec<&'a Value> {
    if let Some(path) = items_path {
        return match lookup_path(body, path) {
            Some(Value::Array(items)) => items.iter().collect(),
            Some(v @ Value::Object(_)) => vec![v],
            _ => Vec::new(),
        };
    }
    match body {
        Value::Array(items) => items.iter().collect(),
        Value::Object(obj) => ITEM_KEYS
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_array))
            .map(|items| items.iter().collect())
            .unwrap_or_else(|| vec![body]),
        _ => Vec::new(),
    }
}

fn scalar_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ==========================================
// RemoteApiAdapter
// ==========================================
pub struct RemoteApiAdapter {
    fetcher: HttpFetcher,
    max_pages: u32,
}

impl RemoteApiAdapter {
    pub fn new(fetcher: HttpFetcher, max_pages: u32) -> Self {
        Self { fetcher, max_pages }
    }

    fn resolve_url<'a>(data_source: &'a str, options: &'a TaskOptions) -> &'a str {
        options.get_str("url").unwrap_or(data_source)
    }

    /// 拉取全部分页
    async fn fetch_all(&self, url: &str, options: &TaskOptions) -> ImportOutcome<Vec<Result<RawRecord, String>>> {
        let base = build_request(url, options)?;
        let pagination = Pagination::from_options(options)?;
        let policy = self.fetcher.retry_policy(options);
        let max_pages = options
            .get_u32("max_pages")
            .unwrap_or(self.max_pages)
            .max(1);
        let max_records = options
            .get_u64("max_records")
            .map(|v| usize::try_from(v).unwrap_or(usize::MAX));
        let items_path = options.get_str("items_path");
        let projection = Projection::from_options(options);
        let mut limiter = RateLimiter::per_minute(options.get_u64("rate_limit_per_minute"));

        let mut records = Vec::new();
        let mut page_index: u64 = 0;
        let mut cursor: Option<String> = None;
        let mut next_url: Option<String> = None;

        'pages: while page_index < max_pages as u64 {
            if max_records.map_or(false, |max| records.len() >= max) {
                break;
            }
            let mut spec = base.clone();
            match pagination.mode {
                PaginationMode::None => {}
                PaginationMode::Page => {
                    let page = pagination.start_page + page_index;
                    spec.query.push((pagination.page_param.clone(), page.to_string()));
                }
                PaginationMode::Offset => {
                    let offset = page_index * pagination.page_size.unwrap_or(0);
                    spec.query.push((pagination.page_param.clone(), offset.to_string()));
                }
                PaginationMode::Cursor => {
                    if let Some(c) = &cursor {
                        spec.query.push((pagination.cursor_param.clone(), c.clone()));
                    }
                }
                PaginationMode::NextLink => {
                    if let Some(next) = &next_url {
                        // 下一页链接自带参数
                        spec.url = next.clone();
                        spec.query.clear();
                    }
                }
            }
            if let (Some(size), PaginationMode::Page | PaginationMode::Offset) =
                (pagination.page_size, pagination.mode)
            {
                spec.query.push((pagination.size_param.clone(), size.to_string()));
            }

            limiter.acquire().await;
            let body = self.fetcher.fetch_json(&spec, &policy).await?;
            check_error_payload(&body)?;

            let items = extract_items(&body, items_path);
            let item_count = items.len();
            debug!(url = %spec.url, page = page_index, items = item_count, "已获取分页");

            for item in items {
                if max_records.map_or(false, |max| records.len() >= max) {
                    break 'pages;
                }
                records.push(projection.project(item));
            }
            page_index += 1;

            if item_count == 0 {
                break;
            }
            match pagination.mode {
                PaginationMode::None => break,
                PaginationMode::Page | PaginationMode::Offset => {
                    if pagination.page_size.map_or(false, |size| (item_count as u64) < size) {
                        break;
                    }
                }
                PaginationMode::Cursor => {
                    cursor = lookup_path(&body, &pagination.cursor_path)
                        .filter(|v| !v.is_null())
                        .map(scalar_to_string)
                        .filter(|s| !s.is_empty());
                    if cursor.is_none() {
                        break;
                    }
                }
                PaginationMode::NextLink => {
                    next_url = lookup_path(&body, &pagination.next_path)
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string);
                    if next_url.is_none() {
                        break;
                    }
                }
            }
        }

        info!(url = %url, pages = page_index, records = records.len(), "远程 API 拉取完成");
        Ok(records)
    }
}

#[async_trait]
impl FormatAdapter for RemoteApiAdapter {
    fn format_type(&self) -> FormatType {
        FormatType::RemoteApi
    }

    fn validate_options(&self, data_source: &str, options: &TaskOptions) -> ImportOutcome<()> {
        let url = Self::resolve_url(data_source, options);
        if !is_http_url(url) {
            return Err(ImportError::InvalidTask(format!(
                "远程 API 数据源必须是 http(s) URL: {}",
                url
            )));
        }
        build_request(url, options)?;
        let pagination = Pagination::from_options(options)?;
        if pagination.mode == PaginationMode::Offset && pagination.page_size.is_none() {
            return Err(ImportError::invalid_option(
                "pagination.page_size",
                "offset 分页必须指定 page_size",
            ));
        }
        Ok(())
    }

    async fn decode(&self, data_source: &str, options: &TaskOptions) -> ImportOutcome<RecordStream> {
        let url = Self::resolve_url(data_source, options).to_string();
        let records = self.fetch_all(&url, options).await?;
        Ok(stream_from_vec(records))
    }
}
