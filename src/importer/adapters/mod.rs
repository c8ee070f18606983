// ==========================================
// 水资源风险监测平台 - 格式适配器集合
// ==========================================
// 职责: 八种格式适配器 + 格式类型 → 适配器查找表
// ==========================================

pub mod device_stream;
pub mod forecast_feed;
pub mod geo_document;
pub mod imagery;
pub mod nested_document;
pub mod remote_api;
pub mod tabular;
pub mod vector_gis;

pub use device_stream::DeviceStreamAdapter;
pub use forecast_feed::ForecastFeedAdapter;
pub use geo_document::GeoDocumentAdapter;
pub use imagery::ImageryAdapter;
pub use nested_document::NestedDocumentAdapter;
pub use remote_api::RemoteApiAdapter;
pub use tabular::TabularAdapter;
pub use vector_gis::VectorGisAdapter;

use crate::config::settings::ImportSettings;
use crate::domain::types::FormatType;
use crate::importer::adapter_trait::FormatAdapter;
use crate::importer::error::{ImportError, ImportOutcome};
use crate::importer::http_client::HttpFetcher;
use crate::importer::indices::IndexRegistry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ==========================================
// AdapterRegistry - 格式类型 → 适配器
// ==========================================
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<FormatType, Arc<dyn FormatAdapter>>,
}

impl AdapterRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// 注册全部内置适配器
    pub fn with_defaults(settings: &ImportSettings) -> ImportOutcome<Self> {
        let fetcher = HttpFetcher::new(settings)?;
        let mut registry = Self::empty();
        registry.register(Arc::new(TabularAdapter));
        registry.register(Arc::new(NestedDocumentAdapter));
        registry.register(Arc::new(GeoDocumentAdapter));
        registry.register(Arc::new(RemoteApiAdapter::new(fetcher.clone(), settings.max_pages)));
        registry.register(Arc::new(ImageryAdapter::new(Arc::new(IndexRegistry::with_defaults()))));
        registry.register(Arc::new(DeviceStreamAdapter::new(fetcher.clone(), settings.connect_timeout())));
        registry.register(Arc::new(ForecastFeedAdapter::new(fetcher)));
        registry.register(Arc::new(VectorGisAdapter));
        Ok(registry)
    }

    /// 注册适配器（同格式覆盖）
    pub fn register(&mut self, adapter: Arc<dyn FormatAdapter>) {
        self.adapters.insert(adapter.format_type(), adapter);
    }

    /// 按格式查找适配器
    ///
    /// # 返回
    /// - Err(UnknownFormat): 未注册该格式（调用方错误）
    pub fn get(&self, format: FormatType) -> ImportOutcome<Arc<dyn FormatAdapter>> {
        self.adapters
            .get(&format)
            .cloned()
            .ok_or_else(|| ImportError::UnknownFormat(format.to_string()))
    }

    /// 已注册格式（固定顺序）
    pub fn formats(&self) -> Vec<FormatType> {
        FormatType::ALL
            .iter()
            .copied()
            .filter(|f| self.adapters.contains_key(f))
            .collect()
    }
}

// ==========================================
// 数据源辅助函数
// ==========================================

/// 本地文件路径（不存在 → 数据源错误）
pub(crate) fn existing_path(data_source: &str) -> ImportOutcome<PathBuf> {
    let path = PathBuf::from(data_source);
    if !path.exists() {
        return Err(ImportError::SourceNotFound(data_source.to_string()));
    }
    if !path.is_file() {
        return Err(ImportError::SourceRead(format!("不是文件: {}", data_source)));
    }
    Ok(path)
}

/// 小写扩展名（无扩展名返回空串）
pub(crate) fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

pub(crate) fn is_http_url(source: &str) -> bool {
    let lower = source.trim().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// f64 → JSON 数值（非有限值为 null）
pub(crate) fn json_number(v: f64) -> serde_json::Value {
    serde_json::Number::from_f64(v)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

/// 在阻塞线程池中执行文件 I/O
pub(crate) async fn run_blocking<T, F>(f: F) -> ImportOutcome<T>
where
    F: FnOnce() -> ImportOutcome<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ImportError::Internal(format!("阻塞任务执行失败: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_all_formats() {
        let registry = AdapterRegistry::with_defaults(&ImportSettings::default()).unwrap();
        assert_eq!(registry.formats(), FormatType::ALL.to_vec());
        for format in FormatType::ALL {
            assert_eq!(registry.get(format).unwrap().format_type(), format);
        }
    }

    #[test]
    fn test_empty_registry_rejects_lookup() {
        let registry = AdapterRegistry::empty();
        let err = registry.get(FormatType::Tabular).err().unwrap();
        assert!(err.is_caller_error());
    }

    #[test]
    fn test_existing_path() {
        assert!(matches!(
            existing_path("/definitely/not/here.csv"),
            Err(ImportError::SourceNotFound(_))
        ));
    }
}
