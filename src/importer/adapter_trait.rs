// ==========================================
// 水资源风险监测平台 - 格式适配器 Trait
// ==========================================
// 职责: 定义格式适配器的统一能力集（不包含实现）
// 约定: 新格式通过实现本 Trait 接入，不修改执行器/管理器
// ==========================================

use crate::domain::record::RawRecord;
use crate::domain::rules::RuleSet;
use crate::domain::task::TaskOptions;
use crate::domain::types::{FormatType, ScalarType};
use crate::importer::error::ImportOutcome;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// 惰性记录序列
///
/// - Ok(RawRecord): 一条原始记录
/// - Err(String): 该条记录解码失败（记为记录级错误，不中断任务）
pub type RecordStream = Box<dyn Iterator<Item = Result<RawRecord, String>> + Send>;

/// 由已解码的记录构造序列
pub fn stream_from_vec(records: Vec<Result<RawRecord, String>>) -> RecordStream {
    Box::new(records.into_iter())
}

// ==========================================
// FormatAdapter Trait
// ==========================================
// 实现者: TabularAdapter, NestedDocumentAdapter, GeoDocumentAdapter,
//         RemoteApiAdapter, ImageryAdapter, DeviceStreamAdapter,
//         ForecastFeedAdapter, VectorGisAdapter
#[async_trait]
pub trait FormatAdapter: Send + Sync {
    fn format_type(&self) -> FormatType;

    /// 任务执行前的参数检查（不做任何 I/O）
    ///
    /// # 返回
    /// - Err(ImportError::InvalidOption / InvalidTask): 调用方错误
    fn validate_options(&self, _data_source: &str, _options: &TaskOptions) -> ImportOutcome<()> {
        Ok(())
    }

    /// 打开数据源并解码为惰性记录序列
    ///
    /// # 返回
    /// - Ok(RecordStream): 记录序列
    /// - Err: 数据源级错误（文件不存在、连接失败、认证失败等）
    async fn decode(&self, data_source: &str, options: &TaskOptions) -> ImportOutcome<RecordStream>;

    /// 适配器默认字段类型
    fn default_field_types(&self) -> BTreeMap<String, ScalarType> {
        BTreeMap::new()
    }

    /// 适配器默认必填字段
    fn default_required_fields(&self) -> Vec<String> {
        Vec::new()
    }

    /// 适配器对规则集的额外调整（如影像云量过滤、GIS 坐标必填）
    fn adjust_rules(&self, _rules: &mut RuleSet, _options: &TaskOptions) {}
}
