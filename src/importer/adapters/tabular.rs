// ==========================================
// 水资源风险监测平台 - 表格适配器
// ==========================================
// 支持: 分隔文本 (.csv/.tsv/.txt) / Excel (.xlsx/.xls/.ods)
// 选项: delimiter, encoding (utf-8 | latin1), has_headers, sheet
// ==========================================

use crate::domain::record::RawRecord;
use crate::domain::task::TaskOptions;
use crate::domain::types::FormatType;
use crate::importer::adapter_trait::{stream_from_vec, FormatAdapter, RecordStream};
use crate::importer::adapters::{existing_path, extension_of, run_blocking};
use crate::importer::error::{ImportError, ImportOutcome};
use async_trait::async_trait;
use calamine::{open_workbook_auto, Data, Reader};
use csv::{ByteRecord, ReaderBuilder};
use serde_json::Value;
use std::fs::File;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TextEncoding {
    Utf8,
    Latin1,
}

impl TextEncoding {
    fn decode(&self, bytes: &[u8]) -> Result<String, String> {
        match self {
            TextEncoding::Utf8 => std::str::from_utf8(bytes)
                .map(|s| s.trim_start_matches('\u{feff}').to_string())
                .map_err(|e| format!("不是合法 UTF-8: {}", e)),
            TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }
}

/// 分隔文本解析参数
#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub delimiter: u8,
    pub encoding: TextEncoding,
    pub has_headers: bool,
}

impl CsvOptions {
    pub fn from_task_options(path: &Path, options: &TaskOptions) -> ImportOutcome<Self> {
        let default_delimiter = if extension_of(path) == "tsv" { b'\t' } else { b',' };
        let delimiter = match options.get_str("delimiter") {
            None => default_delimiter,
            Some("\\t") | Some("tab") => b'\t',
            Some(s) if s.len() == 1 && s.is_ascii() => s.as_bytes()[0],
            // get_str 会 trim，单独的 "\t" 会被裁空
            Some("") if options.get("delimiter").and_then(Value::as_str) == Some("\t") => b'\t',
            Some(other) => {
                return Err(ImportError::invalid_option(
                    "delimiter",
                    format!("必须是单个 ASCII 字符，实际 '{}'", other),
                ))
            }
        };

        let encoding = match options.get_str("encoding").map(str::to_ascii_lowercase).as_deref() {
            None | Some("utf-8") | Some("utf8") => TextEncoding::Utf8,
            Some("latin1") | Some("latin-1") | Some("iso-8859-1") => TextEncoding::Latin1,
            Some(other) => {
                return Err(ImportError::invalid_option(
                    "encoding",
                    format!("不支持的编码: {}", other),
                ))
            }
        };

        Ok(Self {
            delimiter,
            encoding,
            has_headers: options.get_bool("has_headers").unwrap_or(true),
        })
    }
}

// ==========================================
// TabularAdapter
// ==========================================
pub struct TabularAdapter;

impl TabularAdapter {
    /// 打开分隔文本文件，返回逐行惰性序列
    ///
    /// 表头读取在此完成；数据行在迭代时才解析
    pub fn open_csv(path: &Path, opts: &CsvOptions) -> ImportOutcome<RecordStream> {
        let file = File::open(path)?;
        let mut reader = ReaderBuilder::new()
            .delimiter(opts.delimiter)
            .has_headers(opts.has_headers)
            .flexible(true) // 允许行长度不一致
            .from_reader(file);

        let headers: Vec<String> = if opts.has_headers {
            let raw = reader.byte_headers()?.clone();
            raw.iter()
                .map(|h| opts.encoding.decode(h).map(|s| s.trim().to_string()))
                .collect::<Result<_, _>>()
                .map_err(|e| ImportError::Parse(format!("表头{}", e)))?
        } else {
            Vec::new()
        };

        let encoding = opts.encoding;
        let rows = reader
            .into_byte_records()
            .enumerate()
            .filter_map(move |(row_idx, result)| {
                let row = match result {
                    Ok(row) => row,
                    Err(e) => return Some(Err(format!("第 {} 行解析失败: {}", row_idx + 1, e))),
                };
                match row_to_record(&row, &headers, encoding) {
                    Ok(record) if record.values().all(is_blank) => None, // 跳过完全空白的行
                    Ok(record) => Some(Ok(record)),
                    Err(e) => Some(Err(format!("第 {} 行{}", row_idx + 1, e))),
                }
            });

        Ok(Box::new(rows))
    }

    /// 读取 Excel 工作表（整表读入后迭代）
    pub fn read_workbook(path: &Path, sheet: Option<&str>) -> ImportOutcome<RecordStream> {
        let mut workbook = open_workbook_auto(path)?;

        let sheet_name = match sheet {
            Some(name) => name.to_string(),
            None => workbook
                .sheet_names()
                .first()
                .cloned()
                .ok_or_else(|| ImportError::Parse("Excel 文件无工作表".to_string()))?,
        };
        let range = workbook.worksheet_range(&sheet_name)?;

        let mut rows = range.rows();
        let headers: Vec<String> = match rows.next() {
            Some(header_row) => header_row
                .iter()
                .map(|cell| cell.to_string().trim().to_string())
                .collect(),
            None => return Ok(stream_from_vec(Vec::new())),
        };

        let mut records = Vec::new();
        for data_row in rows {
            let record: RawRecord = headers
                .iter()
                .zip(data_row.iter())
                .filter(|(h, _)| !h.is_empty())
                .map(|(h, cell)| (h.clone(), cell_to_value(cell)))
                .collect();

            if record.values().all(is_blank) {
                continue;
            }
            records.push(Ok(record));
        }

        Ok(stream_from_vec(records))
    }
}

#[async_trait]
impl FormatAdapter for TabularAdapter {
    fn format_type(&self) -> FormatType {
        FormatType::Tabular
    }

    fn validate_options(&self, data_source: &str, options: &TaskOptions) -> ImportOutcome<()> {
        CsvOptions::from_task_options(Path::new(data_source), options).map(|_| ())
    }

    async fn decode(&self, data_source: &str, options: &TaskOptions) -> ImportOutcome<RecordStream> {
        let path = existing_path(data_source)?;
        let ext = extension_of(&path);

        match ext.as_str() {
            "xlsx" | "xls" | "xlsm" | "ods" => {
                let sheet = options.get_str("sheet").map(str::to_string);
                run_blocking(move || TabularAdapter::read_workbook(&path, sheet.as_deref())).await
            }
            "csv" | "tsv" | "txt" | "" => {
                let opts = CsvOptions::from_task_options(&path, options)?;
                run_blocking(move || TabularAdapter::open_csv(&path, &opts)).await
            }
            other => Err(ImportError::UnsupportedFormat(format!(
                "表格适配器不支持 .{} 文件",
                other
            ))),
        }
    }
}

// ===== 辅助函数 =====

fn row_to_record(row: &ByteRecord, headers: &[String], encoding: TextEncoding) -> Result<RawRecord, String> {
    let mut record = RawRecord::new();
    for (col_idx, raw) in row.iter().enumerate() {
        let value = encoding.decode(raw)?;
        let key = match headers.get(col_idx) {
            Some(h) if !h.is_empty() => h.clone(),
            Some(_) => continue,
            None if headers.is_empty() => format!("column_{}", col_idx + 1),
            None => continue, // 超出表头的多余列
        };
        record.insert(key, Value::String(value.trim().to_string()));
    }
    Ok(record)
}

fn cell_to_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Data::Int(i) => Value::from(*i),
        Data::Bool(b) => Value::Bool(*b),
        other => Value::String(other.to_string().trim().to_string()),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}
