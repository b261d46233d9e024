// ==========================================
// 医疗数据导入系统 - CSV 读取器
// ==========================================
// 约定:
// - 首行为表头；分隔符按表头行嗅探（';' 多于 ',' 时使用 ';'）
// - 表头行预读后与剩余内容拼接，整个文件不做缓冲
// - 行号从 1 开始，不含表头；空白行跳过但占用行号
// - 行长度不一致允许（flexible），缺失列视为不存在
// ==========================================

use crate::domain::import::RowRecord;
use crate::domain::types::FileFormat;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::format_reader::{ByteSource, FormatReader, RecordStream};
use csv::ReaderBuilder;
use std::io::{BufRead, BufReader, Cursor, Read};

const UTF8_BOM: &str = "\u{feff}";

#[derive(Debug, Clone, Default)]
pub struct CsvFormatReader {
    delimiter: Option<u8>, // None: 自动嗅探
}

impl CsvFormatReader {
    pub fn with_delimiter(delimiter: u8) -> Self {
        Self {
            delimiter: Some(delimiter),
        }
    }
}

/// 按表头行嗅探分隔符
fn sniff_delimiter(header: &[u8]) -> u8 {
    let semicolons = header.iter().filter(|b| **b == b';').count();
    let commas = header.iter().filter(|b| **b == b',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

impl FormatReader for CsvFormatReader {
    fn format(&self) -> FileFormat {
        FileFormat::Csv
    }

    fn read(&self, source: ByteSource) -> ImportResult<RecordStream> {
        let mut source = BufReader::new(source);
        let mut header_line = Vec::new();
        source
            .read_until(b'\n', &mut header_line)
            .map_err(|e| ImportError::CsvParseError {
                line: 0,
                message: e.to_string(),
            })?;

        let delimiter = self
            .delimiter
            .unwrap_or_else(|| sniff_delimiter(&header_line));
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true) // 允许行长度不一致
            .delimiter(delimiter)
            .from_reader(Cursor::new(header_line).chain(source));

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| ImportError::CsvParseError {
                line: 0,
                message: e.to_string(),
            })?
            .iter()
            .map(|h| h.trim_start_matches(UTF8_BOM).trim().to_string())
            .collect();

        if headers.iter().all(|h| h.is_empty()) {
            return Err(ImportError::CsvParseError {
                line: 0,
                message: "CSV 文件缺少表头".to_string(),
            });
        }

        let records = reader
            .into_records()
            .enumerate()
            .filter_map(move |(idx, result)| {
                let line = idx + 1;
                match result {
                    Ok(record) => {
                        let mut row = RowRecord::new(line);
                        for (col_idx, value) in record.iter().enumerate() {
                            if let Some(header) = headers.get(col_idx).filter(|h| !h.is_empty()) {
                                row.values.insert(header.clone(), value.trim().to_string());
                            }
                        }
                        // 跳过完全空白的行
                        if row.is_blank() {
                            None
                        } else {
                            Some(Ok(row))
                        }
                    }
                    Err(e) => Some(Err(ImportError::CsvParseError {
                        line,
                        message: e.to_string(),
                    })),
                }
            });

        Ok(Box::new(records))
    }
}
