// ==========================================
// 医疗数据导入系统 - Excel 读取器
// ==========================================
// 支持: .xlsx / .xls（calamine 自动识别）
// 约定: 读取第一个工作表；首行为表头；行号从 1 开始，不含表头
// 限制: calamine 需要随机访问（Read + Seek），对象内容先整体读入内存
// ==========================================

use crate::domain::import::RowRecord;
use crate::domain::types::FileFormat;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::format_reader::{ByteSource, FormatReader, RecordStream};
use calamine::{open_workbook_auto_from_rs, Reader};
use std::io::{Cursor, Read};

#[derive(Debug, Clone, Copy, Default)]
pub struct ExcelFormatReader;

impl FormatReader for ExcelFormatReader {
    fn format(&self) -> FileFormat {
        FileFormat::Xls
    }

    fn read(&self, mut source: ByteSource) -> ImportResult<RecordStream> {
        let mut bytes = Vec::new();
        source
            .read_to_end(&mut bytes)
            .map_err(|e| ImportError::ExcelParseError(format!("读取对象内容失败: {}", e)))?;
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;

        // 读取第一个 sheet
        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| ImportError::ExcelParseError("Excel 文件无工作表".to_string()))?;

        let range = workbook.worksheet_range(&sheet_name)?;

        // 提取表头（第一行）
        let mut rows = range.rows();
        let headers: Vec<String> = match rows.next() {
            Some(header_row) => header_row
                .iter()
                .map(|cell| cell.to_string().trim().to_string())
                .collect(),
            None => Vec::new(),
        };

        // 数据行一次性物化（工作表已整体加载到内存）
        let mut records = Vec::new();
        for (idx, data_row) in rows.enumerate() {
            let mut row = RowRecord::new(idx + 1);
            for (col_idx, cell) in data_row.iter().enumerate() {
                if let Some(header) = headers.get(col_idx).filter(|h| !h.is_empty()) {
                    row.values.insert(header.clone(), cell.to_string().trim().to_string());
                }
            }

            // 跳过完全空白的行
            if row.is_blank() {
                continue;
            }
            records.push(Ok(row));
        }

        Ok(Box::new(records.into_iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_workbook_bytes_fail() {
        let err = ExcelFormatReader
            .read(Box::new(Cursor::new(b"not a spreadsheet".to_vec())))
            .err()
            .unwrap();
        assert!(matches!(err, ImportError::ExcelParseError(_)));
    }
}
