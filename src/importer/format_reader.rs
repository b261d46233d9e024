// ==========================================
// 医疗数据导入系统 - 格式读取器 Trait 与工厂
// ==========================================
// 职责: 文件格式 → 已注册读取器；未注册格式立即失败
// 读取器契约: 字节流 → 按文件顺序的惰性记录序列（边读边解析）
// ==========================================

use crate::domain::import::RowRecord;
use crate::domain::types::FileFormat;
use crate::importer::csv_reader::CsvFormatReader;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::excel_reader::ExcelFormatReader;
use crate::importer::xml_reader::XmlFormatReader;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

/// 对象内容的同步读取端（在阻塞线程中消费）
pub type ByteSource = Box<dyn Read + Send>;

/// 按文件顺序产出的记录；单条 Err 表示该记录无法解析，后续记录继续
pub type RecordStream = Box<dyn Iterator<Item = ImportResult<RowRecord>> + Send>;

// ==========================================
// FormatReader Trait
// ==========================================
// 实现者: CsvFormatReader / XmlFormatReader / ExcelFormatReader
pub trait FormatReader: Send + Sync {
    fn format(&self) -> FileFormat;

    /// 打开对象内容并返回记录流
    ///
    /// # 返回
    /// - Err: 文件级错误（无法打开/无表头/无工作表），任务整体失败
    fn read(&self, source: ByteSource) -> ImportResult<RecordStream>;
}

// ==========================================
// FormatReaderFactory
// ==========================================
#[derive(Clone, Default)]
pub struct FormatReaderFactory {
    readers: HashMap<FileFormat, Arc<dyn FormatReader>>,
}

impl FormatReaderFactory {
    /// 空工厂（测试中按需注册）
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册 CSV / XML / XLS 读取器
    pub fn with_default_readers() -> Self {
        let mut factory = Self::new();
        factory.register(Arc::new(CsvFormatReader::default()));
        factory.register(Arc::new(XmlFormatReader));
        factory.register(Arc::new(ExcelFormatReader));
        factory
    }

    pub fn register(&mut self, reader: Arc<dyn FormatReader>) {
        self.readers.insert(reader.format(), reader);
    }

    pub fn supports(&self, format: FileFormat) -> bool {
        self.readers.contains_key(&format)
    }

    pub fn reader_for(&self, format: FileFormat) -> ImportResult<Arc<dyn FormatReader>> {
        self.readers
            .get(&format)
            .cloned()
            .ok_or_else(|| ImportError::FormatUnsupported(format.as_str().to_string()))
    }

    /// 按标签或扩展名查找（"csv" / ".xlsx"）
    pub fn reader_for_label(&self, label: &str) -> ImportResult<Arc<dyn FormatReader>> {
        let format = FileFormat::parse(label)
            .ok_or_else(|| ImportError::FormatUnsupported(label.trim().to_string()))?;
        self.reader_for(format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_factory_formats() {
        let factory = FormatReaderFactory::with_default_readers();
        assert!(factory.supports(FileFormat::Csv));
        assert!(factory.supports(FileFormat::Xml));
        assert!(factory.supports(FileFormat::Xls));
        assert_eq!(factory.reader_for_label(".xlsx").unwrap().format(), FileFormat::Xls);
    }

    #[test]
    fn test_unregistered_format_fails_fast() {
        let factory = FormatReaderFactory::with_default_readers();
        let err = factory.reader_for(FileFormat::Json).err().unwrap();
        assert!(err.to_string().starts_with("no reader for format"));

        let err = factory.reader_for_label("parquet").err().unwrap();
        assert!(matches!(err, ImportError::FormatUnsupported(ref f) if f == "parquet"));
    }
}
