// ==========================================
// 医疗数据导入系统 - 导入层
// ==========================================
// 职责: 对象内容 → 记录流 → 字段映射 → 实体落库
// 支持: CSV, XML, Excel (xls/xlsx)
// ==========================================

// 模块声明
pub mod csv_reader;
pub mod entity_registry;
pub mod error;
pub mod excel_reader;
pub mod field_mapper;
pub mod format_reader;
pub mod import_processor;
pub mod xml_reader;

// 重导出核心类型
pub use csv_reader::CsvFormatReader;
pub use error::{ImportError, ImportResult};
pub use excel_reader::ExcelFormatReader;
pub use field_mapper::{
    coerce, FieldKind, FieldMappingEngine, FieldSpec, FieldValue, MappableEntity, MappedBatch,
    MappingOutcome,
};
pub use format_reader::{ByteSource, FormatReader, FormatReaderFactory, RecordStream};
pub use import_processor::ImportProcessor;
pub use xml_reader::XmlFormatReader;
