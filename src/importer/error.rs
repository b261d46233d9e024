// ==========================================
// 医疗数据导入系统 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 分级:
// - 致命: FormatUnsupported / 解析器打开失败 / BatchPersistence / Storage
// - 可恢复: FieldConversion / 单条记录解析失败（记入 LineError，行继续）
// ==========================================

use crate::domain::import::LineError;
use crate::repository::error::RepositoryError;
use crate::transport::error::{StorageError, TransportError};
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("no reader for format: {0}")]
    FormatUnsupported(String),

    #[error("CSV 解析失败 (行 {line}): {message}")]
    CsvParseError { line: usize, message: String },

    #[error("XML 解析失败 (行 {line}): {message}")]
    XmlParseError { line: usize, message: String },

    #[error("Excel 解析失败: {0}")]
    ExcelParseError(String),

    // ===== 数据映射错误 =====
    #[error("类型转换失败 (行 {line}, 字段 {field}): {message}")]
    FieldConversion {
        line: usize,
        field: String,
        message: String,
    },

    #[error("批量落库失败 ({rows} 行): {message}")]
    BatchPersistence { rows: usize, message: String },

    // ===== 外部依赖错误 =====
    #[error("对象存储错误: {0}")]
    Storage(#[from] StorageError),

    #[error("上传失败: {0}")]
    Transport(#[from] TransportError),

    #[error("数据库错误: {0}")]
    Repository(#[from] RepositoryError),

    // ===== 任务状态错误 =====
    #[error("导入任务不存在: {0}")]
    JobNotFound(String),

    // ===== 通用错误 =====
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ImportError {
    /// 记录级错误所在行（文件级错误返回 None）
    pub fn line(&self) -> Option<usize> {
        match self {
            ImportError::CsvParseError { line, .. }
            | ImportError::XmlParseError { line, .. }
            | ImportError::FieldConversion { line, .. } => Some(*line),
            _ => None,
        }
    }

    /// 行级错误 → LineError
    ///
    /// line: 错误自身不带行号时使用的行号
    pub fn to_line_error(&self, job_id: &str, line: usize, raw_value: Option<String>) -> LineError {
        let (field, message) = match self {
            ImportError::FieldConversion { field, message, .. } => (field.as_str(), message.clone()),
            ImportError::BatchPersistence { message, .. } => {
                ("", format!("batch persistence failed: {}", message))
            }
            other => ("", other.to_string()),
        };
        LineError::new(job_id, self.line().unwrap_or(line), field, message, raw_value)
    }
}

// 实现 From<calamine::Error>
impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::ExcelParseError(err.to_string())
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_format_message() {
        let err = ImportError::FormatUnsupported("json".to_string());
        assert_eq!(err.to_string(), "no reader for format: json");
        assert_eq!(err.line(), None);
    }

    #[test]
    fn test_record_errors_carry_line() {
        let err = ImportError::CsvParseError {
            line: 7,
            message: "unequal lengths".to_string(),
        };
        assert_eq!(err.line(), Some(7));
    }

    #[test]
    fn test_field_conversion_to_line_error() {
        let err = ImportError::FieldConversion {
            line: 3,
            field: "total_beds".to_string(),
            message: "cannot convert to integer: 'muitos' is not a valid integer".to_string(),
        };
        let line_error = err.to_line_error("job-1", 99, Some("muitos".to_string()));
        assert_eq!(line_error.line, 3);
        assert_eq!(line_error.field, "total_beds");
        assert!(line_error.message.starts_with("cannot convert to integer"));
        assert_eq!(line_error.raw_value.as_deref(), Some("muitos"));
    }

    #[test]
    fn test_batch_failure_uses_given_line() {
        let err = ImportError::BatchPersistence {
            rows: 2,
            message: "disk I/O error".to_string(),
        };
        let line_error = err.to_line_error("job-1", 5, None);
        assert_eq!(line_error.line, 5);
        assert_eq!(line_error.field, "");
        assert_eq!(line_error.message, "batch persistence failed: disk I/O error");
    }
}
