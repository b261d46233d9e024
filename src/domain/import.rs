// ==========================================
// 医疗数据导入系统 - 导入任务领域模型
// ==========================================
// 职责: ImportJob / FieldMapping / LineError / RowRecord
// 生命周期:
// - ImportJob: 上传完成后创建，由 ReadinessGate 推进状态，finished_at 写入后不可变
// - FieldMapping: 提交时创建，之后只读
// - LineError: 只追加，不更新
// - RowRecord: 仅存活于一次映射过程
// ==========================================

use crate::domain::types::{DataType, FileFormat, ImportStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ==========================================
// ImportCounters - 导入计数
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounters {
    pub total: i64,      // 处理行数
    pub imported: i64,   // 新增落库行数
    pub duplicated: i64, // 自然键重复被忽略的行数
    pub failed: i64,     // 至少有一条 LineError 的行数
}

// ==========================================
// ImportJob - 导入任务
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJob {
    pub job_id: String,
    pub data_type: DataType,
    pub file_format: FileFormat,
    pub file_name: String,
    pub storage_key: String, // 对象存储定位（key）
    pub status: ImportStatus,
    pub counters: ImportCounters,
    pub message: Option<String>, // 失败原因
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ImportJob {
    pub fn new(
        data_type: DataType,
        file_format: FileFormat,
        file_name: String,
        storage_key: String,
    ) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            data_type,
            file_format,
            file_name,
            storage_key,
            status: ImportStatus::Pending,
            counters: ImportCounters::default(),
            message: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// finished_at 已写入的任务不可再变更
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

// ==========================================
// FieldMapping - 字段映射（源列 → 目标字段）
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source_column: String,
    pub target_field: String,
}

impl FieldMapping {
    pub fn new(source_column: impl Into<String>, target_field: impl Into<String>) -> Self {
        Self {
            source_column: source_column.into(),
            target_field: target_field.into(),
        }
    }
}

// ==========================================
// LineError - 行级错误
// ==========================================
// line = 0 表示任务级问题（例如映射目标字段不存在）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineError {
    pub job_id: String,
    pub line: i64,
    pub field: String,
    pub message: String,
    pub raw_value: Option<String>,
}

impl LineError {
    pub fn new(
        job_id: &str,
        line: usize,
        field: impl Into<String>,
        message: impl Into<String>,
        raw_value: Option<String>,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            line: line as i64,
            field: field.into(),
            message: message.into(),
            raw_value,
        }
    }
}

// ==========================================
// RowRecord - 原始行记录
// ==========================================
// line: 数据行序号（从 1 开始，不含表头）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowRecord {
    pub line: usize,
    pub values: HashMap<String, String>,
}

impl RowRecord {
    pub fn new(line: usize) -> Self {
        Self {
            line,
            values: HashMap::new(),
        }
    }

    pub fn with_value(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    /// 按列名查值（先精确匹配，再大小写不敏感匹配）
    pub fn get(&self, column: &str) -> Option<&str> {
        if let Some(v) = self.values.get(column) {
            return Some(v.as_str());
        }
        let wanted = column.trim();
        self.values
            .iter()
            .find(|(k, _)| k.trim().eq_ignore_ascii_case(wanted))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_blank(&self) -> bool {
        self.values.values().all(|v| v.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_record_get_case_insensitive() {
        let row = RowRecord::new(1).with_value("NomeMedico", "Ana");
        assert_eq!(row.get("NomeMedico"), Some("Ana"));
        assert_eq!(row.get("nomemedico"), Some("Ana"));
        assert_eq!(row.get("crm"), None);
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = ImportJob::new(
            DataType::Doctor,
            FileFormat::Csv,
            "medicos.csv".to_string(),
            "imports/x_medicos.csv".to_string(),
        );
        assert_eq!(job.status, ImportStatus::Pending);
        assert!(!job.is_finished());
        assert_eq!(job.counters, ImportCounters::default());
    }
}
