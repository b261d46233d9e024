// ==========================================
// 医疗数据导入系统 - 导入任务API
// ==========================================
// 职责: 提交导入、查询任务与行级错误（请求校验 + DTO 转换）
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::import::{FieldMapping, ImportJob, LineError};
use crate::domain::types::{DataType, FileFormat, ImportStatus};
use crate::services::import_service::{ImportService, SubmitImport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_LIST_LIMIT: usize = 100;
pub const MAX_LIST_LIMIT: usize = 1000;

/// 字段映射 DTO（源列 → 目标字段）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMappingDto {
    pub from: String,
    pub to: String,
}

/// 提交导入请求
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitImportRequest {
    pub data_type: String,
    pub file_format: String,
    pub file_name: String,
    pub s3_pre_signed_url: String,
    /// 由服务端决定（总是 PENDING），仅为兼容保留
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub field_mappings: Vec<FieldMappingDto>,
}

/// 导入任务 DTO
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobDto {
    pub id: String,
    pub data_type: DataType,
    pub file_format: FileFormat,
    pub file_name: String,
    pub storage_key: String,
    pub status: ImportStatus,
    pub total_rows: i64,
    pub imported_rows: i64,
    pub duplicated_rows: i64,
    pub failed_rows: i64,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub field_mappings: Vec<FieldMappingDto>,
}

impl ImportJobDto {
    fn from_job(job: ImportJob, mappings: Vec<FieldMapping>) -> Self {
        Self {
            id: job.job_id,
            data_type: job.data_type,
            file_format: job.file_format,
            file_name: job.file_name,
            storage_key: job.storage_key,
            status: job.status,
            total_rows: job.counters.total,
            imported_rows: job.counters.imported,
            duplicated_rows: job.counters.duplicated,
            failed_rows: job.counters.failed,
            message: job.message,
            created_at: job.created_at,
            finished_at: job.finished_at,
            field_mappings: mappings
                .into_iter()
                .map(|m| FieldMappingDto {
                    from: m.source_column,
                    to: m.target_field,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineErrorDto {
    pub line: i64,
    pub field: String,
    pub message: String,
    pub raw_value: Option<String>,
}

impl From<LineError> for LineErrorDto {
    fn from(e: LineError) -> Self {
        Self {
            line: e.line,
            field: e.field,
            message: e.message,
            raw_value: e.raw_value,
        }
    }
}

/// 行级错误列表响应（带分页信息）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineErrorListResponse {
    pub errors: Vec<LineErrorDto>,
    pub total: i64,
    pub limit: usize,
    pub offset: usize,
}

/// 导入任务API
pub struct ImportApi {
    service: Arc<ImportService>,
}

impl ImportApi {
    pub fn new(service: Arc<ImportService>) -> Self {
        Self { service }
    }

    /// 提交导入任务
    ///
    /// # 返回
    /// - Ok(ImportJobDto): 新建任务（PENDING）
    /// - Err(InvalidInput): 数据类型 / 文件格式 / 映射不合法
    pub fn submit_import(&self, request: SubmitImportRequest) -> ApiResult<ImportJobDto> {
        let data_type = DataType::parse(&request.data_type).ok_or_else(|| {
            ApiError::InvalidInput(format!("未知数据类型: {}", request.data_type))
        })?;
        let file_format = FileFormat::parse(&request.file_format).ok_or_else(|| {
            ApiError::InvalidInput(format!("未知文件格式: {}", request.file_format))
        })?;

        let file_name = request.file_name.trim();
        if file_name.is_empty() {
            return Err(ApiError::InvalidInput("fileName 不能为空".to_string()));
        }
        let storage_key = self.service.resolve_storage_key(&request.s3_pre_signed_url);
        if storage_key.is_empty() {
            return Err(ApiError::InvalidInput(format!(
                "无法从存储地址解析对象键: {}",
                request.s3_pre_signed_url
            )));
        }

        let mut field_mappings = Vec::with_capacity(request.field_mappings.len());
        for (i, m) in request.field_mappings.iter().enumerate() {
            if m.from.trim().is_empty() || m.to.trim().is_empty() {
                return Err(ApiError::InvalidInput(format!(
                    "fieldMappings[{}] 的 from/to 不能为空",
                    i
                )));
            }
            field_mappings.push(FieldMapping::new(m.from.trim(), m.to.trim()));
        }

        if let Some(status) = request.status.as_deref() {
            debug!(status, "忽略客户端提交的状态，任务总以 PENDING 创建");
        }

        let job = self.service.submit(SubmitImport {
            data_type,
            file_format,
            file_name: file_name.to_string(),
            storage_key,
            field_mappings: field_mappings.clone(),
        })?;
        Ok(ImportJobDto::from_job(job, field_mappings))
    }

    pub fn get_import(&self, job_id: &str) -> ApiResult<ImportJobDto> {
        let job = self.service.get_job(job_id)?;
        let mappings = self.service.list_field_mappings(job_id)?;
        Ok(ImportJobDto::from_job(job, mappings))
    }

    pub fn list_imports(&self, limit: Option<usize>) -> ApiResult<Vec<ImportJobDto>> {
        let limit = clamp_limit(limit)?;
        let jobs = self.service.list_jobs(limit)?;
        Ok(jobs
            .into_iter()
            .map(|job| ImportJobDto::from_job(job, Vec::new()))
            .collect())
    }

    pub fn list_line_errors(
        &self,
        job_id: &str,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> ApiResult<LineErrorListResponse> {
        let limit = clamp_limit(limit)?;
        let offset = offset.unwrap_or(0);
        let (errors, total) = self.service.list_line_errors(job_id, limit, offset)?;
        Ok(LineErrorListResponse {
            errors: errors.into_iter().map(LineErrorDto::from).collect(),
            total,
            limit,
            offset,
        })
    }
}

fn clamp_limit(limit: Option<usize>) -> ApiResult<usize> {
    match limit {
        None => Ok(DEFAULT_LIST_LIMIT),
        Some(0) => Err(ApiError::InvalidInput("limit 必须大于 0".to_string())),
        Some(n) => Ok(n.min(MAX_LIST_LIMIT)),
    }
}
