// ==========================================
// 医疗数据导入系统 - API层错误类型
// ==========================================
// 职责: 将 Repository / Importer 错误转换为用户可读的错误消息
// HTTP: InvalidInput → 400, NotFound → 404, 其余 → 500
// 响应体: {"code": "...", "message": "..."}
// ==========================================

use crate::importer::error::ImportError;
use crate::repository::error::RepositoryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ===== 业务规则错误 =====
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    // ===== 数据访问错误 =====
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    // ===== 导入 / 传输错误 =====
    #[error("文件导入失败: {0}")]
    ImportError(String),

    #[error("文件传输失败: {0}")]
    TransportError(String),

    // ===== 通用错误 =====
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::ImportError(_) => "IMPORT_ERROR",
            ApiError::TransportError(_) => "TRANSPORT_ERROR",
            ApiError::InternalError(_) | ApiError::Other(_) => "INTERNAL_ERROR",
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseTransactionError(msg)
            | RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::InvalidInput(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::InvalidInput(format!("外键约束违反: {}", msg))
            }
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从 ImportError 转换
// ==========================================
impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::JobNotFound(id) => ApiError::NotFound(format!("ImportJob(id={})不存在", id)),
            ImportError::FormatUnsupported(_) => ApiError::InvalidInput(err.to_string()),
            ImportError::Repository(e) => e.into(),
            ImportError::Transport(e) => ApiError::TransportError(e.to_string()),
            ImportError::Storage(e) => ApiError::TransportError(e.to_string()),
            other => ApiError::ImportError(other.to_string()),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

/// 错误响应体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "请求处理失败");
        }
        let body = ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
