// ==========================================
// 医疗数据导入系统 - 传输层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 分层:
// - StorageError: 单次对象存储调用失败
// - TransportError: 整个传输失败（重试耗尽 / 初始化 / 完成 / 读源）
// ==========================================

use thiserror::Error;

/// 对象存储错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("对象不存在: {0}")]
    NotFound(String),

    #[error("对象存储请求失败 ({operation}): {message}")]
    Request {
        operation: &'static str,
        message: String,
    },

    #[error("分片上传无效: {0}")]
    InvalidUpload(String),
}

/// 上传传输错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("分片 {part_number} 上传失败（已尝试 {attempts} 次）: {message}")]
    PartFailed {
        part_number: i32,
        attempts: u32,
        message: String,
    },

    #[error("分片上传初始化失败: {0}")]
    InitiateFailed(#[source] StorageError),

    #[error("分片上传完成失败: {0}")]
    CompleteFailed(#[source] StorageError),

    #[error("读取上传源失败: {0}")]
    SourceRead(#[from] std::io::Error),

    #[error("上传源无效: {0}")]
    InvalidSource(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result 类型别名
pub type StorageResult<T> = Result<T, StorageError>;
pub type TransportResult<T> = Result<T, TransportError>;
