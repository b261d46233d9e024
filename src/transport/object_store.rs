// ==========================================
// 医疗数据导入系统 - 对象存储接口
// ==========================================
// 协议: Initiate → UploadPart* → Complete(按 part_number 排序) | Abort
// 实现者: S3ObjectStore / InMemoryObjectStore
// ==========================================

use crate::transport::error::StorageResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// 对象元数据（随 put / initiate 写入）
pub type ObjectMetadata = HashMap<String, String>;

/// 对象内容（按需拉取，不整体缓冲）
pub type ObjectBody = Pin<Box<dyn AsyncRead + Send>>;

/// 已上传分片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPart {
    pub part_number: i32, // 从 1 开始
    pub e_tag: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 单次上传
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> StorageResult<()>;

    /// 初始化分片上传，返回 upload_id
    async fn initiate_multipart(
        &self,
        key: &str,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> StorageResult<String>;

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> StorageResult<UploadPart>;

    /// 完成分片上传（parts 须已按 part_number 升序排列）
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadPart],
    ) -> StorageResult<()>;

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StorageResult<()>;

    /// 存在性探测（HEAD）
    async fn head_object(&self, key: &str) -> StorageResult<bool>;

    /// 打开对象内容流；对象不存在返回 NotFound
    async fn get_object(&self, key: &str) -> StorageResult<ObjectBody>;

    fn bucket(&self) -> &str;

    /// 由 bucket + key 确定的公开访问地址
    fn public_url(&self, key: &str) -> String;
}
