// ==========================================
// 医疗数据导入系统 - 分片上传传输
// ==========================================
// 流程:
//   size < 100MB → PutObject
//   否则 Initiate → 按并发度分批上传（每批全部完成后再发下一批，按完成顺序收集）
//        → 单分片重试（次数由 upload_part_max_attempts 配置，退避 base × 2^attempt）
//        → 任一分片失败: 尽力 Abort（失败只记日志）并返回 TransportError
//        → 全部成功: 按 part_number 排序后 Complete
// 进度: 单调不减，Complete 前封顶 95%
// ==========================================

use crate::config::PipelineConfigReader;
use crate::domain::types::{DataType, FileFormat};
use crate::repository::error::RepositoryResult;
use crate::transport::chunk_plan::{use_multipart, ChunkPlan, PartRange};
use crate::transport::error::{TransportError, TransportResult};
use crate::transport::object_store::{ObjectMetadata, ObjectStore, UploadPart};
use crate::transport::progress::ProgressTracker;
use crate::transport::upload_source::UploadSource;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

// ==========================================
// RetryPolicy
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,   // 含首次尝试
    pub base_delay: Duration, // 第 n 次失败后等待 base × 2^n
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// 尝试次数取自配置，退避基数保持默认
    pub async fn load(config: &dyn PipelineConfigReader) -> RepositoryResult<Self> {
        Ok(Self {
            max_attempts: config.get_upload_part_max_attempts().await?,
            ..Self::default()
        })
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

// ==========================================
// 请求 / 结果
// ==========================================
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub category: String, // 存储目录（如 "imports"）
    pub data_type: DataType,
    pub file_format: FileFormat,
    pub description: Option<String>,
    pub declared_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub storage_key: String,
    pub public_url: String,
    pub size: u64,
    pub multipart: bool,
    pub part_count: usize,
}

/// 存储键中只保留字母数字与 . - _
fn sanitize(segment: &str) -> String {
    let cleaned: String = segment
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

/// `{category}/{uuid}_{文件名}`
pub fn build_storage_key(category: &str, file_name: &str) -> String {
    format!(
        "{}/{}_{}",
        sanitize(category).to_lowercase(),
        Uuid::new_v4().simple(),
        sanitize(file_name)
    )
}

pub fn object_metadata(request: &UploadRequest) -> ObjectMetadata {
    let mut metadata = ObjectMetadata::new();
    metadata.insert("original-filename".to_string(), request.file_name.clone());
    metadata.insert("data-type".to_string(), request.data_type.as_str().to_string());
    metadata.insert("file-format".to_string(), request.file_format.as_str().to_string());
    metadata.insert(
        "description".to_string(),
        request.description.clone().unwrap_or_default(),
    );
    metadata.insert("upload-timestamp".to_string(), Utc::now().to_rfc3339());
    metadata.insert("file-size".to_string(), request.declared_size.to_string());
    metadata.insert(
        "content-type".to_string(),
        request.file_format.content_type().to_string(),
    );
    metadata
}

/// 分片按完成顺序收集，Complete 要求 part_number 升序
fn sort_for_complete(parts: &mut [UploadPart]) {
    parts.sort_by_key(|p| p.part_number);
}

// ==========================================
// ChunkedUploadTransport
// ==========================================
pub struct ChunkedUploadTransport {
    store: Arc<dyn ObjectStore>,
    retry: RetryPolicy,
    chunk_override: Option<(u64, usize)>, // (chunk_size, concurrency)，测试用
    multipart_threshold: Option<u64>,
}

impl ChunkedUploadTransport {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            chunk_override: None,
            multipart_threshold: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// 固定分片大小与并发度
    pub fn with_chunking(mut self, chunk_size: u64, concurrency: usize) -> Self {
        self.chunk_override = Some((chunk_size, concurrency));
        self
    }

    /// 覆盖分片上传阈值（测试用小文件走分片路径）
    pub fn with_multipart_threshold(mut self, threshold: u64) -> Self {
        self.multipart_threshold = Some(threshold);
        self
    }

    fn is_multipart(&self, size: u64) -> bool {
        match self.multipart_threshold {
            Some(threshold) => size >= threshold,
            None => use_multipart(size),
        }
    }

    fn plan_for(&self, size: u64) -> ChunkPlan {
        match self.chunk_override {
            Some((chunk_size, concurrency)) => ChunkPlan::with_chunk_size(size, chunk_size, concurrency),
            None => ChunkPlan::for_size(size),
        }
    }

    /// 上传文件到对象存储
    ///
    /// # 返回
    /// - Ok(UploadReceipt): 存储键、公开地址、分片信息
    /// - Err(TransportError): 传输失败（分片上传已尽力 Abort）
    #[instrument(skip(self, source, request, progress), fields(file = %request.file_name, size = request.declared_size))]
    pub async fn upload(
        &self,
        source: Arc<dyn UploadSource>,
        request: &UploadRequest,
        progress: &ProgressTracker,
    ) -> TransportResult<UploadReceipt> {
        if source.len() != request.declared_size {
            return Err(TransportError::InvalidSource(format!(
                "declared size {} does not match source length {}",
                request.declared_size,
                source.len()
            )));
        }

        let key = build_storage_key(&request.category, &request.file_name);
        let metadata = object_metadata(request);
        let content_type = request.file_format.content_type();

        if !self.is_multipart(request.declared_size) {
            let body = source.read_range(0, request.declared_size).await?;
            self.store
                .put_object(&key, body, content_type, &metadata)
                .await?;
            progress.add_bytes(request.declared_size);
            progress.finish();
            info!(storage_key = %key, "单次上传完成");
            return Ok(UploadReceipt {
                public_url: self.store.public_url(&key),
                storage_key: key,
                size: request.declared_size,
                multipart: false,
                part_count: 1,
            });
        }

        let plan = self.plan_for(request.declared_size);
        let upload_id = self
            .store
            .initiate_multipart(&key, content_type, &metadata)
            .await
            .map_err(TransportError::InitiateFailed)?;
        info!(
            storage_key = %key,
            parts = plan.part_count(),
            chunk_size = plan.chunk_size,
            concurrency = plan.concurrency,
            "分片上传已初始化"
        );

        let ranges = plan.parts();
        let mut completed: Vec<UploadPart> = Vec::with_capacity(ranges.len());

        for batch in ranges.chunks(plan.concurrency) {
            let mut in_flight: FuturesUnordered<_> = batch
                .iter()
                .map(|range| {
                    self.upload_part_with_retry(&key, &upload_id, source.as_ref(), *range, progress)
                })
                .collect();

            let mut first_error = None;
            while let Some(result) = in_flight.next().await {
                match result {
                    Ok(part) => completed.push(part),
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }

            if let Some(err) = first_error {
                self.abort_quietly(&key, &upload_id).await;
                return Err(err);
            }
        }

        sort_for_complete(&mut completed);

        if let Err(e) = self
            .store
            .complete_multipart(&key, &upload_id, &completed)
            .await
        {
            self.abort_quietly(&key, &upload_id).await;
            return Err(TransportError::CompleteFailed(e));
        }

        progress.finish();
        info!(storage_key = %key, parts = completed.len(), "分片上传完成");
        Ok(UploadReceipt {
            public_url: self.store.public_url(&key),
            storage_key: key,
            size: request.declared_size,
            multipart: true,
            part_count: completed.len(),
        })
    }

    async fn upload_part_with_retry(
        &self,
        key: &str,
        upload_id: &str,
        source: &dyn UploadSource,
        range: PartRange,
        progress: &ProgressTracker,
    ) -> TransportResult<UploadPart> {
        let body = source.read_range(range.offset, range.len).await?;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self
                .store
                .upload_part(key, upload_id, range.part_number, body.clone())
                .await
            {
                Ok(part) => {
                    progress.add_bytes(range.len);
                    debug!(part_number = range.part_number, attempt, "分片上传成功");
                    return Ok(part);
                }
                Err(e) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        part_number = range.part_number,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "分片上传失败，准备重试"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(TransportError::PartFailed {
                        part_number: range.part_number,
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    /// 尽力 Abort；失败只记录日志
    async fn abort_quietly(&self, key: &str, upload_id: &str) {
        match self.store.abort_multipart(key, upload_id).await {
            Ok(()) => info!(storage_key = %key, "分片上传已中止"),
            Err(e) => warn!(storage_key = %key, error = %e, "分片上传中止失败（忽略）"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn test_parts_sorted_for_complete() {
        let part = |n: i32| UploadPart {
            part_number: n,
            e_tag: format!("\"etag-{}\"", n),
        };
        let mut parts = vec![part(3), part(1), part(4), part(2)];
        sort_for_complete(&mut parts);
        let numbers: Vec<i32> = parts.iter().map(|p| p.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_retry_policy_from_config() {
        use crate::config::{config_keys, ConfigManager};
        use crate::db::ensure_schema;
        use rusqlite::Connection;
        use std::sync::Mutex;

        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        let config = ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap();
        assert_eq!(RetryPolicy::load(&config).await.unwrap(), RetryPolicy::default());

        config
            .set_global_config_value(config_keys::UPLOAD_PART_MAX_ATTEMPTS, "5")
            .unwrap();
        let policy = RetryPolicy::load(&config).await.unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_storage_key_layout() {
        let key = build_storage_key("Imports", "hospitais 2024 (SP).csv");
        let (category, rest) = key.split_once('/').unwrap();
        assert_eq!(category, "imports");
        let (uuid, name) = rest.split_once('_').unwrap();
        assert_eq!(uuid.len(), 32);
        assert_eq!(name, "hospitais_2024__SP_.csv");
    }

    #[test]
    fn test_metadata_fields() {
        let request = UploadRequest {
            file_name: "medicos.csv".to_string(),
            category: "imports".to_string(),
            data_type: DataType::Doctor,
            file_format: FileFormat::Csv,
            description: None,
            declared_size: 42,
        };
        let metadata = object_metadata(&request);
        assert_eq!(metadata["original-filename"], "medicos.csv");
        assert_eq!(metadata["data-type"], "DOCTOR");
        assert_eq!(metadata["file-size"], "42");
        assert_eq!(metadata["content-type"], "text/csv");
        assert!(metadata.contains_key("upload-timestamp"));
    }
}
