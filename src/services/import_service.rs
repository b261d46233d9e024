// ==========================================
// 医疗数据导入系统 - 导入提交服务
// ==========================================
// 职责:
// - 提交: 创建 ImportJob(PENDING) + FieldMapping，投递到就绪探测门
// - 上传并提交: 文件 → ChunkedUploadTransport → 提交
// - 查询: 任务、任务列表、行级错误
// ==========================================

use crate::domain::import::{FieldMapping, ImportJob, LineError};
use crate::domain::types::{DataType, FileFormat};
use crate::importer::error::{ImportError, ImportResult};
use crate::repository::{ImportJobRepository, LineErrorRepository};
use crate::services::readiness_gate::{ImportQueue, ImportRequest};
use crate::transport::chunked_upload::{ChunkedUploadTransport, UploadReceipt, UploadRequest};
use crate::transport::object_store::ObjectStore;
use crate::transport::progress::ProgressTracker;
use crate::transport::upload_source::UploadSource;
use std::sync::Arc;
use tracing::{info, instrument};
use url::Url;

/// 提交参数（存储定位已解析为对象键）
#[derive(Debug, Clone)]
pub struct SubmitImport {
    pub data_type: DataType,
    pub file_format: FileFormat,
    pub file_name: String,
    pub storage_key: String,
    pub field_mappings: Vec<FieldMapping>,
}

pub struct ImportService {
    job_repo: Arc<ImportJobRepository>,
    line_error_repo: Arc<LineErrorRepository>,
    store: Arc<dyn ObjectStore>,
    queue: ImportQueue,
}

impl ImportService {
    pub fn new(
        job_repo: Arc<ImportJobRepository>,
        line_error_repo: Arc<LineErrorRepository>,
        store: Arc<dyn ObjectStore>,
        queue: ImportQueue,
    ) -> Self {
        Self {
            job_repo,
            line_error_repo,
            store,
            queue,
        }
    }

    /// 创建任务并投递就绪探测
    #[instrument(skip(self, submit), fields(file = %submit.file_name, data_type = %submit.data_type))]
    pub fn submit(&self, submit: SubmitImport) -> ImportResult<ImportJob> {
        let job = ImportJob::new(
            submit.data_type,
            submit.file_format,
            submit.file_name,
            submit.storage_key,
        );
        self.job_repo
            .insert_job_with_mappings(&job, &submit.field_mappings)?;
        self.queue
            .publish(ImportRequest::new(job.job_id.clone(), job.storage_key.clone()))?;

        info!(
            job_id = %job.job_id,
            storage_key = %job.storage_key,
            mappings = submit.field_mappings.len(),
            "导入任务已提交"
        );
        Ok(job)
    }

    /// 上传文件后提交导入
    pub async fn upload_and_submit(
        &self,
        transport: &ChunkedUploadTransport,
        source: Arc<dyn UploadSource>,
        request: &UploadRequest,
        field_mappings: Vec<FieldMapping>,
        progress: &ProgressTracker,
    ) -> ImportResult<(UploadReceipt, ImportJob)> {
        let receipt = transport.upload(source, request, progress).await?;

        let job = self.submit(SubmitImport {
            data_type: request.data_type,
            file_format: request.file_format,
            file_name: request.file_name.clone(),
            storage_key: receipt.storage_key.clone(),
            field_mappings,
        })?;
        Ok((receipt, job))
    }

    pub fn get_job(&self, job_id: &str) -> ImportResult<ImportJob> {
        self.job_repo
            .find_by_id(job_id)?
            .ok_or_else(|| ImportError::JobNotFound(job_id.to_string()))
    }

    pub fn list_jobs(&self, limit: usize) -> ImportResult<Vec<ImportJob>> {
        Ok(self.job_repo.list_jobs(limit)?)
    }

    pub fn list_field_mappings(&self, job_id: &str) -> ImportResult<Vec<FieldMapping>> {
        Ok(self.job_repo.list_field_mappings(job_id)?)
    }

    /// 行级错误（按行号排序）与总数
    pub fn list_line_errors(
        &self,
        job_id: &str,
        limit: usize,
        offset: usize,
    ) -> ImportResult<(Vec<LineError>, i64)> {
        // 先确认任务存在
        self.get_job(job_id)?;
        let errors = self.line_error_repo.list_by_job(job_id, limit, offset)?;
        let total = self.line_error_repo.count_by_job(job_id)?;
        Ok((errors, total))
    }

    /// 存储定位（对象键 / 公开地址 / 预签名 URL）→ 对象键
    pub fn resolve_storage_key(&self, locator: &str) -> String {
        resolve_storage_key(self.store.as_ref(), locator)
    }
}

/// 存储定位解析
///
/// - 公开地址前缀（与 ObjectStore::public_url 一致）直接剥离
/// - 其他 URL 取路径部分（去掉查询串）；path-style 地址再去掉首段 bucket
/// - URL 中的键做百分号解码
/// - 非 URL 视为对象键（原样保留）
pub fn resolve_storage_key(store: &dyn ObjectStore, locator: &str) -> String {
    let locator = locator.trim();

    let prefix = store.public_url("");
    if let Some(rest) = locator.strip_prefix(prefix.as_str()) {
        let key = rest.split(['?', '#']).next().unwrap_or(rest);
        return decode_key(key.trim_start_matches('/'));
    }

    match Url::parse(locator) {
        Ok(url) if url.has_host() => {
            let host = url.host_str().unwrap_or_default();
            let path = url.path().trim_start_matches('/');
            let key = match path.split_once('/') {
                Some((first, rest)) if names_bucket_in_path(host, first, store.bucket()) => rest,
                _ => path,
            };
            decode_key(key)
        }
        _ => {
            let without_query = locator.split(['?', '#']).next().unwrap_or(locator);
            without_query.trim_start_matches('/').to_string()
        }
    }
}

/// path-style 地址: 路径首段是 bucket
///
/// - s3.amazonaws.com / s3.<region>.amazonaws.com / s3-<region>.amazonaws.com
/// - 自定义端点（MinIO 等）: 首段等于存储 bucket
/// - virtual-hosted（<bucket>.s3...）: 首段属于键
fn names_bucket_in_path(host: &str, first_segment: &str, bucket: &str) -> bool {
    if host
        .strip_prefix(bucket)
        .is_some_and(|rest| rest.starts_with('.'))
    {
        return false;
    }
    let aws_path_style = host.ends_with(".amazonaws.com")
        && (host.starts_with("s3.") || host.starts_with("s3-"));
    aws_path_style || decode_key(first_segment) == bucket
}

fn decode_key(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory_store::InMemoryObjectStore;

    #[test]
    fn test_resolve_storage_key_variants() {
        let store = InMemoryObjectStore::new("saude");
        assert_eq!(
            resolve_storage_key(&store, "memory://saude/imports/abc_medicos.csv"),
            "imports/abc_medicos.csv"
        );
        assert_eq!(
            resolve_storage_key(
                &store,
                "https://saude.s3.sa-east-1.amazonaws.com/imports/abc.csv?X-Amz-Signature=1"
            ),
            "imports/abc.csv"
        );
        assert_eq!(resolve_storage_key(&store, "/imports/x.xml"), "imports/x.xml");
        assert_eq!(resolve_storage_key(&store, "imports/x.xml"), "imports/x.xml");
    }

    #[test]
    fn test_resolve_path_style_and_encoded_keys() {
        let store = InMemoryObjectStore::new("saude");
        assert_eq!(
            resolve_storage_key(
                &store,
                "https://s3.sa-east-1.amazonaws.com/saude/imports/abc_hospitais%202024.csv?X-Amz-Expires=900"
            ),
            "imports/abc_hospitais 2024.csv"
        );
        assert_eq!(
            resolve_storage_key(&store, "https://s3.amazonaws.com/outro-bucket/imports/a.csv"),
            "imports/a.csv"
        );
        // 自定义端点（path-style）
        assert_eq!(
            resolve_storage_key(&store, "http://localhost:9000/saude/imports/S%C3%A3o%20Paulo.xml"),
            "imports/São Paulo.xml"
        );
        // virtual-hosted: 首段与 bucket 同名时仍属于键
        assert_eq!(
            resolve_storage_key(&store, "https://saude.s3.amazonaws.com/saude/a.csv"),
            "saude/a.csv"
        );
        assert_eq!(
            resolve_storage_key(&store, "memory://saude/imports/m%C3%A9dicos.csv"),
            "imports/médicos.csv"
        );
        // 非 URL 的对象键原样保留
        assert_eq!(resolve_storage_key(&store, "imports/100%.csv"), "imports/100%.csv");
    }
}
