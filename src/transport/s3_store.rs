// ==========================================
// 医疗数据导入系统 - S3 对象存储
// ==========================================
// 凭证: 由 S3Settings 注入；未提供时走 AWS 默认凭证链
// 端点: 配置 endpoint 时强制 path-style（兼容 MinIO 等 S3 兼容存储）
// ==========================================

use crate::config::app_config::S3Settings;
use crate::transport::error::{StorageError, StorageResult};
use crate::transport::object_store::{ObjectBody, ObjectMetadata, ObjectStore, UploadPart};
use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use tracing::info;

fn request_error<E: std::error::Error>(operation: &'static str, err: E) -> StorageError {
    StorageError::Request {
        operation,
        message: DisplayErrorContext(err).to_string(),
    }
}

pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    public_base: String,
}

impl S3ObjectStore {
    pub async fn new(settings: &S3Settings) -> Self {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(ref r) = settings.region {
            config_loader = config_loader.region(Region::new(r.clone()));
        }
        if let Some(ref ep) = settings.endpoint {
            config_loader = config_loader.endpoint_url(ep);
        }
        if let (Some(access_key), Some(secret_key)) = (&settings.access_key, &settings.secret_key) {
            config_loader = config_loader.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "health-ingest-config",
            ));
        }
        let sdk_config = config_loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(settings.endpoint.is_some())
            .build();
        let client = aws_sdk_s3::Client::from_conf(s3_config);

        let public_base = match (&settings.endpoint, &settings.region) {
            (Some(ep), _) => format!("{}/{}", ep.trim_end_matches('/'), settings.bucket),
            (None, Some(region)) => format!("https://{}.s3.{}.amazonaws.com", settings.bucket, region),
            (None, None) => format!("https://{}.s3.amazonaws.com", settings.bucket),
        };

        // 凭证不写日志
        info!(bucket = %settings.bucket, endpoint = ?settings.endpoint, "S3 对象存储已初始化");
        Self {
            client,
            bucket: settings.bucket.clone(),
            public_base,
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .set_metadata(Some(metadata.clone()))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| request_error("PutObject", e))?;
        Ok(())
    }

    async fn initiate_multipart(
        &self,
        key: &str,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> StorageResult<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .set_metadata(Some(metadata.clone()))
            .send()
            .await
            .map_err(|e| request_error("CreateMultipartUpload", e))?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StorageError::InvalidUpload("响应缺少 upload_id".to_string()))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> StorageResult<UploadPart> {
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| request_error("UploadPart", e))?;

        let e_tag = output
            .e_tag()
            .map(str::to_string)
            .ok_or_else(|| StorageError::InvalidUpload(format!("分片 {} 响应缺少 ETag", part_number)))?;
        Ok(UploadPart { part_number, e_tag })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadPart],
    ) -> StorageResult<()> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|p| {
                        CompletedPart::builder()
                            .part_number(p.part_number)
                            .e_tag(&p.e_tag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| request_error("CompleteMultipartUpload", e))?;
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StorageResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| request_error("AbortMultipartUpload", e))?;
        Ok(())
    }

    async fn head_object(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(request_error("HeadObject", service_err))
                }
            }
        }
    }

    async fn get_object(&self, key: &str) -> StorageResult<ObjectBody> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    StorageError::NotFound(key.to_string())
                } else {
                    request_error("GetObject", service_err)
                }
            })?;

        // 响应体按分块拉取，由调用方边读边解析
        Ok(Box::pin(output.body.into_async_read()))
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }
}
