// ==========================================
// 医疗数据导入系统 - 内存对象存储
// ==========================================
// 用途: 本地运行 / 测试
// 故障注入:
// - fail_part: 指定分片前 N 次上传失败
// - delay_part: 指定分片上传延迟完成（打乱分片完成顺序）
// - hide_for_probes: 对象在前 N 次 HEAD 探测中不可见（模拟最终一致性）
// - fail_abort: abort 调用返回错误
// ==========================================

use crate::transport::error::{StorageError, StorageResult};
use crate::transport::object_store::{ObjectBody, ObjectMetadata, ObjectStore, UploadPart};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub metadata: ObjectMetadata,
}

struct PendingUpload {
    key: String,
    content_type: String,
    metadata: ObjectMetadata,
    parts: HashMap<i32, (String, Vec<u8>)>, // part_number → (etag, bytes)
}

#[derive(Default)]
struct MemoryState {
    objects: HashMap<String, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    part_faults: HashMap<i32, u32>,
    part_delays: HashMap<i32, Duration>,
    part_attempts: HashMap<i32, u32>,
    hidden_probes: HashMap<String, u32>,
    head_probes: HashMap<String, u32>,
    fail_abort: bool,
    aborted: Vec<String>,
}

pub struct InMemoryObjectStore {
    bucket: String,
    state: Mutex<MemoryState>,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new("local")
    }
}

impl InMemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    // ===== 故障注入 =====

    /// 分片 part_number 的前 times 次上传失败（u32::MAX 表示始终失败）
    pub async fn fail_part(&self, part_number: i32, times: u32) {
        self.state.lock().await.part_faults.insert(part_number, times);
    }

    /// 分片 part_number 的每次上传延迟 delay 后才返回
    pub async fn delay_part(&self, part_number: i32, delay: Duration) {
        self.state.lock().await.part_delays.insert(part_number, delay);
    }

    /// 对象在接下来 probes 次 HEAD 中不可见
    pub async fn hide_for_probes(&self, key: &str, probes: u32) {
        self.state.lock().await.hidden_probes.insert(key.to_string(), probes);
    }

    pub async fn fail_abort(&self, fail: bool) {
        self.state.lock().await.fail_abort = fail;
    }

    // ===== 检查 =====

    pub async fn insert_object(&self, key: &str, bytes: Vec<u8>) {
        self.state.lock().await.objects.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: "application/octet-stream".to_string(),
                metadata: ObjectMetadata::new(),
            },
        );
    }

    pub async fn object(&self, key: &str) -> Option<StoredObject> {
        self.state.lock().await.objects.get(key).cloned()
    }

    pub async fn part_attempts(&self, part_number: i32) -> u32 {
        self.state
            .lock()
            .await
            .part_attempts
            .get(&part_number)
            .copied()
            .unwrap_or(0)
    }

    pub async fn head_probes(&self, key: &str) -> u32 {
        self.state.lock().await.head_probes.get(key).copied().unwrap_or(0)
    }

    pub async fn aborted_uploads(&self) -> Vec<String> {
        self.state.lock().await.aborted.clone()
    }

    pub async fn pending_uploads(&self) -> usize {
        self.state.lock().await.uploads.len()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> StorageResult<()> {
        self.state.lock().await.objects.insert(
            key.to_string(),
            StoredObject {
                bytes: body,
                content_type: content_type.to_string(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn initiate_multipart(
        &self,
        key: &str,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> StorageResult<String> {
        let upload_id = Uuid::new_v4().simple().to_string();
        self.state.lock().await.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                content_type: content_type.to_string(),
                metadata: metadata.clone(),
                parts: HashMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> StorageResult<UploadPart> {
        let delay = self.state.lock().await.part_delays.get(&part_number).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        *state.part_attempts.entry(part_number).or_insert(0) += 1;

        if let Some(remaining) = state.part_faults.get_mut(&part_number) {
            if *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return Err(StorageError::Request {
                    operation: "UploadPart",
                    message: format!("injected failure for part {}", part_number),
                });
            }
        }

        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| StorageError::InvalidUpload(format!("unknown upload id {}", upload_id)))?;

        let e_tag = format!("\"{}\"", Uuid::new_v4().simple());
        upload.parts.insert(part_number, (e_tag.clone(), body));
        Ok(UploadPart { part_number, e_tag })
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[UploadPart],
    ) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        let upload = state
            .uploads
            .remove(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| StorageError::InvalidUpload(format!("unknown upload id {}", upload_id)))?;

        if parts.is_empty() {
            return Err(StorageError::InvalidUpload("no parts to complete".to_string()));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(StorageError::InvalidUpload(
                "parts must be sorted by part number".to_string(),
            ));
        }

        let mut bytes = Vec::new();
        for part in parts {
            match upload.parts.get(&part.part_number) {
                Some((e_tag, body)) if *e_tag == part.e_tag => bytes.extend_from_slice(body),
                _ => {
                    return Err(StorageError::InvalidUpload(format!(
                        "part {} missing or etag mismatch",
                        part.part_number
                    )))
                }
            }
        }

        state.objects.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: upload.content_type,
                metadata: upload.metadata,
            },
        );
        Ok(())
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> StorageResult<()> {
        let mut state = self.state.lock().await;
        if state.fail_abort {
            return Err(StorageError::Request {
                operation: "AbortMultipartUpload",
                message: "injected abort failure".to_string(),
            });
        }
        state.uploads.remove(upload_id);
        state.aborted.push(key.to_string());
        Ok(())
    }

    async fn head_object(&self, key: &str) -> StorageResult<bool> {
        let mut state = self.state.lock().await;
        *state.head_probes.entry(key.to_string()).or_insert(0) += 1;

        if let Some(remaining) = state.hidden_probes.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(false);
            }
        }
        Ok(state.objects.contains_key(key))
    }

    async fn get_object(&self, key: &str) -> StorageResult<ObjectBody> {
        let bytes = self
            .state
            .lock()
            .await
            .objects
            .get(key)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(Box::pin(std::io::Cursor::new(bytes)))
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn public_url(&self, key: &str) -> String {
        format!("memory://{}/{}", self.bucket, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_get_object_streams_content() {
        let store = InMemoryObjectStore::default();
        store.insert_object("imports/a.csv", b"a,b\n1,2\n".to_vec()).await;

        let mut body = store.get_object("imports/a.csv").await.unwrap();
        let mut text = String::new();
        body.read_to_string(&mut text).await.unwrap();
        assert_eq!(text, "a,b\n1,2\n");

        let err = store.get_object("imports/missing.csv").await.err().unwrap();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_complete_rejects_unsorted_parts() {
        let store = InMemoryObjectStore::default();
        let id = store
            .initiate_multipart("k", "text/csv", &ObjectMetadata::new())
            .await
            .unwrap();
        let p1 = store.upload_part("k", &id, 1, b"ab".to_vec()).await.unwrap();
        let p2 = store.upload_part("k", &id, 2, b"cd".to_vec()).await.unwrap();

        let err = store
            .complete_multipart("k", &id, &[p2, p1])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidUpload(_)));
    }

    #[tokio::test]
    async fn test_hidden_object_becomes_visible() {
        let store = InMemoryObjectStore::default();
        store.insert_object("imports/a.csv", b"x".to_vec()).await;
        store.hide_for_probes("imports/a.csv", 2).await;

        assert!(!store.head_object("imports/a.csv").await.unwrap());
        assert!(!store.head_object("imports/a.csv").await.unwrap());
        assert!(store.head_object("imports/a.csv").await.unwrap());
        assert_eq!(store.head_probes("imports/a.csv").await, 3);
    }

    #[tokio::test]
    async fn test_injected_part_failure_counts_attempts() {
        let store = InMemoryObjectStore::default();
        let id = store
            .initiate_multipart("k", "text/csv", &ObjectMetadata::new())
            .await
            .unwrap();
        store.fail_part(1, 1).await;

        assert!(store.upload_part("k", &id, 1, b"a".to_vec()).await.is_err());
        assert!(store.upload_part("k", &id, 1, b"a".to_vec()).await.is_ok());
        assert_eq!(store.part_attempts(1).await, 2);
    }
}
