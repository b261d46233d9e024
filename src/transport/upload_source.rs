// ==========================================
// 医疗数据导入系统 - 上传源
// ==========================================
// 职责: 按字节区间读取待上传内容（分片可并发读取）
// 实现者: FileSource（磁盘文件）/ MemorySource（内存字节）
// ==========================================

use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

#[async_trait]
pub trait UploadSource: Send + Sync {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn read_range(&self, offset: u64, len: u64) -> std::io::Result<Vec<u8>>;
}

// ==========================================
// FileSource
// ==========================================
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let len = tokio::fs::metadata(&path).await?.len();
        Ok(Self { path, len })
    }
}

#[async_trait]
impl UploadSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_range(&self, offset: u64, len: u64) -> std::io::Result<Vec<u8>> {
        // 每次读取独立打开句柄，并发分片互不影响读位置
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

// ==========================================
// MemorySource
// ==========================================
#[derive(Clone)]
pub struct MemorySource {
    bytes: Arc<Vec<u8>>,
}

impl MemorySource {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
        }
    }
}

#[async_trait]
impl UploadSource for MemorySource {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    async fn read_range(&self, offset: u64, len: u64) -> std::io::Result<Vec<u8>> {
        let start = offset as usize;
        let end = start.saturating_add(len as usize);
        self.bytes
            .get(start..end)
            .map(|slice| slice.to_vec())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("range {}..{} beyond source length {}", start, end, self.bytes.len()),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_file_source_reads_ranges() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"0123456789").unwrap();
        temp_file.flush().unwrap();

        let source = FileSource::open(temp_file.path()).await.unwrap();
        assert_eq!(source.len(), 10);
        assert_eq!(source.read_range(3, 4).await.unwrap(), b"3456");
        assert_eq!(source.read_range(8, 2).await.unwrap(), b"89");
        assert!(source.read_range(8, 5).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_source_out_of_range() {
        let source = MemorySource::new(b"abc".to_vec());
        assert_eq!(source.read_range(1, 2).await.unwrap(), b"bc");
        assert!(source.read_range(2, 2).await.is_err());
    }
}
