// ==========================================
// 医疗数据导入系统 - 传输层
// ==========================================
// 职责: 文件 → 对象存储（单次 / 分片），对象存储访问接口
// ==========================================

pub mod chunk_plan;
pub mod chunked_upload;
pub mod error;
pub mod memory_store;
pub mod object_store;
pub mod progress;
pub mod s3_store;
pub mod upload_source;

// 重导出核心类型
pub use chunk_plan::{chunk_size_for, concurrency_for, use_multipart, ChunkPlan, PartRange};
pub use chunked_upload::{ChunkedUploadTransport, RetryPolicy, UploadReceipt, UploadRequest};
pub use error::{StorageError, StorageResult, TransportError, TransportResult};
pub use memory_store::InMemoryObjectStore;
pub use object_store::{ObjectBody, ObjectMetadata, ObjectStore, UploadPart};
pub use progress::ProgressTracker;
pub use s3_store::S3ObjectStore;
pub use upload_source::{FileSource, MemorySource, UploadSource};
