// ==========================================
// 医疗数据导入系统 - 核心库
// ==========================================
// 流程: 文件上传（分片）→ 就绪探测 → 格式读取 → 字段映射入库 → 专科地理分配
// 技术栈: tokio + axum + rusqlite + S3
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 专科地理分配
pub mod engine;

// 导入层 - 格式读取与字段映射
pub mod importer;

// 传输层 - 对象存储与分片上传
pub mod transport;

// 服务层 - 提交与就绪探测
pub mod services;

// 配置层 - 运行配置与可调参数
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 状态组装与 HTTP
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{AllocationStatus, DataType, FileFormat, ImportStatus, Region};

// 领域实体
pub use domain::{Doctor, Hospital, ImportJob, LineError, Municipality, Patient, State};

// 引擎
pub use engine::{AllocationReport, SpecialtyGeoAllocator};

// 导入
pub use importer::{FieldMappingEngine, FormatReaderFactory, ImportProcessor};

// 传输
pub use transport::{ChunkedUploadTransport, InMemoryObjectStore, ObjectStore, S3ObjectStore};

// 服务
pub use services::{ImportService, ReadinessGate};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "医疗数据导入与分配系统";
