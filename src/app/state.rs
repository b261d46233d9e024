// ==========================================
// 医疗数据导入系统 - 应用状态
// ==========================================
// 职责: 组装 Repository / 对象存储 / 导入流水线 / 分配器 / API 实例
// 说明: 就绪探测门在此启动（需在 tokio 运行时内调用）
// ==========================================

use std::sync::Arc;

use crate::api::{AllocationApi, ImportApi};
use crate::config::{AppConfig, ConfigManager, PipelineConfigReader, StorageBackend};
use crate::db::open_shared_connection;
use crate::engine::SpecialtyGeoAllocator;
use crate::importer::{FormatReaderFactory, ImportProcessor};
use crate::repository::{
    AllocationRepository, Cid10Repository, ImportJobRepository, LineErrorRepository,
    MasterDataRepository,
};
use crate::services::{ImportService, ReadinessGate, ReadinessSettings};
use crate::transport::{
    ChunkedUploadTransport, InMemoryObjectStore, ObjectStore, RetryPolicy, S3ObjectStore,
};

/// 应用状态
///
/// 所有字段均为 Arc，克隆廉价，可直接作为 axum 的 State
#[derive(Clone)]
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 对象存储（S3 或内存）
    pub store: Arc<dyn ObjectStore>,

    /// 导入任务API
    pub import_api: Arc<ImportApi>,

    /// 患者分配API
    pub allocation_api: Arc<AllocationApi>,

    /// 导入服务（上传 + 提交）
    pub import_service: Arc<ImportService>,

    /// 上传传输（分片重试次数取自配置）
    pub upload_transport: Arc<ChunkedUploadTransport>,

    /// 导入处理器（由就绪探测门派发）
    pub import_processor: Arc<ImportProcessor>,

    /// 就绪探测门
    pub readiness_gate: Arc<ReadinessGate>,

    /// 专科地理分配器
    pub allocator: Arc<SpecialtyGeoAllocator>,

    /// 配置管理器
    pub config_manager: Arc<ConfigManager>,

    /// 主数据仓储
    pub master_repo: Arc<MasterDataRepository>,

    /// 分配关系仓储
    pub allocation_repo: Arc<AllocationRepository>,
}

impl AppState {
    /// 按运行配置创建AppState（选择存储后端）
    pub async fn new(config: &AppConfig) -> Result<Self, String> {
        let store: Arc<dyn ObjectStore> = match &config.storage {
            StorageBackend::Memory => {
                tracing::warn!("使用内存对象存储，进程退出后上传文件将丢失");
                Arc::new(InMemoryObjectStore::default())
            }
            StorageBackend::S3(settings) => {
                tracing::info!(bucket = %settings.bucket, "使用 S3 对象存储");
                Arc::new(S3ObjectStore::new(settings).await)
            }
        };
        Self::with_store(&config.db_path, store).await
    }

    /// 使用给定对象存储创建AppState
    ///
    /// # 说明
    /// 该方法会：
    /// 1. 打开共享连接并建表
    /// 2. 写入 CID-10 → 专科初始映射（幂等）
    /// 3. 读取就绪探测配置并启动探测门
    /// 4. 创建所有API实例
    pub async fn with_store(db_path: &str, store: Arc<dyn ObjectStore>) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = open_shared_connection(db_path).map_err(|e| format!("无法打开数据库: {}", e))?;

        // ==========================================
        // 初始化Repository层
        // ==========================================
        let job_repo = Arc::new(ImportJobRepository::new(conn.clone()));
        let line_error_repo = Arc::new(LineErrorRepository::new(conn.clone()));
        let master_repo = Arc::new(MasterDataRepository::new(conn.clone()));
        let cid10_repo = Arc::new(Cid10Repository::new(conn.clone()));
        let allocation_repo = Arc::new(AllocationRepository::new(conn.clone()));

        match cid10_repo.seed_default_cid10_specialties() {
            Ok(0) => {}
            Ok(n) => tracing::info!(inserted = n, "CID-10 专科映射已初始化"),
            Err(e) => tracing::warn!("CID-10 专科映射初始化失败(将继续启动): {}", e),
        }

        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );

        // ==========================================
        // 导入流水线: 提交 → 就绪探测 → 处理
        // ==========================================
        let import_processor = Arc::new(ImportProcessor::new(
            job_repo.clone(),
            line_error_repo.clone(),
            store.clone(),
            FormatReaderFactory::with_default_readers(),
        ));

        let settings = ReadinessSettings::load(config_manager.as_ref())
            .await
            .map_err(|e| format!("无法读取就绪探测配置: {}", e))?;
        let (readiness_gate, receiver) =
            ReadinessGate::new(store.clone(), import_processor.clone(), settings);
        readiness_gate.clone().spawn(receiver);

        let retry = RetryPolicy::load(config_manager.as_ref())
            .await
            .map_err(|e| format!("无法读取上传重试配置: {}", e))?;
        let upload_transport =
            Arc::new(ChunkedUploadTransport::new(store.clone()).with_retry_policy(retry));

        let import_service = Arc::new(ImportService::new(
            job_repo,
            line_error_repo,
            store.clone(),
            readiness_gate.queue(),
        ));

        // ==========================================
        // 分配器
        // ==========================================
        let pipeline_config: Arc<dyn PipelineConfigReader> = config_manager.clone();
        let allocator = Arc::new(SpecialtyGeoAllocator::new(
            master_repo.clone(),
            allocation_repo.clone(),
            cid10_repo,
            pipeline_config,
        ));

        // ==========================================
        // 初始化API层
        // ==========================================
        let import_api = Arc::new(ImportApi::new(import_service.clone()));
        let allocation_api = Arc::new(AllocationApi::new(
            allocation_repo.clone(),
            allocator.clone(),
        ));

        tracing::info!("AppState初始化完成");

        Ok(Self {
            db_path: db_path.to_string(),
            store,
            import_api,
            allocation_api,
            import_service,
            upload_transport,
            import_processor,
            readiness_gate,
            allocator,
            config_manager,
            master_repo,
            allocation_repo,
        })
    }
}
