// ==========================================
// 医疗数据导入系统 - 流水线配置读取 Trait
// ==========================================
// 职责: 定义传输/就绪探测/分配器所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use crate::repository::error::RepositoryResult;
use async_trait::async_trait;
use std::time::Duration;

// ==========================================
// PipelineConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait PipelineConfigReader: Send + Sync {
    // ===== 就绪探测 =====

    /// 对象不可见时的重投递间隔
    ///
    /// # 默认值
    /// - 30 秒
    async fn get_readiness_retry_delay(&self) -> RepositoryResult<Duration>;

    /// 最大探测次数
    ///
    /// # 默认值
    /// - 0（不限次数）
    async fn get_readiness_max_attempts(&self) -> RepositoryResult<u32>;

    // ===== 分配器 =====

    /// 医生分配半径（km）
    ///
    /// # 默认值
    /// - 30.0
    async fn get_doctor_radius_km(&self) -> RepositoryResult<f64>;

    /// 每名医生最多关联医院数
    ///
    /// # 默认值
    /// - 3
    async fn get_doctor_max_hospitals(&self) -> RepositoryResult<usize>;

    /// 患者分配半径（km）
    ///
    /// # 默认值
    /// - 30.0
    async fn get_patient_radius_km(&self) -> RepositoryResult<f64>;

    // ===== 上传 =====

    /// 单分片最大尝试次数（含首次）
    ///
    /// # 默认值
    /// - 3
    async fn get_upload_part_max_attempts(&self) -> RepositoryResult<u32>;
}
