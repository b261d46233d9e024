// ==========================================
// 医疗数据导入系统 - 配置层
// ==========================================
// 职责:
// - 进程级配置: 环境变量注入（数据库、监听地址、对象存储凭证）
// - 运行期参数: config_kv 表（就绪探测、分配半径、分片重试）
// ==========================================

pub mod app_config;
pub mod config_manager;
pub mod pipeline_config_trait;

// 重导出核心配置类型
pub use app_config::{get_default_db_path, AppConfig, S3Settings, StorageBackend};
pub use config_manager::{config_keys, defaults, ConfigManager};
pub use pipeline_config_trait::PipelineConfigReader;
