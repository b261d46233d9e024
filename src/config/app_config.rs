// ==========================================
// 医疗数据导入系统 - 进程级配置（环境变量）
// ==========================================
// 职责: 数据库路径、监听地址、对象存储后端与凭证
// 红线: 凭证只来自注入配置，不写入代码、不写日志
// ==========================================

use std::path::PathBuf;

pub mod env_keys {
    pub const DB_PATH: &str = "HEALTH_INGEST_DB_PATH";
    pub const BIND: &str = "HEALTH_INGEST_BIND";
    pub const STORAGE_BACKEND: &str = "HEALTH_INGEST_STORAGE_BACKEND";
    pub const S3_BUCKET: &str = "HEALTH_INGEST_S3_BUCKET";
    pub const S3_REGION: &str = "HEALTH_INGEST_S3_REGION";
    pub const S3_ENDPOINT: &str = "HEALTH_INGEST_S3_ENDPOINT";
    pub const S3_ACCESS_KEY: &str = "HEALTH_INGEST_S3_ACCESS_KEY";
    pub const S3_SECRET_KEY: &str = "HEALTH_INGEST_S3_SECRET_KEY";
}

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_BUCKET: &str = "health-ingest";

/// S3 连接参数
#[derive(Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub bucket: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

// 手写 Debug: 隐藏密钥
impl std::fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Settings")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key.as_ref().map(|_| "***"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    S3(S3Settings),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub db_path: String,
    pub bind_addr: String,
    pub storage: StorageBackend,
}

impl AppConfig {
    /// 从进程环境变量加载
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从任意键值来源加载（测试可注入）
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let db_path = get(env_keys::DB_PATH).unwrap_or_else(get_default_db_path);
        let bind_addr = get(env_keys::BIND).unwrap_or_else(|| DEFAULT_BIND.to_string());

        let backend = get(env_keys::STORAGE_BACKEND).unwrap_or_else(|| "memory".to_string());
        let storage = match backend.to_lowercase().as_str() {
            "memory" => StorageBackend::Memory,
            "s3" => {
                let access_key = get(env_keys::S3_ACCESS_KEY);
                let secret_key = get(env_keys::S3_SECRET_KEY);
                if access_key.is_some() != secret_key.is_some() {
                    return Err(format!(
                        "{} 与 {} 必须同时配置",
                        env_keys::S3_ACCESS_KEY,
                        env_keys::S3_SECRET_KEY
                    ));
                }
                StorageBackend::S3(S3Settings {
                    bucket: get(env_keys::S3_BUCKET).unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
                    region: get(env_keys::S3_REGION),
                    endpoint: get(env_keys::S3_ENDPOINT),
                    access_key,
                    secret_key,
                })
            }
            other => {
                return Err(format!(
                    "{} 取值无效: {}（仅支持 memory / s3）",
                    env_keys::STORAGE_BACKEND,
                    other
                ))
            }
        };

        Ok(Self {
            db_path,
            bind_addr,
            storage,
        })
    }
}

/// 获取默认数据库路径
///
/// # 返回
/// - 用户数据目录/health-ingest/health_ingest.db
/// - 无法获取数据目录时回退到 ./health_ingest.db
pub fn get_default_db_path() -> String {
    let mut path = PathBuf::from("./health_ingest.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("health-ingest");
        // 确保目录存在；失败时回退到当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("health_ingest.db");
        }
    }

    path.to_string_lossy().to_string()
}
