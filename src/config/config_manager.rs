// ==========================================
// 医疗数据导入系统 - 配置管理器
// ==========================================
// 职责: 运行期可调参数的加载、查询、覆写
// 存储: config_kv 表 (key-value + scope)
// 约定: 非法取值回退默认值并记 warn，不中断流水线
// ==========================================

use crate::config::pipeline_config_trait::PipelineConfigReader;
use crate::db::{configure_sqlite_connection, open_sqlite_connection, SharedConnection};
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

const GLOBAL_SCOPE: &str = "global";

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: SharedConnection,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: SharedConnection) -> RepositoryResult<Self> {
        {
            let guard = conn.lock()?;
            configure_sqlite_connection(&guard)?;
        }
        Ok(Self { conn })
    }

    /// 读取 global scope 的配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.conn.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM config_kv WHERE scope_id = ?1 AND key = ?2",
                params![GLOBAL_SCOPE, key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    /// 写入 global scope 的配置值（存在则覆盖）
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.conn.lock()?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES (?1, ?2, ?3, datetime('now'))
            ON CONFLICT(scope_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![GLOBAL_SCOPE, key, value],
        )?;
        Ok(())
    }

    /// global scope 全部配置（按 key 排序）
    pub fn list_global_config(&self) -> RepositoryResult<BTreeMap<String, String>> {
        let conn = self.conn.lock()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![GLOBAL_SCOPE], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut config = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            config.insert(key, value);
        }
        Ok(config)
    }

    /// 读取并解析配置；缺失或非法时返回默认值
    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> RepositoryResult<T>
    where
        T: FromStr + Copy,
    {
        let Some(raw) = self.get_global_config_value(key)? else {
            return Ok(default);
        };
        match raw.trim().parse::<T>() {
            Ok(value) => Ok(value),
            Err(_) => {
                warn!(key, value = %raw, "配置值非法，使用默认值");
                Ok(default)
            }
        }
    }
}

#[async_trait]
impl PipelineConfigReader for ConfigManager {
    // ===== 就绪探测 =====

    async fn get_readiness_retry_delay(&self) -> RepositoryResult<Duration> {
        let secs = self.get_parsed_or_default(
            config_keys::READINESS_RETRY_DELAY_SECS,
            defaults::READINESS_RETRY_DELAY_SECS,
        )?;
        Ok(Duration::from_secs(secs))
    }

    async fn get_readiness_max_attempts(&self) -> RepositoryResult<u32> {
        self.get_parsed_or_default(
            config_keys::READINESS_MAX_ATTEMPTS,
            defaults::READINESS_MAX_ATTEMPTS,
        )
    }

    // ===== 分配器 =====

    async fn get_doctor_radius_km(&self) -> RepositoryResult<f64> {
        let radius =
            self.get_parsed_or_default(config_keys::DOCTOR_RADIUS_KM, defaults::DOCTOR_RADIUS_KM)?;
        Ok(positive_or(radius, defaults::DOCTOR_RADIUS_KM))
    }

    async fn get_doctor_max_hospitals(&self) -> RepositoryResult<usize> {
        let max = self.get_parsed_or_default(
            config_keys::DOCTOR_MAX_HOSPITALS,
            defaults::DOCTOR_MAX_HOSPITALS,
        )?;
        Ok(if max == 0 {
            defaults::DOCTOR_MAX_HOSPITALS
        } else {
            max
        })
    }

    async fn get_patient_radius_km(&self) -> RepositoryResult<f64> {
        let radius =
            self.get_parsed_or_default(config_keys::PATIENT_RADIUS_KM, defaults::PATIENT_RADIUS_KM)?;
        Ok(positive_or(radius, defaults::PATIENT_RADIUS_KM))
    }

    // ===== 上传 =====

    async fn get_upload_part_max_attempts(&self) -> RepositoryResult<u32> {
        let attempts = self.get_parsed_or_default(
            config_keys::UPLOAD_PART_MAX_ATTEMPTS,
            defaults::UPLOAD_PART_MAX_ATTEMPTS,
        )?;
        Ok(attempts.max(1))
    }
}

fn positive_or(value: f64, default: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        default
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 就绪探测
    pub const READINESS_RETRY_DELAY_SECS: &str = "readiness_retry_delay_secs";
    pub const READINESS_MAX_ATTEMPTS: &str = "readiness_max_attempts"; // 0 = 不限次数

    // 分配器
    pub const DOCTOR_RADIUS_KM: &str = "doctor_radius_km";
    pub const DOCTOR_MAX_HOSPITALS: &str = "doctor_max_hospitals";
    pub const PATIENT_RADIUS_KM: &str = "patient_radius_km";

    // 上传
    pub const UPLOAD_PART_MAX_ATTEMPTS: &str = "upload_part_max_attempts";
}

pub mod defaults {
    pub const READINESS_RETRY_DELAY_SECS: u64 = 30;
    pub const READINESS_MAX_ATTEMPTS: u32 = 0;
    pub const DOCTOR_RADIUS_KM: f64 = 30.0;
    pub const DOCTOR_MAX_HOSPITALS: usize = 3;
    pub const PATIENT_RADIUS_KM: f64 = 30.0;
    pub const UPLOAD_PART_MAX_ATTEMPTS: u32 = 3;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ensure_schema;
    use rusqlite::Connection;

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[tokio::test]
    async fn test_defaults_when_table_empty() {
        let config = manager();
        assert_eq!(
            config.get_readiness_retry_delay().await.unwrap(),
            Duration::from_secs(30)
        );
        assert_eq!(config.get_readiness_max_attempts().await.unwrap(), 0);
        assert_eq!(config.get_doctor_radius_km().await.unwrap(), 30.0);
        assert_eq!(config.get_doctor_max_hospitals().await.unwrap(), 3);
        assert_eq!(config.get_patient_radius_km().await.unwrap(), 30.0);
        assert_eq!(config.get_upload_part_max_attempts().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_override_and_upsert() {
        let config = manager();
        config
            .set_global_config_value(config_keys::DOCTOR_RADIUS_KM, "12.5")
            .unwrap();
        assert_eq!(config.get_doctor_radius_km().await.unwrap(), 12.5);

        config
            .set_global_config_value(config_keys::DOCTOR_RADIUS_KM, "40")
            .unwrap();
        assert_eq!(config.get_doctor_radius_km().await.unwrap(), 40.0);
        assert_eq!(config.list_global_config().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_values_fall_back_to_default() {
        let config = manager();
        config
            .set_global_config_value(config_keys::READINESS_MAX_ATTEMPTS, "many")
            .unwrap();
        config
            .set_global_config_value(config_keys::PATIENT_RADIUS_KM, "-5")
            .unwrap();
        config
            .set_global_config_value(config_keys::UPLOAD_PART_MAX_ATTEMPTS, "0")
            .unwrap();

        assert_eq!(config.get_readiness_max_attempts().await.unwrap(), 0);
        assert_eq!(config.get_patient_radius_km().await.unwrap(), 30.0);
        assert_eq!(config.get_upload_part_max_attempts().await.unwrap(), 1);
    }
}
