// ==========================================
// 医疗数据导入系统 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为
// - 统一 busy_timeout，减少并发写入时的偶发 busy 错误
// - 幂等建表（ensure_schema）
// ==========================================

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 共享连接类型
pub type SharedConnection = Arc<Mutex<Connection>>;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 打开连接、建表并包装为共享连接
pub fn open_shared_connection(db_path: &str) -> rusqlite::Result<SharedConnection> {
    let conn = open_sqlite_connection(db_path)?;
    ensure_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

// ==========================================
// 列解码（文本 → 时间 / 枚举）
// ==========================================
// 无法解析的值作为列转换错误返回，不做兜底

/// 读取 RFC3339 文本列
pub fn column_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// 读取可空 RFC3339 文本列
pub fn column_opt_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    match raw {
        Some(_) => column_timestamp(row, idx).map(Some),
        None => Ok(None),
    }
}

/// 读取枚举标签列
pub fn column_label<T>(
    row: &Row<'_>,
    idx: usize,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("无法识别的取值: {}", raw).into(),
        )
    })
}

/// 幂等建表
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL DEFAULT 'global',
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );

        -- ===== 导入任务 =====
        CREATE TABLE IF NOT EXISTS import_job (
            job_id TEXT PRIMARY KEY,
            data_type TEXT NOT NULL,
            file_format TEXT NOT NULL,
            file_name TEXT NOT NULL,
            storage_key TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            total_rows INTEGER NOT NULL DEFAULT 0,
            imported_rows INTEGER NOT NULL DEFAULT 0,
            duplicated_rows INTEGER NOT NULL DEFAULT 0,
            failed_rows INTEGER NOT NULL DEFAULT 0,
            message TEXT,
            created_at TEXT NOT NULL,
            finished_at TEXT
        );

        CREATE TABLE IF NOT EXISTS field_mapping (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id TEXT NOT NULL REFERENCES import_job(job_id) ON DELETE CASCADE,
            seq INTEGER NOT NULL,
            source_column TEXT NOT NULL,
            target_field TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_field_mapping_job ON field_mapping(job_id, seq);

        CREATE TABLE IF NOT EXISTS line_error (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id TEXT NOT NULL REFERENCES import_job(job_id) ON DELETE CASCADE,
            line INTEGER NOT NULL,
            field TEXT NOT NULL,
            message TEXT NOT NULL,
            raw_value TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_line_error_job ON line_error(job_id, line);

        -- ===== 主数据 =====
        CREATE TABLE IF NOT EXISTS state (
            code INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            uf TEXT NOT NULL,
            region TEXT,
            import_job_id TEXT
        );

        CREATE TABLE IF NOT EXISTS municipality (
            ibge_code INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            uf TEXT NOT NULL,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            population INTEGER,
            is_capital INTEGER,
            import_job_id TEXT
        );

        CREATE TABLE IF NOT EXISTS hospital (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cnes_code TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            municipality_code INTEGER NOT NULL,
            specialties TEXT NOT NULL,
            total_beds INTEGER NOT NULL DEFAULT 0,
            hospital_type TEXT,
            phone TEXT,
            import_job_id TEXT
        );

        CREATE TABLE IF NOT EXISTS doctor (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            crm TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            specialty TEXT NOT NULL,
            municipality_code INTEGER NOT NULL,
            phone TEXT,
            active INTEGER,
            import_job_id TEXT
        );

        CREATE TABLE IF NOT EXISTS patient (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cpf TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            sex TEXT,
            age INTEGER,
            cid10_code TEXT NOT NULL,
            municipality_code INTEGER NOT NULL,
            priority INTEGER,
            notes TEXT,
            import_job_id TEXT
        );

        -- ===== 诊断编码 → 专科 =====
        CREATE TABLE IF NOT EXISTS cid10 (
            code TEXT PRIMARY KEY,
            description TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cid10_specialty (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cid10_code TEXT NOT NULL,
            specialty TEXT NOT NULL,
            priority INTEGER NOT NULL DEFAULT 1,
            is_primary INTEGER NOT NULL DEFAULT 0,
            UNIQUE (cid10_code, specialty)
        );

        -- ===== 分配关系 =====
        CREATE TABLE IF NOT EXISTS doctor_hospital (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            doctor_id INTEGER NOT NULL REFERENCES doctor(id) ON DELETE CASCADE,
            hospital_id INTEGER NOT NULL REFERENCES hospital(id) ON DELETE CASCADE,
            distance_km REAL NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            UNIQUE (doctor_id, hospital_id)
        );

        CREATE TABLE IF NOT EXISTS patient_hospital (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            patient_id INTEGER NOT NULL REFERENCES patient(id) ON DELETE CASCADE,
            hospital_id INTEGER NOT NULL REFERENCES hospital(id) ON DELETE CASCADE,
            specialty TEXT NOT NULL,
            distance_km REAL NOT NULL,
            status TEXT NOT NULL DEFAULT 'ALLOCATED',
            priority INTEGER NOT NULL DEFAULT 0,
            notes TEXT,
            allocated_at TEXT NOT NULL,
            UNIQUE (patient_id, hospital_id)
        );

        CREATE INDEX IF NOT EXISTS idx_patient_hospital_status ON patient_hospital(status);
        "#,
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_column_decoding_rejects_bad_text() {
        let conn = Connection::open_in_memory().unwrap();
        let (ok, bad_time, bad_label) = conn
            .query_row(
                "SELECT '2024-03-01T10:00:00+00:00', 'ontem', 'TALVEZ'",
                [],
                |row| {
                    Ok((
                        column_timestamp(row, 0).is_ok(),
                        column_timestamp(row, 1).err(),
                        column_label(row, 2, |s| (s == "SIM").then_some(true)).err(),
                    ))
                },
            )
            .unwrap();
        assert!(ok);
        assert!(matches!(
            bad_time,
            Some(rusqlite::Error::FromSqlConversionFailure(1, Type::Text, _))
        ));
        assert!(matches!(
            bad_label,
            Some(rusqlite::Error::FromSqlConversionFailure(2, Type::Text, _))
        ));
    }

    #[test]
    fn test_schema_version_absent_on_empty_db() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);
    }
}
