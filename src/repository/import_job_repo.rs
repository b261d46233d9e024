// ==========================================
// 医疗数据导入系统 - 导入任务 Repository
// ==========================================
// 职责: import_job / field_mapping 表的数据访问
// 红线: Repository 不含业务规则，只做数据 CRUD
// 约束: finished_at 已写入的任务不会被任何更新语句命中
// ==========================================

use crate::db::{column_label, column_opt_timestamp, column_timestamp, SharedConnection};
use crate::domain::import::{FieldMapping, ImportCounters, ImportJob};
use crate::domain::types::{DataType, FileFormat, ImportStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::import_commit::ImportCommit;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

fn map_job_row(row: &Row<'_>) -> rusqlite::Result<ImportJob> {
    Ok(ImportJob {
        job_id: row.get(0)?,
        data_type: column_label(row, 1, DataType::parse)?,
        file_format: column_label(row, 2, FileFormat::parse)?,
        file_name: row.get(3)?,
        storage_key: row.get(4)?,
        status: column_label(row, 5, ImportStatus::parse)?,
        counters: ImportCounters {
            total: row.get(6)?,
            imported: row.get(7)?,
            duplicated: row.get(8)?,
            failed: row.get(9)?,
        },
        message: row.get(10)?,
        created_at: column_timestamp(row, 11)?,
        finished_at: column_opt_timestamp(row, 12)?,
    })
}

const JOB_COLUMNS: &str = "job_id, data_type, file_format, file_name, storage_key, status, \
     total_rows, imported_rows, duplicated_rows, failed_rows, message, created_at, finished_at";

// ==========================================
// ImportJobRepository
// ==========================================
pub struct ImportJobRepository {
    conn: SharedConnection,
}

impl ImportJobRepository {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// 创建任务及其字段映射（同一事务）
    pub fn insert_job_with_mappings(
        &self,
        job: &ImportJob,
        mappings: &[FieldMapping],
    ) -> RepositoryResult<()> {
        let conn = self.conn.lock()?;
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO import_job (
                job_id, data_type, file_format, file_name, storage_key, status,
                total_rows, imported_rows, duplicated_rows, failed_rows,
                message, created_at, finished_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                job.job_id,
                job.data_type.as_str(),
                job.file_format.as_str(),
                job.file_name,
                job.storage_key,
                job.status.as_str(),
                job.counters.total,
                job.counters.imported,
                job.counters.duplicated,
                job.counters.failed,
                job.message,
                job.created_at.to_rfc3339(),
                job.finished_at.map(|t| t.to_rfc3339()),
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO field_mapping (job_id, seq, source_column, target_field) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (seq, mapping) in mappings.iter().enumerate() {
                stmt.execute(params![
                    job.job_id,
                    seq as i64,
                    mapping.source_column,
                    mapping.target_field
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn find_by_id(&self, job_id: &str) -> RepositoryResult<Option<ImportJob>> {
        let conn = self.conn.lock()?;
        let sql = format!("SELECT {} FROM import_job WHERE job_id = ?1", JOB_COLUMNS);
        let job = conn.query_row(&sql, params![job_id], map_job_row).optional()?;
        Ok(job)
    }

    pub fn get_by_id(&self, job_id: &str) -> RepositoryResult<ImportJob> {
        self.find_by_id(job_id)?.ok_or_else(|| RepositoryError::NotFound {
            entity: "ImportJob".to_string(),
            id: job_id.to_string(),
        })
    }

    /// 按创建时间倒序列出任务
    pub fn list_jobs(&self, limit: usize) -> RepositoryResult<Vec<ImportJob>> {
        let conn = self.conn.lock()?;
        let sql = format!(
            "SELECT {} FROM import_job ORDER BY created_at DESC LIMIT ?1",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map(params![limit as i64], map_job_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// 读取任务字段映射（保持提交顺序）
    pub fn list_field_mappings(&self, job_id: &str) -> RepositoryResult<Vec<FieldMapping>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(
            "SELECT source_column, target_field FROM field_mapping WHERE job_id = ?1 ORDER BY seq ASC",
        )?;
        let mappings = stmt
            .query_map(params![job_id], |row| {
                Ok(FieldMapping {
                    source_column: row.get(0)?,
                    target_field: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(mappings)
    }

    /// PENDING → PROCESSING
    ///
    /// # 返回
    /// - Ok(true): 状态已推进
    /// - Ok(false): 任务已结束（不可变），未做任何更新
    pub fn mark_processing(&self, job_id: &str) -> RepositoryResult<bool> {
        let conn = self.conn.lock()?;
        let affected = conn.execute(
            "UPDATE import_job SET status = ?2 WHERE job_id = ?1 AND finished_at IS NULL",
            params![job_id, ImportStatus::Processing.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// 结束任务：写入终态、计数与 finished_at（仅命中未结束的任务）
    pub fn finish_job(
        &self,
        job_id: &str,
        status: ImportStatus,
        counters: ImportCounters,
        message: Option<&str>,
    ) -> RepositoryResult<bool> {
        let conn = self.conn.lock()?;
        update_finished(&conn, job_id, status, counters, message)
    }

    /// 在单一事务内提交一次导入的全部写入（实体 / LineError / 计数与终态）
    ///
    /// # 说明
    /// - work 返回 Err 时整个事务回滚，数据库保持导入前状态
    /// - 提交本身失败返回 DatabaseTransactionError
    pub fn commit_import<T>(
        &self,
        work: impl FnOnce(&ImportCommit<'_>) -> RepositoryResult<T>,
    ) -> RepositoryResult<T> {
        let conn = self.conn.lock()?;
        let commit = ImportCommit::begin(&conn)?;
        let value = work(&commit)?;
        commit.commit()?;
        Ok(value)
    }
}

/// 终态写入（调用方持有连接或事务）
pub(crate) fn update_finished(
    conn: &Connection,
    job_id: &str,
    status: ImportStatus,
    counters: ImportCounters,
    message: Option<&str>,
) -> RepositoryResult<bool> {
    let affected = conn.execute(
        r#"
        UPDATE import_job
        SET status = ?2,
            total_rows = ?3,
            imported_rows = ?4,
            duplicated_rows = ?5,
            failed_rows = ?6,
            message = ?7,
            finished_at = ?8
        WHERE job_id = ?1 AND finished_at IS NULL
        "#,
        params![
            job_id,
            status.as_str(),
            counters.total,
            counters.imported,
            counters.duplicated,
            counters.failed,
            message,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(affected > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, ensure_schema};
    use rusqlite::Connection;
    use std::sync::{Arc, Mutex};

    fn repo() -> ImportJobRepository {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        ImportJobRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn sample_job() -> ImportJob {
        ImportJob::new(
            DataType::Hospital,
            FileFormat::Csv,
            "hospitais.csv".to_string(),
            "imports/abc_hospitais.csv".to_string(),
        )
    }

    #[test]
    fn test_insert_and_read_mappings_in_order() {
        let repo = repo();
        let job = sample_job();
        let mappings = vec![
            FieldMapping::new("CNES", "cnes_code"),
            FieldMapping::new("Nome", "name"),
            FieldMapping::new("Leitos", "total_beds"),
        ];
        repo.insert_job_with_mappings(&job, &mappings).unwrap();

        let loaded = repo.list_field_mappings(&job.job_id).unwrap();
        assert_eq!(loaded, mappings);

        let stored = repo.get_by_id(&job.job_id).unwrap();
        assert_eq!(stored.status, ImportStatus::Pending);
        assert_eq!(stored.file_name, "hospitais.csv");
    }

    #[test]
    fn test_finished_job_is_immutable() {
        let repo = repo();
        let job = sample_job();
        repo.insert_job_with_mappings(&job, &[]).unwrap();

        let counters = ImportCounters {
            total: 3,
            imported: 3,
            duplicated: 0,
            failed: 0,
        };
        assert!(repo
            .finish_job(&job.job_id, ImportStatus::Succeeded, counters, None)
            .unwrap());

        // 再次推进/结束均不生效
        assert!(!repo.mark_processing(&job.job_id).unwrap());
        assert!(!repo
            .finish_job(&job.job_id, ImportStatus::Failed, ImportCounters::default(), Some("x"))
            .unwrap());

        let stored = repo.get_by_id(&job.job_id).unwrap();
        assert_eq!(stored.status, ImportStatus::Succeeded);
        assert_eq!(stored.counters, counters);
        assert!(stored.finished_at.is_some());
    }

    #[test]
    fn test_get_missing_job_is_not_found() {
        let repo = repo();
        assert!(matches!(
            repo.get_by_id("missing"),
            Err(RepositoryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_unreadable_timestamp_surfaces_as_error() {
        let repo = repo();
        let job = sample_job();
        repo.insert_job_with_mappings(&job, &[]).unwrap();
        repo.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE import_job SET created_at = 'ontem' WHERE job_id = ?1",
                params![job.job_id],
            )
            .unwrap();

        assert!(matches!(
            repo.get_by_id(&job.job_id),
            Err(RepositoryError::DatabaseQueryError(_))
        ));
        assert!(repo.list_jobs(10).is_err());
    }
}
