// ==========================================
// 医疗数据导入系统 - 行级错误 Repository
// ==========================================
// 职责: line_error 表只追加写入 + 审计查询
// ==========================================

use crate::db::SharedConnection;
use crate::domain::import::LineError;
use crate::repository::error::RepositoryResult;
use rusqlite::{params, Connection};

/// 在调用方的事务内写入行级错误
pub(crate) fn insert_line_errors(conn: &Connection, errors: &[LineError]) -> RepositoryResult<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO line_error (job_id, line, field, message, raw_value) VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for e in errors {
        stmt.execute(params![e.job_id, e.line, e.field, e.message, e.raw_value])?;
    }
    Ok(errors.len())
}

pub struct LineErrorRepository {
    conn: SharedConnection,
}

impl LineErrorRepository {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// 批量追加（单事务）
    pub fn append_batch(&self, errors: &[LineError]) -> RepositoryResult<usize> {
        if errors.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.lock()?;
        let tx = conn.unchecked_transaction()?;
        let written = insert_line_errors(&tx, errors)?;
        tx.commit()?;
        Ok(written)
    }

    pub fn append(&self, error: &LineError) -> RepositoryResult<()> {
        self.append_batch(std::slice::from_ref(error))?;
        Ok(())
    }

    /// 按行号顺序列出某任务的错误
    pub fn list_by_job(
        &self,
        job_id: &str,
        limit: usize,
        offset: usize,
    ) -> RepositoryResult<Vec<LineError>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT job_id, line, field, message, raw_value
            FROM line_error
            WHERE job_id = ?1
            ORDER BY line ASC, id ASC
            LIMIT ?2 OFFSET ?3
            "#,
        )?;
        let errors = stmt
            .query_map(params![job_id, limit as i64, offset as i64], |row| {
                Ok(LineError {
                    job_id: row.get(0)?,
                    line: row.get(1)?,
                    field: row.get(2)?,
                    message: row.get(3)?,
                    raw_value: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(errors)
    }

    pub fn count_by_job(&self, job_id: &str) -> RepositoryResult<i64> {
        let conn = self.conn.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM line_error WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, ensure_schema};
    use crate::domain::import::ImportJob;
    use crate::domain::types::{DataType, FileFormat};
    use crate::repository::ImportJobRepository;
    use rusqlite::Connection;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_list_ordered_by_line_with_paging() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        let shared = Arc::new(Mutex::new(conn));

        let job = ImportJob::new(
            DataType::Patient,
            FileFormat::Csv,
            "pacientes.csv".to_string(),
            "imports/x_pacientes.csv".to_string(),
        );
        ImportJobRepository::new(shared.clone())
            .insert_job_with_mappings(&job, &[])
            .unwrap();

        let repo = LineErrorRepository::new(shared);
        repo.append_batch(&[
            LineError::new(&job.job_id, 7, "birth_date", "invalid date", Some("31/02".into())),
            LineError::new(&job.job_id, 2, "cpf", "required", None),
        ])
        .unwrap();
        repo.append(&LineError::new(&job.job_id, 0, "flag", "unknown target field", None))
            .unwrap();

        assert_eq!(repo.count_by_job(&job.job_id).unwrap(), 3);
        let lines: Vec<i64> = repo
            .list_by_job(&job.job_id, 10, 0)
            .unwrap()
            .iter()
            .map(|e| e.line)
            .collect();
        assert_eq!(lines, vec![0, 2, 7]);

        let page = repo.list_by_job(&job.job_id, 1, 2).unwrap();
        assert_eq!(page[0].raw_value.as_deref(), Some("31/02"));
        assert_eq!(repo.count_by_job("outro").unwrap(), 0);
    }
}
