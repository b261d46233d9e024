// ==========================================
// 医疗数据导入系统 - 导入提交单元
// ==========================================
// 职责: 一次导入的全部写入共用一个事务
//   实体批量落库 → LineError 追加 → 计数与终态
// 语义:
// - 任一步骤返回 Err，事务随 drop 回滚（任务保持 PROCESSING，由调用方置 FAILED）
// - 实体批次在保存点内执行；批次失败只回滚实体，LineError 与终态仍可提交
// ==========================================

use crate::domain::import::{ImportCounters, LineError};
use crate::domain::types::ImportStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::import_job_repo::update_finished;
use crate::repository::line_error_repo::insert_line_errors;
use crate::repository::master_data_repo::{
    insert_entities, EntityPersister, PersistOutcome, PersistableEntity,
};
use rusqlite::{Connection, Transaction};
use tracing::warn;

pub struct ImportCommit<'c> {
    tx: Transaction<'c>,
}

impl<'c> ImportCommit<'c> {
    pub(crate) fn begin(conn: &'c Connection) -> RepositoryResult<Self> {
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))?;
        Ok(Self { tx })
    }

    pub(crate) fn commit(self) -> RepositoryResult<()> {
        self.tx
            .commit()
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))
    }

    pub fn append_line_errors(&self, errors: &[LineError]) -> RepositoryResult<usize> {
        if errors.is_empty() {
            return Ok(0);
        }
        insert_line_errors(&self.tx, errors)
    }

    /// 写入终态（仅命中未结束的任务）
    pub fn finish_job(
        &self,
        job_id: &str,
        status: ImportStatus,
        counters: ImportCounters,
        message: Option<&str>,
    ) -> RepositoryResult<bool> {
        update_finished(&self.tx, job_id, status, counters, message)
    }

    fn savepoint(&self, sql: &str) -> RepositoryResult<()> {
        self.tx
            .execute_batch(sql)
            .map_err(|e| RepositoryError::DatabaseTransactionError(e.to_string()))
    }
}

impl<E: PersistableEntity> EntityPersister<E> for ImportCommit<'_> {
    fn persist_batch(&self, job_id: &str, entities: &[E]) -> RepositoryResult<PersistOutcome> {
        self.savepoint("SAVEPOINT persist_batch")?;
        match insert_entities(&self.tx, job_id, entities) {
            Ok(outcome) => {
                self.savepoint("RELEASE persist_batch")?;
                Ok(outcome)
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "实体批次回滚到保存点");
                self.savepoint("ROLLBACK TO persist_batch; RELEASE persist_batch")?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, ensure_schema};
    use crate::domain::entities::State;
    use crate::domain::import::ImportJob;
    use crate::domain::types::{DataType, FileFormat};
    use crate::repository::{
        ImportJobRepository, LineErrorRepository, MasterDataRepository, MasterTable,
    };
    use std::sync::{Arc, Mutex};

    struct Fixture {
        conn: crate::db::SharedConnection,
        jobs: ImportJobRepository,
        job_id: String,
    }

    fn fixture() -> Fixture {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));

        let jobs = ImportJobRepository::new(conn.clone());
        let job = ImportJob::new(
            DataType::State,
            FileFormat::Csv,
            "estados.csv".to_string(),
            "imports/estados.csv".to_string(),
        );
        jobs.insert_job_with_mappings(&job, &[]).unwrap();
        jobs.mark_processing(&job.job_id).unwrap();
        Fixture {
            conn,
            jobs,
            job_id: job.job_id,
        }
    }

    fn state(code: i64, uf: &str) -> State {
        State {
            code,
            name: format!("Estado {}", uf),
            uf: uf.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_failed_step_rolls_back_all_writes() {
        let fx = fixture();
        let batch = [state(35, "SP"), state(33, "RJ")];
        let result: RepositoryResult<()> = fx.jobs.commit_import(|commit| {
            commit.persist_batch(&fx.job_id, &batch[..])?;
            commit.append_line_errors(&[LineError::new(&fx.job_id, 1, "code", "bad", None)])?;
            Err(RepositoryError::DatabaseQueryError("disk I/O error".to_string()))
        });
        assert!(result.is_err());

        let master = MasterDataRepository::new(fx.conn.clone());
        assert_eq!(master.count_rows(MasterTable::State).unwrap(), 0);
        let errors = LineErrorRepository::new(fx.conn.clone());
        assert_eq!(errors.count_by_job(&fx.job_id).unwrap(), 0);
        let job = fx.jobs.get_by_id(&fx.job_id).unwrap();
        assert_eq!(job.status, ImportStatus::Processing);
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn test_failed_batch_keeps_rest_of_commit() {
        let fx = fixture();
        // 触发器拒绝 code=33，批次第二条插入失败，整批回滚到保存点
        fx.conn
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_rio BEFORE INSERT ON state WHEN NEW.code = 33 \
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let batch = [state(35, "SP"), state(33, "RJ")];
        let finished = fx
            .jobs
            .commit_import(|commit| {
                assert!(commit.persist_batch(&fx.job_id, &batch[..]).is_err());
                commit.append_line_errors(&[LineError::new(&fx.job_id, 2, "", "rejected", None)])?;
                commit.finish_job(
                    &fx.job_id,
                    ImportStatus::Succeeded,
                    ImportCounters {
                        total: 2,
                        failed: 2,
                        ..Default::default()
                    },
                    None,
                )
            })
            .unwrap();
        assert!(finished);

        let master = MasterDataRepository::new(fx.conn.clone());
        assert_eq!(master.count_rows(MasterTable::State).unwrap(), 0);
        let errors = LineErrorRepository::new(fx.conn.clone());
        assert_eq!(errors.count_by_job(&fx.job_id).unwrap(), 1);
        let job = fx.jobs.get_by_id(&fx.job_id).unwrap();
        assert_eq!(job.status, ImportStatus::Succeeded);
        assert_eq!(job.counters.failed, 2);
    }
}
