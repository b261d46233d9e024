// ==========================================
// 医疗数据导入系统 - 导入处理器
// ==========================================
// 流程: 任务 → 读取器 → 对象内容流 → 字段映射 → 单事务提交（实体 / LineError / 计数与终态）
// 状态:
// - PENDING → PROCESSING（开始处理）
// - PROCESSING → SUCCEEDED（可含失败行）
// - PROCESSING → FAILED（进入 PROCESSING 之后的任何错误）
// 约束: finished_at 已写入的任务重复投递为 no-op
// ==========================================

use crate::domain::entities::{Doctor, Hospital, Municipality, Patient, State};
use crate::domain::import::{FieldMapping, ImportCounters, ImportJob, LineError};
use crate::domain::types::{DataType, ImportStatus};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::{FieldMappingEngine, MappableEntity, MappingOutcome};
use crate::importer::format_reader::{ByteSource, FormatReader, FormatReaderFactory};
use crate::repository::error::RepositoryError;
use crate::repository::{ImportJobRepository, LineErrorRepository, PersistableEntity};
use crate::transport::object_store::ObjectStore;
use std::sync::Arc;
use tokio_util::io::SyncIoBridge;
use tracing::{error, info, instrument, warn};

pub struct ImportProcessor {
    job_repo: Arc<ImportJobRepository>,
    line_error_repo: Arc<LineErrorRepository>,
    store: Arc<dyn ObjectStore>,
    readers: FormatReaderFactory,
}

impl ImportProcessor {
    pub fn new(
        job_repo: Arc<ImportJobRepository>,
        line_error_repo: Arc<LineErrorRepository>,
        store: Arc<dyn ObjectStore>,
        readers: FormatReaderFactory,
    ) -> Self {
        Self {
            job_repo,
            line_error_repo,
            store,
            readers,
        }
    }

    /// 处理一个导入任务
    ///
    /// # 返回
    /// - Ok(ImportJob): 处理后的任务（已结束的任务原样返回）
    /// - Err(JobNotFound): 任务不存在
    /// - Err(其他): 任务已标记 FAILED，已映射的实体不落库
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn process(&self, job_id: &str) -> ImportResult<ImportJob> {
        let job = self
            .job_repo
            .find_by_id(job_id)?
            .ok_or_else(|| ImportError::JobNotFound(job_id.to_string()))?;

        if job.is_finished() || !self.job_repo.mark_processing(job_id)? {
            info!(status = %job.status, "任务已结束，忽略重复投递");
            return Ok(job);
        }

        let outcome = match self.run_pipeline(&job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(mark_err) = self.mark_failed(job_id, &e.to_string()) {
                    error!(error = %mark_err, "任务无法置为 FAILED");
                }
                return Err(e);
            }
        };

        let counters = outcome.counters();
        info!(
            total = counters.total,
            imported = counters.imported,
            duplicated = counters.duplicated,
            failed = counters.failed,
            "导入任务完成"
        );
        Ok(self.job_repo.get_by_id(job_id)?)
    }

    /// 任务置为 FAILED 并记录一条任务级 LineError
    ///
    /// # 返回
    /// - Ok(false): 任务已结束，未做变更
    ///
    /// 终态写入优先；LineError 写入失败只记日志
    pub fn mark_failed(&self, job_id: &str, message: &str) -> ImportResult<bool> {
        let finished = self.job_repo.finish_job(
            job_id,
            ImportStatus::Failed,
            ImportCounters::default(),
            Some(message),
        )?;
        if finished {
            warn!(job_id = %job_id, message, "导入任务失败");
            if let Err(e) = self
                .line_error_repo
                .append(&LineError::new(job_id, 0, "", message, None))
            {
                warn!(job_id = %job_id, error = %e, "任务级 LineError 写入失败");
            }
        }
        Ok(finished)
    }

    async fn run_pipeline(&self, job: &ImportJob) -> ImportResult<MappingOutcome> {
        // 先选读取器: 不支持的格式不必读取对象
        let reader = self.readers.reader_for(job.file_format)?;
        let mappings = self.job_repo.list_field_mappings(&job.job_id)?;
        let body = self.store.get_object(&job.storage_key).await?;
        // 桥接须在运行时上下文中创建，读取发生在阻塞线程
        let source = SyncIoBridge::new(body);

        let job = job.clone();
        let job_repo = Arc::clone(&self.job_repo);

        // 解析、映射与提交均为同步阻塞操作
        tokio::task::spawn_blocking(move || {
            let source: ByteSource = Box::new(source);
            let import = Import {
                job: &job,
                mappings: &mappings,
                reader: reader.as_ref(),
                job_repo: &job_repo,
            };
            match job.data_type {
                DataType::State => import.run::<State>(source),
                DataType::Municipality => import.run::<Municipality>(source),
                DataType::Hospital => import.run::<Hospital>(source),
                DataType::Doctor => import.run::<Doctor>(source),
                DataType::Patient => import.run::<Patient>(source),
            }
        })
        .await
        .map_err(|e| ImportError::Other(anyhow::anyhow!("映射任务异常终止: {}", e)))?
    }
}

/// 阻塞线程中的一次导入
struct Import<'a> {
    job: &'a ImportJob,
    mappings: &'a [FieldMapping],
    reader: &'a dyn FormatReader,
    job_repo: &'a ImportJobRepository,
}

impl Import<'_> {
    fn run<E>(&self, source: ByteSource) -> ImportResult<MappingOutcome>
    where
        E: MappableEntity + PersistableEntity,
    {
        let rows = self.reader.read(source)?;
        // 先完成全部映射（含读取对象内容），再持锁提交
        let batch = FieldMappingEngine::<E>::new(&self.job.job_id, self.mappings).map_all(rows);

        let job_id = self.job.job_id.as_str();
        let outcome = self.job_repo.commit_import(|commit| {
            let outcome = batch.persist(commit);
            commit.append_line_errors(&outcome.errors)?;
            let finished =
                commit.finish_job(job_id, ImportStatus::Succeeded, outcome.counters(), None)?;
            if !finished {
                return Err(RepositoryError::DatabaseTransactionError(format!(
                    "导入任务 {} 已结束，放弃本次提交",
                    job_id
                )));
            }
            Ok(outcome)
        })?;
        Ok(outcome)
    }
}
