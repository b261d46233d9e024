// ==========================================
// 医疗数据导入系统 - 就绪探测门（ReadinessGate）
// ==========================================
// 职责: 将"上传完成"与"对象可一致读取"解耦
// 流程:
//   消息入队 → HEAD 探测
//     可见   → 同步派发到导入处理器
//     不可见 → 固定延迟后重新投递同一消息（可选次数上限）
//     达到上限 → 任务置 FAILED，不再投递
// 约束: 每个任务同一时刻只有一条消息在途
// ==========================================

use crate::config::{defaults, PipelineConfigReader};
use crate::domain::import::ImportJob;
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::import_processor::ImportProcessor;
use crate::repository::error::RepositoryResult;
use crate::transport::object_store::ObjectStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

// ==========================================
// ImportRequest - 导入请求消息
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRequest {
    pub job_id: String,
    pub storage_key: String,
    pub attempt: u32, // 已执行的探测次数
}

impl ImportRequest {
    pub fn new(job_id: impl Into<String>, storage_key: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            storage_key: storage_key.into(),
            attempt: 0,
        }
    }
}

// ==========================================
// ImportDispatcher Trait
// ==========================================
// 实现者: ImportProcessor（测试中可替换为记录型桩）
#[async_trait]
pub trait ImportDispatcher: Send + Sync {
    async fn dispatch(&self, job_id: &str) -> ImportResult<ImportJob>;

    /// 探测次数耗尽时调用
    fn mark_failed(&self, job_id: &str, message: &str) -> ImportResult<bool>;
}

#[async_trait]
impl ImportDispatcher for ImportProcessor {
    async fn dispatch(&self, job_id: &str) -> ImportResult<ImportJob> {
        self.process(job_id).await
    }

    fn mark_failed(&self, job_id: &str, message: &str) -> ImportResult<bool> {
        ImportProcessor::mark_failed(self, job_id, message)
    }
}

// ==========================================
// ReadinessSettings
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessSettings {
    pub retry_delay: Duration,
    pub max_attempts: u32, // 0 = 不限次数
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(defaults::READINESS_RETRY_DELAY_SECS),
            max_attempts: defaults::READINESS_MAX_ATTEMPTS,
        }
    }
}

impl ReadinessSettings {
    pub async fn load(config: &dyn PipelineConfigReader) -> RepositoryResult<Self> {
        Ok(Self {
            retry_delay: config.get_readiness_retry_delay().await?,
            max_attempts: config.get_readiness_max_attempts().await?,
        })
    }
}

/// 单条消息的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Dispatched,
    Rescheduled { attempt: u32, delay: Duration },
    Abandoned { attempts: u32 },
}

// ==========================================
// ImportQueue - 消息发布端
// ==========================================
#[derive(Clone)]
pub struct ImportQueue {
    sender: mpsc::UnboundedSender<ImportRequest>,
}

impl ImportQueue {
    pub fn publish(&self, request: ImportRequest) -> ImportResult<()> {
        debug!(job_id = %request.job_id, storage_key = %request.storage_key, "导入请求入队");
        self.sender
            .send(request)
            .map_err(|e| ImportError::Other(anyhow::anyhow!("就绪队列已关闭: {}", e.0.job_id)))
    }
}

// ==========================================
// ReadinessGate
// ==========================================
pub struct ReadinessGate {
    store: Arc<dyn ObjectStore>,
    dispatcher: Arc<dyn ImportDispatcher>,
    settings: ReadinessSettings,
    sender: mpsc::UnboundedSender<ImportRequest>,
}

impl ReadinessGate {
    /// 创建探测门及其消息接收端（交给 spawn 消费）
    pub fn new(
        store: Arc<dyn ObjectStore>,
        dispatcher: Arc<dyn ImportDispatcher>,
        settings: ReadinessSettings,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ImportRequest>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let gate = Arc::new(Self {
            store,
            dispatcher,
            settings,
            sender,
        });
        (gate, receiver)
    }

    pub fn queue(&self) -> ImportQueue {
        ImportQueue {
            sender: self.sender.clone(),
        }
    }

    pub fn settings(&self) -> ReadinessSettings {
        self.settings
    }

    /// 启动消费循环（按到达顺序逐条处理）
    pub fn spawn(self: Arc<Self>, mut receiver: mpsc::UnboundedReceiver<ImportRequest>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                retry_delay_secs = self.settings.retry_delay.as_secs(),
                max_attempts = self.settings.max_attempts,
                "就绪探测门已启动"
            );
            while let Some(request) = receiver.recv().await {
                self.handle(request).await;
            }
            info!("就绪探测门已停止");
        })
    }

    /// 处理一条导入请求
    #[instrument(skip(self, request), fields(job_id = %request.job_id, attempt = request.attempt))]
    pub async fn handle(&self, request: ImportRequest) -> GateDecision {
        let attempt = request.attempt + 1;

        let visible = match self.store.head_object(&request.storage_key).await {
            Ok(visible) => visible,
            Err(e) => {
                warn!(storage_key = %request.storage_key, error = %e, "HEAD 探测失败，按不可见处理");
                false
            }
        };

        if visible {
            match self.dispatcher.dispatch(&request.job_id).await {
                Ok(job) => info!(status = %job.status, "导入任务已派发处理"),
                Err(e) => error!(error = %e, "导入任务处理失败"),
            }
            return GateDecision::Dispatched;
        }

        if self.settings.max_attempts > 0 && attempt >= self.settings.max_attempts {
            let message = format!(
                "object {} not readable after {} probes",
                request.storage_key, attempt
            );
            if let Err(e) = self.dispatcher.mark_failed(&request.job_id, &message) {
                error!(error = %e, "探测耗尽后标记任务失败出错");
            }
            warn!(attempts = attempt, "对象始终不可见，放弃探测");
            return GateDecision::Abandoned { attempts: attempt };
        }

        let delay = self.settings.retry_delay;
        warn!(
            storage_key = %request.storage_key,
            delay_secs = delay.as_secs_f64(),
            "对象尚不可见，延迟后重新投递"
        );
        self.reschedule(
            ImportRequest {
                attempt,
                ..request
            },
            delay,
        );
        GateDecision::Rescheduled { attempt, delay }
    }

    fn reschedule(&self, request: ImportRequest, delay: Duration) {
        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if sender.send(request).is_err() {
                warn!("就绪队列已关闭，重新投递被丢弃");
            }
        });
    }
}
