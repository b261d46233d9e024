// ==========================================
// 医疗数据导入系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod allocation_repo;
pub mod cid10_repo;
pub mod error;
pub mod import_commit;
pub mod import_job_repo;
pub mod line_error_repo;
pub mod master_data_repo;

// 重导出核心仓储
pub use allocation_repo::AllocationRepository;
pub use cid10_repo::Cid10Repository;
pub use error::{RepositoryError, RepositoryResult};
pub use import_commit::ImportCommit;
pub use import_job_repo::ImportJobRepository;
pub use line_error_repo::LineErrorRepository;
pub use master_data_repo::{
    EntityPersister, MasterDataRepository, MasterTable, PersistOutcome, PersistableEntity,
};
