// ==========================================
// 医疗数据导入系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod allocation;
pub mod entities;
pub mod import;
pub mod types;

// 重导出核心类型
pub use allocation::{
    AllocationFilter, AllocationRunSummary, AllocationStatistics, DoctorHospital,
    HospitalAllocationCount, PatientAllocationView, PatientHospital,
};
pub use entities::{Cid10Specialty, Doctor, Hospital, Municipality, Patient, State};
pub use import::{FieldMapping, ImportCounters, ImportJob, LineError, RowRecord};
pub use types::{AllocationStatus, DataType, FileFormat, HospitalType, ImportStatus, Region, Sex};
