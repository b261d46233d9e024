// ==========================================
// 医疗数据导入系统 - 服务层
// ==========================================
// 职责: 导入提交、就绪探测与派发
// ==========================================

pub mod import_service;
pub mod readiness_gate;

pub use import_service::{resolve_storage_key, ImportService, SubmitImport};
pub use readiness_gate::{
    GateDecision, ImportDispatcher, ImportQueue, ImportRequest, ReadinessGate, ReadinessSettings,
};
