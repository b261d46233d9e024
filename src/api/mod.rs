// ==========================================
// 医疗数据导入系统 - API 层
// ==========================================
// 职责: 请求校验 + DTO 转换，供 HTTP 路由调用
// ==========================================

pub mod allocation_api;
pub mod error;
pub mod import_api;

// 重导出核心类型
pub use allocation_api::{
    AllocationApi, AllocationQuery, AllocationStatisticsDto, PagedResponse, PatientAllocationDto,
    UpdateStatusRequest,
};
pub use error::{ApiError, ApiResult, ErrorBody};
pub use import_api::{
    FieldMappingDto, ImportApi, ImportJobDto, LineErrorDto, LineErrorListResponse,
    SubmitImportRequest,
};
