// ==========================================
// 医疗数据导入系统 - 引擎层
// ==========================================
// 职责: 专科 + 距离 + 容量约束的医生/患者分配
// 红线: 引擎不拼 SQL，数据由编排器经 Repository 加载
// ==========================================

pub mod allocator;
pub mod doctor_allocator;
pub mod geo;
pub mod patient_allocator;

// 重导出核心引擎
pub use allocator::{AllocationReport, SpecialtyGeoAllocator};
pub use doctor_allocator::{DoctorAllocationRules, DoctorAllocator, DoctorEdgeSnapshot};
pub use geo::{haversine_km, GeoPoint, MunicipalityIndex, EARTH_RADIUS_KM};
pub use patient_allocator::{BedSnapshot, Cid10Index, PatientAllocator};
