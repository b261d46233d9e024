// ==========================================
// 医疗数据导入系统 - 分配关系领域模型
// ==========================================
// 职责: 医生-医院 / 患者-医院 多对多关系 + 查询视图
// 不变量:
// - 一名医生的有效医院关系不超过上限（默认 3）
// - 同一 (医生, 医院) / (患者, 医院) 对不重复
// ==========================================

use crate::domain::types::AllocationStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ==========================================
// DoctorHospital - 医生分配边
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoctorHospital {
    pub doctor_id: i64,
    pub hospital_id: i64,
    pub distance_km: f64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

// ==========================================
// PatientHospital - 患者分配边
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientHospital {
    pub id: i64, // 落库前为 0
    pub patient_id: i64,
    pub hospital_id: i64,
    pub specialty: String, // 命中的专科
    pub distance_km: f64,
    pub status: AllocationStatus,
    pub priority: i32,
    pub notes: Option<String>,
    pub allocated_at: DateTime<Utc>,
}

// ==========================================
// PatientAllocationView - 患者分配查询视图
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientAllocationView {
    pub id: i64,
    pub patient_id: i64,
    pub patient_name: String,
    pub patient_cpf: String,
    pub cid10_code: String,
    pub cid10_description: Option<String>,
    pub hospital_id: i64,
    pub hospital_name: String,
    pub hospital_code: String,
    pub hospital_specialties: String,
    pub specialty: String,
    pub distance_km: f64,
    pub status: AllocationStatus,
    pub allocated_at: DateTime<Utc>,
    pub priority: i32,
    pub notes: Option<String>,
    pub patient_municipality: Option<String>,
    pub hospital_municipality: Option<String>,
    pub region: Option<String>,
}

// ==========================================
// AllocationFilter - 查询过滤条件
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct AllocationFilter {
    pub region: Option<String>,
    pub hospital: Option<String>,  // 名称或 CNES 编码（包含匹配）
    pub specialty: Option<String>, // 命中专科（包含匹配）
    pub status: Option<AllocationStatus>,
}

// ==========================================
// 统计
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HospitalAllocationCount {
    pub hospital_id: i64,
    pub hospital_name: String,
    pub allocations: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationStatistics {
    pub total: i64,
    pub by_status: Vec<(AllocationStatus, i64)>,
    pub average_distance_km: f64,
    pub top_hospitals: Vec<HospitalAllocationCount>,
}

// ==========================================
// 分配运行汇总
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRunSummary {
    pub candidates: usize,   // 参与本轮的医生/患者数
    pub edges_created: usize, // 新建关系数
    pub unmatched: usize,    // 未找到满足条件的医院
}
