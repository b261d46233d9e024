// ==========================================
// 医疗数据导入系统 - 患者分配API
// ==========================================
// 职责: 分配查询（过滤 + 分页）、状态更新、统计、触发分配运行
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::allocation::{AllocationFilter, PatientAllocationView};
use crate::domain::types::{AllocationStatus, Region};
use crate::engine::allocator::{AllocationReport, SpecialtyGeoAllocator};
use crate::repository::AllocationRepository;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 200;

/// 查询参数（葡语参数名保持对外兼容）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationQuery {
    pub regiao: Option<String>,
    pub hospital: Option<String>,
    pub especialidade: Option<String>,
    pub status: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientAllocationDto {
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

impl From<PatientAllocationView> for PatientAllocationDto {
    fn from(v: PatientAllocationView) -> Self {
        Self {
            id: v.id,
            patient_id: v.patient_id,
            patient_name: v.patient_name,
            patient_cpf: v.patient_cpf,
            cid10_code: v.cid10_code,
            cid10_description: v.cid10_description,
            hospital_id: v.hospital_id,
            hospital_name: v.hospital_name,
            hospital_code: v.hospital_code,
            hospital_specialties: v.hospital_specialties,
            specialty: v.specialty,
            distance_km: (v.distance_km * 100.0).round() / 100.0,
            status: v.status,
            allocated_at: v.allocated_at,
            priority: v.priority,
            notes: v.notes,
            patient_municipality: v.patient_municipality,
            hospital_municipality: v.hospital_municipality,
            region: v.region,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedResponse<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub status: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCountDto {
    pub status: AllocationStatus,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HospitalCountDto {
    pub hospital_id: i64,
    pub hospital_name: String,
    pub allocations: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationStatisticsDto {
    pub total: i64,
    pub by_status: Vec<StatusCountDto>,
    pub average_distance_km: f64,
    pub top_hospitals: Vec<HospitalCountDto>,
}

/// 患者分配API
pub struct AllocationApi {
    repo: Arc<AllocationRepository>,
    allocator: Arc<SpecialtyGeoAllocator>,
}

impl AllocationApi {
    pub fn new(repo: Arc<AllocationRepository>, allocator: Arc<SpecialtyGeoAllocator>) -> Self {
        Self { repo, allocator }
    }

    /// 分页查询分配记录
    pub fn list_allocations(
        &self,
        query: &AllocationQuery,
    ) -> ApiResult<PagedResponse<PatientAllocationDto>> {
        let page = match query.page {
            Some(0) => return Err(ApiError::InvalidInput("page 从 1 开始".to_string())),
            Some(p) => p,
            None => 1,
        };
        let page_size = match query.page_size {
            Some(0) => return Err(ApiError::InvalidInput("pageSize 必须大于 0".to_string())),
            Some(n) => n.min(MAX_PAGE_SIZE),
            None => DEFAULT_PAGE_SIZE,
        };

        let filter = build_filter(query)?;
        let (items, total) = self.repo.list_allocations(&filter, page, page_size)?;
        let total_pages = (total.max(0) as usize).div_ceil(page_size);

        Ok(PagedResponse {
            items: items.into_iter().map(PatientAllocationDto::from).collect(),
            total,
            page,
            page_size,
            total_pages,
        })
    }

    pub fn allocations_by_patient(&self, patient_id: i64) -> ApiResult<Vec<PatientAllocationDto>> {
        let items = self.repo.find_by_patient(patient_id)?;
        Ok(items.into_iter().map(PatientAllocationDto::from).collect())
    }

    /// 更新分配状态
    ///
    /// # 返回
    /// - Err(InvalidInput): 状态标签不合法，或恢复占床会超出床位 / 重复占床
    /// - Err(NotFound): 分配记录不存在
    pub fn update_status(
        &self,
        allocation_id: i64,
        request: &UpdateStatusRequest,
    ) -> ApiResult<PatientAllocationDto> {
        let status = AllocationStatus::parse(&request.status)
            .ok_or_else(|| ApiError::InvalidInput(format!("未知分配状态: {}", request.status)))?;
        let notes = request
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty());

        self.repo.update_status(allocation_id, status, notes)?;
        info!(allocation_id, status = %status, "分配状态已更新");
        Ok(self.repo.find_view_by_id(allocation_id)?.into())
    }

    pub fn statistics(&self) -> ApiResult<AllocationStatisticsDto> {
        let stats = self.repo.statistics()?;
        Ok(AllocationStatisticsDto {
            total: stats.total,
            by_status: stats
                .by_status
                .into_iter()
                .map(|(status, count)| StatusCountDto { status, count })
                .collect(),
            average_distance_km: (stats.average_distance_km * 100.0).round() / 100.0,
            top_hospitals: stats
                .top_hospitals
                .into_iter()
                .map(|h| HospitalCountDto {
                    hospital_id: h.hospital_id,
                    hospital_name: h.hospital_name,
                    allocations: h.allocations,
                })
                .collect(),
        })
    }

    /// 触发一次完整分配（医生 → 患者）
    pub async fn run_allocation(&self) -> ApiResult<AllocationReport> {
        Ok(self.allocator.run_all().await?)
    }
}

fn build_filter(query: &AllocationQuery) -> ApiResult<AllocationFilter> {
    let non_empty = |v: &Option<String>| {
        v.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let region = match non_empty(&query.regiao) {
        Some(raw) => Some(
            Region::parse(&raw)
                .ok_or_else(|| ApiError::InvalidInput(format!("未知大区: {}", raw)))?
                .as_str()
                .to_string(),
        ),
        None => None,
    };
    let status = match non_empty(&query.status) {
        Some(raw) => Some(
            AllocationStatus::parse(&raw)
                .ok_or_else(|| ApiError::InvalidInput(format!("未知分配状态: {}", raw)))?,
        ),
        None => None,
    };

    Ok(AllocationFilter {
        region,
        hospital: non_empty(&query.hospital),
        specialty: non_empty(&query.especialidade),
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_normalizes_labels() {
        let query = AllocationQuery {
            regiao: Some("Centro-Oeste".to_string()),
            status: Some("alocado".to_string()),
            hospital: Some("  ".to_string()),
            ..Default::default()
        };
        let filter = build_filter(&query).unwrap();
        assert_eq!(filter.region.as_deref(), Some("CENTRO_OESTE"));
        assert_eq!(filter.status, Some(AllocationStatus::Allocated));
        assert!(filter.hospital.is_none());
    }

    #[test]
    fn test_build_filter_rejects_unknown_status() {
        let query = AllocationQuery {
            status: Some("PERDIDO".to_string()),
            ..Default::default()
        };
        assert!(matches!(build_filter(&query), Err(ApiError::InvalidInput(_))));
    }
}
