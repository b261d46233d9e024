// ==========================================
// 医疗数据导入系统 - 医生分配引擎
// ==========================================
// 红线: 引擎不拼 SQL，输入为已加载的内存快照
// 规则:
// 1) 仅处理有效关系数 < 上限（默认 3）的在职医生
// 2) 候选医院: 专科集合包含医生专科（精确匹配，大小写不敏感）
// 3) 按输入顺序遍历候选（不按距离排序）
// 4) 已存在的 (医生, 医院) 对跳过
// 5) 市质心距离 ≤ 半径（默认 30 km）则建边
// 6) 医生达到上限即停止
// 不处理容量（医生路径不占床位）
// ==========================================

use crate::domain::allocation::{AllocationRunSummary, DoctorHospital};
use crate::domain::entities::{Doctor, Hospital};
use crate::engine::geo::{haversine_km, MunicipalityIndex};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DoctorAllocationRules {
    pub radius_km: f64,
    pub max_hospitals: usize,
}

impl Default for DoctorAllocationRules {
    fn default() -> Self {
        Self {
            radius_km: 30.0,
            max_hospitals: 3,
        }
    }
}

/// 已有分配状态快照
#[derive(Debug, Clone, Default)]
pub struct DoctorEdgeSnapshot {
    pub pairs: HashSet<(i64, i64)>,        // (doctor_id, hospital_id)
    pub active_counts: HashMap<i64, usize>, // doctor_id → 有效关系数
}

#[derive(Debug, Clone, Default)]
pub struct DoctorAllocationPlan {
    pub edges: Vec<DoctorHospital>,
    pub summary: AllocationRunSummary,
}

pub struct DoctorAllocator {
    rules: DoctorAllocationRules,
}

impl DoctorAllocator {
    pub fn new(rules: DoctorAllocationRules) -> Self {
        Self { rules }
    }

    /// 计算本轮新增的医生-医院关系
    #[instrument(skip_all, fields(doctors = doctors.len(), hospitals = hospitals.len()))]
    pub fn allocate(
        &self,
        doctors: &[Doctor],
        hospitals: &[Hospital],
        index: &MunicipalityIndex,
        snapshot: &DoctorEdgeSnapshot,
        now: DateTime<Utc>,
    ) -> DoctorAllocationPlan {
        let mut plan = DoctorAllocationPlan::default();
        let mut pairs = snapshot.pairs.clone();

        for doctor in doctors {
            if doctor.active == Some(false) {
                continue;
            }
            let mut count = snapshot.active_counts.get(&doctor.id).copied().unwrap_or(0);
            if count >= self.rules.max_hospitals {
                continue;
            }
            plan.summary.candidates += 1;

            let Some(origin) = index.point(doctor.municipality_code) else {
                debug!(crm = %doctor.crm, "医生所在市无坐标，跳过");
                plan.summary.unmatched += 1;
                continue;
            };

            let mut created_for_doctor = 0;
            for hospital in hospitals
                .iter()
                .filter(|h| h.offers_specialty(&doctor.specialty))
            {
                if count >= self.rules.max_hospitals {
                    break;
                }
                if pairs.contains(&(doctor.id, hospital.id)) {
                    continue;
                }
                let Some(target) = index.point(hospital.municipality_code) else {
                    continue;
                };

                let distance_km = haversine_km(origin, target);
                if distance_km > self.rules.radius_km {
                    continue;
                }

                pairs.insert((doctor.id, hospital.id));
                plan.edges.push(DoctorHospital {
                    doctor_id: doctor.id,
                    hospital_id: hospital.id,
                    distance_km,
                    active: true,
                    created_at: now,
                });
                count += 1;
                created_for_doctor += 1;
            }

            if created_for_doctor == 0 {
                plan.summary.unmatched += 1;
            }
        }

        plan.summary.edges_created = plan.edges.len();
        plan
    }
}
