// ==========================================
// 医疗数据导入系统 - 患者分配引擎
// ==========================================
// 红线: 引擎不拼 SQL，输入为已加载的内存快照
// 规则:
// 1) 已持有占床分配（ALLOCATED / IN_TREATMENT）的患者跳过；已有关系的 (患者, 医院) 对不再候选
// 2) 诊断编码 → 候选专科（主专科优先，priority 升序；未命中回退三位类目）
// 3) 候选医院: 提供任一候选专科，且有剩余床位
// 4) 选距离最近且在半径内的医院；同距离按专科顺位、医院 id
// 5) 建边后本轮内存占床数 +1（容量约束对同批次生效）
// ==========================================

use crate::domain::allocation::{AllocationRunSummary, PatientHospital};
use crate::domain::entities::{Cid10Specialty, Hospital, Patient};
use crate::domain::types::AllocationStatus;
use crate::engine::geo::{haversine_km, MunicipalityIndex};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, instrument};

// ==========================================
// Cid10Index - 诊断编码 → 专科（内存）
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct Cid10Index {
    by_code: HashMap<String, Vec<Cid10Specialty>>,
}

impl Cid10Index {
    /// 各编码下的列表须已按 (is_primary DESC, priority ASC) 排序
    pub fn new(by_code: HashMap<String, Vec<Cid10Specialty>>) -> Self {
        Self { by_code }
    }

    pub fn specialties_for(&self, cid10_code: &str) -> &[Cid10Specialty] {
        let code = cid10_code.trim().to_uppercase();
        if let Some(list) = self.by_code.get(&code) {
            return list;
        }
        let category: String = code.chars().filter(|c| *c != '.').take(3).collect();
        self.by_code
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// 已有占床状态快照
#[derive(Debug, Clone, Default)]
pub struct BedSnapshot {
    pub open_patients: HashSet<i64>,       // 已持有占床分配的患者
    pub usage: HashMap<i64, i64>,          // hospital_id → 占床数
    pub linked_pairs: HashSet<(i64, i64)>, // 任意状态的 (patient_id, hospital_id)
}

#[derive(Debug, Clone, Default)]
pub struct PatientAllocationPlan {
    pub edges: Vec<PatientHospital>,
    pub summary: AllocationRunSummary,
}

pub struct PatientAllocator {
    radius_km: f64,
}

struct Candidate<'a> {
    hospital: &'a Hospital,
    specialty: &'a str,
    rank: usize,
    distance_km: f64,
}

impl PatientAllocator {
    pub fn new(radius_km: f64) -> Self {
        Self { radius_km }
    }

    #[instrument(skip_all, fields(patients = patients.len(), hospitals = hospitals.len()))]
    pub fn allocate(
        &self,
        patients: &[Patient],
        hospitals: &[Hospital],
        index: &MunicipalityIndex,
        cid10: &Cid10Index,
        beds: &BedSnapshot,
        now: DateTime<Utc>,
    ) -> PatientAllocationPlan {
        let mut plan = PatientAllocationPlan::default();
        let mut usage = beds.usage.clone();

        for patient in patients {
            if beds.open_patients.contains(&patient.id) {
                continue;
            }
            plan.summary.candidates += 1;

            let specialties = cid10.specialties_for(&patient.cid10_code);
            let origin = index.point(patient.municipality_code);
            let (Some(origin), false) = (origin, specialties.is_empty()) else {
                debug!(cpf = %patient.cpf, cid10 = %patient.cid10_code, "无坐标或无对应专科，跳过");
                plan.summary.unmatched += 1;
                continue;
            };

            let mut best: Option<Candidate<'_>> = None;
            for hospital in hospitals {
                let used = usage.get(&hospital.id).copied().unwrap_or(0);
                if used >= i64::from(hospital.total_beds)
                    || beds.linked_pairs.contains(&(patient.id, hospital.id))
                {
                    continue;
                }
                let Some((rank, specialty)) = specialties
                    .iter()
                    .enumerate()
                    .find(|(_, s)| hospital.offers_specialty(&s.specialty))
                else {
                    continue;
                };
                let Some(target) = index.point(hospital.municipality_code) else {
                    continue;
                };
                let distance_km = haversine_km(origin, target);
                if distance_km > self.radius_km {
                    continue;
                }

                let candidate = Candidate {
                    hospital,
                    specialty: &specialty.specialty,
                    rank,
                    distance_km,
                };
                if best.as_ref().map_or(true, |b| is_better(&candidate, b)) {
                    best = Some(candidate);
                }
            }

            match best {
                Some(chosen) => {
                    *usage.entry(chosen.hospital.id).or_insert(0) += 1;
                    plan.edges.push(PatientHospital {
                        id: 0,
                        patient_id: patient.id,
                        hospital_id: chosen.hospital.id,
                        specialty: chosen.specialty.to_string(),
                        distance_km: chosen.distance_km,
                        status: AllocationStatus::Allocated,
                        priority: patient.priority.unwrap_or(0),
                        notes: None,
                        allocated_at: now,
                    });
                }
                None => plan.summary.unmatched += 1,
            }
        }

        plan.summary.edges_created = plan.edges.len();
        plan
    }
}

fn is_better(candidate: &Candidate<'_>, current: &Candidate<'_>) -> bool {
    candidate
        .distance_km
        .total_cmp(&current.distance_km)
        .then(candidate.rank.cmp(&current.rank))
        .then(candidate.hospital.id.cmp(&current.hospital.id))
        .is_lt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient(id: i64, cid10: &str) -> Patient {
        Patient {
            id,
            cpf: format!("{:011}", id),
            name: format!("Paciente {}", id),
            cid10_code: cid10.to_string(),
            municipality_code: 1,
            ..Default::default()
        }
    }

    fn hospital(id: i64, specialties: &str, municipality_code: i64, beds: i32) -> Hospital {
        Hospital {
            id,
            cnes_code: format!("H{}", id),
            name: format!("Hospital {}", id),
            municipality_code,
            specialties: specialties.to_string(),
            total_beds: beds,
            ..Default::default()
        }
    }

    fn index() -> MunicipalityIndex {
        MunicipalityIndex::new(HashMap::from([
            (1, (0.0, 0.0)),
            (2, (0.0, 0.05)),  // 约 5.6 km
            (3, (0.0, 0.10)),  // 约 11.1 km
            (4, (0.0, 0.50)),  // 约 55.6 km
        ]))
    }

    fn cid10() -> Cid10Index {
        let mapping = |code: &str, specialty: &str, priority: i32, is_primary: bool| Cid10Specialty {
            cid10_code: code.to_string(),
            specialty: specialty.to_string(),
            priority,
            is_primary,
        };
        Cid10Index::new(HashMap::from([(
            "I21".to_string(),
            vec![
                mapping("I21", "Cardiologia", 1, true),
                mapping("I21", "Clinica Medica", 2, false),
            ],
        )]))
    }

    #[test]
    fn test_nearest_hospital_with_capacity() {
        let allocator = PatientAllocator::new(30.0);
        let hospitals = vec![
            hospital(10, "Cardiologia", 3, 5),
            hospital(11, "Clinica Medica", 2, 5),
            hospital(12, "Cardiologia", 4, 5),
        ];
        let plan = allocator.allocate(
            &[patient(1, "I21.0")],
            &hospitals,
            &index(),
            &cid10(),
            &BedSnapshot::default(),
            Utc::now(),
        );
        assert_eq!(plan.edges.len(), 1);
        assert_eq!(plan.edges[0].hospital_id, 11);
        assert_eq!(plan.edges[0].specialty, "Clinica Medica");
        assert_eq!(plan.edges[0].status, AllocationStatus::Allocated);
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let allocator = PatientAllocator::new(30.0);
        let hospitals = vec![hospital(10, "Cardiologia", 2, 2)];
        let patients: Vec<Patient> = (1..=4).map(|id| patient(id, "I21")).collect();
        let beds = BedSnapshot {
            usage: HashMap::from([(10, 1)]),
            ..Default::default()
        };

        let plan = allocator.allocate(&patients, &hospitals, &index(), &cid10(), &beds, Utc::now());
        assert_eq!(plan.edges.len(), 1);
        assert_eq!(plan.edges[0].patient_id, 1);
        assert_eq!(plan.summary.unmatched, 3);
    }

    #[test]
    fn test_open_patients_and_unknown_codes_skipped() {
        let allocator = PatientAllocator::new(30.0);
        let hospitals = vec![hospital(10, "Cardiologia", 2, 10)];
        let beds = BedSnapshot {
            open_patients: HashSet::from([1]),
            ..Default::default()
        };
        let plan = allocator.allocate(
            &[patient(1, "I21"), patient(2, "Z99")],
            &hospitals,
            &index(),
            &cid10(),
            &beds,
            Utc::now(),
        );
        assert!(plan.edges.is_empty());
        assert_eq!(plan.summary.candidates, 1);
        assert_eq!(plan.summary.unmatched, 1);
    }

    #[test]
    fn test_discharged_patient_not_relinked_to_same_hospital() {
        let allocator = PatientAllocator::new(30.0);
        let hospitals = vec![hospital(10, "Cardiologia", 2, 1), hospital(11, "Cardiologia", 3, 1)];
        let beds = BedSnapshot {
            linked_pairs: HashSet::from([(1, 10)]),
            ..Default::default()
        };
        let plan = allocator.allocate(
            &[patient(1, "I21"), patient(2, "I21")],
            &hospitals,
            &index(),
            &cid10(),
            &beds,
            Utc::now(),
        );
        assert_eq!(plan.edges.len(), 2);
        assert_eq!((plan.edges[0].patient_id, plan.edges[0].hospital_id), (1, 11));
        assert_eq!((plan.edges[1].patient_id, plan.edges[1].hospital_id), (2, 10));
    }
}
