// ==========================================
// 医疗数据导入系统 - 专科地理分配器（编排）
// ==========================================
// 流程: 加载全量快照 → 引擎计算 → 单事务提交
// 并发:
// - 进程内互斥锁串行化分配运行
// - 存储层 UNIQUE(doctor_id, hospital_id) / UNIQUE(patient_id, hospital_id) + INSERT OR IGNORE
// ==========================================

use crate::config::PipelineConfigReader;
use crate::domain::allocation::AllocationRunSummary;
use crate::engine::doctor_allocator::{DoctorAllocationRules, DoctorAllocator, DoctorEdgeSnapshot};
use crate::engine::geo::MunicipalityIndex;
use crate::engine::patient_allocator::{BedSnapshot, Cid10Index, PatientAllocator};
use crate::repository::error::RepositoryResult;
use crate::repository::{AllocationRepository, Cid10Repository, MasterDataRepository};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument};

/// 一次完整分配（医生 → 患者）的汇总
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationReport {
    pub doctors: AllocationRunSummary,
    pub patients: AllocationRunSummary,
}

pub struct SpecialtyGeoAllocator {
    master_repo: Arc<MasterDataRepository>,
    allocation_repo: Arc<AllocationRepository>,
    cid10_repo: Arc<Cid10Repository>,
    config: Arc<dyn PipelineConfigReader>,
    run_lock: Mutex<()>,
}

impl SpecialtyGeoAllocator {
    pub fn new(
        master_repo: Arc<MasterDataRepository>,
        allocation_repo: Arc<AllocationRepository>,
        cid10_repo: Arc<Cid10Repository>,
        config: Arc<dyn PipelineConfigReader>,
    ) -> Self {
        Self {
            master_repo,
            allocation_repo,
            cid10_repo,
            config,
            run_lock: Mutex::new(()),
        }
    }

    /// 医生分配
    #[instrument(skip(self))]
    pub async fn allocate_doctors(&self) -> RepositoryResult<AllocationRunSummary> {
        let _guard = self.run_lock.lock().await;
        self.allocate_doctors_locked().await
    }

    /// 患者分配（容量约束）
    #[instrument(skip(self))]
    pub async fn allocate_patients(&self) -> RepositoryResult<AllocationRunSummary> {
        let _guard = self.run_lock.lock().await;
        self.allocate_patients_locked().await
    }

    /// 先医生后患者，整体持锁
    #[instrument(skip(self))]
    pub async fn run_all(&self) -> RepositoryResult<AllocationReport> {
        let _guard = self.run_lock.lock().await;
        let doctors = self.allocate_doctors_locked().await?;
        let patients = self.allocate_patients_locked().await?;
        Ok(AllocationReport { doctors, patients })
    }

    async fn allocate_doctors_locked(&self) -> RepositoryResult<AllocationRunSummary> {
        let rules = DoctorAllocationRules {
            radius_km: self.config.get_doctor_radius_km().await?,
            max_hospitals: self.config.get_doctor_max_hospitals().await?,
        };

        let doctors = self.master_repo.load_doctors()?;
        let hospitals = self.master_repo.load_hospitals()?;
        let index = MunicipalityIndex::new(self.master_repo.load_municipality_coords()?);
        let snapshot = DoctorEdgeSnapshot {
            pairs: self.allocation_repo.load_doctor_pairs()?,
            active_counts: self.allocation_repo.active_doctor_edge_counts()?,
        };

        let plan = DoctorAllocator::new(rules).allocate(&doctors, &hospitals, &index, &snapshot, Utc::now());
        let inserted = self.allocation_repo.insert_doctor_edges(&plan.edges)?;

        let summary = AllocationRunSummary {
            edges_created: inserted,
            ..plan.summary
        };
        info!(
            candidates = summary.candidates,
            edges_created = summary.edges_created,
            unmatched = summary.unmatched,
            radius_km = rules.radius_km,
            "医生分配完成"
        );
        Ok(summary)
    }

    async fn allocate_patients_locked(&self) -> RepositoryResult<AllocationRunSummary> {
        let radius_km = self.config.get_patient_radius_km().await?;

        let patients = self.master_repo.load_patients()?;
        let hospitals = self.master_repo.load_hospitals()?;
        let index = MunicipalityIndex::new(self.master_repo.load_municipality_coords()?);
        let cid10 = Cid10Index::new(self.cid10_repo.load_all()?);
        let beds = BedSnapshot {
            open_patients: self.allocation_repo.patients_with_open_allocation()?,
            usage: self.allocation_repo.bed_usage()?,
            linked_pairs: self.allocation_repo.load_patient_pairs()?,
        };

        let plan = PatientAllocator::new(radius_km).allocate(
            &patients,
            &hospitals,
            &index,
            &cid10,
            &beds,
            Utc::now(),
        );
        let inserted = self.allocation_repo.insert_patient_allocations(&plan.edges)?;

        let summary = AllocationRunSummary {
            edges_created: inserted,
            ..plan.summary
        };
        info!(
            candidates = summary.candidates,
            edges_created = summary.edges_created,
            unmatched = summary.unmatched,
            radius_km,
            "患者分配完成"
        );
        Ok(summary)
    }
}
