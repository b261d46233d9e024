// ==========================================
// 医疗数据导入系统 - 分配关系 Repository
// ==========================================
// 职责:
// - doctor_hospital / patient_hospital 边的批量写入（单事务）
// - 分配器所需的现状快照（已有边、床位占用）
// - 患者分配查询视图、状态更新、统计
// 约束: (doctor_id, hospital_id) / (patient_id, hospital_id) UNIQUE，
//       写入使用 INSERT OR IGNORE，并发重复运行不会产生重复边
// ==========================================

use crate::db::{column_label, column_timestamp, SharedConnection};
use crate::domain::allocation::{
    AllocationFilter, AllocationStatistics, DoctorHospital, HospitalAllocationCount,
    PatientAllocationView, PatientHospital,
};
use crate::domain::types::{AllocationStatus, Region};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};

/// 统计中展示的医院数
pub const TOP_HOSPITALS_LIMIT: usize = 5;

const VIEW_SELECT: &str = r#"
    SELECT ph.id, ph.patient_id, p.name, p.cpf, p.cid10_code, c.description,
           ph.hospital_id, h.name, h.cnes_code, h.specialties,
           ph.specialty, ph.distance_km, ph.status, ph.allocated_at, ph.priority, ph.notes,
           pm.name, hm.name, s.region
    FROM patient_hospital ph
    JOIN patient p ON p.id = ph.patient_id
    JOIN hospital h ON h.id = ph.hospital_id
    LEFT JOIN cid10 c ON c.code = p.cid10_code
    LEFT JOIN municipality pm ON pm.ibge_code = p.municipality_code
    LEFT JOIN municipality hm ON hm.ibge_code = h.municipality_code
    LEFT JOIN state s ON s.uf = hm.uf
"#;

fn map_view_row(row: &Row<'_>) -> rusqlite::Result<PatientAllocationView> {
    Ok(PatientAllocationView {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        patient_name: row.get(2)?,
        patient_cpf: row.get(3)?,
        cid10_code: row.get(4)?,
        cid10_description: row.get(5)?,
        hospital_id: row.get(6)?,
        hospital_name: row.get(7)?,
        hospital_code: row.get(8)?,
        hospital_specialties: row.get(9)?,
        specialty: row.get(10)?,
        distance_km: row.get(11)?,
        status: column_label(row, 12, AllocationStatus::parse)?,
        allocated_at: column_timestamp(row, 13)?,
        priority: row.get(14)?,
        notes: row.get(15)?,
        patient_municipality: row.get(16)?,
        hospital_municipality: row.get(17)?,
        region: row.get(18)?,
    })
}

/// 过滤条件 → WHERE 子句 + 参数
fn build_filter(filter: &AllocationFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Some(region) = filter.region.as_deref().filter(|r| !r.trim().is_empty()) {
        let normalized = Region::parse(region)
            .map(|r| r.as_str().to_string())
            .unwrap_or_else(|| region.trim().to_uppercase());
        clauses.push("s.region = ?");
        values.push(Value::Text(normalized));
    }
    if let Some(hospital) = filter.hospital.as_deref().filter(|h| !h.trim().is_empty()) {
        clauses.push("(LOWER(h.name) LIKE ? OR h.cnes_code LIKE ?)");
        let pattern = format!("%{}%", hospital.trim().to_lowercase());
        values.push(Value::Text(pattern.clone()));
        values.push(Value::Text(pattern));
    }
    if let Some(specialty) = filter.specialty.as_deref().filter(|s| !s.trim().is_empty()) {
        clauses.push("LOWER(ph.specialty) LIKE ?");
        values.push(Value::Text(format!("%{}%", specialty.trim().to_lowercase())));
    }
    if let Some(status) = filter.status {
        clauses.push("ph.status = ?");
        values.push(Value::Text(status.as_str().to_string()));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

// ==========================================
// AllocationRepository
// ==========================================
pub struct AllocationRepository {
    conn: SharedConnection,
}

impl AllocationRepository {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    // ===== 医生 =====

    /// 已存在的 (doctor_id, hospital_id) 对（含失效边）
    pub fn load_doctor_pairs(&self) -> RepositoryResult<HashSet<(i64, i64)>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare("SELECT doctor_id, hospital_id FROM doctor_hospital")?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(pairs)
    }

    /// 每名医生的有效边数
    pub fn active_doctor_edge_counts(&self) -> RepositoryResult<HashMap<i64, usize>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(
            "SELECT doctor_id, COUNT(*) FROM doctor_hospital WHERE active = 1 GROUP BY doctor_id",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?;

        let mut counts = HashMap::new();
        for row in rows {
            let (doctor_id, count) = row?;
            counts.insert(doctor_id, count as usize);
        }
        Ok(counts)
    }

    /// 批量写入医生边（单事务，重复对忽略）
    ///
    /// # 返回
    /// - 实际新建的边数
    pub fn insert_doctor_edges(&self, edges: &[DoctorHospital]) -> RepositoryResult<usize> {
        if edges.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.lock()?;
        let tx = conn.unchecked_transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO doctor_hospital (doctor_id, hospital_id, distance_km, active, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            for edge in edges {
                inserted += stmt.execute(params![
                    edge.doctor_id,
                    edge.hospital_id,
                    edge.distance_km,
                    edge.active as i32,
                    edge.created_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    pub fn list_doctor_edges(&self, doctor_id: i64) -> RepositoryResult<Vec<DoctorHospital>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT doctor_id, hospital_id, distance_km, active, created_at
            FROM doctor_hospital WHERE doctor_id = ?1 ORDER BY id ASC
            "#,
        )?;
        let edges = stmt
            .query_map(params![doctor_id], |row| {
                let active: i64 = row.get(3)?;
                Ok(DoctorHospital {
                    doctor_id: row.get(0)?,
                    hospital_id: row.get(1)?,
                    distance_km: row.get(2)?,
                    active: active != 0,
                    created_at: column_timestamp(row, 4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(edges)
    }

    pub fn count_doctor_edges(&self) -> RepositoryResult<i64> {
        let conn = self.conn.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM doctor_hospital", [], |row| row.get(0))?;
        Ok(count)
    }

    // ===== 患者 =====

    /// 已持有占床分配的患者
    pub fn patients_with_open_allocation(&self) -> RepositoryResult<HashSet<i64>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT patient_id FROM patient_hospital WHERE status IN (?1, ?2)",
        )?;
        let ids = stmt
            .query_map(
                params![
                    AllocationStatus::Allocated.as_str(),
                    AllocationStatus::InTreatment.as_str()
                ],
                |row| row.get(0),
            )?
            .collect::<Result<HashSet<i64>, _>>()?;
        Ok(ids)
    }

    /// 已存在的 (patient_id, hospital_id) 对（任意状态）
    pub fn load_patient_pairs(&self) -> RepositoryResult<HashSet<(i64, i64)>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare("SELECT patient_id, hospital_id FROM patient_hospital")?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<HashSet<(i64, i64)>, _>>()?;
        Ok(pairs)
    }

    /// 每家医院的占床数（ALLOCATED + IN_TREATMENT）
    pub fn bed_usage(&self) -> RepositoryResult<HashMap<i64, i64>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT hospital_id, COUNT(*) FROM patient_hospital
            WHERE status IN (?1, ?2)
            GROUP BY hospital_id
            "#,
        )?;
        let rows = stmt.query_map(
            params![
                AllocationStatus::Allocated.as_str(),
                AllocationStatus::InTreatment.as_str()
            ],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;

        let mut usage = HashMap::new();
        for row in rows {
            let (hospital_id, used) = row?;
            usage.insert(hospital_id, used);
        }
        Ok(usage)
    }

    /// 批量写入患者分配（单事务，重复对忽略）
    pub fn insert_patient_allocations(&self, edges: &[PatientHospital]) -> RepositoryResult<usize> {
        if edges.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.lock()?;
        let tx = conn.unchecked_transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO patient_hospital (
                    patient_id, hospital_id, specialty, distance_km, status, priority, notes, allocated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )?;
            for edge in edges {
                inserted += stmt.execute(params![
                    edge.patient_id,
                    edge.hospital_id,
                    edge.specialty,
                    edge.distance_km,
                    edge.status.as_str(),
                    edge.priority,
                    edge.notes,
                    edge.allocated_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    // ===== 查询视图 =====

    /// 分页查询（page 从 1 开始）
    ///
    /// # 返回
    /// - (当前页数据, 过滤后总数)
    pub fn list_allocations(
        &self,
        filter: &AllocationFilter,
        page: usize,
        page_size: usize,
    ) -> RepositoryResult<(Vec<PatientAllocationView>, i64)> {
        let (where_clause, values) = build_filter(filter);
        let conn = self.conn.lock()?;

        let count_sql = format!(
            r#"
            SELECT COUNT(*)
            FROM patient_hospital ph
            JOIN patient p ON p.id = ph.patient_id
            JOIN hospital h ON h.id = ph.hospital_id
            LEFT JOIN municipality hm ON hm.ibge_code = h.municipality_code
            LEFT JOIN state s ON s.uf = hm.uf
            {}
            "#,
            where_clause
        );
        let total: i64 = conn.query_row(&count_sql, params_from_iter(values.iter()), |row| row.get(0))?;

        let page = page.max(1);
        let offset = (page - 1) * page_size;
        let list_sql = format!(
            "{}{} ORDER BY ph.allocated_at DESC, ph.id DESC LIMIT {} OFFSET {}",
            VIEW_SELECT, where_clause, page_size, offset
        );
        let mut stmt = conn.prepare(&list_sql)?;
        let items = stmt
            .query_map(params_from_iter(values.iter()), map_view_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((items, total))
    }

    pub fn find_by_patient(&self, patient_id: i64) -> RepositoryResult<Vec<PatientAllocationView>> {
        let conn = self.conn.lock()?;
        let sql = format!("{} WHERE ph.patient_id = ?1 ORDER BY ph.allocated_at DESC, ph.id DESC", VIEW_SELECT);
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params![patient_id], map_view_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn find_view_by_id(&self, allocation_id: i64) -> RepositoryResult<PatientAllocationView> {
        let conn = self.conn.lock()?;
        let sql = format!("{} WHERE ph.id = ?1", VIEW_SELECT);
        conn.query_row(&sql, params![allocation_id], map_view_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => RepositoryError::NotFound {
                    entity: "PatientAllocation".to_string(),
                    id: allocation_id.to_string(),
                },
                other => other.into(),
            })
    }

    /// 更新分配状态（notes 为 None 时保留原备注）
    ///
    /// 从不占床状态（DISCHARGED / CANCELLED）恢复为占床状态时，同一事务内校验:
    /// - 医院占床数 < total_beds
    /// - 该患者没有其他占床分配
    ///
    /// # 返回
    /// - Err(NotFound): 分配记录不存在
    /// - Err(FieldValueError): 恢复占床会超出床位或造成重复占床
    pub fn update_status(
        &self,
        allocation_id: i64,
        status: AllocationStatus,
        notes: Option<&str>,
    ) -> RepositoryResult<()> {
        let conn = self.conn.lock()?;
        let tx = conn.unchecked_transaction()?;

        let current = tx
            .query_row(
                "SELECT patient_id, hospital_id, status FROM patient_hospital WHERE id = ?1",
                params![allocation_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        column_label(row, 2, AllocationStatus::parse)?,
                    ))
                },
            )
            .optional()?;
        let Some((patient_id, hospital_id, current_status)) = current else {
            return Err(RepositoryError::NotFound {
                entity: "PatientAllocation".to_string(),
                id: allocation_id.to_string(),
            });
        };

        if status.occupies_bed() && !current_status.occupies_bed() {
            let (used, total_beds): (i64, i64) = tx.query_row(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM patient_hospital
                     WHERE hospital_id = ?1 AND status IN (?2, ?3)),
                    total_beds
                FROM hospital WHERE id = ?1
                "#,
                params![
                    hospital_id,
                    AllocationStatus::Allocated.as_str(),
                    AllocationStatus::InTreatment.as_str()
                ],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            if used >= total_beds {
                return Err(RepositoryError::FieldValueError {
                    field: "status".to_string(),
                    message: format!(
                        "医院 {} 无空余床位 ({}/{})，不能恢复为 {}",
                        hospital_id, used, total_beds, status
                    ),
                });
            }

            let open_elsewhere: i64 = tx.query_row(
                r#"
                SELECT COUNT(*) FROM patient_hospital
                WHERE patient_id = ?1 AND id <> ?2 AND status IN (?3, ?4)
                "#,
                params![
                    patient_id,
                    allocation_id,
                    AllocationStatus::Allocated.as_str(),
                    AllocationStatus::InTreatment.as_str()
                ],
                |row| row.get(0),
            )?;
            if open_elsewhere > 0 {
                return Err(RepositoryError::FieldValueError {
                    field: "status".to_string(),
                    message: format!("患者 {} 已有其他占床分配，不能恢复为 {}", patient_id, status),
                });
            }
        }

        tx.execute(
            "UPDATE patient_hospital SET status = ?2, notes = COALESCE(?3, notes) WHERE id = ?1",
            params![allocation_id, status.as_str(), notes],
        )?;
        tx.commit()?;
        Ok(())
    }

    // ===== 统计 =====

    pub fn statistics(&self) -> RepositoryResult<AllocationStatistics> {
        let conn = self.conn.lock()?;

        let (total, average_distance_km): (i64, f64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(AVG(distance_km), 0.0) FROM patient_hospital",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let mut by_status_map: HashMap<String, i64> = HashMap::new();
        {
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM patient_hospital GROUP BY status")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            for row in rows {
                let (status, count) = row?;
                by_status_map.insert(status, count);
            }
        }
        // 所有状态都出现（无数据补 0），顺序固定
        let by_status = AllocationStatus::ALL
            .iter()
            .map(|s| (*s, by_status_map.get(s.as_str()).copied().unwrap_or(0)))
            .collect();

        let mut stmt = conn.prepare(
            r#"
            SELECT ph.hospital_id, h.name, COUNT(*) AS n
            FROM patient_hospital ph
            JOIN hospital h ON h.id = ph.hospital_id
            GROUP BY ph.hospital_id, h.name
            ORDER BY n DESC, ph.hospital_id ASC
            LIMIT ?1
            "#,
        )?;
        let top_hospitals = stmt
            .query_map(params![TOP_HOSPITALS_LIMIT as i64], |row| {
                Ok(HospitalAllocationCount {
                    hospital_id: row.get(0)?,
                    hospital_name: row.get(1)?,
                    allocations: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AllocationStatistics {
            total,
            by_status,
            average_distance_km,
            top_hospitals,
        })
    }
}
