// ==========================================
// 医疗数据导入系统 - 主数据 Repository
// ==========================================
// 职责:
// - 映射实体批量落库（单事务，INSERT OR IGNORE 自然键去重）
// - 分配器输入加载（医生/医院/患者/市质心）
// 红线: Repository 不含业务规则，只做数据 CRUD
// ==========================================

use crate::db::SharedConnection;
use crate::domain::entities::{Doctor, Hospital, Municipality, Patient, State};
use crate::domain::types::{HospitalType, Sex};
use crate::repository::error::RepositoryResult;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use std::collections::HashMap;

// ==========================================
// PersistOutcome - 批量落库结果
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    pub inserted: usize,
    pub duplicated: usize,
}

// ==========================================
// EntityPersister Trait
// ==========================================
// 用途: 字段映射引擎的批量落库出口
// 语义: 整批原子；任一失败整批回滚，不做部分提交
// 实现者: MasterDataRepository（独立事务）/ ImportCommit（导入提交事务内的保存点）
pub trait EntityPersister<E> {
    fn persist_batch(&self, job_id: &str, entities: &[E]) -> RepositoryResult<PersistOutcome>;
}

// ==========================================
// PersistableEntity - 实体 → INSERT 参数
// ==========================================
pub trait PersistableEntity {
    const INSERT_SQL: &'static str;

    fn to_values(&self, job_id: &str) -> Vec<Value>;
}

fn opt_text(v: &Option<String>) -> Value {
    v.clone().map(Value::Text).unwrap_or(Value::Null)
}

fn opt_int<T: Into<i64> + Copy>(v: Option<T>) -> Value {
    v.map(|x| Value::Integer(x.into())).unwrap_or(Value::Null)
}

fn opt_bool(v: Option<bool>) -> Value {
    v.map(|b| Value::Integer(b as i64)).unwrap_or(Value::Null)
}

impl PersistableEntity for State {
    const INSERT_SQL: &'static str =
        "INSERT OR IGNORE INTO state (code, name, uf, region, import_job_id) VALUES (?1, ?2, ?3, ?4, ?5)";

    fn to_values(&self, job_id: &str) -> Vec<Value> {
        vec![
            Value::Integer(self.code),
            Value::Text(self.name.clone()),
            Value::Text(self.uf.clone()),
            self.region
                .map(|r| Value::Text(r.as_str().to_string()))
                .unwrap_or(Value::Null),
            Value::Text(job_id.to_string()),
        ]
    }
}

impl PersistableEntity for Municipality {
    const INSERT_SQL: &'static str = r#"
        INSERT OR IGNORE INTO municipality (
            ibge_code, name, uf, latitude, longitude, population, is_capital, import_job_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
    "#;

    fn to_values(&self, job_id: &str) -> Vec<Value> {
        vec![
            Value::Integer(self.ibge_code),
            Value::Text(self.name.clone()),
            Value::Text(self.uf.clone()),
            Value::Real(self.latitude),
            Value::Real(self.longitude),
            opt_int(self.population),
            opt_bool(self.is_capital),
            Value::Text(job_id.to_string()),
        ]
    }
}

impl PersistableEntity for Hospital {
    const INSERT_SQL: &'static str = r#"
        INSERT OR IGNORE INTO hospital (
            cnes_code, name, municipality_code, specialties, total_beds,
            hospital_type, phone, import_job_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
    "#;

    fn to_values(&self, job_id: &str) -> Vec<Value> {
        vec![
            Value::Text(self.cnes_code.clone()),
            Value::Text(self.name.clone()),
            Value::Integer(self.municipality_code),
            Value::Text(self.specialties.clone()),
            Value::Integer(self.total_beds as i64),
            self.hospital_type
                .map(|t| Value::Text(t.as_str().to_string()))
                .unwrap_or(Value::Null),
            opt_text(&self.phone),
            Value::Text(job_id.to_string()),
        ]
    }
}

impl PersistableEntity for Doctor {
    const INSERT_SQL: &'static str = r#"
        INSERT OR IGNORE INTO doctor (
            crm, name, specialty, municipality_code, phone, active, import_job_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
    "#;

    fn to_values(&self, job_id: &str) -> Vec<Value> {
        vec![
            Value::Text(self.crm.clone()),
            Value::Text(self.name.clone()),
            Value::Text(self.specialty.clone()),
            Value::Integer(self.municipality_code),
            opt_text(&self.phone),
            opt_bool(self.active),
            Value::Text(job_id.to_string()),
        ]
    }
}

impl PersistableEntity for Patient {
    const INSERT_SQL: &'static str = r#"
        INSERT OR IGNORE INTO patient (
            cpf, name, sex, age, cid10_code, municipality_code, priority, notes, import_job_id
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
    "#;

    fn to_values(&self, job_id: &str) -> Vec<Value> {
        vec![
            Value::Text(self.cpf.clone()),
            Value::Text(self.name.clone()),
            self.sex
                .map(|s| Value::Text(s.as_str().to_string()))
                .unwrap_or(Value::Null),
            opt_int(self.age),
            Value::Text(self.cid10_code.clone()),
            Value::Integer(self.municipality_code),
            opt_int(self.priority),
            opt_text(&self.notes),
            Value::Text(job_id.to_string()),
        ]
    }
}

// ==========================================
// MasterDataRepository
// ==========================================
pub struct MasterDataRepository {
    conn: SharedConnection,
}

impl MasterDataRepository {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// 全部医院（按 id 升序，即输入顺序）
    pub fn load_hospitals(&self) -> RepositoryResult<Vec<Hospital>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, cnes_code, name, municipality_code, specialties, total_beds, hospital_type, phone
            FROM hospital ORDER BY id ASC
            "#,
        )?;
        let hospitals = stmt
            .query_map([], |row| {
                let hospital_type: Option<String> = row.get(6)?;
                Ok(Hospital {
                    id: row.get(0)?,
                    cnes_code: row.get(1)?,
                    name: row.get(2)?,
                    municipality_code: row.get(3)?,
                    specialties: row.get(4)?,
                    total_beds: row.get(5)?,
                    hospital_type: hospital_type.as_deref().and_then(HospitalType::parse),
                    phone: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(hospitals)
    }

    /// 全部医生（按 id 升序）
    pub fn load_doctors(&self) -> RepositoryResult<Vec<Doctor>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, crm, name, specialty, municipality_code, phone, active FROM doctor ORDER BY id ASC",
        )?;
        let doctors = stmt
            .query_map([], |row| {
                let active: Option<i64> = row.get(6)?;
                Ok(Doctor {
                    id: row.get(0)?,
                    crm: row.get(1)?,
                    name: row.get(2)?,
                    specialty: row.get(3)?,
                    municipality_code: row.get(4)?,
                    phone: row.get(5)?,
                    active: active.map(|v| v != 0),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(doctors)
    }

    /// 全部患者（按 id 升序）
    pub fn load_patients(&self) -> RepositoryResult<Vec<Patient>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, cpf, name, sex, age, cid10_code, municipality_code, priority, notes
            FROM patient ORDER BY id ASC
            "#,
        )?;
        let patients = stmt
            .query_map([], |row| {
                let sex: Option<String> = row.get(3)?;
                Ok(Patient {
                    id: row.get(0)?,
                    cpf: row.get(1)?,
                    name: row.get(2)?,
                    sex: sex.as_deref().and_then(Sex::parse),
                    age: row.get(4)?,
                    cid10_code: row.get(5)?,
                    municipality_code: row.get(6)?,
                    priority: row.get(7)?,
                    notes: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(patients)
    }

    /// 市质心索引: ibge_code → (lat, lon)
    pub fn load_municipality_coords(&self) -> RepositoryResult<HashMap<i64, (f64, f64)>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare("SELECT ibge_code, latitude, longitude FROM municipality")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, (row.get::<_, f64>(1)?, row.get::<_, f64>(2)?)))
        })?;

        let mut coords = HashMap::new();
        for row in rows {
            let (code, point) = row?;
            coords.insert(code, point);
        }
        Ok(coords)
    }

    pub fn count_rows(&self, table: MasterTable) -> RepositoryResult<i64> {
        let conn = self.conn.lock()?;
        let sql = format!("SELECT COUNT(*) FROM {}", table.as_str());
        let count = conn.query_row(&sql, params![], |row| row.get(0))?;
        Ok(count)
    }
}

/// 主数据表（计数用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterTable {
    State,
    Municipality,
    Hospital,
    Doctor,
    Patient,
}

impl MasterTable {
    fn as_str(&self) -> &'static str {
        match self {
            MasterTable::State => "state",
            MasterTable::Municipality => "municipality",
            MasterTable::Hospital => "hospital",
            MasterTable::Doctor => "doctor",
            MasterTable::Patient => "patient",
        }
    }
}

/// 逐条 INSERT OR IGNORE；未命中的行计为重复
pub(crate) fn insert_entities<E: PersistableEntity>(
    conn: &Connection,
    job_id: &str,
    entities: &[E],
) -> RepositoryResult<PersistOutcome> {
    let mut outcome = PersistOutcome::default();
    let mut stmt = conn.prepare_cached(E::INSERT_SQL)?;
    for entity in entities {
        let affected = stmt.execute(params_from_iter(entity.to_values(job_id)))?;
        if affected > 0 {
            outcome.inserted += 1;
        } else {
            outcome.duplicated += 1;
        }
    }
    Ok(outcome)
}

impl<E: PersistableEntity> EntityPersister<E> for MasterDataRepository {
    fn persist_batch(&self, job_id: &str, entities: &[E]) -> RepositoryResult<PersistOutcome> {
        let conn = self.conn.lock()?;
        let tx = conn.unchecked_transaction()?;
        let outcome = insert_entities(&tx, job_id, entities)?;
        // 提交失败时事务随 drop 回滚
        tx.commit()?;
        Ok(outcome)
    }
}
