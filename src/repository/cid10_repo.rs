// ==========================================
// 医疗数据导入系统 - CID10 → 专科 查找表 Repository
// ==========================================
// 职责: 诊断编码对应专科的只读查询 + 静态种子数据
// 排序: 主专科优先，其次 priority 升序
// ==========================================

use crate::db::SharedConnection;
use crate::domain::entities::Cid10Specialty;
use crate::repository::error::RepositoryResult;
use rusqlite::params;
use std::collections::HashMap;

/// 默认种子: (CID10, 描述, [(专科, 优先级, 是否主专科)])
const DEFAULT_CID10_SPECIALTIES: &[(&str, &str, &[(&str, i32, bool)])] = &[
    ("I10", "Hipertensão essencial", &[("Cardiologia", 1, true), ("Clínica Médica", 2, false)]),
    ("I21", "Infarto agudo do miocárdio", &[("Cardiologia", 1, true)]),
    ("I63", "Infarto cerebral", &[("Neurologia", 1, true), ("Clínica Médica", 2, false)]),
    ("J18", "Pneumonia", &[("Pneumologia", 1, true), ("Clínica Médica", 2, false)]),
    ("S72", "Fratura do fêmur", &[("Ortopedia", 1, true)]),
    ("C50", "Neoplasia maligna da mama", &[("Oncologia", 1, true), ("Mastologia", 2, false)]),
    ("E11", "Diabetes mellitus tipo 2", &[("Endocrinologia", 1, true), ("Clínica Médica", 2, false)]),
    ("N18", "Doença renal crônica", &[("Nefrologia", 1, true)]),
    ("O80", "Parto único espontâneo", &[("Obstetrícia", 1, true)]),
    ("F32", "Episódio depressivo", &[("Psiquiatria", 1, true)]),
];

pub struct Cid10Repository {
    conn: SharedConnection,
}

impl Cid10Repository {
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }

    /// 写入默认种子（幂等）
    ///
    /// # 返回
    /// - 新写入的 cid10_specialty 行数
    pub fn seed_default_cid10_specialties(&self) -> RepositoryResult<usize> {
        let conn = self.conn.lock()?;
        let tx = conn.unchecked_transaction()?;

        let mut inserted = 0;
        for (code, description, specialties) in DEFAULT_CID10_SPECIALTIES {
            tx.execute(
                "INSERT OR IGNORE INTO cid10 (code, description) VALUES (?1, ?2)",
                params![code, description],
            )?;
            for (specialty, priority, is_primary) in specialties.iter() {
                inserted += tx.execute(
                    r#"
                    INSERT OR IGNORE INTO cid10_specialty (cid10_code, specialty, priority, is_primary)
                    VALUES (?1, ?2, ?3, ?4)
                    "#,
                    params![code, specialty, priority, *is_primary as i32],
                )?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    pub fn upsert_mapping(&self, mapping: &Cid10Specialty) -> RepositoryResult<()> {
        let conn = self.conn.lock()?;
        conn.execute(
            r#"
            INSERT INTO cid10_specialty (cid10_code, specialty, priority, is_primary)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(cid10_code, specialty) DO UPDATE SET priority = ?3, is_primary = ?4
            "#,
            params![
                mapping.cid10_code.trim().to_uppercase(),
                mapping.specialty,
                mapping.priority,
                mapping.is_primary as i32
            ],
        )?;
        Ok(())
    }

    /// 查询诊断编码对应的专科（主专科优先，priority 升序）
    ///
    /// 诊断编码先精确匹配，未命中时回退到三位类目（"I21.0" → "I21"）
    pub fn specialties_for(&self, cid10_code: &str) -> RepositoryResult<Vec<Cid10Specialty>> {
        let code = cid10_code.trim().to_uppercase();
        let exact = self.query_specialties(&code)?;
        if !exact.is_empty() {
            return Ok(exact);
        }

        let category: String = code.chars().filter(|c| *c != '.').take(3).collect();
        if category.len() == 3 && category != code {
            return self.query_specialties(&category);
        }
        Ok(Vec::new())
    }

    /// 全量加载（分配器批处理使用，避免逐患者查询）
    pub fn load_all(&self) -> RepositoryResult<HashMap<String, Vec<Cid10Specialty>>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT cid10_code, specialty, priority, is_primary
            FROM cid10_specialty
            ORDER BY cid10_code ASC, is_primary DESC, priority ASC, id ASC
            "#,
        )?;
        let rows = stmt.query_map([], map_row)?;

        let mut index: HashMap<String, Vec<Cid10Specialty>> = HashMap::new();
        for row in rows {
            let mapping = row?;
            index.entry(mapping.cid10_code.clone()).or_default().push(mapping);
        }
        Ok(index)
    }

    pub fn description_of(&self, cid10_code: &str) -> RepositoryResult<Option<String>> {
        use rusqlite::OptionalExtension;
        let conn = self.conn.lock()?;
        let description = conn
            .query_row(
                "SELECT description FROM cid10 WHERE code = ?1",
                params![cid10_code.trim().to_uppercase()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(description)
    }

    fn query_specialties(&self, code: &str) -> RepositoryResult<Vec<Cid10Specialty>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT cid10_code, specialty, priority, is_primary
            FROM cid10_specialty
            WHERE cid10_code = ?1
            ORDER BY is_primary DESC, priority ASC, id ASC
            "#,
        )?;
        let mappings = stmt
            .query_map(params![code], map_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(mappings)
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Cid10Specialty> {
    let is_primary: i64 = row.get(3)?;
    Ok(Cid10Specialty {
        cid10_code: row.get(0)?,
        specialty: row.get(1)?,
        priority: row.get(2)?,
        is_primary: is_primary != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{configure_sqlite_connection, ensure_schema};
    use rusqlite::Connection;
    use std::sync::{Arc, Mutex};

    fn repo() -> Cid10Repository {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        ensure_schema(&conn).unwrap();
        Cid10Repository::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_seed_is_idempotent() {
        let repo = repo();
        let first = repo.seed_default_cid10_specialties().unwrap();
        assert!(first > 0);
        assert_eq!(repo.seed_default_cid10_specialties().unwrap(), 0);
    }

    #[test]
    fn test_primary_specialty_comes_first() {
        let repo = repo();
        // 次专科 priority 更小，但主专科仍排在前面
        repo.upsert_mapping(&Cid10Specialty {
            cid10_code: "K35".to_string(),
            specialty: "Clínica Médica".to_string(),
            priority: 0,
            is_primary: false,
        })
        .unwrap();
        repo.upsert_mapping(&Cid10Specialty {
            cid10_code: "K35".to_string(),
            specialty: "Cirurgia Geral".to_string(),
            priority: 1,
            is_primary: true,
        })
        .unwrap();

        let specialties = repo.specialties_for("k35").unwrap();
        assert_eq!(specialties.len(), 2);
        assert_eq!(specialties[0].specialty, "Cirurgia Geral");
    }

    #[test]
    fn test_subcategory_falls_back_to_category() {
        let repo = repo();
        repo.seed_default_cid10_specialties().unwrap();
        let specialties = repo.specialties_for("I21.0").unwrap();
        assert_eq!(specialties[0].specialty, "Cardiologia");
        assert_eq!(
            repo.description_of("i21").unwrap().as_deref(),
            Some("Infarto agudo do miocárdio")
        );
    }
}
