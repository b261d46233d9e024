// ==========================================
// 医疗数据导入系统 - 持久化实体
// ==========================================
// 职责: 州/市/医院/医生/患者 实体定义（导入映射目标 + 分配器输入）
// 约定: 所有实体可默认构造（字段映射引擎逐字段填充）
// 关系: 通过 municipality_code / id 显式关联，不内嵌反向引用
// ==========================================

use crate::domain::types::{HospitalType, Region, Sex};
use serde::{Deserialize, Serialize};

// ==========================================
// State - 州
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub code: i64, // IBGE 州代码（自然键）
    pub name: String,
    pub uf: String, // 两位缩写
    pub region: Option<Region>,
}

// ==========================================
// Municipality - 市
// ==========================================
// 用途: 地理锚点（医生/患者/医院均以所在市质心定位）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Municipality {
    pub ibge_code: i64, // IBGE 市代码（自然键）
    pub name: String,
    pub uf: String,
    pub latitude: f64,
    pub longitude: f64,
    pub population: Option<i64>,
    pub is_capital: Option<bool>,
}

// ==========================================
// Hospital - 医院
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hospital {
    pub id: i64,            // 数据库行 ID（落库前为 0）
    pub cnes_code: String,  // CNES 编码（自然键）
    pub name: String,
    pub municipality_code: i64,
    pub specialties: String, // 多专科字符串，";" 或 "," 分隔
    pub total_beds: i32,
    pub hospital_type: Option<HospitalType>,
    pub phone: Option<String>,
}

impl Hospital {
    /// 拆分后的专科集合（去空白、去空项）
    pub fn specialty_set(&self) -> Vec<String> {
        split_specialties(&self.specialties)
    }

    /// 是否提供指定专科（集合成员精确匹配，大小写不敏感）
    pub fn offers_specialty(&self, specialty: &str) -> bool {
        let wanted = specialty.trim();
        if wanted.is_empty() {
            return false;
        }
        split_specialties(&self.specialties)
            .iter()
            .any(|s| s.to_lowercase() == wanted.to_lowercase())
    }
}

/// 拆分多专科字符串
pub fn split_specialties(raw: &str) -> Vec<String> {
    raw.split([';', ','])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

// ==========================================
// Doctor - 医生
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Doctor {
    pub id: i64,
    pub crm: String, // CRM 注册号（自然键）
    pub name: String,
    pub specialty: String,
    pub municipality_code: i64,
    pub phone: Option<String>,
    pub active: Option<bool>,
}

// ==========================================
// Patient - 患者
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: i64,
    pub cpf: String, // CPF（自然键）
    pub name: String,
    pub sex: Option<Sex>,
    pub age: Option<i32>,
    pub cid10_code: String, // 诊断编码
    pub municipality_code: i64,
    pub priority: Option<i32>,
    pub notes: Option<String>,
}

// ==========================================
// Cid10Specialty - 诊断编码 → 专科
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cid10Specialty {
    pub cid10_code: String,
    pub specialty: String,
    pub priority: i32,    // 越小越优先
    pub is_primary: bool, // 主专科优先于次专科
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offers_specialty_set_membership() {
        let hospital = Hospital {
            specialties: "Cardiologia; Ortopedia".to_string(),
            ..Default::default()
        };
        assert!(hospital.offers_specialty("Cardiologia"));
        assert!(hospital.offers_specialty("ortopedia"));
        // 不做子串匹配
        assert!(!hospital.offers_specialty("Cardio"));
        assert!(!hospital.offers_specialty(""));
    }

    #[test]
    fn test_split_specialties_mixed_separators() {
        assert_eq!(
            split_specialties("Pediatria,Oncologia;;  Neurologia "),
            vec!["Pediatria", "Oncologia", "Neurologia"]
        );
    }
}
