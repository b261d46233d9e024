// ==========================================
// 医疗数据导入系统 - 领域类型定义
// ==========================================
// 职责: 导入任务、文件格式、分配状态等枚举
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 数据类型 (Data Type)
// ==========================================
// 导入文件描述的目标实体
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    State,        // 州
    Municipality, // 市
    Patient,      // 患者
    Doctor,       // 医生
    Hospital,     // 医院
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::State => "STATE",
            DataType::Municipality => "MUNICIPALITY",
            DataType::Patient => "PATIENT",
            DataType::Doctor => "DOCTOR",
            DataType::Hospital => "HOSPITAL",
        }
    }

    /// 解析数据类型标签（大小写不敏感，兼容葡语标签）
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "STATE" | "ESTADO" | "ESTADOS" => Some(DataType::State),
            "MUNICIPALITY" | "MUNICIPIO" | "MUNICÍPIO" | "MUNICIPIOS" => Some(DataType::Municipality),
            "PATIENT" | "PACIENTE" | "PACIENTES" => Some(DataType::Patient),
            "DOCTOR" | "MEDICO" | "MÉDICO" | "MEDICOS" => Some(DataType::Doctor),
            "HOSPITAL" | "HOSPITAIS" => Some(DataType::Hospital),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 文件格式 (File Format)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileFormat {
    Csv,
    Xml,
    Xls,
    Json,
}

impl FileFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileFormat::Csv => "CSV",
            FileFormat::Xml => "XML",
            FileFormat::Xls => "XLS",
            FileFormat::Json => "JSON",
        }
    }

    /// 解析格式标签或扩展名（"csv" / ".xlsx" / "XLS"）
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().trim_start_matches('.').to_uppercase().as_str() {
            "CSV" => Some(FileFormat::Csv),
            "XML" => Some(FileFormat::Xml),
            "XLS" | "XLSX" | "EXCEL" => Some(FileFormat::Xls),
            "JSON" => Some(FileFormat::Json),
            _ => None,
        }
    }

    /// 上传时使用的 Content-Type
    pub fn content_type(&self) -> &'static str {
        match self {
            FileFormat::Csv => "text/csv",
            FileFormat::Xml => "application/xml",
            FileFormat::Xls => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            FileFormat::Json => "application/json",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 导入任务状态 (Import Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportStatus {
    Pending,    // 等待对象可读
    Processing, // 解析入库中
    Succeeded,  // 完成（可含失败行）
    Failed,     // 传输/格式错误
}

impl ImportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "PENDING",
            ImportStatus::Processing => "PROCESSING",
            ImportStatus::Succeeded => "SUCCEEDED",
            ImportStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Some(ImportStatus::Pending),
            "PROCESSING" => Some(ImportStatus::Processing),
            "SUCCEEDED" => Some(ImportStatus::Succeeded),
            "FAILED" => Some(ImportStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportStatus::Succeeded | ImportStatus::Failed)
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 患者分配状态 (Allocation Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationStatus {
    Allocated,   // 已分配
    InTreatment, // 治疗中
    Discharged,  // 出院
    Cancelled,   // 已取消
}

impl AllocationStatus {
    pub const ALL: [AllocationStatus; 4] = [
        AllocationStatus::Allocated,
        AllocationStatus::InTreatment,
        AllocationStatus::Discharged,
        AllocationStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationStatus::Allocated => "ALLOCATED",
            AllocationStatus::InTreatment => "IN_TREATMENT",
            AllocationStatus::Discharged => "DISCHARGED",
            AllocationStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "ALLOCATED" | "ALOCADO" => Some(AllocationStatus::Allocated),
            "IN_TREATMENT" | "EM_ATENDIMENTO" | "EMATENDIMENTO" => {
                Some(AllocationStatus::InTreatment)
            }
            "DISCHARGED" | "ALTA" => Some(AllocationStatus::Discharged),
            "CANCELLED" | "CANCELADO" => Some(AllocationStatus::Cancelled),
            _ => None,
        }
    }

    /// 占用床位的状态（容量计算口径）
    pub fn occupies_bed(&self) -> bool {
        matches!(self, AllocationStatus::Allocated | AllocationStatus::InTreatment)
    }
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 大区 (Region)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Region {
    Norte,
    Nordeste,
    CentroOeste,
    Sudeste,
    Sul,
}

impl Region {
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Norte => "NORTE",
            Region::Nordeste => "NORDESTE",
            Region::CentroOeste => "CENTRO_OESTE",
            Region::Sudeste => "SUDESTE",
            Region::Sul => "SUL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "NORTE" | "N" => Some(Region::Norte),
            "NORDESTE" | "NE" => Some(Region::Nordeste),
            "CENTRO_OESTE" | "CENTROOESTE" | "CO" => Some(Region::CentroOeste),
            "SUDESTE" | "SE" => Some(Region::Sudeste),
            "SUL" | "S" => Some(Region::Sul),
            _ => None,
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 性别 (Sex)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Sex {
    Male,
    Female,
    Other,
}

impl Sex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "MALE",
            Sex::Female => "FEMALE",
            Sex::Other => "OTHER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "M" | "MALE" | "MASCULINO" => Some(Sex::Male),
            "F" | "FEMALE" | "FEMININO" => Some(Sex::Female),
            "O" | "OTHER" | "OUTRO" => Some(Sex::Other),
            _ => None,
        }
    }
}

// ==========================================
// 医院类型 (Hospital Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HospitalType {
    Public,
    Private,
    Philanthropic,
}

impl HospitalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HospitalType::Public => "PUBLIC",
            HospitalType::Private => "PRIVATE",
            HospitalType::Philanthropic => "PHILANTHROPIC",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "PUBLIC" | "PUBLICO" | "PÚBLICO" => Some(HospitalType::Public),
            "PRIVATE" | "PRIVADO" => Some(HospitalType::Private),
            "PHILANTHROPIC" | "FILANTROPICO" | "FILANTRÓPICO" => Some(HospitalType::Philanthropic),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_format_parse_extension() {
        assert_eq!(FileFormat::parse(".xlsx"), Some(FileFormat::Xls));
        assert_eq!(FileFormat::parse("csv"), Some(FileFormat::Csv));
        assert_eq!(FileFormat::parse("pdf"), None);
    }

    #[test]
    fn test_import_status_roundtrip_label() {
        for s in [
            ImportStatus::Pending,
            ImportStatus::Processing,
            ImportStatus::Succeeded,
            ImportStatus::Failed,
        ] {
            assert_eq!(ImportStatus::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_region_parse_accepts_hyphen() {
        assert_eq!(Region::parse("Centro-Oeste"), Some(Region::CentroOeste));
        assert_eq!(Region::parse("sul"), Some(Region::Sul));
    }

    #[test]
    fn test_allocation_status_occupies_bed() {
        assert!(AllocationStatus::Allocated.occupies_bed());
        assert!(!AllocationStatus::Discharged.occupies_bed());
    }
}
