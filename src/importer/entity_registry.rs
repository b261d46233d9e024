// ==========================================
// 医疗数据导入系统 - 实体字段注册表
// ==========================================
// 职责: 每类实体声明有序的 (字段名, 类型, 是否可空, setter)
// 说明: 映射引擎只通过本表定位字段，不依赖运行时反射
// ==========================================

use crate::domain::entities::{Doctor, Hospital, Municipality, Patient, State};
use crate::domain::types::{DataType, HospitalType, Region, Sex};
use crate::importer::field_mapper::{FieldKind, FieldSpec, FieldValue, MappableEntity};

// ===== setter 辅助函数 =====

fn int(v: FieldValue) -> Result<i64, String> {
    v.into_i64().ok_or_else(|| "expected integer".to_string())
}

fn int32(v: FieldValue) -> Result<i32, String> {
    v.into_i32()?.ok_or_else(|| "expected integer".to_string())
}

fn decimal(v: FieldValue) -> Result<f64, String> {
    v.into_f64().ok_or_else(|| "expected decimal".to_string())
}

fn text(v: FieldValue) -> Result<String, String> {
    v.into_text().ok_or_else(|| "expected text".to_string())
}

fn opt_text(v: FieldValue) -> Option<String> {
    v.into_text()
}

fn in_range(value: f64, min: f64, max: f64, label: &str) -> Result<f64, String> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{} {} outside [{}, {}]", label, value, min, max))
    }
}

fn enum_label<T>(v: FieldValue, parse: fn(&str) -> Option<T>, label: &str) -> Result<Option<T>, String> {
    match v.into_text() {
        None => Ok(None),
        Some(raw) => parse(&raw)
            .map(Some)
            .ok_or_else(|| format!("unknown {} '{}'", label, raw)),
    }
}

// ==========================================
// State
// ==========================================
static STATE_FIELDS: [FieldSpec<State>; 4] = [
    FieldSpec {
        name: "code",
        kind: FieldKind::Int,
        nullable: false,
        apply: |e, v| {
            e.code = int(v)?;
            Ok(())
        },
    },
    FieldSpec {
        name: "name",
        kind: FieldKind::Text,
        nullable: false,
        apply: |e, v| {
            e.name = text(v)?;
            Ok(())
        },
    },
    FieldSpec {
        name: "uf",
        kind: FieldKind::Text,
        nullable: false,
        apply: |e, v| {
            e.uf = text(v)?.to_uppercase();
            Ok(())
        },
    },
    FieldSpec {
        name: "region",
        kind: FieldKind::Enum,
        nullable: true,
        apply: |e, v| {
            e.region = enum_label(v, Region::parse, "region")?;
            Ok(())
        },
    },
];

impl MappableEntity for State {
    const KIND: DataType = DataType::State;

    fn field_specs() -> &'static [FieldSpec<Self>] {
        &STATE_FIELDS
    }
}

// ==========================================
// Municipality
// ==========================================
static MUNICIPALITY_FIELDS: [FieldSpec<Municipality>; 7] = [
    FieldSpec {
        name: "ibge_code",
        kind: FieldKind::Int,
        nullable: false,
        apply: |e, v| {
            e.ibge_code = int(v)?;
            Ok(())
        },
    },
    FieldSpec {
        name: "name",
        kind: FieldKind::Text,
        nullable: false,
        apply: |e, v| {
            e.name = text(v)?;
            Ok(())
        },
    },
    FieldSpec {
        name: "uf",
        kind: FieldKind::Text,
        nullable: false,
        apply: |e, v| {
            e.uf = text(v)?.to_uppercase();
            Ok(())
        },
    },
    FieldSpec {
        name: "latitude",
        kind: FieldKind::Decimal,
        nullable: false,
        apply: |e, v| {
            e.latitude = in_range(decimal(v)?, -90.0, 90.0, "latitude")?;
            Ok(())
        },
    },
    FieldSpec {
        name: "longitude",
        kind: FieldKind::Decimal,
        nullable: false,
        apply: |e, v| {
            e.longitude = in_range(decimal(v)?, -180.0, 180.0, "longitude")?;
            Ok(())
        },
    },
    FieldSpec {
        name: "population",
        kind: FieldKind::Int,
        nullable: true,
        apply: |e, v| {
            e.population = v.into_i64();
            Ok(())
        },
    },
    FieldSpec {
        name: "is_capital",
        kind: FieldKind::Bool,
        nullable: true,
        apply: |e, v| {
            e.is_capital = v.into_bool();
            Ok(())
        },
    },
];

impl MappableEntity for Municipality {
    const KIND: DataType = DataType::Municipality;

    fn field_specs() -> &'static [FieldSpec<Self>] {
        &MUNICIPALITY_FIELDS
    }
}

// ==========================================
// Hospital
// ==========================================
static HOSPITAL_FIELDS: [FieldSpec<Hospital>; 7] = [
    FieldSpec {
        name: "cnes_code",
        kind: FieldKind::Text,
        nullable: false,
        apply: |e, v| {
            e.cnes_code = text(v)?;
            Ok(())
        },
    },
    FieldSpec {
        name: "name",
        kind: FieldKind::Text,
        nullable: false,
        apply: |e, v| {
            e.name = text(v)?;
            Ok(())
        },
    },
    FieldSpec {
        name: "municipality_code",
        kind: FieldKind::Int,
        nullable: false,
        apply: |e, v| {
            e.municipality_code = int(v)?;
            Ok(())
        },
    },
    FieldSpec {
        name: "specialties",
        kind: FieldKind::Text,
        nullable: false,
        apply: |e, v| {
            e.specialties = text(v)?;
            Ok(())
        },
    },
    FieldSpec {
        name: "total_beds",
        kind: FieldKind::Int,
        nullable: false,
        apply: |e, v| {
            let beds = int32(v)?;
            if beds < 0 {
                return Err(format!("total_beds must not be negative, got {}", beds));
            }
            e.total_beds = beds;
            Ok(())
        },
    },
    FieldSpec {
        name: "hospital_type",
        kind: FieldKind::Enum,
        nullable: true,
        apply: |e, v| {
            e.hospital_type = enum_label(v, HospitalType::parse, "hospital type")?;
            Ok(())
        },
    },
    FieldSpec {
        name: "phone",
        kind: FieldKind::Text,
        nullable: true,
        apply: |e, v| {
            e.phone = opt_text(v);
            Ok(())
        },
    },
];

impl MappableEntity for Hospital {
    const KIND: DataType = DataType::Hospital;

    fn field_specs() -> &'static [FieldSpec<Self>] {
        &HOSPITAL_FIELDS
    }
}

// ==========================================
// Doctor
// ==========================================
static DOCTOR_FIELDS: [FieldSpec<Doctor>; 6] = [
    FieldSpec {
        name: "crm",
        kind: FieldKind::Text,
        nullable: false,
        apply: |e, v| {
            e.crm = text(v)?;
            Ok(())
        },
    },
    FieldSpec {
        name: "name",
        kind: FieldKind::Text,
        nullable: false,
        apply: |e, v| {
            e.name = text(v)?;
            Ok(())
        },
    },
    FieldSpec {
        name: "specialty",
        kind: FieldKind::Text,
        nullable: false,
        apply: |e, v| {
            e.specialty = text(v)?;
            Ok(())
        },
    },
    FieldSpec {
        name: "municipality_code",
        kind: FieldKind::Int,
        nullable: false,
        apply: |e, v| {
            e.municipality_code = int(v)?;
            Ok(())
        },
    },
    FieldSpec {
        name: "phone",
        kind: FieldKind::Text,
        nullable: true,
        apply: |e, v| {
            e.phone = opt_text(v);
            Ok(())
        },
    },
    FieldSpec {
        name: "active",
        kind: FieldKind::Bool,
        nullable: true,
        apply: |e, v| {
            e.active = v.into_bool();
            Ok(())
        },
    },
];

impl MappableEntity for Doctor {
    const KIND: DataType = DataType::Doctor;

    fn field_specs() -> &'static [FieldSpec<Self>] {
        &DOCTOR_FIELDS
    }
}

// ==========================================
// Patient
// ==========================================
static PATIENT_FIELDS: [FieldSpec<Patient>; 8] = [
    FieldSpec {
        name: "cpf",
        kind: FieldKind::Text,
        nullable: false,
        apply: |e, v| {
            e.cpf = text(v)?;
            Ok(())
        },
    },
    FieldSpec {
        name: "name",
        kind: FieldKind::Text,
        nullable: false,
        apply: |e, v| {
            e.name = text(v)?;
            Ok(())
        },
    },
    FieldSpec {
        name: "sex",
        kind: FieldKind::Enum,
        nullable: true,
        apply: |e, v| {
            e.sex = enum_label(v, Sex::parse, "sex")?;
            Ok(())
        },
    },
    FieldSpec {
        name: "age",
        kind: FieldKind::Int,
        nullable: true,
        apply: |e, v| {
            e.age = v.into_i32()?;
            Ok(())
        },
    },
    FieldSpec {
        name: "cid10_code",
        kind: FieldKind::Text,
        nullable: false,
        apply: |e, v| {
            e.cid10_code = text(v)?.to_uppercase();
            Ok(())
        },
    },
    FieldSpec {
        name: "municipality_code",
        kind: FieldKind::Int,
        nullable: false,
        apply: |e, v| {
            e.municipality_code = int(v)?;
            Ok(())
        },
    },
    FieldSpec {
        name: "priority",
        kind: FieldKind::Int,
        nullable: true,
        apply: |e, v| {
            e.priority = v.into_i32()?;
            Ok(())
        },
    },
    FieldSpec {
        name: "notes",
        kind: FieldKind::Text,
        nullable: true,
        apply: |e, v| {
            e.notes = opt_text(v);
            Ok(())
        },
    },
];

impl MappableEntity for Patient {
    const KIND: DataType = DataType::Patient;

    fn field_specs() -> &'static [FieldSpec<Self>] {
        &PATIENT_FIELDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::import::{FieldMapping, RowRecord};
    use crate::importer::field_mapper::FieldMappingEngine;

    #[test]
    fn test_find_field_ignores_case_and_underscores() {
        assert_eq!(Hospital::find_field("TotalBeds").map(|f| f.name), Some("total_beds"));
        assert_eq!(Municipality::find_field("IBGE_CODE").map(|f| f.name), Some("ibge_code"));
        assert!(Doctor::find_field("salary").is_none());
    }

    #[test]
    fn test_map_hospital_row() {
        let engine = FieldMappingEngine::<Hospital>::new(
            "job-1",
            &[
                FieldMapping::new("CNES", "cnes_code"),
                FieldMapping::new("Nome", "name"),
                FieldMapping::new("Leitos", "TotalBeds"),
                FieldMapping::new("Tipo", "hospital_type"),
                FieldMapping::new("Telefone", "phone"),
            ],
        );
        let row = RowRecord::new(1)
            .with_value("CNES", "2077485")
            .with_value("Nome", "Hospital das Clínicas")
            .with_value("Leitos", "120")
            .with_value("Tipo", "Público")
            .with_value("Telefone", "");

        let (hospital, errors) = engine.map_row(&row);
        assert!(errors.is_empty());
        assert_eq!(hospital.cnes_code, "2077485");
        assert_eq!(hospital.total_beds, 120);
        assert_eq!(hospital.hospital_type, Some(HospitalType::Public));
        assert_eq!(hospital.phone, None);
    }

    #[test]
    fn test_bad_field_keeps_rest_of_row() {
        let engine = FieldMappingEngine::<Municipality>::new(
            "job-1",
            &[
                FieldMapping::new("codigo", "ibge_code"),
                FieldMapping::new("lat", "latitude"),
                FieldMapping::new("lon", "longitude"),
            ],
        );
        let row = RowRecord::new(4)
            .with_value("codigo", "3550308")
            .with_value("lat", "-123.4")
            .with_value("lon", "-46.63");

        let (city, errors) = engine.map_row(&row);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "latitude");
        assert_eq!(errors[0].line, 4);
        assert_eq!(city.ibge_code, 3550308);
        assert_eq!(city.latitude, 0.0);
        assert_eq!(city.longitude, -46.63);
    }

    #[test]
    fn test_empty_required_field_is_error() {
        let engine =
            FieldMappingEngine::<Patient>::new("job-1", &[FieldMapping::new("cid", "cid10_code")]);
        let (_, errors) = engine.map_row(&RowRecord::new(2).with_value("cid", "  "));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].raw_value.as_deref(), Some("  "));
    }

    #[test]
    fn test_unknown_enum_label_is_error() {
        let engine = FieldMappingEngine::<State>::new("job-1", &[FieldMapping::new("regiao", "region")]);
        let (state, errors) = engine.map_row(&RowRecord::new(1).with_value("regiao", "Atlântida"));
        assert_eq!(errors.len(), 1);
        assert_eq!(state.region, None);
    }
}
