// ==========================================
// 导入流水线集成测试
// ==========================================
// 覆盖: 读取器 → 字段映射 → 落库 → 计数器 / 行级错误
// ==========================================


use healthcare_ingest::domain::types::{DataType, FileFormat, ImportStatus};
use healthcare_ingest::domain::{FieldMapping, ImportJob};
use healthcare_ingest::importer::{FormatReaderFactory, ImportProcessor};
use healthcare_ingest::repository::{
    ImportJobRepository, LineErrorRepository, MasterDataRepository, MasterTable,
};
use healthcare_ingest::transport::InMemoryObjectStore;
use std::sync::Arc;
use test_helpers::*;

struct Pipeline {
    _db: tempfile::NamedTempFile,
    conn: healthcare_ingest::db::SharedConnection,
    processor: ImportProcessor,
    job_repo: Arc<ImportJobRepository>,
    line_error_repo: Arc<LineErrorRepository>,
    master_repo: Arc<MasterDataRepository>,
    store: Arc<InMemoryObjectStore>,
}

fn pipeline() -> Pipeline {
    let (db, conn) = open_test_connection().unwrap();
    let job_repo = Arc::new(ImportJobRepository::new(conn.clone()));
    let line_error_repo = Arc::new(LineErrorRepository::new(conn.clone()));
    let master_repo = Arc::new(MasterDataRepository::new(conn.clone()));
    let store = Arc::new(InMemoryObjectStore::default());
    let processor = ImportProcessor::new(
        job_repo.clone(),
        line_error_repo.clone(),
        store.clone(),
        FormatReaderFactory::with_default_readers(),
    );
    Pipeline {
        _db: db,
        conn,
        processor,
        job_repo,
        line_error_repo,
        master_repo,
        store,
    }
}

fn create_job(
    p: &Pipeline,
    data_type: DataType,
    format: FileFormat,
    key: &str,
    mappings: &[FieldMapping],
) -> String {
    let job = ImportJob::new(data_type, format, key.to_string(), key.to_string());
    p.job_repo.insert_job_with_mappings(&job, mappings).unwrap();
    job.job_id
}

fn hospital_mappings() -> Vec<FieldMapping> {
    vec![
        FieldMapping::new("CNES", "cnes_code"),
        FieldMapping::new("Nome", "name"),
        FieldMapping::new("Municipio", "municipality_code"),
        FieldMapping::new("Especialidades", "specialties"),
        FieldMapping::new("Leitos", "TotalBeds"),
    ]
}

#[tokio::test]
async fn test_bad_numeric_cell_yields_one_line_error_and_partial_row() {
    let p = pipeline();
    p.store
        .insert_object("imports/hospitais.csv", hospital_csv_with_bad_beds())
        .await;
    let job_id = create_job(
        &p,
        DataType::Hospital,
        FileFormat::Csv,
        "imports/hospitais.csv",
        &hospital_mappings(),
    );

    let job = p.processor.process(&job_id).await.unwrap();
    assert_eq!(job.status, ImportStatus::Succeeded);
    assert_eq!(job.counters.total, 10);
    assert_eq!(job.counters.imported, 10);
    assert_eq!(job.counters.failed, 1);

    let errors = p.line_error_repo.list_by_job(&job_id, 100, 0).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].line, 5);
    assert_eq!(errors[0].field, "total_beds");
    assert_eq!(errors[0].raw_value.as_deref(), Some("abc"));

    assert_eq!(p.master_repo.count_rows(MasterTable::Hospital).unwrap(), 10);
    let hospitals = p.master_repo.load_hospitals().unwrap();
    let fifth = hospitals.iter().find(|h| h.cnes_code == "0000005").unwrap();
    assert_eq!(fifth.total_beds, 0);
    let sixth = hospitals.iter().find(|h| h.cnes_code == "0000006").unwrap();
    assert_eq!(sixth.total_beds, 60);
}

#[tokio::test]
async fn test_unknown_target_field_reported_once_at_line_zero() {
    let p = pipeline();
    p.store
        .insert_object(
            "imports/estados.csv",
            b"Codigo,Nome,UF,Bandeira\n35,Sao Paulo,SP,x\n33,Rio de Janeiro,RJ,y\n".to_vec(),
        )
        .await;
    let mappings = vec![
        FieldMapping::new("Codigo", "code"),
        FieldMapping::new("Nome", "name"),
        FieldMapping::new("UF", "uf"),
        FieldMapping::new("Bandeira", "flag"),
    ];
    let job_id = create_job(
        &p,
        DataType::State,
        FileFormat::Csv,
        "imports/estados.csv",
        &mappings,
    );

    let job = p.processor.process(&job_id).await.unwrap();
    assert_eq!(job.counters.imported, 2);
    assert_eq!(job.counters.failed, 0);

    let errors = p.line_error_repo.list_by_job(&job_id, 100, 0).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].line, 0);
    assert_eq!(errors[0].field, "flag");
}

#[tokio::test]
async fn test_xml_doctors_with_duplicate_crm() {
    let p = pipeline();
    seed_geo(&p.conn).unwrap();
    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
        <medicos>
          <medico crm="SP-1001"><nome>Ana</nome><especialidade>Cardiologia</especialidade><municipio>{m}</municipio><ativo>sim</ativo></medico>
          <medico crm="SP-1002"><nome>Bruno</nome><especialidade>Ortopedia</especialidade><municipio>{m}</municipio></medico>
          <medico crm="SP-1001"><nome>Ana (dup)</nome><especialidade>Cardiologia</especialidade><municipio>{m}</municipio></medico>
        </medicos>"#,
        m = MUN_ORIGIN
    );
    p.store
        .insert_object("imports/medicos.xml", xml.into_bytes())
        .await;
    let mappings = vec![
        FieldMapping::new("crm", "crm"),
        FieldMapping::new("nome", "name"),
        FieldMapping::new("especialidade", "specialty"),
        FieldMapping::new("municipio", "municipality_code"),
        FieldMapping::new("ativo", "active"),
    ];
    let job_id = create_job(
        &p,
        DataType::Doctor,
        FileFormat::Xml,
        "imports/medicos.xml",
        &mappings,
    );

    let job = p.processor.process(&job_id).await.unwrap();
    assert_eq!(job.status, ImportStatus::Succeeded);
    assert_eq!(job.counters.total, 3);
    assert_eq!(job.counters.imported, 2);
    assert_eq!(job.counters.duplicated, 1);

    let doctors = p.master_repo.load_doctors().unwrap();
    let ana = doctors.iter().find(|d| d.crm == "SP-1001").unwrap();
    assert_eq!(ana.name, "Ana");
    assert_eq!(ana.active, Some(true));
}

#[tokio::test]
async fn test_missing_object_fails_job() {
    let p = pipeline();
    let job_id = create_job(
        &p,
        DataType::State,
        FileFormat::Csv,
        "imports/nao-existe.csv",
        &[FieldMapping::new("Codigo", "code")],
    );

    assert!(p.processor.process(&job_id).await.is_err());
    let job = p.job_repo.get_by_id(&job_id).unwrap();
    assert_eq!(job.status, ImportStatus::Failed);
    assert!(job.finished_at.is_some());

    let errors = p.line_error_repo.list_by_job(&job_id, 10, 0).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].line, 0);
}
