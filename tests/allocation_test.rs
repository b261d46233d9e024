// ==========================================
// 专科地理分配集成测试
// ==========================================
// 覆盖: 幂等、每名医生 3 家上限、30 km 边界、床位容量
// ==========================================


use healthcare_ingest::config::{config_keys, ConfigManager, PipelineConfigReader};
use healthcare_ingest::db::SharedConnection;
use healthcare_ingest::domain::types::AllocationStatus;
use healthcare_ingest::engine::SpecialtyGeoAllocator;
use healthcare_ingest::repository::{
    AllocationRepository, Cid10Repository, MasterDataRepository,
};
use rusqlite::params;
use std::sync::Arc;
use test_helpers::*;

struct Fixture {
    _db: tempfile::NamedTempFile,
    conn: SharedConnection,
    allocator: SpecialtyGeoAllocator,
    allocation_repo: Arc<AllocationRepository>,
    config: Arc<ConfigManager>,
}

fn fixture() -> Fixture {
    let (db, conn) = open_test_connection().unwrap();
    seed_geo(&conn).unwrap();

    let master_repo = Arc::new(MasterDataRepository::new(conn.clone()));
    let allocation_repo = Arc::new(AllocationRepository::new(conn.clone()));
    let cid10_repo = Arc::new(Cid10Repository::new(conn.clone()));
    cid10_repo.seed_default_cid10_specialties().unwrap();
    let config = Arc::new(ConfigManager::from_connection(conn.clone()).unwrap());

    let reader: Arc<dyn PipelineConfigReader> = config.clone();
    let allocator = SpecialtyGeoAllocator::new(
        master_repo,
        allocation_repo.clone(),
        cid10_repo,
        reader,
    );
    Fixture {
        _db: db,
        conn,
        allocator,
        allocation_repo,
        config,
    }
}

#[tokio::test]
async fn test_sao_paulo_example_single_edge_idempotent() {
    let fx = fixture();
    {
        let c = fx.conn.lock().unwrap();
        c.execute(
            "INSERT INTO municipality (ibge_code, name, uf, latitude, longitude) VALUES (?1, 'Centro', 'SP', ?2, ?3)",
            params![3550001, -23.55, -46.63],
        )
        .unwrap();
        c.execute(
            "INSERT INTO municipality (ibge_code, name, uf, latitude, longitude) VALUES (?1, 'Norte', 'SP', ?2, ?3)",
            params![3550002, -23.50, -46.60],
        )
        .unwrap();
    }
    let doctor = insert_doctor(&fx.conn, "CRM-D", "Cardiologia", 3550001).unwrap();
    let hospital = insert_hospital(&fx.conn, "H", 3550002, "Cardiologia;Ortopedia", 50).unwrap();

    let first = fx.allocator.allocate_doctors().await.unwrap();
    assert_eq!(first.edges_created, 1);
    let edges = fx.allocation_repo.list_doctor_edges(doctor).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].hospital_id, hospital);
    assert!(edges[0].distance_km > 5.0 && edges[0].distance_km < 7.5);

    let second = fx.allocator.allocate_doctors().await.unwrap();
    assert_eq!(second.edges_created, 0);
    assert_eq!(fx.allocation_repo.count_doctor_edges().unwrap(), 1);
}

#[tokio::test]
async fn test_distance_boundary_at_thirty_km() {
    let fx = fixture();
    let doctor = insert_doctor(&fx.conn, "CRM-1", "Cardiologia", MUN_ORIGIN).unwrap();
    let near = insert_hospital(&fx.conn, "NEAR", MUN_NEAR, "Cardiologia", 10).unwrap();
    insert_hospital(&fx.conn, "FAR", MUN_FAR, "Cardiologia", 10).unwrap();

    fx.allocator.allocate_doctors().await.unwrap();

    let edges = fx.allocation_repo.list_doctor_edges(doctor).unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].hospital_id, near);
    assert!(edges[0].distance_km < 30.0);
}

#[tokio::test]
async fn test_doctor_with_three_edges_gains_none() {
    let fx = fixture();
    let doctor = insert_doctor(&fx.conn, "CRM-2", "Ortopedia", MUN_ORIGIN).unwrap();
    for cnes in ["A", "B", "C"] {
        insert_hospital(&fx.conn, cnes, MUN_CLOSE, "Ortopedia", 10).unwrap();
    }

    let first = fx.allocator.allocate_doctors().await.unwrap();
    assert_eq!(first.edges_created, 3);

    // 新增合格医院后再次运行
    insert_hospital(&fx.conn, "D", MUN_ORIGIN, "Ortopedia", 10).unwrap();
    let second = fx.allocator.allocate_doctors().await.unwrap();
    assert_eq!(second.edges_created, 0);
    assert_eq!(fx.allocation_repo.list_doctor_edges(doctor).unwrap().len(), 3);
}

#[tokio::test]
async fn test_configured_cap_and_radius_respected() {
    let fx = fixture();
    fx.config
        .set_global_config_value(config_keys::DOCTOR_MAX_HOSPITALS, "1")
        .unwrap();
    fx.config
        .set_global_config_value(config_keys::DOCTOR_RADIUS_KM, "10")
        .unwrap();
    let doctor = insert_doctor(&fx.conn, "CRM-3", "Neurologia", MUN_ORIGIN).unwrap();
    insert_hospital(&fx.conn, "N1", MUN_NEAR, "Neurologia", 10).unwrap();
    let close = insert_hospital(&fx.conn, "N2", MUN_CLOSE, "Neurologia", 10).unwrap();
    insert_hospital(&fx.conn, "N3", MUN_ORIGIN, "Neurologia", 10).unwrap();

    fx.allocator.allocate_doctors().await.unwrap();

    let edges = fx.allocation_repo.list_doctor_edges(doctor).unwrap();
    assert_eq!(edges.len(), 1);
    // 按输入顺序: N1 超出 10 km，N2 为第一个合格医院
    assert_eq!(edges[0].hospital_id, close);
}

#[tokio::test]
async fn test_patients_respect_bed_capacity() {
    let fx = fixture();
    let small = insert_hospital(&fx.conn, "SMALL", MUN_CLOSE, "Cardiologia", 2).unwrap();
    for cpf in ["111", "222", "333"] {
        insert_patient(&fx.conn, cpf, "I21", MUN_ORIGIN).unwrap();
    }

    let summary = fx.allocator.allocate_patients().await.unwrap();
    assert_eq!(summary.candidates, 3);
    assert_eq!(summary.edges_created, 2);
    assert_eq!(summary.unmatched, 1);

    let usage = fx.allocation_repo.bed_usage().unwrap();
    assert_eq!(usage.get(&small).copied(), Some(2));

    // 再次运行不会超额分配
    let again = fx.allocator.allocate_patients().await.unwrap();
    assert_eq!(again.edges_created, 0);
    assert_eq!(count(&fx.conn, "patient_hospital").unwrap(), 2);
}

#[tokio::test]
async fn test_discharge_frees_bed_for_waiting_patient() {
    let fx = fixture();
    insert_hospital(&fx.conn, "ONE", MUN_CLOSE, "Ortopedia", 1).unwrap();
    let first = insert_patient(&fx.conn, "901", "S72", MUN_ORIGIN).unwrap();
    let waiting = insert_patient(&fx.conn, "902", "S72.0", MUN_ORIGIN).unwrap();

    fx.allocator.allocate_patients().await.unwrap();
    let allocated = fx.allocation_repo.find_by_patient(first).unwrap();
    assert_eq!(allocated.len(), 1);
    assert!(fx.allocation_repo.find_by_patient(waiting).unwrap().is_empty());

    fx.allocation_repo
        .update_status(allocated[0].id, AllocationStatus::Discharged, Some("alta"))
        .unwrap();

    let summary = fx.allocator.allocate_patients().await.unwrap();
    assert_eq!(summary.edges_created, 1);
    let view = fx.allocation_repo.find_by_patient(waiting).unwrap();
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].specialty, "Ortopedia");
    assert_eq!(view[0].status, AllocationStatus::Allocated);
}

#[tokio::test]
async fn test_run_all_reports_both_paths() {
    let fx = fixture();
    insert_doctor(&fx.conn, "CRM-9", "Cardiologia", MUN_ORIGIN).unwrap();
    insert_hospital(&fx.conn, "CARD", MUN_CLOSE, "Cardiologia", 5).unwrap();
    insert_patient(&fx.conn, "555", "I10", MUN_ORIGIN).unwrap();

    let report = fx.allocator.run_all().await.unwrap();
    assert_eq!(report.doctors.edges_created, 1);
    assert_eq!(report.patients.edges_created, 1);
}
