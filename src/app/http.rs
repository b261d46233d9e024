// ==========================================
// 医疗数据导入系统 - HTTP 路由
// ==========================================
// 职责: axum 路由 → API 层调用 → JSON 响应
// 错误: ApiError 自带 IntoResponse（400/404/500 + {code, message}）
// ==========================================

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;

use crate::api::allocation_api::{AllocationQuery, UpdateStatusRequest};
use crate::api::import_api::SubmitImportRequest;
use crate::api::ApiResult;
use crate::app::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// 构建 REST 路由
pub fn router(state: AppState) -> Router {
    let import_routes = Router::new()
        .route("/ImportFiles", post(submit_import).get(list_imports))
        .route("/ImportFiles/:id", get(get_import))
        .route("/ImportFiles/:id/errors", get(list_line_errors));

    let allocation_routes = Router::new()
        .route("/api/Allocation/run", post(run_allocation))
        .route("/api/PatientAllocation", get(list_allocations))
        .route("/api/PatientAllocation/statistics", get(allocation_statistics))
        .route(
            "/api/PatientAllocation/patient/:id",
            get(allocations_by_patient),
        )
        .route("/api/PatientAllocation/:id/status", put(update_allocation_status));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(import_routes)
        .merge(allocation_routes)
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ===== 导入任务 =====

async fn submit_import(
    State(state): State<AppState>,
    Json(request): Json<SubmitImportRequest>,
) -> ApiResult<impl IntoResponse> {
    let job = state.import_api.submit_import(request)?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn list_imports(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.import_api.list_imports(params.limit)?))
}

async fn get_import(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.import_api.get_import(&id)?))
}

async fn list_line_errors(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> ApiResult<impl IntoResponse> {
    // 先确认任务存在，未知任务返回 404 而非空列表
    state.import_api.get_import(&id)?;
    Ok(Json(state.import_api.list_line_errors(
        &id,
        params.limit,
        params.offset,
    )?))
}

// ===== 分配 =====

async fn run_allocation(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.allocation_api.run_allocation().await?))
}

async fn list_allocations(
    State(state): State<AppState>,
    Query(query): Query<AllocationQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.allocation_api.list_allocations(&query)?))
}

async fn allocations_by_patient(
    State(state): State<AppState>,
    Path(patient_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.allocation_api.allocations_by_patient(patient_id)?))
}

async fn update_allocation_status(
    State(state): State<AppState>,
    Path(allocation_id): Path<i64>,
    Json(request): Json<UpdateStatusRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.allocation_api.update_status(allocation_id, &request)?))
}

async fn allocation_statistics(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.allocation_api.statistics()?))
}
