//! API 处理器

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use points_shared::dlq::DeadLetterMessage;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::dto::{
    ApiResponse, CreateItemRequest, ExchangeAcceptedDto, ExchangeRequest, ExchangeStatusDto,
    MovementQuery, OpenPassRequest, RecordAttendanceRequest, ReplayResultDto,
};
use super::error::{ApiError, Result};
use super::state::AppState;
use crate::error::LedgerError;
use crate::models::{
    AttendanceRecord, CatalogItem, ExchangeRecord, NewCatalogItem, Pass, PointMovement,
};
use crate::service::ReconcileReport;

const DEFAULT_MOVEMENT_LIMIT: i64 = 50;

// ==================== 通行证 ====================

/// POST /api/passes
pub async fn open_pass(
    State(state): State<AppState>,
    Json(req): Json<OpenPassRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Pass>>)> {
    req.validate()?;
    let pass = state.pass_service.open_pass(&req.participant_id).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(pass))))
}

/// GET /api/passes/{id}
pub async fn get_pass(
    State(state): State<AppState>,
    Path(pass_id): Path<i64>,
) -> Result<Json<ApiResponse<Pass>>> {
    let pass = state.pass_service.get_pass(pass_id).await?;
    Ok(Json(ApiResponse::success(pass)))
}

/// GET /api/passes/{id}/movements
pub async fn list_movements(
    State(state): State<AppState>,
    Path(pass_id): Path<i64>,
    Query(query): Query<MovementQuery>,
) -> Result<Json<ApiResponse<Vec<PointMovement>>>> {
    let limit = query.limit.unwrap_or(DEFAULT_MOVEMENT_LIMIT);
    let movements = state.pass_service.list_movements(pass_id, limit).await?;
    Ok(Json(ApiResponse::success(movements)))
}

/// POST /api/passes/{id}/close
pub async fn close_pass(
    State(state): State<AppState>,
    Path(pass_id): Path<i64>,
) -> Result<Json<ApiResponse<Pass>>> {
    let pass = state.pass_service.close_pass(pass_id).await?;
    Ok(Json(ApiResponse::success(pass)))
}

/// POST /api/passes/{id}/reopen
pub async fn reopen_pass(
    State(state): State<AppState>,
    Path(pass_id): Path<i64>,
) -> Result<Json<ApiResponse<Pass>>> {
    let pass = state.pass_service.reopen_pass(pass_id).await?;
    Ok(Json(ApiResponse::success(pass)))
}

// ==================== 出席 ====================

/// POST /api/passes/{id}/attendance
pub async fn record_attendance(
    State(state): State<AppState>,
    Path(pass_id): Path<i64>,
    Json(req): Json<RecordAttendanceRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AttendanceRecord>>)> {
    req.validate()?;
    let record = state
        .attendance_service
        .record_attendance(pass_id, &req.session_id)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(record))))
}

// ==================== 兑换 ====================

/// POST /api/exchanges
///
/// 异步受理，客户端通过 attemptId 轮询结果
pub async fn request_exchange(
    State(state): State<AppState>,
    Json(req): Json<ExchangeRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ExchangeAcceptedDto>>)> {
    req.validate()?;
    let attempt = state
        .exchange_saga
        .request_exchange(req.pass_id, req.item_id)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(ExchangeAcceptedDto::from(&attempt))),
    ))
}

/// GET /api/exchanges/{attemptId}
pub async fn exchange_status(
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
) -> Result<Json<ApiResponse<ExchangeStatusDto>>> {
    let attempt = state.exchange_saga.exchange_status(attempt_id).await?;
    let record = if attempt.state.is_terminal() {
        state.exchange_saga.exchange_record(attempt_id).await?
    } else {
        None
    };
    Ok(Json(ApiResponse::success(ExchangeStatusDto { attempt, record })))
}

/// GET /api/passes/{id}/exchanges
pub async fn list_exchange_records(
    State(state): State<AppState>,
    Path(pass_id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<ExchangeRecord>>>> {
    let records = state.exchange_saga.list_records(pass_id).await?;
    Ok(Json(ApiResponse::success(records)))
}

// ==================== 运维 ====================

/// POST /api/admin/reconcile
pub async fn reconcile(State(state): State<AppState>) -> Result<Json<ApiResponse<ReconcileReport>>> {
    info!("手动触发批量对账");
    let report = state.reconciler.reconcile().await?;
    Ok(Json(ApiResponse::success(report)))
}

/// GET /api/admin/dead-letters
pub async fn list_dead_letters(
    State(state): State<AppState>,
) -> Json<ApiResponse<Vec<DeadLetterMessage>>> {
    Json(ApiResponse::success(state.bus.dead_letters()))
}

/// POST /api/admin/dead-letters/replay
pub async fn replay_dead_letters(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<ReplayResultDto>>> {
    let replayed = state
        .bus
        .replay_dead_letters()
        .map_err(|e| ApiError::from(LedgerError::from(e)))?;
    info!(replayed, "死信已重新投递");
    Ok(Json(ApiResponse::success(ReplayResultDto { replayed })))
}

/// POST /api/admin/items
pub async fn create_item(
    State(state): State<AppState>,
    Json(req): Json<CreateItemRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CatalogItem>>)> {
    req.validate()?;
    let item = state
        .stock_service
        .create_item(NewCatalogItem {
            name: req.name,
            cost: req.cost,
            stock: req.stock,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(item))))
}
