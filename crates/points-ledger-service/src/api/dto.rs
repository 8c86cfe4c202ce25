//! 请求与响应 DTO

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{ExchangeAttempt, ExchangeRecord, ExchangeState};

/// 统一 API 响应格式
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }
}

// ==================== 请求 ====================

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OpenPassRequest {
    #[validate(length(min = 1, max = 128, message = "参会者 ID 长度必须在 1-128 之间"))]
    pub participant_id: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RecordAttendanceRequest {
    #[validate(length(min = 1, max = 128, message = "场次 ID 长度必须在 1-128 之间"))]
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest {
    #[validate(range(min = 1, message = "通行证 ID 必须为正数"))]
    pub pass_id: i64,
    #[validate(range(min = 1, message = "商品 ID 必须为正数"))]
    pub item_id: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateItemRequest {
    #[validate(length(min = 1, max = 200, message = "商品名称长度必须在 1-200 之间"))]
    pub name: String,
    #[validate(range(min = 1, message = "兑换所需积分必须为正数"))]
    pub cost: i64,
    #[validate(range(min = 0, message = "库存不能为负数"))]
    pub stock: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MovementQuery {
    pub limit: Option<i64>,
}

// ==================== 响应 ====================

/// 兑换受理结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeAcceptedDto {
    pub attempt_id: Uuid,
    pub state: ExchangeState,
}

impl From<&ExchangeAttempt> for ExchangeAcceptedDto {
    fn from(attempt: &ExchangeAttempt) -> Self {
        Self {
            attempt_id: attempt.attempt_id,
            state: attempt.state,
        }
    }
}

/// 兑换状态查询结果，终态时附带兑换记录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeStatusDto {
    #[serde(flatten)]
    pub attempt: ExchangeAttempt,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<ExchangeRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayResultDto {
    pub replayed: usize,
}
