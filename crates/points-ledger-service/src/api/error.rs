//! HTTP 错误映射

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::LedgerError;

/// HTTP 层错误
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ApiError {
    /// 返回对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        let err = match self {
            Self::Validation(_) => return StatusCode::BAD_REQUEST,
            Self::Ledger(err) => err,
        };

        match err {
            LedgerError::Validation(_) | LedgerError::InvalidAmount(_) => StatusCode::BAD_REQUEST,

            LedgerError::PassNotFound(_)
            | LedgerError::AttendanceNotFound(_)
            | LedgerError::ItemNotFound(_)
            | LedgerError::AttemptNotFound(_) => StatusCode::NOT_FOUND,

            LedgerError::PassInactive(_)
            | LedgerError::InsufficientBalance { .. }
            | LedgerError::BalanceNotZero { .. }
            | LedgerError::DuplicateAttendance { .. }
            | LedgerError::ItemOutOfStock(_)
            | LedgerError::InvalidTransition { .. }
            | LedgerError::ConcurrencyConflict => StatusCode::CONFLICT,

            LedgerError::Database(_)
            | LedgerError::Serialization(_)
            | LedgerError::Shared(_)
            | LedgerError::EffectsUnpublished { .. }
            | LedgerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 返回错误码（用于 API 响应）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Ledger(err) => err.error_code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 系统级错误只返回通用提示，详细信息仅记录日志
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, code = self.error_code(), "请求处理失败");
            "服务内部错误，请稍后重试".to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": serde_json::Value::Null
        });

        (status, axum::Json(body)).into_response()
    }
}

/// 从 validator 错误转换
impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

/// HTTP 层 Result 类型别名
pub type Result<T> = std::result::Result<T, ApiError>;
