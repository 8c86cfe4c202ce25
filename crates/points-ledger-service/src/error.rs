//! 积分账本服务错误类型
//!
//! 定义服务层的业务错误和系统错误

use points_shared::error::PointsError;
use thiserror::Error;
use uuid::Uuid;

/// 积分账本服务错误类型
#[derive(Debug, Error)]
pub enum LedgerError {
    // === 通行证相关错误 ===
    #[error("通行证不存在: {0}")]
    PassNotFound(i64),

    #[error("通行证未激活: {0}")]
    PassInactive(i64),

    #[error("积分余额不足: 需要 {required}, 可用 {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("积分数量无效: {0}")]
    InvalidAmount(i64),

    #[error("通行证余额不为零，无法关闭: pass_id={pass_id}, balance={balance}")]
    BalanceNotZero { pass_id: i64, balance: i64 },

    // === 出席相关错误 ===
    #[error("重复的出席记录: pass_id={pass_id}, session_id={session_id}")]
    DuplicateAttendance { pass_id: i64, session_id: String },

    #[error("出席记录不存在: {0}")]
    AttendanceNotFound(i64),

    // === 兑换相关错误 ===
    #[error("商品不存在: {0}")]
    ItemNotFound(i64),

    #[error("商品库存不足: item_id={0}")]
    ItemOutOfStock(i64),

    #[error("兑换尝试不存在: {0}")]
    AttemptNotFound(Uuid),

    #[error("兑换状态不允许此操作: from={from}, input={input}")]
    InvalidTransition { from: String, input: String },

    // === 系统错误 ===
    #[error("并发冲突，请重试")]
    ConcurrencyConflict,

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Shared(#[from] PointsError),

    #[error("积分变更已提交，事件发布失败: source_ref={source_ref}, {reason}")]
    EffectsUnpublished { source_ref: String, reason: String },

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 积分账本服务 Result 类型别名
pub type Result<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(_) | Self::ConcurrencyConflict | Self::EffectsUnpublished { .. } => {
                true
            }
            Self::Shared(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// 检查是否为业务错误（非系统错误）
    pub fn is_business_error(&self) -> bool {
        !matches!(
            self,
            Self::Database(_)
                | Self::Serialization(_)
                | Self::Shared(_)
                | Self::EffectsUnpublished { .. }
                | Self::Internal(_)
                | Self::ConcurrencyConflict
        )
    }

    /// 获取错误码（用于 API 响应和失败原因）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::PassNotFound(_) => "PASS_NOT_FOUND",
            Self::PassInactive(_) => "PASS_INACTIVE",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::InvalidAmount(_) => "INVALID_AMOUNT",
            Self::BalanceNotZero { .. } => "BALANCE_NOT_ZERO",
            Self::DuplicateAttendance { .. } => "DUPLICATE_ATTENDANCE",
            Self::AttendanceNotFound(_) => "ATTENDANCE_NOT_FOUND",
            Self::ItemNotFound(_) => "ITEM_NOT_FOUND",
            Self::ItemOutOfStock(_) => "ITEM_OUT_OF_STOCK",
            Self::AttemptNotFound(_) => "ATTEMPT_NOT_FOUND",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Shared(e) => e.code(),
            Self::EffectsUnpublished { .. } => "EFFECTS_UNPUBLISHED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 转换为事件处理器错误，携带可重试标记供事件总线决定重投或进入死信
    pub fn into_handler_error(self, handler: &'static str) -> PointsError {
        if self.is_retryable() {
            PointsError::retryable(handler, self.to_string())
        } else {
            PointsError::rejected(handler, self.to_string())
        }
    }
}
