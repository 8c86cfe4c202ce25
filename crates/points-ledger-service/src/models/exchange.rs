//! 兑换尝试与兑换记录

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::ExchangeState;
use crate::error::{LedgerError, Result};

// ==================== 状态机 ====================

/// 驱动兑换状态机的输入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaInput {
    StockReserved { cost: i64 },
    ReservationFailed,
    PointsDebited,
    DebitFailed,
    TimedOut,
    StockReleased { restored: bool },
}

impl SagaInput {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StockReserved { .. } => "STOCK_RESERVED",
            Self::ReservationFailed => "RESERVATION_FAILED",
            Self::PointsDebited => "POINTS_DEBITED",
            Self::DebitFailed => "DEBIT_FAILED",
            Self::TimedOut => "TIMED_OUT",
            Self::StockReleased { .. } => "STOCK_RELEASED",
        }
    }
}

impl ExchangeState {
    /// 状态迁移表
    ///
    /// ```text
    /// REQUESTED      --StockReserved-->      STOCK_RESERVED
    /// REQUESTED      --ReservationFailed-->  FAILED
    /// REQUESTED      --TimedOut-->           COMPENSATING
    /// STOCK_RESERVED --PointsDebited-->      COMPLETED
    /// STOCK_RESERVED --DebitFailed-->        COMPENSATING
    /// STOCK_RESERVED --TimedOut-->           COMPENSATING
    /// COMPENSATING   --StockReleased(true)-->  FAILED_COMPENSATED
    /// COMPENSATING   --StockReleased(false)--> FAILED
    /// ```
    pub fn on(self, input: SagaInput) -> Result<ExchangeState> {
        use ExchangeState::*;

        let next = match (self, input) {
            (Requested, SagaInput::StockReserved { .. }) => StockReserved,
            (Requested, SagaInput::ReservationFailed) => Failed,
            (Requested, SagaInput::TimedOut) => Compensating,
            (StockReserved, SagaInput::PointsDebited) => Completed,
            (StockReserved, SagaInput::DebitFailed | SagaInput::TimedOut) => Compensating,
            (Compensating, SagaInput::StockReleased { restored: true }) => FailedCompensated,
            (Compensating, SagaInput::StockReleased { restored: false }) => Failed,
            (from, input) => {
                return Err(LedgerError::InvalidTransition {
                    from: from.as_str().to_string(),
                    input: input.as_str().to_string(),
                });
            }
        };
        Ok(next)
    }
}

/// 兑换尝试（编排中的实时状态）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeAttempt {
    pub attempt_id: Uuid,
    pub pass_id: i64,
    pub item_id: i64,
    /// 预占成功后才知道扣分数
    #[sqlx(default)]
    pub cost: Option<i64>,
    pub state: ExchangeState,
    #[sqlx(default)]
    pub failure_reason: Option<String>,
    /// 完成后的 PointsDebited 是否已发布
    pub debit_published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExchangeAttempt {
    pub fn new(pass_id: i64, item_id: i64) -> Self {
        let now = Utc::now();
        Self {
            attempt_id: Uuid::now_v7(),
            pass_id,
            item_id,
            cost: None,
            state: ExchangeState::Requested,
            failure_reason: None,
            debit_published: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 状态迁移（比较并交换）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptTransition {
    pub attempt_id: Uuid,
    pub from: ExchangeState,
    pub to: ExchangeState,
    /// 仅在进入 STOCK_RESERVED 时写入
    pub cost: Option<i64>,
    pub failure_reason: Option<String>,
    /// 进入终态时随迁移一同写入的兑换记录
    pub record: Option<ExchangeRecord>,
}

/// 兑换记录（审计）
///
/// 每个兑换尝试到达终态时写入一次
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRecord {
    pub id: i64,
    pub attempt_id: Uuid,
    pub pass_id: i64,
    pub item_id: i64,
    #[sqlx(default)]
    pub cost: Option<i64>,
    pub state: ExchangeState,
    #[sqlx(default)]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ExchangeRecord {
    /// 由终态的兑换尝试生成（id 由存储分配）
    pub fn from_attempt(attempt: &ExchangeAttempt) -> Self {
        Self {
            id: 0,
            attempt_id: attempt.attempt_id,
            pass_id: attempt.pass_id,
            item_id: attempt.item_id,
            cost: attempt.cost,
            state: attempt.state,
            reason: attempt.failure_reason.clone(),
            created_at: Utc::now(),
        }
    }
}
