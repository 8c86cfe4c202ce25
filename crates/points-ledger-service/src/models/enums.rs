//! 积分账本枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

/// 通行证生命周期状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PassStatus {
    #[default]
    Active,
    /// 已关闭 - 关闭前余额必须为零
    Closed,
}

/// 成就状态
///
/// 单向流转：NOT_REACHED -> REACHED，不可回退
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AchievementStatus {
    #[default]
    NotReached,
    Reached,
}

/// 成就类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Achievement {
    /// 参会证书
    Certificate,
    /// 特殊通道资格
    SpecialAccess,
}

impl Achievement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Certificate => "CERTIFICATE",
            Self::SpecialAccess => "SPECIAL_ACCESS",
        }
    }
}

/// 积分变动方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Earn,
    Spend,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earn => "EARN",
            Self::Spend => "SPEND",
        }
    }

    /// 计算变动后的余额（不做非负校验），溢出视为积分数量无效
    pub fn apply(&self, balance: i64, amount: i64) -> Result<i64> {
        let next = match self {
            Self::Earn => balance.checked_add(amount),
            Self::Spend => balance.checked_sub(amount),
        };
        next.ok_or(LedgerError::InvalidAmount(amount))
    }
}

/// 积分变动来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementSource {
    /// 会议出席奖励
    Attendance,
    /// 兑换扣减
    Exchange,
}

impl MovementSource {
    /// 幂等键：同一来源在同一通行证上只能生效一次
    pub fn source_ref(&self, id: impl std::fmt::Display) -> String {
        match self {
            Self::Attendance => format!("attendance:{id}"),
            Self::Exchange => format!("exchange:{id}"),
        }
    }
}

/// 出席记录处理状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    #[default]
    Pending,
    Processed,
    Failed,
}

/// 兑换尝试状态
///
/// 状态流转的唯一描述见 `ExchangeState::on`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExchangeState {
    #[default]
    Requested,
    StockReserved,
    /// 已发出 ExchangeFailed，等待库存组件确认
    Compensating,
    Completed,
    /// 失败且未发生预占
    Failed,
    /// 失败且预占库存已归还
    FailedCompensated,
}

impl ExchangeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::StockReserved => "STOCK_RESERVED",
            Self::Compensating => "COMPENSATING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::FailedCompensated => "FAILED_COMPENSATED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::FailedCompensated
        )
    }

    /// 尚未推进到补偿或终态、可能被超时清理的状态
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Requested | Self::StockReserved)
    }
}

impl std::fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 库存预占状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    /// 已扣减库存，等待扣分结果
    Reserved,
    /// 补偿完成，库存已归还
    Released,
    /// 扣分成功，预占转为实际消耗
    Consumed,
    /// 墓碑：补偿先于预占到达，之后的预占请求一律拒绝
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_apply() {
        assert_eq!(Direction::Earn.apply(10, 5).unwrap(), 15);
        assert_eq!(Direction::Spend.apply(10, 5).unwrap(), 5);
        assert_eq!(Direction::Spend.apply(5, 10).unwrap(), -5);
    }

    #[test]
    fn test_direction_apply_overflow() {
        assert!(matches!(
            Direction::Earn.apply(i64::MAX, 1),
            Err(LedgerError::InvalidAmount(1))
        ));
        assert!(matches!(
            Direction::Spend.apply(i64::MIN + 1, 2),
            Err(LedgerError::InvalidAmount(2))
        ));
    }

    #[test]
    fn test_source_ref() {
        assert_eq!(MovementSource::Attendance.source_ref(42), "attendance:42");
        assert_eq!(MovementSource::Exchange.source_ref("abc"), "exchange:abc");
    }

    #[test]
    fn test_exchange_state_classification() {
        assert!(ExchangeState::Completed.is_terminal());
        assert!(ExchangeState::FailedCompensated.is_terminal());
        assert!(!ExchangeState::Compensating.is_terminal());
        assert!(ExchangeState::Requested.is_in_flight());
        assert!(!ExchangeState::Compensating.is_in_flight());
    }

    #[test]
    fn test_enum_serde() {
        let json = serde_json::to_string(&ExchangeState::FailedCompensated).unwrap();
        assert_eq!(json, "\"FAILED_COMPENSATED\"");
        let status: AchievementStatus = serde_json::from_str("\"NOT_REACHED\"").unwrap();
        assert_eq!(status, AchievementStatus::NotReached);
    }
}
