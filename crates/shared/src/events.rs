//! 领域事件契约
//!
//! 定义积分账本与兑换编排之间流转的全部事件类型、统一信封格式。
//! 事件是组件之间唯一的耦合点：发布者只认识 `DomainEvent`，
//! 订阅者通过 `EventType` 在处理器注册表中声明兴趣。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// 事件类型枚举，作为处理器注册表的路由键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    // 积分
    PointsEarnRequested,
    PointsEarned,
    PointsDebited,

    // 兑换编排
    ExchangeRequested,
    StockReserved,
    StockReservationFailed,
    ExchangeFailed,
    StockReleased,

    // 成就
    CertificateReached,
    SpecialAccessReached,
}

impl EventType {
    pub const ALL: [EventType; 10] = [
        Self::PointsEarnRequested,
        Self::PointsEarned,
        Self::PointsDebited,
        Self::ExchangeRequested,
        Self::StockReserved,
        Self::StockReservationFailed,
        Self::ExchangeFailed,
        Self::StockReleased,
        Self::CertificateReached,
        Self::SpecialAccessReached,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PointsEarnRequested => "POINTS_EARN_REQUESTED",
            Self::PointsEarned => "POINTS_EARNED",
            Self::PointsDebited => "POINTS_DEBITED",
            Self::ExchangeRequested => "EXCHANGE_REQUESTED",
            Self::StockReserved => "STOCK_RESERVED",
            Self::StockReservationFailed => "STOCK_RESERVATION_FAILED",
            Self::ExchangeFailed => "EXCHANGE_FAILED",
            Self::StockReleased => "STOCK_RELEASED",
            Self::CertificateReached => "CERTIFICATE_REACHED",
            Self::SpecialAccessReached => "SPECIAL_ACCESS_REACHED",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// DomainEvent
// ---------------------------------------------------------------------------

/// 领域事件
///
/// 兑换编排中的所有事件都携带 `attempt_id`，补偿以兑换尝试为键，
/// 而不是按 (pass_id, item_id) 盲目重放。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "eventType",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum DomainEvent {
    /// 请求为通行证增加积分，source_id 为出席记录 ID
    PointsEarnRequested {
        pass_id: i64,
        source_id: i64,
        amount: i64,
    },
    PointsEarned {
        pass_id: i64,
        amount: i64,
        new_balance: i64,
    },
    ExchangeRequested {
        attempt_id: Uuid,
        pass_id: i64,
        item_id: i64,
    },
    StockReserved {
        attempt_id: Uuid,
        pass_id: i64,
        item_id: i64,
        cost: i64,
    },
    StockReservationFailed {
        attempt_id: Uuid,
        pass_id: i64,
        item_id: i64,
        reason: String,
    },
    PointsDebited {
        attempt_id: Uuid,
        pass_id: i64,
        amount: i64,
        new_balance: i64,
    },
    /// 补偿触发事件，item_id 供库存组件定位需要归还的商品
    ExchangeFailed {
        attempt_id: Uuid,
        pass_id: i64,
        item_id: i64,
        reason: String,
    },
    /// 库存组件处理完 `ExchangeFailed` 后的确认；restored 表示是否真正归还了库存
    StockReleased {
        attempt_id: Uuid,
        item_id: i64,
        restored: bool,
    },
    CertificateReached {
        pass_id: i64,
    },
    SpecialAccessReached {
        pass_id: i64,
    },
}

impl DomainEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            Self::PointsEarnRequested { .. } => EventType::PointsEarnRequested,
            Self::PointsEarned { .. } => EventType::PointsEarned,
            Self::ExchangeRequested { .. } => EventType::ExchangeRequested,
            Self::StockReserved { .. } => EventType::StockReserved,
            Self::StockReservationFailed { .. } => EventType::StockReservationFailed,
            Self::PointsDebited { .. } => EventType::PointsDebited,
            Self::ExchangeFailed { .. } => EventType::ExchangeFailed,
            Self::StockReleased { .. } => EventType::StockReleased,
            Self::CertificateReached { .. } => EventType::CertificateReached,
            Self::SpecialAccessReached { .. } => EventType::SpecialAccessReached,
        }
    }

    /// 事件关联的通行证（StockReleased 只携带商品信息）
    pub fn pass_id(&self) -> Option<i64> {
        match self {
            Self::PointsEarnRequested { pass_id, .. }
            | Self::PointsEarned { pass_id, .. }
            | Self::ExchangeRequested { pass_id, .. }
            | Self::StockReserved { pass_id, .. }
            | Self::StockReservationFailed { pass_id, .. }
            | Self::PointsDebited { pass_id, .. }
            | Self::ExchangeFailed { pass_id, .. }
            | Self::CertificateReached { pass_id }
            | Self::SpecialAccessReached { pass_id } => Some(*pass_id),
            Self::StockReleased { .. } => None,
        }
    }

    /// 兑换尝试 ID，非兑换事件返回 None
    pub fn attempt_id(&self) -> Option<Uuid> {
        match self {
            Self::ExchangeRequested { attempt_id, .. }
            | Self::StockReserved { attempt_id, .. }
            | Self::StockReservationFailed { attempt_id, .. }
            | Self::PointsDebited { attempt_id, .. }
            | Self::ExchangeFailed { attempt_id, .. }
            | Self::StockReleased { attempt_id, .. } => Some(*attempt_id),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// EventEnvelope
// ---------------------------------------------------------------------------

/// 事件信封
///
/// `event_id` 使用 UUID v7，时间有序；同一逻辑事件在重新投递时保持 event_id 不变，
/// 订阅者可据此去重。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub occurred_at: DateTime<Utc>,
    pub event: DomainEvent,
}

impl EventEnvelope {
    pub fn new(event: DomainEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event.event_type(),
            occurred_at: Utc::now(),
            event,
        }
    }
}
