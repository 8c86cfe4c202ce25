//! 兑换商品与库存预占

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::ReservationStatus;

/// 兑换商品
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: i64,
    pub name: String,
    /// 兑换所需积分
    pub cost: i64,
    pub stock: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCatalogItem {
    pub name: String,
    pub cost: i64,
    pub stock: i64,
}

/// 库存预占，以兑换尝试为键
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StockReservation {
    pub attempt_id: Uuid,
    pub item_id: i64,
    pub pass_id: i64,
    pub cost: i64,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 预占结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// 本次扣减了一件库存
    Reserved(StockReservation),
    /// 该兑换尝试已有预占记录（重复投递或已补偿）
    Existing(StockReservation),
    OutOfStock,
    ItemNotFound,
}

/// 归还结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// 本次归还了一件库存
    Released(StockReservation),
    /// 之前已归还
    AlreadyReleased(StockReservation),
    /// 没有预占，写入了墓碑（或墓碑已存在）
    Tombstoned,
    /// 预占已被消耗，不能归还
    Consumed(StockReservation),
}
