//! 仓储 Trait 定义
//!
//! 服务层依赖抽象而非具体实现：PostgreSQL 与内存实现可互换，并支持 mock 测试

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AttemptTransition, AttendanceRecord, CatalogItem, CommitOutcome, ExchangeAttempt,
    ExchangeRecord, NewCatalogItem, NewPass, Pass, PassMutation, PassStatus, PendingCursor,
    PointMovement, ReleaseOutcome, ReserveOutcome, StockReservation,
};

/// 通行证仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PassRepositoryTrait: Send + Sync {
    async fn create_pass(&self, pass: &NewPass) -> Result<Pass>;
    async fn get_pass(&self, id: i64) -> Result<Option<Pass>>;

    /// 原子提交余额变更与流水
    async fn commit_mutation(&self, mutation: &PassMutation) -> Result<CommitOutcome>;

    /// 比较版本号后更新生命周期状态，版本不匹配返回 false
    async fn update_status(&self, id: i64, expected_version: i64, status: PassStatus)
    -> Result<bool>;

    async fn find_movement(&self, pass_id: i64, source_ref: &str)
    -> Result<Option<PointMovement>>;
    async fn list_movements(&self, pass_id: i64, limit: i64) -> Result<Vec<PointMovement>>;
    /// 标记流水的变更事件已发布
    async fn mark_effects_published(&self, pass_id: i64, source_ref: &str) -> Result<bool>;
}

/// 出席记录仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AttendanceRepositoryTrait: Send + Sync {
    /// 创建出席记录，(pass_id, session_id) 重复时返回 `DuplicateAttendance`
    async fn create(&self, pass_id: i64, session_id: &str, points: i64)
    -> Result<AttendanceRecord>;
    async fn get(&self, id: i64) -> Result<Option<AttendanceRecord>>;

    /// 按 (created_at, id) 升序返回游标之后的 PENDING 记录
    async fn list_pending_after(
        &self,
        cursor: Option<PendingCursor>,
        limit: i64,
    ) -> Result<Vec<AttendanceRecord>>;

    /// 仅从 PENDING 迁移，返回是否发生了迁移
    async fn mark_processed(&self, id: i64) -> Result<bool>;
    async fn mark_failed(&self, id: i64, reason: &str) -> Result<bool>;
}

/// 兑换仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeRepositoryTrait: Send + Sync {
    async fn create_attempt(&self, attempt: &ExchangeAttempt) -> Result<()>;
    async fn get_attempt(&self, attempt_id: Uuid) -> Result<Option<ExchangeAttempt>>;

    /// 比较并交换状态，当前状态不等于 `from` 时返回 false
    async fn transition_attempt(&self, transition: &AttemptTransition) -> Result<bool>;

    /// 未到终态且最后更新早于 `older_than` 的兑换尝试
    async fn list_stale_attempts(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExchangeAttempt>>;

    /// 标记 PointsDebited 已发布，已标记过时返回 false
    async fn mark_debit_published(&self, attempt_id: Uuid) -> Result<bool>;
    async fn get_record(&self, attempt_id: Uuid) -> Result<Option<ExchangeRecord>>;
    async fn list_records_by_pass(&self, pass_id: i64) -> Result<Vec<ExchangeRecord>>;
}

/// 库存仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StockRepositoryTrait: Send + Sync {
    async fn create_item(&self, item: &NewCatalogItem) -> Result<CatalogItem>;
    async fn get_item(&self, id: i64) -> Result<Option<CatalogItem>>;
    async fn get_reservation(&self, attempt_id: Uuid) -> Result<Option<StockReservation>>;

    /// 为兑换尝试扣减一件库存，同一尝试只扣减一次
    async fn reserve(&self, attempt_id: Uuid, pass_id: i64, item_id: i64)
    -> Result<ReserveOutcome>;

    /// 归还预占的库存；没有预占时写入墓碑
    async fn release(&self, attempt_id: Uuid, pass_id: i64, item_id: i64)
    -> Result<ReleaseOutcome>;

    /// RESERVED -> CONSUMED
    async fn consume(&self, attempt_id: Uuid) -> Result<bool>;
}
