//! 库存仓储
//!
//! 预占记录以 attempt_id 为主键：同一兑换尝试最多扣减一件库存，
//! 补偿先于预占到达时写入 CANCELLED 墓碑，阻止之后的预占。

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::traits::StockRepositoryTrait;
use crate::error::Result;
use crate::models::{
    CatalogItem, NewCatalogItem, ReleaseOutcome, ReservationStatus, ReserveOutcome,
    StockReservation,
};

/// 库存仓储
pub struct StockRepository {
    pool: PgPool,
}

impl StockRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==================== 商品 ====================

    pub async fn create_item(&self, item: &NewCatalogItem) -> Result<CatalogItem> {
        let created = sqlx::query_as::<_, CatalogItem>(
            r#"
            INSERT INTO catalog_items (name, cost, stock)
            VALUES ($1, $2, $3)
            RETURNING id, name, cost, stock, created_at, updated_at
            "#,
        )
        .bind(&item.name)
        .bind(item.cost)
        .bind(item.stock)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    pub async fn get_item(&self, id: i64) -> Result<Option<CatalogItem>> {
        let item = sqlx::query_as::<_, CatalogItem>(
            "SELECT id, name, cost, stock, created_at, updated_at FROM catalog_items WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(item)
    }

    pub async fn get_reservation(&self, attempt_id: Uuid) -> Result<Option<StockReservation>> {
        let reservation = sqlx::query_as::<_, StockReservation>(
            r#"
            SELECT attempt_id, item_id, pass_id, cost, status, created_at, updated_at
            FROM stock_reservations
            WHERE attempt_id = $1
            "#,
        )
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(reservation)
    }

    // ==================== 预占 / 归还 ====================

    /// 锁定商品行后插入预占记录并扣减库存
    pub async fn reserve(
        &self,
        attempt_id: Uuid,
        pass_id: i64,
        item_id: i64,
    ) -> Result<ReserveOutcome> {
        let mut tx = self.pool.begin().await?;

        if let Some(existing) = Self::get_reservation_for_update(&mut tx, attempt_id).await? {
            tx.rollback().await?;
            return Ok(ReserveOutcome::Existing(existing));
        }

        let Some(item) = Self::get_item_for_update(&mut tx, item_id).await? else {
            tx.rollback().await?;
            return Ok(ReserveOutcome::ItemNotFound);
        };

        if item.stock <= 0 {
            tx.rollback().await?;
            return Ok(ReserveOutcome::OutOfStock);
        }

        let inserted = Self::insert_reservation_in_tx(
            &mut tx,
            attempt_id,
            item_id,
            pass_id,
            item.cost,
            ReservationStatus::Reserved,
        )
        .await?;

        let Some(reservation) = inserted else {
            // 并发的同一尝试已先写入
            tx.rollback().await?;
            return match self.get_reservation(attempt_id).await? {
                Some(existing) => Ok(ReserveOutcome::Existing(existing)),
                None => Ok(ReserveOutcome::OutOfStock),
            };
        };

        Self::adjust_stock_in_tx(&mut tx, item_id, -1).await?;
        tx.commit().await?;

        Ok(ReserveOutcome::Reserved(reservation))
    }

    pub async fn release(
        &self,
        attempt_id: Uuid,
        pass_id: i64,
        item_id: i64,
    ) -> Result<ReleaseOutcome> {
        let mut tx = self.pool.begin().await?;

        let tombstone = Self::insert_reservation_in_tx(
            &mut tx,
            attempt_id,
            item_id,
            pass_id,
            0,
            ReservationStatus::Cancelled,
        )
        .await?;

        if tombstone.is_some() {
            tx.commit().await?;
            return Ok(ReleaseOutcome::Tombstoned);
        }

        let Some(reservation) = Self::get_reservation_for_update(&mut tx, attempt_id).await? else {
            tx.rollback().await?;
            return Ok(ReleaseOutcome::Tombstoned);
        };

        let outcome = match reservation.status {
            ReservationStatus::Reserved => {
                let released = Self::set_reservation_status_in_tx(
                    &mut tx,
                    attempt_id,
                    ReservationStatus::Released,
                )
                .await?;
                Self::adjust_stock_in_tx(&mut tx, reservation.item_id, 1).await?;
                ReleaseOutcome::Released(released)
            }
            ReservationStatus::Released => ReleaseOutcome::AlreadyReleased(reservation),
            ReservationStatus::Cancelled => ReleaseOutcome::Tombstoned,
            ReservationStatus::Consumed => ReleaseOutcome::Consumed(reservation),
        };

        tx.commit().await?;
        Ok(outcome)
    }

    pub async fn consume(&self, attempt_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE stock_reservations
            SET status = 'CONSUMED', updated_at = NOW()
            WHERE attempt_id = $1 AND status = 'RESERVED'
            "#,
        )
        .bind(attempt_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // ==================== 事务操作 ====================

    async fn get_item_for_update(tx: &mut PgConnection, id: i64) -> Result<Option<CatalogItem>> {
        let item = sqlx::query_as::<_, CatalogItem>(
            r#"
            SELECT id, name, cost, stock, created_at, updated_at
            FROM catalog_items
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(tx)
        .await?;

        Ok(item)
    }

    async fn get_reservation_for_update(
        tx: &mut PgConnection,
        attempt_id: Uuid,
    ) -> Result<Option<StockReservation>> {
        let reservation = sqlx::query_as::<_, StockReservation>(
            r#"
            SELECT attempt_id, item_id, pass_id, cost, status, created_at, updated_at
            FROM stock_reservations
            WHERE attempt_id = $1
            FOR UPDATE
            "#,
        )
        .bind(attempt_id)
        .fetch_optional(tx)
        .await?;

        Ok(reservation)
    }

    /// 主键冲突时返回 None
    async fn insert_reservation_in_tx(
        tx: &mut PgConnection,
        attempt_id: Uuid,
        item_id: i64,
        pass_id: i64,
        cost: i64,
        status: ReservationStatus,
    ) -> Result<Option<StockReservation>> {
        let reservation = sqlx::query_as::<_, StockReservation>(
            r#"
            INSERT INTO stock_reservations (attempt_id, item_id, pass_id, cost, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (attempt_id) DO NOTHING
            RETURNING attempt_id, item_id, pass_id, cost, status, created_at, updated_at
            "#,
        )
        .bind(attempt_id)
        .bind(item_id)
        .bind(pass_id)
        .bind(cost)
        .bind(status)
        .fetch_optional(tx)
        .await?;

        Ok(reservation)
    }

    async fn set_reservation_status_in_tx(
        tx: &mut PgConnection,
        attempt_id: Uuid,
        status: ReservationStatus,
    ) -> Result<StockReservation> {
        let reservation = sqlx::query_as::<_, StockReservation>(
            r#"
            UPDATE stock_reservations
            SET status = $2, updated_at = NOW()
            WHERE attempt_id = $1
            RETURNING attempt_id, item_id, pass_id, cost, status, created_at, updated_at
            "#,
        )
        .bind(attempt_id)
        .bind(status)
        .fetch_one(tx)
        .await?;

        Ok(reservation)
    }

    async fn adjust_stock_in_tx(tx: &mut PgConnection, item_id: i64, delta: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE catalog_items
            SET stock = stock + $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(item_id)
        .bind(delta)
        .execute(tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl StockRepositoryTrait for StockRepository {
    async fn create_item(&self, item: &NewCatalogItem) -> Result<CatalogItem> {
        self.create_item(item).await
    }

    async fn get_item(&self, id: i64) -> Result<Option<CatalogItem>> {
        self.get_item(id).await
    }

    async fn get_reservation(&self, attempt_id: Uuid) -> Result<Option<StockReservation>> {
        self.get_reservation(attempt_id).await
    }

    async fn reserve(
        &self,
        attempt_id: Uuid,
        pass_id: i64,
        item_id: i64,
    ) -> Result<ReserveOutcome> {
        self.reserve(attempt_id, pass_id, item_id).await
    }

    async fn release(
        &self,
        attempt_id: Uuid,
        pass_id: i64,
        item_id: i64,
    ) -> Result<ReleaseOutcome> {
        self.release(attempt_id, pass_id, item_id).await
    }

    async fn consume(&self, attempt_id: Uuid) -> Result<bool> {
        self.consume(attempt_id).await
    }
}
