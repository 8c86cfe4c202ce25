//! 兑换仓储
//!
//! 兑换尝试的状态迁移使用比较并交换，兑换记录以 attempt_id 唯一。
//! 进入终态的迁移与兑换记录在同一事务内提交。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::traits::ExchangeRepositoryTrait;
use crate::error::Result;
use crate::models::{AttemptTransition, ExchangeAttempt, ExchangeRecord};

const ATTEMPT_COLUMNS: &str = r#"
    attempt_id, pass_id, item_id, cost, state, failure_reason, debit_published,
    created_at, updated_at
"#;

/// 兑换仓储
pub struct ExchangeRepository {
    pool: PgPool,
}

impl ExchangeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==================== 兑换尝试 ====================

    pub async fn create_attempt(&self, attempt: &ExchangeAttempt) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO exchange_attempts (attempt_id, pass_id, item_id, cost, state, failure_reason, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(attempt.attempt_id)
        .bind(attempt.pass_id)
        .bind(attempt.item_id)
        .bind(attempt.cost)
        .bind(attempt.state)
        .bind(&attempt.failure_reason)
        .bind(attempt.created_at)
        .bind(attempt.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_attempt(&self, attempt_id: Uuid) -> Result<Option<ExchangeAttempt>> {
        let attempt = sqlx::query_as::<_, ExchangeAttempt>(&format!(
            r#"
            SELECT {ATTEMPT_COLUMNS}
            FROM exchange_attempts
            WHERE attempt_id = $1
            "#
        ))
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(attempt)
    }

    pub async fn transition_attempt(&self, transition: &AttemptTransition) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        if !Self::update_state_in_tx(&mut tx, transition).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        if let Some(record) = &transition.record {
            Self::insert_record_in_tx(&mut tx, record).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    pub async fn mark_debit_published(&self, attempt_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE exchange_attempts
            SET debit_published = TRUE
            WHERE attempt_id = $1 AND NOT debit_published
            "#,
        )
        .bind(attempt_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn list_stale_attempts(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExchangeAttempt>> {
        let attempts = sqlx::query_as::<_, ExchangeAttempt>(&format!(
            r#"
            SELECT {ATTEMPT_COLUMNS}
            FROM exchange_attempts
            WHERE state IN ('REQUESTED', 'STOCK_RESERVED', 'COMPENSATING') AND updated_at < $1
            ORDER BY updated_at
            LIMIT $2
            "#
        ))
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(attempts)
    }

    // ==================== 兑换记录 ====================

    pub async fn get_record(&self, attempt_id: Uuid) -> Result<Option<ExchangeRecord>> {
        let record = sqlx::query_as::<_, ExchangeRecord>(
            r#"
            SELECT id, attempt_id, pass_id, item_id, cost, state, reason, created_at
            FROM exchange_records
            WHERE attempt_id = $1
            "#,
        )
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    pub async fn list_records_by_pass(&self, pass_id: i64) -> Result<Vec<ExchangeRecord>> {
        let records = sqlx::query_as::<_, ExchangeRecord>(
            r#"
            SELECT id, attempt_id, pass_id, item_id, cost, state, reason, created_at
            FROM exchange_records
            WHERE pass_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(pass_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    // ==================== 事务操作 ====================

    async fn update_state_in_tx(
        tx: &mut PgConnection,
        transition: &AttemptTransition,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE exchange_attempts
            SET state = $3,
                cost = COALESCE($4, cost),
                failure_reason = COALESCE($5, failure_reason),
                updated_at = NOW()
            WHERE attempt_id = $1 AND state = $2
            "#,
        )
        .bind(transition.attempt_id)
        .bind(transition.from)
        .bind(transition.to)
        .bind(transition.cost)
        .bind(&transition.failure_reason)
        .execute(tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// 写入兑换记录，已存在时跳过
    async fn insert_record_in_tx(tx: &mut PgConnection, record: &ExchangeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO exchange_records (attempt_id, pass_id, item_id, cost, state, reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (attempt_id) DO NOTHING
            "#,
        )
        .bind(record.attempt_id)
        .bind(record.pass_id)
        .bind(record.item_id)
        .bind(record.cost)
        .bind(record.state)
        .bind(&record.reason)
        .bind(record.created_at)
        .execute(tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ExchangeRepositoryTrait for ExchangeRepository {
    async fn create_attempt(&self, attempt: &ExchangeAttempt) -> Result<()> {
        self.create_attempt(attempt).await
    }

    async fn get_attempt(&self, attempt_id: Uuid) -> Result<Option<ExchangeAttempt>> {
        self.get_attempt(attempt_id).await
    }

    async fn transition_attempt(&self, transition: &AttemptTransition) -> Result<bool> {
        self.transition_attempt(transition).await
    }

    async fn list_stale_attempts(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExchangeAttempt>> {
        self.list_stale_attempts(older_than, limit).await
    }

    async fn mark_debit_published(&self, attempt_id: Uuid) -> Result<bool> {
        self.mark_debit_published(attempt_id).await
    }

    async fn get_record(&self, attempt_id: Uuid) -> Result<Option<ExchangeRecord>> {
        self.get_record(attempt_id).await
    }

    async fn list_records_by_pass(&self, pass_id: i64) -> Result<Vec<ExchangeRecord>> {
        self.list_records_by_pass(pass_id).await
    }
}
