//! 通行证仓储
//!
//! 余额变更与积分流水在同一事务内提交：流水唯一约束 (pass_id, source_ref)
//! 保证幂等，版本号比较保证不会覆盖并发写入。

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use super::traits::PassRepositoryTrait;
use crate::error::Result;
use crate::models::{
    Achievement, CommitOutcome, NewPass, Pass, PassMutation, PassStatus, PointMovement,
};

const MOVEMENT_COLUMNS: &str = r#"
    id, pass_id, direction, amount, balance_after, source_type, source_ref,
    certificate_reached, special_access_reached, effects_published, created_at
"#;

const PASS_COLUMNS: &str = r#"
    id, participant_id, balance, certificate_threshold, special_access_threshold,
    certificate_status, special_access_status, status, version, created_at, updated_at
"#;

/// 通行证仓储
pub struct PassRepository {
    pool: PgPool,
}

impl PassRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ==================== 查询操作 ====================

    pub async fn get_pass(&self, id: i64) -> Result<Option<Pass>> {
        let pass = sqlx::query_as::<_, Pass>(&format!(
            "SELECT {PASS_COLUMNS} FROM passes WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(pass)
    }

    pub async fn find_movement(
        &self,
        pass_id: i64,
        source_ref: &str,
    ) -> Result<Option<PointMovement>> {
        let movement = sqlx::query_as::<_, PointMovement>(&format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM point_movements
            WHERE pass_id = $1 AND source_ref = $2
            "#
        ))
        .bind(pass_id)
        .bind(source_ref)
        .fetch_optional(&self.pool)
        .await?;

        Ok(movement)
    }

    /// 按时间倒序列出最近的流水
    pub async fn list_movements(&self, pass_id: i64, limit: i64) -> Result<Vec<PointMovement>> {
        let movements = sqlx::query_as::<_, PointMovement>(&format!(
            r#"
            SELECT {MOVEMENT_COLUMNS}
            FROM point_movements
            WHERE pass_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#
        ))
        .bind(pass_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(movements)
    }

    // ==================== 写入操作 ====================

    pub async fn create_pass(&self, pass: &NewPass) -> Result<Pass> {
        let created = sqlx::query_as::<_, Pass>(&format!(
            r#"
            INSERT INTO passes (participant_id, certificate_threshold, special_access_threshold)
            VALUES ($1, $2, $3)
            RETURNING {PASS_COLUMNS}
            "#
        ))
        .bind(&pass.participant_id)
        .bind(pass.thresholds.certificate)
        .bind(pass.thresholds.special_access)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    pub async fn update_status(
        &self,
        id: i64,
        expected_version: i64,
        status: PassStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE passes
            SET status = $3, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(id)
        .bind(expected_version)
        .bind(status)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// 标记流水的变更事件已发布，已标记过时返回 false
    pub async fn mark_effects_published(&self, pass_id: i64, source_ref: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE point_movements
            SET effects_published = TRUE
            WHERE pass_id = $1 AND source_ref = $2 AND NOT effects_published
            "#,
        )
        .bind(pass_id)
        .bind(source_ref)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// 提交余额变更
    ///
    /// 先插入流水（唯一约束冲突说明该来源已生效），再按版本号更新通行证；
    /// 任一步未生效都回滚整个事务。
    pub async fn commit_mutation(&self, mutation: &PassMutation) -> Result<CommitOutcome> {
        let mut tx = self.pool.begin().await?;

        if !Self::insert_movement_in_tx(&mut tx, mutation).await? {
            tx.rollback().await?;
            return Ok(CommitOutcome::DuplicateSource);
        }

        match Self::update_balance_in_tx(&mut tx, mutation).await? {
            Some(pass) => {
                tx.commit().await?;
                Ok(CommitOutcome::Committed(pass))
            }
            None => {
                tx.rollback().await?;
                Ok(CommitOutcome::VersionConflict)
            }
        }
    }

    // ==================== 事务操作 ====================

    /// 插入流水，来源已存在时返回 false
    async fn insert_movement_in_tx(tx: &mut PgConnection, mutation: &PassMutation) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO point_movements (
                pass_id, direction, amount, balance_after, source_type, source_ref,
                certificate_reached, special_access_reached
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (pass_id, source_ref) DO NOTHING
            "#,
        )
        .bind(mutation.pass_id)
        .bind(mutation.direction)
        .bind(mutation.amount)
        .bind(mutation.new_balance)
        .bind(mutation.source_type)
        .bind(&mutation.source_ref)
        .bind(mutation.reaches(Achievement::Certificate))
        .bind(mutation.reaches(Achievement::SpecialAccess))
        .execute(tx)
        .await?;

        Ok(inserted.rows_affected() == 1)
    }

    async fn update_balance_in_tx(
        tx: &mut PgConnection,
        mutation: &PassMutation,
    ) -> Result<Option<Pass>> {
        let pass = sqlx::query_as::<_, Pass>(&format!(
            r#"
            UPDATE passes
            SET balance = $3,
                certificate_status = $4,
                special_access_status = $5,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING {PASS_COLUMNS}
            "#
        ))
        .bind(mutation.pass_id)
        .bind(mutation.expected_version)
        .bind(mutation.new_balance)
        .bind(mutation.certificate_status)
        .bind(mutation.special_access_status)
        .fetch_optional(tx)
        .await?;

        Ok(pass)
    }
}

#[async_trait]
impl PassRepositoryTrait for PassRepository {
    async fn create_pass(&self, pass: &NewPass) -> Result<Pass> {
        self.create_pass(pass).await
    }

    async fn get_pass(&self, id: i64) -> Result<Option<Pass>> {
        self.get_pass(id).await
    }

    async fn commit_mutation(&self, mutation: &PassMutation) -> Result<CommitOutcome> {
        self.commit_mutation(mutation).await
    }

    async fn update_status(
        &self,
        id: i64,
        expected_version: i64,
        status: PassStatus,
    ) -> Result<bool> {
        self.update_status(id, expected_version, status).await
    }

    async fn find_movement(
        &self,
        pass_id: i64,
        source_ref: &str,
    ) -> Result<Option<PointMovement>> {
        self.find_movement(pass_id, source_ref).await
    }

    async fn list_movements(&self, pass_id: i64, limit: i64) -> Result<Vec<PointMovement>> {
        self.list_movements(pass_id, limit).await
    }
    async fn mark_effects_published(&self, pass_id: i64, source_ref: &str) -> Result<bool> {
        self.mark_effects_published(pass_id, source_ref).await
    }
}
