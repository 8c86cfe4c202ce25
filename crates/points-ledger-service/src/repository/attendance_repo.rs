//! 出席记录仓储

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::AttendanceRepositoryTrait;
use crate::error::{LedgerError, Result};
use crate::models::{AttendanceRecord, PendingCursor};

/// 违反 (pass_id, session_id) 唯一约束
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// 出席记录仓储
pub struct AttendanceRepository {
    pool: PgPool,
}

impl AttendanceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        pass_id: i64,
        session_id: &str,
        points: i64,
    ) -> Result<AttendanceRecord> {
        let result = sqlx::query_as::<_, AttendanceRecord>(
            r#"
            INSERT INTO attendance_records (pass_id, session_id, points)
            VALUES ($1, $2, $3)
            RETURNING id, pass_id, session_id, points, status, failure_reason, created_at, processed_at
            "#,
        )
        .bind(pass_id)
        .bind(session_id)
        .bind(points)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(record) => Ok(record),
            Err(e) if is_unique_violation(&e) => Err(LedgerError::DuplicateAttendance {
                pass_id,
                session_id: session_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, id: i64) -> Result<Option<AttendanceRecord>> {
        let record = sqlx::query_as::<_, AttendanceRecord>(
            r#"
            SELECT id, pass_id, session_id, points, status, failure_reason, created_at, processed_at
            FROM attendance_records
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// 键集分页：(created_at, id) 严格大于游标
    pub async fn list_pending_after(
        &self,
        cursor: Option<PendingCursor>,
        limit: i64,
    ) -> Result<Vec<AttendanceRecord>> {
        let records = match cursor {
            Some(cursor) => {
                sqlx::query_as::<_, AttendanceRecord>(
                    r#"
                    SELECT id, pass_id, session_id, points, status, failure_reason, created_at, processed_at
                    FROM attendance_records
                    WHERE status = 'PENDING' AND (created_at, id) > ($1, $2)
                    ORDER BY created_at, id
                    LIMIT $3
                    "#,
                )
                .bind(cursor.created_at)
                .bind(cursor.id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, AttendanceRecord>(
                    r#"
                    SELECT id, pass_id, session_id, points, status, failure_reason, created_at, processed_at
                    FROM attendance_records
                    WHERE status = 'PENDING'
                    ORDER BY created_at, id
                    LIMIT $1
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(records)
    }

    pub async fn mark_processed(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE attendance_records
            SET status = 'PROCESSED', processed_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_failed(&self, id: i64, reason: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE attendance_records
            SET status = 'FAILED', failure_reason = $2, processed_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl AttendanceRepositoryTrait for AttendanceRepository {
    async fn create(
        &self,
        pass_id: i64,
        session_id: &str,
        points: i64,
    ) -> Result<AttendanceRecord> {
        self.create(pass_id, session_id, points).await
    }

    async fn get(&self, id: i64) -> Result<Option<AttendanceRecord>> {
        self.get(id).await
    }

    async fn list_pending_after(
        &self,
        cursor: Option<PendingCursor>,
        limit: i64,
    ) -> Result<Vec<AttendanceRecord>> {
        self.list_pending_after(cursor, limit).await
    }

    async fn mark_processed(&self, id: i64) -> Result<bool> {
        self.mark_processed(id).await
    }

    async fn mark_failed(&self, id: i64, reason: &str) -> Result<bool> {
        self.mark_failed(id, reason).await
    }
}
