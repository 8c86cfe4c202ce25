//! 数据库连接管理模块
//!
//! 提供 PostgreSQL 连接池管理，支持启动期连接重试与健康检查。

use crate::config::DatabaseConfig;
use crate::error::{PointsError, Result};
use crate::retry::{RetryPolicy, retry_with_policy};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

/// 数据库连接池包装
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 创建数据库连接池
    ///
    /// 容器编排下数据库可能晚于服务就绪，连接失败按默认退避策略重试。
    #[instrument(skip(config))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds));

        let pool = retry_with_policy(
            &RetryPolicy::default(),
            "database_connect",
            PointsError::is_retryable,
            || {
                let options = options.clone();
                async move { options.connect(&config.url).await.map_err(PointsError::from) }
            },
        )
        .await?;

        info!("Database connection pool created");

        Ok(Self { pool })
    }

    /// 获取连接池引用
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(PointsError::from)
    }

    /// 关闭连接池
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection pool closed");
    }
}

impl std::ops::Deref for Database {
    type Target = PgPool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_database_config;

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_database_connection() {
        let db = Database::connect(&test_database_config()).await.unwrap();
        db.health_check().await.unwrap();
    }
}
