//! 通行证生命周期服务

use std::sync::Arc;

use tracing::{info, instrument};

use crate::error::{LedgerError, Result};
use crate::lock::KeyedLocks;
use crate::models::{NewPass, Pass, PassStatus, PointMovement, Thresholds};
use crate::repository::PassRepositoryTrait;

/// 通行证生命周期服务
///
/// 状态变更与积分变更共用同一组通行证锁
pub struct PassService {
    pass_repo: Arc<dyn PassRepositoryTrait>,
    pass_locks: Arc<KeyedLocks<i64>>,
    thresholds: Thresholds,
}

impl PassService {
    pub fn new(
        pass_repo: Arc<dyn PassRepositoryTrait>,
        pass_locks: Arc<KeyedLocks<i64>>,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            pass_repo,
            pass_locks,
            thresholds,
        }
    }

    /// 开通通行证，阈值取当前配置
    #[instrument(skip(self))]
    pub async fn open_pass(&self, participant_id: &str) -> Result<Pass> {
        let participant_id = participant_id.trim();
        if participant_id.is_empty() {
            return Err(LedgerError::Validation("participant_id 不能为空".to_string()));
        }

        let pass = self
            .pass_repo
            .create_pass(&NewPass {
                participant_id: participant_id.to_string(),
                thresholds: self.thresholds,
            })
            .await?;

        info!(pass_id = pass.id, "通行证已开通");
        Ok(pass)
    }

    pub async fn get_pass(&self, pass_id: i64) -> Result<Pass> {
        self.pass_repo
            .get_pass(pass_id)
            .await?
            .ok_or(LedgerError::PassNotFound(pass_id))
    }

    pub async fn list_movements(&self, pass_id: i64, limit: i64) -> Result<Vec<PointMovement>> {
        self.get_pass(pass_id).await?;
        self.pass_repo.list_movements(pass_id, limit.clamp(1, 500)).await
    }

    /// 关闭通行证，余额必须为零
    #[instrument(skip(self))]
    pub async fn close_pass(&self, pass_id: i64) -> Result<Pass> {
        let _guard = self.pass_locks.acquire(pass_id).await?;
        let pass = self.get_pass(pass_id).await?;

        if pass.status == PassStatus::Closed {
            return Ok(pass);
        }
        if pass.balance != 0 {
            return Err(LedgerError::BalanceNotZero {
                pass_id,
                balance: pass.balance,
            });
        }

        self.transition(&pass, PassStatus::Closed).await
    }

    /// 重新激活已关闭的通行证
    #[instrument(skip(self))]
    pub async fn reopen_pass(&self, pass_id: i64) -> Result<Pass> {
        let _guard = self.pass_locks.acquire(pass_id).await?;
        let pass = self.get_pass(pass_id).await?;

        if pass.is_active() {
            return Ok(pass);
        }

        self.transition(&pass, PassStatus::Active).await
    }

    async fn transition(&self, pass: &Pass, status: PassStatus) -> Result<Pass> {
        if !self
            .pass_repo
            .update_status(pass.id, pass.version, status)
            .await?
        {
            return Err(LedgerError::ConcurrencyConflict);
        }

        info!(pass_id = pass.id, from = ?pass.status, to = ?status, "通行证状态已变更");
        self.get_pass(pass.id).await
    }
}
