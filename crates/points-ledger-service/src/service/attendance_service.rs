//! 出席记录服务
//!
//! 记录出席后发布 `PointsEarnRequested`；实时监听与批量对账都通过 `settle`
//! 结算出席记录，二者共用同一个积分变更入口。

use std::sync::Arc;

use points_shared::bus::EventPublisher;
use points_shared::events::DomainEvent;
use tracing::{info, instrument, warn};

use crate::error::{LedgerError, Result};
use crate::models::{AttendanceRecord, AttendanceStatus};
use crate::repository::{AttendanceRepositoryTrait, PassRepositoryTrait};
use crate::service::points_applier::{ApplyRequest, PointsApplier};

/// 单条出席记录的结算结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// 积分已入账（或此前已入账），记录标记为 PROCESSED
    Succeeded,
    /// 不可重试的失败，记录标记为 FAILED
    Failed,
    /// 通行证未激活，记录保持 PENDING
    Skipped,
    /// 记录已不是 PENDING
    AlreadySettled,
}

/// 出席记录服务
pub struct AttendanceService {
    attendance_repo: Arc<dyn AttendanceRepositoryTrait>,
    pass_repo: Arc<dyn PassRepositoryTrait>,
    applier: Arc<PointsApplier>,
    publisher: Arc<dyn EventPublisher>,
    /// 每次出席奖励的积分
    award: i64,
}

impl AttendanceService {
    pub fn new(
        attendance_repo: Arc<dyn AttendanceRepositoryTrait>,
        pass_repo: Arc<dyn PassRepositoryTrait>,
        applier: Arc<PointsApplier>,
        publisher: Arc<dyn EventPublisher>,
        award: i64,
    ) -> Self {
        Self {
            attendance_repo,
            pass_repo,
            applier,
            publisher,
            award,
        }
    }

    /// 记录出席
    ///
    /// 同一 (pass_id, session_id) 重复记录返回 `DuplicateAttendance`。
    /// 事件发布失败时记录保持 PENDING，由批量对账补齐。
    #[instrument(skip(self), fields(pass_id = pass_id, session_id = %session_id))]
    pub async fn record_attendance(&self, pass_id: i64, session_id: &str) -> Result<AttendanceRecord> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(LedgerError::Validation("session_id 不能为空".to_string()));
        }

        self.pass_repo
            .get_pass(pass_id)
            .await?
            .ok_or(LedgerError::PassNotFound(pass_id))?;

        let record = self
            .attendance_repo
            .create(pass_id, session_id, self.award)
            .await?;

        info!(record_id = record.id, points = record.points, "出席已记录");

        let event = DomainEvent::PointsEarnRequested {
            pass_id,
            source_id: record.id,
            amount: record.points,
        };
        if let Err(e) = self.publisher.publish(event).await {
            warn!(record_id = record.id, error = %e, "发布积分请求失败，等待对账处理");
        }

        Ok(record)
    }

    pub async fn get_record(&self, id: i64) -> Result<AttendanceRecord> {
        self.attendance_repo
            .get(id)
            .await?
            .ok_or(LedgerError::AttendanceNotFound(id))
    }

    /// 结算一条出席记录
    ///
    /// 可重试的错误原样返回，记录保持 PENDING；
    /// 其余错误将记录标记为 FAILED，失败原因为错误码。
    #[instrument(skip(self))]
    pub async fn settle(&self, record_id: i64) -> Result<SettleOutcome> {
        let record = self.get_record(record_id).await?;
        if record.status != AttendanceStatus::Pending {
            return Ok(SettleOutcome::AlreadySettled);
        }

        let request = ApplyRequest::earn_for_attendance(record.pass_id, record.id, record.points);
        match self.applier.apply(request).await {
            Ok(outcome) => {
                self.attendance_repo.mark_processed(record.id).await?;
                info!(
                    pass_id = record.pass_id,
                    applied = outcome.applied,
                    new_balance = outcome.new_balance,
                    "出席记录已结算"
                );
                Ok(SettleOutcome::Succeeded)
            }
            Err(LedgerError::PassInactive(pass_id)) => {
                info!(pass_id, "通行证未激活，出席记录保留待处理");
                Ok(SettleOutcome::Skipped)
            }
            Err(e) if e.is_retryable() => Err(e),
            Err(e) => {
                warn!(pass_id = record.pass_id, error = %e, "出席记录结算失败");
                self.attendance_repo
                    .mark_failed(record.id, e.error_code())
                    .await?;
                Ok(SettleOutcome::Failed)
            }
        }
    }
}
