//! 兑换编排
//!
//! 以兑换尝试（attempt_id）为键的状态机，状态迁移规则见 `ExchangeState::on`。
//!
//! ## 事件流
//!
//! ```text
//! request_exchange  -> ExchangeRequested
//! StockReserved     -> 扣分 -> PointsDebited           (COMPLETED)
//!                           -> ExchangeFailed          (COMPENSATING)
//! StockReleased     -> FAILED_COMPENSATED / FAILED
//! StockReservationFailed -> FAILED
//! 超时清理          -> ExchangeFailed{TIMEOUT}         (COMPENSATING)
//! ```
//!
//! 每次迁移都在兑换尝试锁内以比较并交换落库；进入终态的迁移与兑换记录一同提交。
//! 已完成但 PointsDebited 未发出的尝试，在预占确认重投时补发。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use points_shared::bus::EventPublisher;
use points_shared::events::DomainEvent;
use points_shared::observability::metrics;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::lock::KeyedLocks;
use crate::models::{
    AttemptTransition, ExchangeAttempt, ExchangeRecord, ExchangeState, MovementSource,
    PointMovement, SagaInput,
};
use crate::repository::{ExchangeRepositoryTrait, PassRepositoryTrait};
use crate::service::points_applier::{ApplyRequest, PointsApplier};

/// 超时清理的失败原因
pub const TIMEOUT_REASON: &str = "TIMEOUT";

/// 一次超时清理的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    /// 进入补偿
    pub compensated: usize,
    /// 扣分已生效，直接完成
    pub completed: usize,
    /// 补偿中的尝试重新发出 ExchangeFailed
    pub resent: usize,
}

enum ExpireAction {
    Compensated,
    Completed,
    Resent,
}

/// 兑换编排
pub struct ExchangeSaga {
    exchange_repo: Arc<dyn ExchangeRepositoryTrait>,
    pass_repo: Arc<dyn PassRepositoryTrait>,
    applier: Arc<PointsApplier>,
    publisher: Arc<dyn EventPublisher>,
    attempt_locks: KeyedLocks<Uuid>,
}

impl ExchangeSaga {
    pub fn new(
        exchange_repo: Arc<dyn ExchangeRepositoryTrait>,
        pass_repo: Arc<dyn PassRepositoryTrait>,
        applier: Arc<PointsApplier>,
        publisher: Arc<dyn EventPublisher>,
        attempt_locks: KeyedLocks<Uuid>,
    ) -> Self {
        Self {
            exchange_repo,
            pass_repo,
            applier,
            publisher,
            attempt_locks,
        }
    }

    // ==================== 入口 ====================

    /// 发起兑换，立即返回 REQUESTED 状态的兑换尝试
    #[instrument(skip(self))]
    pub async fn request_exchange(&self, pass_id: i64, item_id: i64) -> Result<ExchangeAttempt> {
        if pass_id <= 0 || item_id <= 0 {
            return Err(LedgerError::Validation("pass_id 与 item_id 必须为正数".to_string()));
        }

        let attempt = ExchangeAttempt::new(pass_id, item_id);
        self.exchange_repo.create_attempt(&attempt).await?;

        self.publisher
            .publish(DomainEvent::ExchangeRequested {
                attempt_id: attempt.attempt_id,
                pass_id,
                item_id,
            })
            .await?;

        info!(attempt_id = %attempt.attempt_id, "兑换已受理");
        Ok(attempt)
    }

    pub async fn exchange_status(&self, attempt_id: Uuid) -> Result<ExchangeAttempt> {
        self.exchange_repo
            .get_attempt(attempt_id)
            .await?
            .ok_or(LedgerError::AttemptNotFound(attempt_id))
    }

    pub async fn exchange_record(&self, attempt_id: Uuid) -> Result<Option<ExchangeRecord>> {
        self.exchange_repo.get_record(attempt_id).await
    }

    pub async fn list_records(&self, pass_id: i64) -> Result<Vec<ExchangeRecord>> {
        self.exchange_repo.list_records_by_pass(pass_id).await
    }

    // ==================== 事件响应 ====================

    /// 库存已预占：扣分
    #[instrument(skip(self))]
    pub async fn on_stock_reserved(&self, attempt_id: Uuid, cost: i64) -> Result<()> {
        let _guard = self.attempt_locks.acquire(attempt_id).await?;
        let attempt = self.exchange_status(attempt_id).await?;

        let attempt = match attempt.state {
            ExchangeState::Requested => {
                match self
                    .advance(&attempt, SagaInput::StockReserved { cost }, None)
                    .await?
                {
                    Some(updated) => updated,
                    None => return Ok(()),
                }
            }
            // 上次处理在扣分前后中断，继续
            ExchangeState::StockReserved => attempt,
            // 超时或扣分失败后迟到的确认：确保补偿已发出
            ExchangeState::Compensating => return self.publish_exchange_failed(&attempt).await,
            // 上次完成后扣分事件未发出
            ExchangeState::Completed if !attempt.debit_published => {
                let movement = self.debit_movement(&attempt).await?.ok_or_else(|| {
                    LedgerError::Internal(format!("已完成的兑换缺少扣分流水: {attempt_id}"))
                })?;
                return self.publish_points_debited(&attempt, &movement).await;
            }
            state => {
                debug!(state = %state, "兑换已结束，忽略重复的预占确认");
                return Ok(());
            }
        };

        let request = ApplyRequest::spend_for_exchange(attempt.pass_id, attempt_id, cost);
        match self.applier.apply(request).await {
            Ok(outcome) if outcome.applied => {
                self.complete(&attempt, cost, outcome.new_balance).await
            }
            // 扣分此前已生效，以流水中的余额为准
            Ok(outcome) => {
                let balance = self
                    .debit_movement(&attempt)
                    .await?
                    .map_or(outcome.new_balance, |m| m.balance_after);
                self.complete(&attempt, cost, balance).await
            }
            Err(e) if e.is_retryable() => Err(e),
            Err(e) => {
                warn!(pass_id = attempt.pass_id, error = %e, "扣分失败，开始补偿");
                let reason = e.error_code().to_string();
                match self
                    .advance(&attempt, SagaInput::DebitFailed, Some(reason))
                    .await?
                {
                    Some(compensating) => self.publish_exchange_failed(&compensating).await,
                    None => Ok(()),
                }
            }
        }
    }

    /// 预占失败：无需补偿
    #[instrument(skip(self))]
    pub async fn on_reservation_failed(&self, attempt_id: Uuid, reason: &str) -> Result<()> {
        let _guard = self.attempt_locks.acquire(attempt_id).await?;
        let attempt = self.exchange_status(attempt_id).await?;

        if self
            .advance(&attempt, SagaInput::ReservationFailed, Some(reason.to_string()))
            .await?
            .is_some()
        {
            info!(reason, "预占失败，兑换结束");
        }
        Ok(())
    }

    /// 库存归还确认
    #[instrument(skip(self))]
    pub async fn on_stock_released(&self, attempt_id: Uuid, restored: bool) -> Result<()> {
        let _guard = self.attempt_locks.acquire(attempt_id).await?;
        let attempt = self.exchange_status(attempt_id).await?;

        if let Some(done) = self
            .advance(&attempt, SagaInput::StockReleased { restored }, None)
            .await?
        {
            info!(state = %done.state, "补偿完成");
        }
        Ok(())
    }

    // ==================== 超时清理 ====================

    /// 清理超时的兑换尝试
    #[instrument(skip(self))]
    pub async fn sweep_stale(&self, timeout: Duration, limit: i64) -> Result<SweepReport> {
        let timeout = chrono::Duration::from_std(timeout)
            .map_err(|e| LedgerError::Internal(e.to_string()))?;
        let cutoff = Utc::now() - timeout;
        let stale = self
            .exchange_repo
            .list_stale_attempts(cutoff, limit)
            .await?;

        let mut report = SweepReport {
            scanned: stale.len(),
            ..Default::default()
        };
        for attempt in stale {
            match self.expire(attempt.attempt_id, cutoff).await {
                Ok(Some(ExpireAction::Compensated)) => report.compensated += 1,
                Ok(Some(ExpireAction::Completed)) => report.completed += 1,
                Ok(Some(ExpireAction::Resent)) => report.resent += 1,
                Ok(None) => {}
                Err(e) => {
                    error!(attempt_id = %attempt.attempt_id, error = %e, "超时处理失败");
                }
            }
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                compensated = report.compensated,
                completed = report.completed,
                resent = report.resent,
                "超时清理完成"
            );
        }
        Ok(report)
    }

    /// 处理单个超时的兑换尝试
    async fn expire(&self, attempt_id: Uuid, cutoff: DateTime<Utc>) -> Result<Option<ExpireAction>> {
        let _guard = self.attempt_locks.acquire(attempt_id).await?;
        let attempt = self.exchange_status(attempt_id).await?;

        // 列出之后已被推进
        if attempt.updated_at >= cutoff {
            return Ok(None);
        }

        match attempt.state {
            ExchangeState::Compensating => {
                self.publish_exchange_failed(&attempt).await?;
                Ok(Some(ExpireAction::Resent))
            }
            ExchangeState::StockReserved => match self.debit_movement(&attempt).await? {
                // 扣分已落库但状态未推进
                Some(movement) => {
                    self.complete(&attempt, movement.amount, movement.balance_after)
                        .await?;
                    Ok(Some(ExpireAction::Completed))
                }
                None => self.time_out(&attempt).await,
            },
            state if state.is_in_flight() => self.time_out(&attempt).await,
            _ => Ok(None),
        }
    }

    async fn time_out(&self, attempt: &ExchangeAttempt) -> Result<Option<ExpireAction>> {
        warn!(attempt_id = %attempt.attempt_id, state = %attempt.state, "兑换超时，开始补偿");
        match self
            .advance(attempt, SagaInput::TimedOut, Some(TIMEOUT_REASON.to_string()))
            .await?
        {
            Some(compensating) => {
                self.publish_exchange_failed(&compensating).await?;
                Ok(Some(ExpireAction::Compensated))
            }
            None => Ok(None),
        }
    }

    async fn debit_movement(&self, attempt: &ExchangeAttempt) -> Result<Option<PointMovement>> {
        let source_ref = MovementSource::Exchange.source_ref(attempt.attempt_id);
        self.pass_repo
            .find_movement(attempt.pass_id, &source_ref)
            .await
    }

    // ==================== 内部步骤 ====================

    /// 按状态机推进一步
    ///
    /// 当前状态不接受该输入时返回 None（重复或迟到的投递）
    async fn advance(
        &self,
        attempt: &ExchangeAttempt,
        input: SagaInput,
        failure_reason: Option<String>,
    ) -> Result<Option<ExchangeAttempt>> {
        let next = match attempt.state.on(input) {
            Ok(next) => next,
            Err(e) => {
                debug!(attempt_id = %attempt.attempt_id, error = %e, "忽略不适用的状态迁移");
                return Ok(None);
            }
        };

        let cost = match input {
            SagaInput::StockReserved { cost } => Some(cost),
            _ => None,
        };

        let mut updated = attempt.clone();
        updated.state = next;
        updated.cost = cost.or(updated.cost);
        updated.failure_reason = failure_reason.clone().or(updated.failure_reason);
        updated.updated_at = Utc::now();

        let transition = AttemptTransition {
            attempt_id: attempt.attempt_id,
            from: attempt.state,
            to: next,
            cost,
            failure_reason,
            record: next
                .is_terminal()
                .then(|| ExchangeRecord::from_attempt(&updated)),
        };
        if !self.exchange_repo.transition_attempt(&transition).await? {
            return Err(LedgerError::ConcurrencyConflict);
        }

        debug!(
            attempt_id = %attempt.attempt_id,
            from = %attempt.state,
            to = %next,
            input = input.as_str(),
            "兑换状态已迁移"
        );

        if next.is_terminal() {
            metrics::record_exchange(next.as_str());
        }
        Ok(Some(updated))
    }

    async fn complete(&self, attempt: &ExchangeAttempt, cost: i64, new_balance: i64) -> Result<()> {
        let Some(done) = self.advance(attempt, SagaInput::PointsDebited, None).await? else {
            return Ok(());
        };

        info!(attempt_id = %attempt.attempt_id, cost, new_balance, "兑换完成");
        self.publish_debit(&done, cost, new_balance).await
    }

    async fn publish_points_debited(
        &self,
        attempt: &ExchangeAttempt,
        movement: &PointMovement,
    ) -> Result<()> {
        info!(attempt_id = %attempt.attempt_id, "补发扣分事件");
        self.publish_debit(attempt, movement.amount, movement.balance_after)
            .await
    }

    /// 发布 PointsDebited，成功后标记
    ///
    /// 失败时返回可重试错误，预占确认重投时补发
    async fn publish_debit(&self, attempt: &ExchangeAttempt, cost: i64, new_balance: i64) -> Result<()> {
        let event = DomainEvent::PointsDebited {
            attempt_id: attempt.attempt_id,
            pass_id: attempt.pass_id,
            amount: cost,
            new_balance,
        };
        if let Err(e) = self.publisher.publish(event).await {
            error!(attempt_id = %attempt.attempt_id, error = %e, "发布扣分事件失败");
            return Err(LedgerError::EffectsUnpublished {
                source_ref: MovementSource::Exchange.source_ref(attempt.attempt_id),
                reason: e.to_string(),
            });
        }

        self.exchange_repo
            .mark_debit_published(attempt.attempt_id)
            .await?;
        Ok(())
    }

    async fn publish_exchange_failed(&self, attempt: &ExchangeAttempt) -> Result<()> {
        self.publisher
            .publish(DomainEvent::ExchangeFailed {
                attempt_id: attempt.attempt_id,
                pass_id: attempt.pass_id,
                item_id: attempt.item_id,
                reason: attempt
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| TIMEOUT_REASON.to_string()),
            })
            .await?;
        Ok(())
    }
}
