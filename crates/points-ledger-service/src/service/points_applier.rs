//! 积分变更服务
//!
//! 所有余额变更的唯一入口：出席奖励的实时路径、批量对账与兑换扣分都调用 `apply`。
//!
//! ## 流程
//!
//! 1. 获取通行证锁 -> 2. 读取通行证 -> 3. 幂等检查（流水来源）
//!    -> 4. 前置条件 -> 5. 成就判定 -> 6. 版本号比较提交 -> 7. 发布事件 -> 8. 标记已发布
//!
//! 发布失败返回可重试错误。流水记着本次翻转的成就和发布标记，
//! 同一来源重投时若发现事件尚未发布，按流水补发。

use std::sync::Arc;

use points_shared::bus::EventPublisher;
use points_shared::events::DomainEvent;
use points_shared::observability::metrics;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{LedgerError, Result};
use crate::lock::KeyedLocks;
use crate::models::{
    Achievement, AchievementStatus, CommitOutcome, Direction, MovementSource, Pass, PassMutation,
    PointMovement,
};
use crate::repository::PassRepositoryTrait;
use crate::service::achievement;

/// 一次积分变更请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyRequest {
    pub pass_id: i64,
    pub amount: i64,
    pub direction: Direction,
    pub source: MovementSource,
    /// 幂等键，同一通行证上同一来源只生效一次
    pub source_ref: String,
}

impl ApplyRequest {
    pub fn earn_for_attendance(pass_id: i64, record_id: i64, amount: i64) -> Self {
        Self {
            pass_id,
            amount,
            direction: Direction::Earn,
            source: MovementSource::Attendance,
            source_ref: MovementSource::Attendance.source_ref(record_id),
        }
    }

    pub fn spend_for_exchange(pass_id: i64, attempt_id: uuid::Uuid, amount: i64) -> Self {
        Self {
            pass_id,
            amount,
            direction: Direction::Spend,
            source: MovementSource::Exchange,
            source_ref: MovementSource::Exchange.source_ref(attempt_id),
        }
    }
}

/// 变更结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub pass_id: i64,
    pub new_balance: i64,
    /// false 表示该来源此前已生效，本次未做变更
    pub applied: bool,
    pub achievements: Vec<Achievement>,
}

/// 待发布的变更事件
#[derive(Debug, Clone, PartialEq, Eq)]
struct Effects {
    pass_id: i64,
    direction: Direction,
    amount: i64,
    new_balance: i64,
    achievements: Vec<Achievement>,
}

impl Effects {
    fn from_movement(movement: &PointMovement) -> Self {
        Self {
            pass_id: movement.pass_id,
            direction: movement.direction,
            amount: movement.amount,
            new_balance: movement.balance_after,
            achievements: movement.achievements(),
        }
    }

    fn into_events(self) -> Vec<DomainEvent> {
        let mut events = Vec::with_capacity(1 + self.achievements.len());
        if self.direction == Direction::Earn {
            events.push(DomainEvent::PointsEarned {
                pass_id: self.pass_id,
                amount: self.amount,
                new_balance: self.new_balance,
            });
        }
        for kind in self.achievements {
            events.push(achievement::to_event(self.pass_id, kind));
        }
        events
    }
}

/// 积分变更服务
pub struct PointsApplier {
    pass_repo: Arc<dyn PassRepositoryTrait>,
    publisher: Arc<dyn EventPublisher>,
    pass_locks: Arc<KeyedLocks<i64>>,
    max_conflict_retries: u32,
}

impl PointsApplier {
    pub fn new(
        pass_repo: Arc<dyn PassRepositoryTrait>,
        publisher: Arc<dyn EventPublisher>,
        pass_locks: Arc<KeyedLocks<i64>>,
        max_conflict_retries: u32,
    ) -> Self {
        Self {
            pass_repo,
            publisher,
            pass_locks,
            max_conflict_retries,
        }
    }

    /// 应用一次积分变更
    ///
    /// 失败条件：
    /// - `InvalidAmount`：amount <= 0，或余额计算溢出
    /// - `PassNotFound` / `PassInactive`：不做任何变更
    /// - `InsufficientBalance`：仅 SPEND，余额不变
    /// - `ConcurrencyConflict`：版本冲突重试耗尽（可重试）
    /// - `EffectsUnpublished`：已提交但事件发布失败（可重试，重投时补发）
    #[instrument(
        skip(self, request),
        fields(
            pass_id = request.pass_id,
            direction = request.direction.as_str(),
            amount = request.amount,
            source_ref = %request.source_ref
        )
    )]
    pub async fn apply(&self, request: ApplyRequest) -> Result<ApplyOutcome> {
        if request.amount <= 0 {
            return Err(LedgerError::InvalidAmount(request.amount));
        }

        let _guard = self.pass_locks.acquire(request.pass_id).await?;

        let result = self.apply_locked(&request).await;
        let outcome_label = match &result {
            Ok((outcome, _)) if outcome.applied => "applied",
            Ok(_) => "duplicate",
            Err(e) if e.is_business_error() => "rejected",
            Err(_) => "error",
        };
        metrics::record_points_applied(request.direction.as_str(), outcome_label, request.amount);

        let (outcome, effects) = result?;
        if let Some(effects) = effects {
            self.publish_effects(&request.source_ref, effects).await?;
        }
        Ok(outcome)
    }

    async fn apply_locked(&self, request: &ApplyRequest) -> Result<(ApplyOutcome, Option<Effects>)> {
        for attempt in 0..=self.max_conflict_retries {
            let pass = self
                .pass_repo
                .get_pass(request.pass_id)
                .await?
                .ok_or(LedgerError::PassNotFound(request.pass_id))?;

            // 幂等检查先于状态检查：已生效的来源即使通行证随后被关闭也视为成功
            if let Some(movement) = self
                .pass_repo
                .find_movement(pass.id, &request.source_ref)
                .await?
            {
                debug!("来源已生效，跳过");
                return Ok(Self::replayed(&pass, &movement));
            }

            let mutation = Self::plan(&pass, request)?;

            match self.pass_repo.commit_mutation(&mutation).await? {
                CommitOutcome::Committed(updated) => {
                    info!(
                        old_balance = pass.balance,
                        new_balance = updated.balance,
                        achievements = mutation.achievements.len(),
                        "积分变更成功"
                    );
                    for kind in &mutation.achievements {
                        metrics::record_achievement(kind.as_str());
                        info!(achievement = kind.as_str(), "成就达成");
                    }
                    let effects = Effects {
                        pass_id: updated.id,
                        direction: mutation.direction,
                        amount: mutation.amount,
                        new_balance: updated.balance,
                        achievements: mutation.achievements.clone(),
                    };
                    let outcome = ApplyOutcome {
                        pass_id: updated.id,
                        new_balance: updated.balance,
                        applied: true,
                        achievements: mutation.achievements,
                    };
                    return Ok((outcome, Some(effects)));
                }
                CommitOutcome::DuplicateSource => {
                    debug!("提交时发现来源已生效");
                    let current = self
                        .pass_repo
                        .get_pass(request.pass_id)
                        .await?
                        .ok_or(LedgerError::PassNotFound(request.pass_id))?;
                    let movement = self
                        .pass_repo
                        .find_movement(current.id, &request.source_ref)
                        .await?;
                    return Ok(match movement {
                        Some(movement) => Self::replayed(&current, &movement),
                        None => (Self::unchanged(&current), None),
                    });
                }
                CommitOutcome::VersionConflict => {
                    warn!(attempt, expected_version = pass.version, "版本冲突，重新读取");
                }
            }
        }

        Err(LedgerError::ConcurrencyConflict)
    }

    /// 校验前置条件并计算变更后的通行证状态
    fn plan(pass: &Pass, request: &ApplyRequest) -> Result<PassMutation> {
        if !pass.is_active() {
            return Err(LedgerError::PassInactive(pass.id));
        }

        let new_balance = request.direction.apply(pass.balance, request.amount)?;
        if new_balance < 0 {
            return Err(LedgerError::InsufficientBalance {
                required: request.amount,
                available: pass.balance,
            });
        }

        let reached = achievement::newly_reached(pass, new_balance);
        let flag = |kind: Achievement| {
            if reached.contains(&kind) {
                AchievementStatus::Reached
            } else {
                achievement::status_of(pass, kind)
            }
        };
        let certificate_status = flag(Achievement::Certificate);
        let special_access_status = flag(Achievement::SpecialAccess);

        Ok(PassMutation {
            pass_id: pass.id,
            expected_version: pass.version,
            new_balance,
            certificate_status,
            special_access_status,
            direction: request.direction,
            amount: request.amount,
            source_type: request.source,
            source_ref: request.source_ref.clone(),
            achievements: reached,
        })
    }

    /// 来源已生效：余额不变，事件未发布时按流水补发
    fn replayed(pass: &Pass, movement: &PointMovement) -> (ApplyOutcome, Option<Effects>) {
        let effects = (!movement.effects_published).then(|| Effects::from_movement(movement));
        (Self::unchanged(pass), effects)
    }

    fn unchanged(pass: &Pass) -> ApplyOutcome {
        ApplyOutcome {
            pass_id: pass.id,
            new_balance: pass.balance,
            applied: false,
            achievements: Vec::new(),
        }
    }

    /// 发布变更事件，全部成功后标记流水已发布
    ///
    /// 变更已落库，发布失败不回滚，返回可重试错误由调用方重投
    async fn publish_effects(&self, source_ref: &str, effects: Effects) -> Result<()> {
        let pass_id = effects.pass_id;
        for event in effects.into_events() {
            let event_type = event.event_type();
            if let Err(e) = self.publisher.publish(event).await {
                error!(
                    pass_id,
                    event_type = %event_type,
                    error = %e,
                    "积分变更后发布事件失败"
                );
                return Err(LedgerError::EffectsUnpublished {
                    source_ref: source_ref.to_string(),
                    reason: e.to_string(),
                });
            }
        }

        self.pass_repo
            .mark_effects_published(pass_id, source_ref)
            .await?;
        Ok(())
    }
}
