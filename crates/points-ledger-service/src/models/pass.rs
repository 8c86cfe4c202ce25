//! 通行证（积分账本聚合）与积分流水

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{Achievement, AchievementStatus, Direction, MovementSource, PassStatus};

/// 通行证
///
/// 积分余额始终非负；关闭前余额必须为零；成就标记只会向前流转。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Pass {
    pub id: i64,
    pub participant_id: String,
    pub balance: i64,
    pub certificate_threshold: i64,
    pub special_access_threshold: i64,
    pub certificate_status: AchievementStatus,
    pub special_access_status: AchievementStatus,
    pub status: PassStatus,
    /// 乐观锁版本号，每次变更加一
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pass {
    pub fn is_active(&self) -> bool {
        self.status == PassStatus::Active
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            certificate: self.certificate_threshold,
            special_access: self.special_access_threshold,
        }
    }
}

/// 成就阈值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    pub certificate: i64,
    pub special_access: i64,
}

/// 开通通行证
#[derive(Debug, Clone)]
pub struct NewPass {
    pub participant_id: String,
    pub thresholds: Thresholds,
}

/// 积分流水
///
/// (pass_id, source_ref) 唯一，是积分变动幂等的依据。
/// 流水同时记下本次翻转的成就，以及变更后的事件是否已发布，
/// 发布失败后重复投递同一来源时据此补发。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PointMovement {
    pub id: i64,
    pub pass_id: i64,
    pub direction: Direction,
    pub amount: i64,
    pub balance_after: i64,
    pub source_type: MovementSource,
    pub source_ref: String,
    pub certificate_reached: bool,
    pub special_access_reached: bool,
    pub effects_published: bool,
    pub created_at: DateTime<Utc>,
}

impl PointMovement {
    /// 本条流水翻转的成就
    pub fn achievements(&self) -> Vec<Achievement> {
        let mut reached = Vec::with_capacity(2);
        if self.certificate_reached {
            reached.push(Achievement::Certificate);
        }
        if self.special_access_reached {
            reached.push(Achievement::SpecialAccess);
        }
        reached
    }
}

/// 一次余额变更：通行证新状态与流水在同一事务内落库
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassMutation {
    pub pass_id: i64,
    pub expected_version: i64,
    pub new_balance: i64,
    pub certificate_status: AchievementStatus,
    pub special_access_status: AchievementStatus,
    pub direction: Direction,
    pub amount: i64,
    pub source_type: MovementSource,
    pub source_ref: String,
    /// 本次由 NOT_REACHED 翻转为 REACHED 的成就
    pub achievements: Vec<Achievement>,
}

impl PassMutation {
    pub fn reaches(&self, kind: Achievement) -> bool {
        self.achievements.contains(&kind)
    }
}

/// 提交结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(Pass),
    /// 版本号已变化，调用方重新读取后重试
    VersionConflict,
    /// 该来源的流水已存在，变更已生效过
    DuplicateSource,
}
