//! 成就判定
//!
//! 成就按边沿触发：只有余额从阈值下方跨越到阈值（含）以上时才触发，
//! 之后的继续累积不会再次触发。

use points_shared::events::DomainEvent;

use crate::models::{Achievement, AchievementStatus, Pass, Thresholds};

/// 判定本次余额变化新达成的成就
///
/// 规则：`old < threshold <= new`，两个阈值独立判定，可在一次变更中同时触发。
pub fn evaluate(old_balance: i64, new_balance: i64, thresholds: Thresholds) -> Vec<Achievement> {
    let crossed = |threshold: i64| old_balance < threshold && threshold <= new_balance;

    let mut reached = Vec::with_capacity(2);
    if crossed(thresholds.certificate) {
        reached.push(Achievement::Certificate);
    }
    if crossed(thresholds.special_access) {
        reached.push(Achievement::SpecialAccess);
    }
    reached
}

/// 过滤掉通行证上已经标记为 REACHED 的成就
pub fn newly_reached(pass: &Pass, new_balance: i64) -> Vec<Achievement> {
    evaluate(pass.balance, new_balance, pass.thresholds())
        .into_iter()
        .filter(|achievement| status_of(pass, *achievement) == AchievementStatus::NotReached)
        .collect()
}

pub fn status_of(pass: &Pass, achievement: Achievement) -> AchievementStatus {
    match achievement {
        Achievement::Certificate => pass.certificate_status,
        Achievement::SpecialAccess => pass.special_access_status,
    }
}

pub fn to_event(pass_id: i64, achievement: Achievement) -> DomainEvent {
    match achievement {
        Achievement::Certificate => DomainEvent::CertificateReached { pass_id },
        Achievement::SpecialAccess => DomainEvent::SpecialAccessReached { pass_id },
    }
}
