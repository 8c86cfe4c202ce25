//! 积分入账与成就判定测试套件

use std::sync::atomic::{AtomicI64, Ordering};

use crate::setup::TestEnvironment;
use points_ledger::{ApplyRequest, LedgerError};
use points_shared::events::EventType;
use uuid::Uuid;

/// 以单次变更为通行证增加任意积分（绕过每场固定奖励）
async fn earn(env: &TestEnvironment, pass_id: i64, amount: i64) -> i64 {
    static NEXT_SOURCE: AtomicI64 = AtomicI64::new(1_000_000);
    let source_id = NEXT_SOURCE.fetch_add(1, Ordering::SeqCst);
    let outcome = env
        .app
        .applier
        .apply(ApplyRequest::earn_for_attendance(pass_id, source_id, amount))
        .await
        .unwrap();
    env.settle().await.unwrap();
    outcome.new_balance
}

#[cfg(test)]
mod achievement_tests {
    use super::*;

    /// 成就按边沿触发
    ///
    /// 20 -> 30 跨越证书阈值触发一次，30 -> 35 不再触发
    #[tokio::test]
    async fn test_certificate_fires_once_on_crossing() {
        let env = TestEnvironment::setup().unwrap();
        let pass = env.open_pass().await.unwrap();

        env.attend(pass.id, 4).await.unwrap();
        assert_eq!(env.balance(pass.id).await.unwrap(), 20);
        assert_eq!(env.events.count_for_pass(EventType::CertificateReached, pass.id), 0);

        assert_eq!(earn(&env, pass.id, 10).await, 30);
        assert_eq!(env.events.count_for_pass(EventType::CertificateReached, pass.id), 1);

        assert_eq!(earn(&env, pass.id, 5).await, 35);
        assert_eq!(env.events.count_for_pass(EventType::CertificateReached, pass.id), 1);
    }

    /// 单次变更同时跨越两个阈值
    #[tokio::test]
    async fn test_dual_threshold_crossing() {
        let env = TestEnvironment::setup().unwrap();
        let pass = env.open_pass().await.unwrap();

        env.attend(pass.id, 2).await.unwrap();
        assert_eq!(env.balance(pass.id).await.unwrap(), 10);

        assert_eq!(earn(&env, pass.id, 25).await, 35);
        assert_eq!(env.events.count_for_pass(EventType::CertificateReached, pass.id), 1);
        assert_eq!(env.events.count_for_pass(EventType::SpecialAccessReached, pass.id), 1);

        let pass = env.app.pass_service.get_pass(pass.id).await.unwrap();
        assert_eq!(pass.certificate_status, points_ledger::AchievementStatus::Reached);
        assert_eq!(pass.special_access_status, points_ledger::AchievementStatus::Reached);
    }
}

#[cfg(test)]
mod balance_tests {
    use super::*;

    /// 余额不足的扣分被拒绝且余额不变
    #[tokio::test]
    async fn test_spend_never_makes_balance_negative() {
        let env = TestEnvironment::setup().unwrap();
        let pass = env.open_pass().await.unwrap();
        env.attend(pass.id, 1).await.unwrap();

        let err = env
            .app
            .applier
            .apply(ApplyRequest::spend_for_exchange(pass.id, Uuid::now_v7(), 6))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                required: 6,
                available: 5
            }
        ));
        assert_eq!(env.balance(pass.id).await.unwrap(), 5);

        let outcome = env
            .app
            .applier
            .apply(ApplyRequest::spend_for_exchange(pass.id, Uuid::now_v7(), 5))
            .await
            .unwrap();
        assert_eq!(outcome.new_balance, 0);
    }

    /// 已关闭的通行证不再入账
    #[tokio::test]
    async fn test_closed_pass_rejects_mutation() {
        let env = TestEnvironment::setup().unwrap();
        let pass = env.open_pass().await.unwrap();
        env.app.pass_service.close_pass(pass.id).await.unwrap();

        let err = env
            .app
            .applier
            .apply(ApplyRequest::earn_for_attendance(pass.id, 1, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::PassInactive(_)));
        assert_eq!(env.balance(pass.id).await.unwrap(), 0);
    }
}
