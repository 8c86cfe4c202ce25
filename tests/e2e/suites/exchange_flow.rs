//! 兑换编排测试套件

use crate::setup::TestEnvironment;
use points_ledger::ExchangeState;
use points_shared::events::{DomainEvent, EventType};

#[cfg(test)]
mod completion_tests {
    use super::*;

    /// 库存充足且余额足够：扣减库存与积分，写入兑换记录，不发出补偿
    #[tokio::test]
    async fn test_exchange_completes() {
        let env = TestEnvironment::setup().unwrap();
        let pass = env.open_pass().await.unwrap();
        env.attend(pass.id, 6).await.unwrap();
        let item = env.seed_item(20, 3).await.unwrap();

        let attempt = env.exchange(pass.id, item.id).await.unwrap();

        assert_eq!(attempt.state, ExchangeState::Completed);
        assert_eq!(env.stock(item.id).await.unwrap(), 2);
        assert_eq!(env.balance(pass.id).await.unwrap(), 10);
        assert_eq!(env.events.count(EventType::PointsDebited), 1);
        assert_eq!(env.events.count(EventType::ExchangeFailed), 0);

        let records = env.app.exchange_saga.list_records(pass.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].cost, Some(20));
    }

    /// 最后一件库存被并发兑换：只有一个成功
    #[tokio::test]
    async fn test_last_unit_goes_to_one_pass() {
        let env = TestEnvironment::setup().unwrap();
        let item = env.seed_item(5, 1).await.unwrap();
        let first = env.open_pass().await.unwrap();
        let second = env.open_pass().await.unwrap();
        env.attend(first.id, 1).await.unwrap();
        env.attend(second.id, 1).await.unwrap();

        let a = env
            .app
            .exchange_saga
            .request_exchange(first.id, item.id)
            .await
            .unwrap();
        let b = env
            .app
            .exchange_saga
            .request_exchange(second.id, item.id)
            .await
            .unwrap();
        env.settle().await.unwrap();

        let a = env.app.exchange_saga.exchange_status(a.attempt_id).await.unwrap();
        let b = env.app.exchange_saga.exchange_status(b.attempt_id).await.unwrap();
        let mut states = vec![a.state, b.state];
        states.sort_by_key(|s| s.as_str());
        assert_eq!(states, vec![ExchangeState::Completed, ExchangeState::Failed]);

        assert_eq!(env.stock(item.id).await.unwrap(), 0);
        let total = env.balance(first.id).await.unwrap() + env.balance(second.id).await.unwrap();
        assert_eq!(total, 5);
    }
}

#[cfg(test)]
mod compensation_tests {
    use super::*;

    /// 余额不足：库存先扣后还，余额不变，发出 ExchangeFailed
    #[tokio::test]
    async fn test_insufficient_balance_restores_stock() {
        let env = TestEnvironment::setup().unwrap();
        let pass = env.open_pass().await.unwrap();
        env.attend(pass.id, 2).await.unwrap();
        let item = env.seed_item(20, 3).await.unwrap();

        let attempt = env.exchange(pass.id, item.id).await.unwrap();

        assert_eq!(attempt.state, ExchangeState::FailedCompensated);
        assert_eq!(env.stock(item.id).await.unwrap(), 3);
        assert_eq!(env.balance(pass.id).await.unwrap(), 10);
        assert_eq!(env.events.count(EventType::StockReserved), 1);

        let failed = env.events.of(EventType::ExchangeFailed);
        assert_eq!(failed.len(), 1);
        assert!(matches!(
            &failed[0],
            DomainEvent::ExchangeFailed { reason, .. } if reason == "INSUFFICIENT_BALANCE"
        ));
        assert!(env.app.bus.dead_letters().is_empty());
    }

    /// 通行证不存在：同样走补偿路径
    #[tokio::test]
    async fn test_unknown_pass_restores_stock() {
        let env = TestEnvironment::setup().unwrap();
        let item = env.seed_item(20, 1).await.unwrap();

        let attempt = env.exchange(424_242, item.id).await.unwrap();

        assert_eq!(attempt.state, ExchangeState::FailedCompensated);
        assert_eq!(attempt.failure_reason.as_deref(), Some("PASS_NOT_FOUND"));
        assert_eq!(env.stock(item.id).await.unwrap(), 1);
    }

    /// 无库存：不扣分，也不需要补偿
    #[tokio::test]
    async fn test_out_of_stock_needs_no_compensation() {
        let env = TestEnvironment::setup().unwrap();
        let pass = env.open_pass().await.unwrap();
        env.attend(pass.id, 6).await.unwrap();
        let item = env.seed_item(20, 0).await.unwrap();
        let before = env.app.pass_service.get_pass(pass.id).await.unwrap();

        let attempt = env.exchange(pass.id, item.id).await.unwrap();

        assert_eq!(attempt.state, ExchangeState::Failed);
        assert_eq!(attempt.failure_reason.as_deref(), Some("ITEM_OUT_OF_STOCK"));
        assert_eq!(env.app.pass_service.get_pass(pass.id).await.unwrap(), before);
        assert_eq!(env.events.count(EventType::ExchangeFailed), 0);
        assert_eq!(env.stock(item.id).await.unwrap(), 0);
    }
}

#[cfg(test)]
mod timeout_tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    /// 预占请求迟迟没有回执：超时后补偿，墓碑阻止迟到的预占
    #[tokio::test]
    async fn test_stuck_attempt_is_compensated_after_timeout() {
        // 总线未启动，ExchangeRequested 停留在队列中
        let env = TestEnvironment::build();
        let pass = env.open_pass().await.unwrap();
        let item = env.seed_item(5, 1).await.unwrap();
        let attempt = env
            .app
            .exchange_saga
            .request_exchange(pass.id, item.id)
            .await
            .unwrap();
        env.exchanges
            .backdate_attempt(attempt.attempt_id, Utc::now() - chrono::Duration::minutes(10));

        let report = env
            .app
            .exchange_saga
            .sweep_stale(Duration::from_secs(60), 100)
            .await
            .unwrap();
        assert_eq!(report.compensated, 1);

        env.start().unwrap();
        env.settle().await.unwrap();

        let attempt = env
            .app
            .exchange_saga
            .exchange_status(attempt.attempt_id)
            .await
            .unwrap();
        // 归还与迟到的预占谁先处理决定最终是否发生过预占
        assert!(matches!(
            attempt.state,
            ExchangeState::Failed | ExchangeState::FailedCompensated
        ));
        assert_eq!(attempt.failure_reason.as_deref(), Some("TIMEOUT"));
        assert_eq!(env.stock(item.id).await.unwrap(), 1);
        assert_eq!(env.balance(pass.id).await.unwrap(), 0);
    }
}
