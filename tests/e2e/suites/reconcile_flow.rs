//! 批量对账测试套件

use crate::setup::TestEnvironment;
use points_ledger::AttendanceStatus;
use points_ledger::repository::AttendanceRepositoryTrait;
use points_shared::events::EventType;

#[cfg(test)]
mod reconcile_tests {
    use super::*;

    /// 实时路径与对账共同处理同一出席记录，只入账一次；第二次对账无记录可处理
    #[tokio::test]
    async fn test_reconcile_and_live_path_apply_once() {
        // 总线未启动，实时路径尚未处理
        let env = TestEnvironment::build();
        let pass = env.open_pass().await.unwrap();
        let record = env
            .app
            .attendance_service
            .record_attendance(pass.id, "keynote")
            .await
            .unwrap();

        let first = env.app.reconciler.reconcile().await.unwrap();
        assert_eq!(first.processed, 1);
        assert_eq!(first.succeeded, 1);
        assert_eq!(env.balance(pass.id).await.unwrap(), 5);

        // 实时路径随后收到同一事件
        env.start().unwrap();
        env.settle().await.unwrap();
        assert_eq!(env.balance(pass.id).await.unwrap(), 5);
        assert_eq!(env.events.count(EventType::PointsEarned), 1);

        let second = env.app.reconciler.reconcile().await.unwrap();
        assert_eq!(second.processed, 0);
        assert_eq!(env.balance(pass.id).await.unwrap(), 5);

        let record = env.attendance.get(record.id).await.unwrap().unwrap();
        assert_eq!(record.status, AttendanceStatus::Processed);
    }

    /// 未激活的通行证被跳过而不是标记失败，重新激活后补记
    #[tokio::test]
    async fn test_inactive_pass_is_retried_after_reopen() {
        let env = TestEnvironment::build();
        let pass = env.open_pass().await.unwrap();
        let record = env
            .app
            .attendance_service
            .record_attendance(pass.id, "workshop")
            .await
            .unwrap();
        env.app.pass_service.close_pass(pass.id).await.unwrap();

        let report = env.app.reconciler.reconcile().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.processed, 0);
        let pending = env.attendance.get(record.id).await.unwrap().unwrap();
        assert_eq!(pending.status, AttendanceStatus::Pending);

        env.app.pass_service.reopen_pass(pass.id).await.unwrap();
        let report = env.app.reconciler.reconcile().await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(env.balance(pass.id).await.unwrap(), 5);
    }
}
