//! 事件总线上的编排集成测试
//!
//! 使用内存仓储与真实的进程内事件总线，验证至少一次投递下的幂等、
//! 可重试失败的重投与死信、以及死信重放。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use points_ledger::listeners::PointsEarnListener;
use points_ledger::repository::AttendanceRepositoryTrait;
use points_ledger::repository::memory::{
    InMemoryAttendanceRepository, InMemoryExchangeRepository, InMemoryPassRepository,
    InMemoryStockRepository,
};
use points_ledger::{App, AttendanceStatus, LedgerSettings, Repositories};
use points_shared::bus::{EventHandler, EventPublisher};
use points_shared::events::{DomainEvent, EventEnvelope, EventType};
use points_shared::test_utils::{test_bus_config, test_participant_id};
use tokio::sync::watch;

const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

// ==================== 辅助 ====================

/// 订阅全部事件类型，记录经过总线的事件
#[derive(Default)]
struct CollectingHandler {
    events: Mutex<Vec<DomainEvent>>,
}

impl CollectingHandler {
    fn count(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

#[async_trait]
impl EventHandler for CollectingHandler {
    fn name(&self) -> &'static str {
        "collector"
    }

    fn subscribed_types(&self) -> Vec<EventType> {
        EventType::ALL.to_vec()
    }

    async fn handle(&self, envelope: &EventEnvelope) -> points_shared::error::Result<()> {
        self.events.lock().push(envelope.event.clone());
        Ok(())
    }
}

struct Harness {
    app: App,
    passes: Arc<InMemoryPassRepository>,
    attendance: Arc<InMemoryAttendanceRepository>,
    collector: Arc<CollectingHandler>,
    shutdown: watch::Sender<bool>,
}

impl Harness {
    fn new() -> Self {
        let passes = Arc::new(InMemoryPassRepository::new());
        let attendance = Arc::new(InMemoryAttendanceRepository::new());
        let repos = Repositories {
            passes: passes.clone(),
            attendance: attendance.clone(),
            exchanges: Arc::new(InMemoryExchangeRepository::new()),
            stock: Arc::new(InMemoryStockRepository::new()),
        };

        let mut settings = LedgerSettings::default();
        settings.app.event_bus = test_bus_config();
        settings.reconciler.enabled = false;

        let app = App::build(settings, repos);
        let collector = Arc::new(CollectingHandler::default());
        app.bus.register(collector.clone());

        let (shutdown, _) = watch::channel(false);
        Self {
            app,
            passes,
            attendance,
            collector,
            shutdown,
        }
    }

    fn start(&self) {
        self.app.start_bus(self.shutdown.subscribe()).unwrap();
    }

    async fn idle(&self) {
        assert!(self.app.bus.wait_idle(IDLE_TIMEOUT).await, "事件总线未能排空");
    }

    async fn balance(&self, pass_id: i64) -> i64 {
        self.app.pass_service.get_pass(pass_id).await.unwrap().balance
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

// ==================== 测试 ====================

#[tokio::test]
async fn test_registration_order_is_dispatch_order() {
    let h = Harness::new();
    assert_eq!(
        h.app.bus.handler_names(EventType::ExchangeFailed),
        vec!["stock", "notification-log", "collector"]
    );
    assert_eq!(
        h.app.bus.handler_names(EventType::PointsEarnRequested),
        vec![PointsEarnListener::NAME, "collector"]
    );
}

#[tokio::test]
async fn test_redelivered_earn_request_credits_once() {
    let h = Harness::new();
    h.start();
    let pass = h.app.pass_service.open_pass(&test_participant_id()).await.unwrap();

    let record = h
        .app
        .attendance_service
        .record_attendance(pass.id, "keynote")
        .await
        .unwrap();

    // 同一事件（相同 event_id）再投递两次
    let envelope = EventEnvelope::new(DomainEvent::PointsEarnRequested {
        pass_id: pass.id,
        source_id: record.id,
        amount: record.points,
    });
    h.app.bus.publish_envelope(envelope.clone()).await.unwrap();
    h.app.bus.publish_envelope(envelope).await.unwrap();
    h.idle().await;

    assert_eq!(h.balance(pass.id).await, 5);
    assert_eq!(h.collector.count(EventType::PointsEarned), 1);
    assert!(h.app.bus.dead_letters().is_empty());
}

#[tokio::test]
async fn test_unknown_attendance_record_goes_to_dead_letter() {
    let h = Harness::new();
    h.start();

    h.app
        .bus
        .publish(DomainEvent::PointsEarnRequested {
            pass_id: 1,
            source_id: 9_999,
            amount: 5,
        })
        .await
        .unwrap();
    h.idle().await;

    let dead = h.app.bus.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].handler, PointsEarnListener::NAME);
    // 不可重试错误只投递一次
    assert_eq!(dead[0].attempts, 1);
}

#[tokio::test]
async fn test_transient_failure_is_recovered_by_reconciler_and_replay() {
    let h = Harness::new();
    let pass = h.app.pass_service.open_pass(&test_participant_id()).await.unwrap();
    let record = h
        .app
        .attendance_service
        .record_attendance(pass.id, "workshop")
        .await
        .unwrap();

    // 存储不可用期间投递，重投耗尽后进入死信
    h.passes.set_unavailable(true);
    h.start();
    h.idle().await;
    h.passes.set_unavailable(false);

    let dead = h.app.bus.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 4);
    let pending = h.attendance.get(record.id).await.unwrap().unwrap();
    assert_eq!(pending.status, AttendanceStatus::Pending);

    // 对账补记积分
    let report = h.app.reconciler.reconcile().await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(h.balance(pass.id).await, 5);

    // 重放死信不会重复入账
    assert_eq!(h.app.bus.replay_dead_letters().unwrap(), 1);
    h.idle().await;
    assert_eq!(h.balance(pass.id).await, 5);
    assert!(h.app.bus.dead_letters().is_empty());
}

#[tokio::test]
async fn test_concurrent_earns_on_one_pass_are_serialized() {
    let h = Harness::new();
    h.start();
    let pass = h.app.pass_service.open_pass(&test_participant_id()).await.unwrap();

    for i in 0..20 {
        h.app
            .attendance_service
            .record_attendance(pass.id, &format!("session-{i}"))
            .await
            .unwrap();
    }
    h.idle().await;

    assert_eq!(h.balance(pass.id).await, 100);
    let movements = h.app.pass_service.list_movements(pass.id, 100).await.unwrap();
    assert_eq!(movements.len(), 20);
    assert_eq!(h.collector.count(EventType::CertificateReached), 1);
    assert_eq!(h.collector.count(EventType::SpecialAccessReached), 1);
}
