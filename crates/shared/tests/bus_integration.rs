//! 进程内事件总线集成测试
//!
//! 只通过公开接口驱动总线：链式发布、死信重放与记录型发布者。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use points_shared::bus::{EventHandler, EventPublisher, InProcessEventBus};
use points_shared::error::{PointsError, Result};
use points_shared::events::{DomainEvent, EventEnvelope, EventType};
use points_shared::test_utils::{RecordingPublisher, test_bus_config};
use tokio::sync::watch;

// ==================== 测试处理器 ====================

/// 收到 PointsEarned 后继续发布成就事件
struct Chained {
    bus: Arc<InProcessEventBus>,
}

#[async_trait]
impl EventHandler for Chained {
    fn name(&self) -> &'static str {
        "chained"
    }

    fn subscribed_types(&self) -> Vec<EventType> {
        vec![EventType::PointsEarned]
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        if let DomainEvent::PointsEarned { pass_id, .. } = envelope.event {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.bus
                .publish(DomainEvent::CertificateReached { pass_id })
                .await?;
        }
        Ok(())
    }
}

/// 计数处理器，可切换为永久失败
struct Counting {
    name: &'static str,
    calls: AtomicU32,
    broken: AtomicBool,
}

impl Counting {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: AtomicU32::new(0),
            broken: AtomicBool::new(false),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for Counting {
    fn name(&self) -> &'static str {
        self.name
    }

    fn subscribed_types(&self) -> Vec<EventType> {
        vec![EventType::PointsEarned, EventType::CertificateReached]
    }

    async fn handle(&self, _envelope: &EventEnvelope) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.broken.load(Ordering::SeqCst) {
            return Err(PointsError::rejected(self.name, "下游拒绝"));
        }
        Ok(())
    }
}

fn earned(pass_id: i64) -> DomainEvent {
    DomainEvent::PointsEarned {
        pass_id,
        amount: 5,
        new_balance: 5,
    }
}

// ==================== 链式发布 ====================

#[tokio::test]
async fn test_wait_idle_covers_chained_publishes() {
    let bus = InProcessEventBus::new(&test_bus_config());
    let counter = Counting::new("counter");
    bus.register(Arc::new(Chained { bus: bus.clone() }))
        .register(counter.clone());

    let (_tx, rx) = watch::channel(false);
    bus.start(rx).unwrap();
    bus.publish(earned(1)).await.unwrap();

    assert!(bus.wait_idle(Duration::from_secs(2)).await);
    // PointsEarned 与链式发出的 CertificateReached 各一次
    assert_eq!(counter.calls(), 2);
    assert_eq!(bus.in_flight(), 0);
}

// ==================== 死信重放 ====================

#[tokio::test]
async fn test_replay_targets_only_failed_handler() {
    let bus = InProcessEventBus::new(&test_bus_config());
    let healthy = Counting::new("healthy");
    let broken = Counting::new("broken");
    broken.broken.store(true, Ordering::SeqCst);
    bus.register(healthy.clone()).register(broken.clone());

    let (_tx, rx) = watch::channel(false);
    bus.start(rx).unwrap();
    bus.publish(earned(7)).await.unwrap();
    assert!(bus.wait_idle(Duration::from_secs(2)).await);

    let dead = bus.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].handler, "broken");
    assert_eq!(dead[0].attempts, 1);
    assert_eq!(dead[0].event_type, EventType::PointsEarned);

    broken.broken.store(false, Ordering::SeqCst);
    assert_eq!(bus.replay_dead_letters().unwrap(), 1);
    assert!(bus.wait_idle(Duration::from_secs(2)).await);

    assert!(bus.dead_letters().is_empty());
    assert_eq!(broken.calls(), 2);
    assert_eq!(healthy.calls(), 1);
}

#[tokio::test]
async fn test_replay_with_empty_queue() {
    let bus = InProcessEventBus::new(&test_bus_config());
    let (_tx, rx) = watch::channel(false);
    bus.start(rx).unwrap();
    assert_eq!(bus.replay_dead_letters().unwrap(), 0);
}

// ==================== 记录型发布者 ====================

#[tokio::test]
async fn test_recording_publisher_as_trait_object() {
    let recorder = Arc::new(RecordingPublisher::new());
    let publisher: Arc<dyn EventPublisher> = recorder.clone();

    publisher.publish(earned(1)).await.unwrap();
    publisher
        .publish(DomainEvent::SpecialAccessReached { pass_id: 1 })
        .await
        .unwrap();

    assert_eq!(recorder.count(EventType::PointsEarned), 1);
    assert_eq!(
        recorder.events(),
        vec![earned(1), DomainEvent::SpecialAccessReached { pass_id: 1 }]
    );
}
