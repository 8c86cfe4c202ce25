use async_trait::async_trait;
use parking_lot::Mutex;
use points_shared::bus::EventHandler;
use points_shared::events::{DomainEvent, EventEnvelope, EventType};

/// 记录经过事件总线的全部事件
#[derive(Default)]
pub struct EventCollector {
    events: Mutex<Vec<DomainEvent>>,
}

impl EventCollector {
    pub fn of(&self, event_type: EventType) -> Vec<DomainEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.of(event_type).len()
    }

    pub fn count_for_pass(&self, event_type: EventType, pass_id: i64) -> usize {
        self.of(event_type)
            .iter()
            .filter(|e| match e {
                DomainEvent::CertificateReached { pass_id: p }
                | DomainEvent::SpecialAccessReached { pass_id: p } => *p == pass_id,
                DomainEvent::PointsEarned { pass_id: p, .. }
                | DomainEvent::ExchangeFailed { pass_id: p, .. } => *p == pass_id,
                _ => false,
            })
            .count()
    }
}

#[async_trait]
impl EventHandler for EventCollector {
    fn name(&self) -> &'static str {
        "e2e-collector"
    }

    fn subscribed_types(&self) -> Vec<EventType> {
        EventType::ALL.to_vec()
    }

    async fn handle(&self, envelope: &EventEnvelope) -> points_shared::error::Result<()> {
        self.events.lock().push(envelope.event.clone());
        Ok(())
    }
}
