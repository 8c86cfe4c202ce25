use async_trait::async_trait;
use points_shared::bus::EventHandler;
use points_shared::error::Result;
use points_shared::events::{DomainEvent, EventEnvelope, EventType};
use tracing::{info, warn};

/// 对外通知的出口
///
/// 通知渠道不在本服务内实现，这里只把面向参会者的事件写入结构化日志，
/// 供日志管道转发给通知与审计组件。
#[derive(Debug, Default)]
pub struct NotificationLogListener;

impl NotificationLogListener {
    pub const NAME: &'static str = "notification-log";

    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventHandler for NotificationLogListener {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn subscribed_types(&self) -> Vec<EventType> {
        vec![
            EventType::PointsEarned,
            EventType::CertificateReached,
            EventType::SpecialAccessReached,
            EventType::ExchangeFailed,
        ]
    }

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        let event_id = envelope.event_id;
        match &envelope.event {
            DomainEvent::PointsEarned {
                pass_id,
                amount,
                new_balance,
            } => {
                info!(%event_id, pass_id, amount, new_balance, "通知: 积分到账");
            }
            DomainEvent::CertificateReached { pass_id } => {
                info!(%event_id, pass_id, "通知: 已获得参会证书资格");
            }
            DomainEvent::SpecialAccessReached { pass_id } => {
                info!(%event_id, pass_id, "通知: 已解锁特别通道");
            }
            DomainEvent::ExchangeFailed {
                attempt_id,
                pass_id,
                reason,
                ..
            } => {
                warn!(%event_id, pass_id, attempt_id = %attempt_id, reason = %reason, "通知: 兑换失败");
            }
            _ => {}
        }
        Ok(())
    }
}
