use std::sync::Arc;

use async_trait::async_trait;
use points_shared::bus::EventHandler;
use points_shared::error::Result;
use points_shared::events::{DomainEvent, EventEnvelope, EventType};
use tracing::instrument;

use crate::service::ExchangeSaga;

/// 兑换编排监听器：消费库存一方的回执并推进状态机
pub struct ExchangeSagaListener {
    saga: Arc<ExchangeSaga>,
}

impl ExchangeSagaListener {
    pub const NAME: &'static str = "exchange-saga";

    pub fn new(saga: Arc<ExchangeSaga>) -> Self {
        Self { saga }
    }
}

#[async_trait]
impl EventHandler for ExchangeSagaListener {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn subscribed_types(&self) -> Vec<EventType> {
        vec![
            EventType::StockReserved,
            EventType::StockReservationFailed,
            EventType::StockReleased,
        ]
    }

    #[instrument(skip_all, fields(event_id = %envelope.event_id, event_type = %envelope.event_type))]
    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        let result = match &envelope.event {
            DomainEvent::StockReserved {
                attempt_id, cost, ..
            } => self.saga.on_stock_reserved(*attempt_id, *cost).await,
            DomainEvent::StockReservationFailed {
                attempt_id, reason, ..
            } => self.saga.on_reservation_failed(*attempt_id, reason).await,
            DomainEvent::StockReleased {
                attempt_id,
                restored,
                ..
            } => self.saga.on_stock_released(*attempt_id, *restored).await,
            _ => Ok(()),
        };
        result.map_err(|e| e.into_handler_error(Self::NAME))
    }
}
