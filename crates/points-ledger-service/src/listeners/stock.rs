use std::sync::Arc;

use async_trait::async_trait;
use points_shared::bus::EventHandler;
use points_shared::error::Result;
use points_shared::events::{DomainEvent, EventEnvelope, EventType};
use tracing::instrument;

use crate::service::StockService;

/// 库存一方的编排监听器
///
/// - `ExchangeRequested` -> 预占
/// - `PointsDebited` -> 确认消耗
/// - `ExchangeFailed` -> 补偿归还
pub struct StockListener {
    stock_service: Arc<StockService>,
}

impl StockListener {
    pub const NAME: &'static str = "stock";

    pub fn new(stock_service: Arc<StockService>) -> Self {
        Self { stock_service }
    }
}

#[async_trait]
impl EventHandler for StockListener {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn subscribed_types(&self) -> Vec<EventType> {
        vec![
            EventType::ExchangeRequested,
            EventType::PointsDebited,
            EventType::ExchangeFailed,
        ]
    }

    #[instrument(skip_all, fields(event_id = %envelope.event_id, event_type = %envelope.event_type))]
    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        let result = match &envelope.event {
            DomainEvent::ExchangeRequested {
                attempt_id,
                pass_id,
                item_id,
            } => {
                self.stock_service
                    .reserve(*attempt_id, *pass_id, *item_id)
                    .await
            }
            DomainEvent::PointsDebited { attempt_id, .. } => {
                self.stock_service.consume(*attempt_id).await
            }
            DomainEvent::ExchangeFailed {
                attempt_id,
                pass_id,
                item_id,
                ..
            } => {
                self.stock_service
                    .release(*attempt_id, *pass_id, *item_id)
                    .await
            }
            _ => Ok(()),
        };
        result.map_err(|e| e.into_handler_error(Self::NAME))
    }
}
