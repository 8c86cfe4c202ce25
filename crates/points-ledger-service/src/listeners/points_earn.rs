use std::sync::Arc;

use async_trait::async_trait;
use points_shared::bus::EventHandler;
use points_shared::error::Result;
use points_shared::events::{DomainEvent, EventEnvelope, EventType};
use tracing::{debug, instrument};

use crate::service::AttendanceService;

/// 实时积分入账：`PointsEarnRequested` -> `AttendanceService::settle`
pub struct PointsEarnListener {
    attendance_service: Arc<AttendanceService>,
}

impl PointsEarnListener {
    pub const NAME: &'static str = "points-earn";

    pub fn new(attendance_service: Arc<AttendanceService>) -> Self {
        Self { attendance_service }
    }
}

#[async_trait]
impl EventHandler for PointsEarnListener {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn subscribed_types(&self) -> Vec<EventType> {
        vec![EventType::PointsEarnRequested]
    }

    #[instrument(skip_all, fields(event_id = %envelope.event_id))]
    async fn handle(&self, envelope: &EventEnvelope) -> Result<()> {
        let DomainEvent::PointsEarnRequested { source_id, .. } = &envelope.event else {
            return Ok(());
        };

        let outcome = self
            .attendance_service
            .settle(*source_id)
            .await
            .map_err(|e| e.into_handler_error(Self::NAME))?;
        debug!(record_id = source_id, outcome = ?outcome, "积分请求已处理");
        Ok(())
    }
}
