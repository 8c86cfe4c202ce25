//! 应用状态定义

use std::sync::Arc;

use points_shared::bus::InProcessEventBus;

use crate::service::{
    AttendanceService, ExchangeSaga, PassService, Reconciler, StockService,
};

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub pass_service: Arc<PassService>,
    pub attendance_service: Arc<AttendanceService>,
    pub stock_service: Arc<StockService>,
    pub exchange_saga: Arc<ExchangeSaga>,
    pub reconciler: Arc<Reconciler>,
    pub bus: Arc<InProcessEventBus>,
}
