//! 服务层
//!
//! 实现积分账本业务逻辑，协调仓储层、通行证锁与事件总线。
//!
//! ## 模块结构
//!
//! - `achievement`: 成就判定（纯函数）
//! - `points_applier`: 积分变更的唯一入口
//! - `attendance_service`: 出席记录与结算
//! - `reconciler`: 批量对账
//! - `pass_service`: 通行证生命周期
//! - `stock_service`: 兑换编排中的库存一方
//! - `exchange_saga`: 兑换编排状态机

pub mod achievement;
pub mod attendance_service;
pub mod exchange_saga;
pub mod pass_service;
pub mod points_applier;
pub mod reconciler;
pub mod stock_service;

pub use attendance_service::{AttendanceService, SettleOutcome};
pub use exchange_saga::{ExchangeSaga, SweepReport};
pub use pass_service::PassService;
pub use points_applier::{ApplyOutcome, ApplyRequest, PointsApplier};
pub use reconciler::{ReconcileReport, Reconciler};
pub use stock_service::StockService;
