//! 积分账本领域模型

pub mod attendance;
pub mod enums;
pub mod exchange;
pub mod pass;
pub mod stock;

pub use attendance::{AttendanceRecord, PendingCursor};
pub use enums::{
    Achievement, AchievementStatus, AttendanceStatus, Direction, ExchangeState, MovementSource,
    PassStatus, ReservationStatus,
};
pub use exchange::{AttemptTransition, ExchangeAttempt, ExchangeRecord, SagaInput};
pub use pass::{CommitOutcome, NewPass, Pass, PassMutation, PointMovement, Thresholds};
pub use stock::{CatalogItem, NewCatalogItem, ReleaseOutcome, ReserveOutcome, StockReservation};
