//! 事件监听器
//!
//! 每个监听器显式声明订阅的事件类型，由 `App` 按固定顺序注册到事件总线。
//! 业务错误转换为不可重试的处理器错误（进入死信），基础设施错误保留可重试标记。

mod exchange;
mod notification;
mod points_earn;
mod stock;

pub use exchange::ExchangeSagaListener;
pub use notification::NotificationLogListener;
pub use points_earn::PointsEarnListener;
pub use stock::StockListener;
