//! 后台 Worker
//!
//! - `ReconcileWorker`: 按 cron 表达式运行批量对账
//! - `ExchangeTimeoutWorker`: 固定间隔清理超时的兑换尝试
//!
//! 两者都在收到关闭信号后结束循环。

pub mod exchange_timeout_worker;
pub mod reconcile_worker;

pub use exchange_timeout_worker::ExchangeTimeoutWorker;
pub use reconcile_worker::ReconcileWorker;
