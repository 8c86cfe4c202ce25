//! 积分系统端到端测试
//!
//! 在真实的进程内事件总线上运行完整编排，覆盖：
//! - 出席入账与成就判定
//! - 兑换完成、补偿与无预占失败
//! - 批量对账与实时路径的幂等

pub mod setup;
pub mod suites;

pub use setup::TestEnvironment;
