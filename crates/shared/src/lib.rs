//! 共享库
//!
//! 包含积分服务共用的配置、错误处理、领域事件契约、进程内事件总线、
//! 死信队列、数据库连接与可观测性等基础设施代码。

pub mod bus;
pub mod config;
pub mod database;
pub mod dlq;
pub mod error;
pub mod events;
pub mod observability;
pub mod retry;
pub mod test_utils;
