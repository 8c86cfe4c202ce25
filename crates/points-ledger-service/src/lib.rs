//! 会议积分账本服务
//!
//! 管理参会通行证的积分余额：出席入账、成就判定、积分兑换与补偿、批量对账。
//!
//! ## 核心功能
//!
//! - **积分变更**：`PointsApplier` 是唯一的余额变更入口，按通行证串行化并以来源引用去重
//! - **成就判定**：余额跨越阈值的边沿触发证书与特别通道成就，只触发一次
//! - **出席结算**：记录出席后经事件总线实时入账，批量对账补齐遗漏
//! - **兑换编排**：库存预占、扣分、失败补偿组成的事件驱动状态机，超时自动补偿
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `config`: 服务配置
//! - `repository`: 仓储层（PostgreSQL 与内存实现）
//! - `lock`: 按键串行化的进程内锁
//! - `service`: 业务服务层
//! - `listeners`: 事件监听器
//! - `worker`: 后台 Worker
//! - `api`: HTTP 入口
//! - `app`: 应用装配

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod listeners;
pub mod lock;
pub mod models;
pub mod repository;
pub mod service;
pub mod worker;

pub use app::{App, Repositories};
pub use config::LedgerSettings;
pub use error::{LedgerError, Result};
pub use models::*;
pub use service::{
    ApplyOutcome, ApplyRequest, AttendanceService, ExchangeSaga, PassService, PointsApplier,
    ReconcileReport, Reconciler, SettleOutcome, StockService, SweepReport,
};
