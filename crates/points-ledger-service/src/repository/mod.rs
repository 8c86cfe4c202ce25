//! 仓储层
//!
//! 提供所有实体的数据访问接口，封装存储细节。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务逻辑
//! - PostgreSQL 实现使用 SQLx，需要原子性的写入在仓储内部开启事务
//! - 内存实现用于开发环境和测试，语义与 PostgreSQL 实现一致
//! - 定义 trait 接口以支持 mock 测试

mod attendance_repo;
mod exchange_repo;
pub mod memory;
mod pass_repo;
mod stock_repo;
mod traits;

pub use attendance_repo::AttendanceRepository;
pub use exchange_repo::ExchangeRepository;
pub use pass_repo::PassRepository;
pub use stock_repo::StockRepository;
pub use traits::*;
