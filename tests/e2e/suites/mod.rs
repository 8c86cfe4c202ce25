//! 测试套件模块
//!
//! 按业务流程组织的测试用例集合。

pub mod exchange_flow;
pub mod points_flow;
pub mod reconcile_flow;
