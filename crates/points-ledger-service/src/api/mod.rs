//! HTTP 入口
//!
//! 轻量的 REST 层，只做参数校验与错误映射，业务逻辑全部委托给服务层。

pub mod dto;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::build_router;
pub use state::AppState;
