//! 统一错误处理模块
//!
//! 定义基础设施层共享的错误类型（数据库、事件总线、配置等），
//! 业务错误由各服务自行定义并转换为 `PointsError::Handler`。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum PointsError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库迁移失败: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    // ==================== 事件总线错误 ====================
    #[error("事件总线已关闭")]
    BusClosed,

    #[error("事件处理失败: handler={handler}, retryable={retryable}, {message}")]
    Handler {
        handler: String,
        message: String,
        retryable: bool,
    },

    #[error("事件序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),

    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    // ==================== 验证错误 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, PointsError>;

impl PointsError {
    /// 构造一个可重试的处理器错误
    pub fn retryable(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            handler: handler.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// 构造一个不可重试的处理器错误（将直接进入死信队列）
    pub fn rejected(handler: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            handler: handler.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Migration(_) => "MIGRATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::BusClosed => "BUS_CLOSED",
            Self::Handler { .. } => "HANDLER_FAILED",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 事件总线据此决定重新投递还是直接写入死信队列
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(_) => true,
            Self::Handler { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = PointsError::NotFound {
            entity: "Pass".to_string(),
            id: "123".to_string(),
        };
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(PointsError::BusClosed.code(), "BUS_CLOSED");
    }

    #[test]
    fn test_is_retryable() {
        let db_err = PointsError::Database(sqlx::Error::PoolTimedOut);
        assert!(db_err.is_retryable());

        assert!(PointsError::retryable("stock", "连接中断").is_retryable());
        assert!(!PointsError::rejected("stock", "商品不存在").is_retryable());
        assert!(!PointsError::BusClosed.is_retryable());
    }

    #[test]
    fn test_handler_error_display() {
        let err = PointsError::rejected("points-applier", "余额不足");
        let text = err.to_string();
        assert!(text.contains("points-applier"));
        assert!(text.contains("余额不足"));
    }
}
