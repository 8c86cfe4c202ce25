//! 积分账本服务配置
//!
//! 在公共 `AppConfig` 之上增加账本业务段，所有业务常量（阈值、出席奖励、批大小）
//! 都从这里显式传入各组件。

use std::str::FromStr;
use std::time::Duration;

use cron::Schedule;
use points_shared::config::{AppConfig, StorageBackend, layered_config};
use serde::Deserialize;

use crate::error::{LedgerError, Result};
use crate::models::Thresholds;

/// 积分规则
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PointsConfig {
    pub certificate_threshold: i64,
    pub special_access_threshold: i64,
    /// 每次出席奖励的积分
    pub attendance_award: i64,
    /// 版本冲突时的最大重试次数
    pub max_conflict_retries: u32,
    /// 等待通行证锁的最长时间（毫秒）
    pub lock_timeout_ms: u64,
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            certificate_threshold: 25,
            special_access_threshold: 30,
            attendance_award: 5,
            max_conflict_retries: 3,
            lock_timeout_ms: 5000,
        }
    }
}

impl PointsConfig {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            certificate: self.certificate_threshold,
            special_access: self.special_access_threshold,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// 批量对账
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub enabled: bool,
    pub batch_size: i64,
    /// 6 段 cron 表达式（含秒）
    pub cron: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 10,
            cron: "0 */5 * * * *".to_string(),
        }
    }
}

/// 兑换编排
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// 停留在 REQUESTED / STOCK_RESERVED 超过该时长即判定超时
    pub reservation_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub sweep_batch_size: i64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            reservation_timeout_secs: 60,
            sweep_interval_secs: 15,
            sweep_batch_size: 100,
        }
    }
}

impl ExchangeConfig {
    pub fn reservation_timeout(&self) -> Duration {
        Duration::from_secs(self.reservation_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// 积分账本服务完整配置
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    #[serde(flatten)]
    pub app: AppConfig,
    pub points: PointsConfig,
    pub reconciler: ReconcilerConfig,
    pub exchange: ExchangeConfig,
}

impl LedgerSettings {
    /// 从分层配置源加载并校验
    pub fn load(service_name: &str) -> Result<Self> {
        let settings: Self = layered_config(service_name)
            .and_then(|c| c.try_deserialize())
            .map_err(|e| LedgerError::Validation(format!("配置加载失败: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let points = &self.points;
        if points.certificate_threshold <= 0 || points.special_access_threshold <= 0 {
            return Err(LedgerError::Validation("成就阈值必须为正数".to_string()));
        }
        if points.attendance_award <= 0 {
            return Err(LedgerError::Validation("出席奖励必须为正数".to_string()));
        }
        if self.reconciler.batch_size <= 0 {
            return Err(LedgerError::Validation("对账批大小必须为正数".to_string()));
        }
        if self.exchange.sweep_batch_size <= 0 {
            return Err(LedgerError::Validation("超时清理批大小必须为正数".to_string()));
        }
        Schedule::from_str(&self.reconciler.cron).map_err(|e| {
            LedgerError::Validation(format!("无效的 cron 表达式 {}: {e}", self.reconciler.cron))
        })?;
        if self.app.is_production() && self.app.storage.backend == StorageBackend::Memory {
            return Err(LedgerError::Validation("生产环境必须使用 PostgreSQL 存储".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_conference_rules() {
        let settings = LedgerSettings::default();
        assert_eq!(settings.points.certificate_threshold, 25);
        assert_eq!(settings.points.special_access_threshold, 30);
        assert_eq!(settings.points.attendance_award, 5);
        assert_eq!(settings.reconciler.batch_size, 10);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_flattened_sections() {
        let settings: LedgerSettings = serde_json::from_value(serde_json::json!({
            "server": {"port": 9001},
            "points": {"attendance_award": 7},
            "reconciler": {"batch_size": 3}
        }))
        .unwrap();

        assert_eq!(settings.app.server.port, 9001);
        assert_eq!(settings.points.attendance_award, 7);
        assert_eq!(settings.points.certificate_threshold, 25);
        assert_eq!(settings.reconciler.batch_size, 3);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = LedgerSettings::default();
        settings.reconciler.cron = "not a cron".to_string();
        assert!(settings.validate().is_err());

        let mut settings = LedgerSettings::default();
        settings.points.attendance_award = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_production_requires_postgres() {
        let mut settings = LedgerSettings::default();
        settings.app.environment = "production".to_string();
        assert!(matches!(settings.validate(), Err(LedgerError::Validation(_))));

        settings.app.storage.backend = StorageBackend::Postgres;
        assert!(settings.validate().is_ok());
    }
}
