//! 批量对账 Worker

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use points_shared::observability::metrics;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::{LedgerError, Result};
use crate::service::Reconciler;

/// 批量对账 Worker
///
/// 按 cron 表达式定时触发对账，每次触发之间互不重叠。
pub struct ReconcileWorker {
    reconciler: Arc<Reconciler>,
    schedule: Schedule,
}

impl ReconcileWorker {
    pub fn new(reconciler: Arc<Reconciler>, cron_expression: &str) -> Result<Self> {
        let schedule = Schedule::from_str(cron_expression).map_err(|e| {
            LedgerError::Validation(format!("无效的 cron 表达式 {cron_expression}: {e}"))
        })?;
        Ok(Self {
            reconciler,
            schedule,
        })
    }

    /// 下一次触发时间
    fn next_run(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// 主循环：按计划执行对账，直到收到关闭信号
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("ReconcileWorker 已启动");

        loop {
            let Some(next) = self.next_run(Utc::now()) else {
                warn!("cron 表达式没有后续触发时间，ReconcileWorker 退出");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {
                    info!("ReconcileWorker 收到关闭信号");
                    break;
                }
            }

            if let Err(e) = self.reconciler.reconcile().await {
                error!(error = %e, "批量对账出错");
            }

            metrics::set_worker_last_run("reconcile_worker");
        }
    }
}
