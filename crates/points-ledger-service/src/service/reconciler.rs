//! 批量对账
//!
//! 扫描仍为 PENDING 的出席记录，逐条经 `AttendanceService::settle` 补记积分。
//! 与实时事件路径共用同一个积分变更入口，重复执行不会重复入账。

use std::sync::Arc;
use std::time::Instant;

use points_shared::observability::metrics;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::models::PendingCursor;
use crate::repository::AttendanceRepositoryTrait;
use crate::service::attendance_service::{AttendanceService, SettleOutcome};

/// 一次对账的统计结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// succeeded + failed
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// 通行证未激活或已被实时路径结算
    pub skipped: usize,
}

impl ReconcileReport {
    fn record(&mut self, outcome: SettleOutcome) {
        match outcome {
            SettleOutcome::Succeeded => self.succeeded += 1,
            SettleOutcome::Failed => self.failed += 1,
            SettleOutcome::Skipped | SettleOutcome::AlreadySettled => self.skipped += 1,
        }
    }
}

/// 批量对账器
pub struct Reconciler {
    attendance_repo: Arc<dyn AttendanceRepositoryTrait>,
    attendance_service: Arc<AttendanceService>,
    batch_size: i64,
}

impl Reconciler {
    pub fn new(
        attendance_repo: Arc<dyn AttendanceRepositoryTrait>,
        attendance_service: Arc<AttendanceService>,
        batch_size: i64,
    ) -> Self {
        Self {
            attendance_repo,
            attendance_service,
            batch_size: batch_size.max(1),
        }
    }

    /// 执行一次对账
    ///
    /// 按 (created_at, id) 游标分批读取，被跳过的记录保持 PENDING 但游标照常前进，
    /// 因此单次运行对每条记录至多处理一次。可重试的错误计为失败，记录留给下一次运行。
    #[instrument(skip(self), fields(batch_size = self.batch_size))]
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let started = Instant::now();
        let mut report = ReconcileReport::default();
        let mut cursor: Option<PendingCursor> = None;

        loop {
            let batch = self
                .attendance_repo
                .list_pending_after(cursor, self.batch_size)
                .await?;
            let Some(last) = batch.last() else {
                break;
            };
            cursor = Some(last.cursor());
            debug!(count = batch.len(), "读取到一批待处理出席记录");

            for record in &batch {
                match self.attendance_service.settle(record.id).await {
                    Ok(outcome) => report.record(outcome),
                    Err(e) if e.is_retryable() => {
                        warn!(record_id = record.id, error = %e, "出席记录暂时无法结算，保留待处理");
                        report.failed += 1;
                    }
                    Err(e) => {
                        warn!(record_id = record.id, error = %e, "出席记录结算出错");
                        report.failed += 1;
                    }
                }
            }

            if (batch.len() as i64) < self.batch_size {
                break;
            }
        }

        report.processed = report.succeeded + report.failed;
        let elapsed = started.elapsed();
        metrics::record_reconcile_run(
            report.succeeded,
            report.failed,
            report.skipped,
            elapsed.as_secs_f64(),
        );
        info!(
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            elapsed_ms = elapsed.as_millis() as u64,
            "对账完成"
        );

        Ok(report)
    }
}
