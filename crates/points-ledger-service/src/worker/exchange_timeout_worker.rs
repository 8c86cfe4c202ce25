//! 兑换超时 Worker
//!
//! 迟迟没有收到库存回执或扣分结果的兑换尝试，超时后走补偿路径，
//! 失败原因为 `TIMEOUT`。

use std::sync::Arc;
use std::time::Duration;

use points_shared::observability::metrics;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::ExchangeConfig;
use crate::service::ExchangeSaga;

/// 兑换超时 Worker
pub struct ExchangeTimeoutWorker {
    saga: Arc<ExchangeSaga>,
    /// 尝试最后一次推进后允许等待的时长
    timeout: Duration,
    poll_interval: Duration,
    batch_size: i64,
}

impl ExchangeTimeoutWorker {
    pub fn new(saga: Arc<ExchangeSaga>, config: &ExchangeConfig) -> Self {
        Self {
            saga,
            timeout: config.reservation_timeout(),
            poll_interval: config.sweep_interval(),
            batch_size: config.sweep_batch_size,
        }
    }

    /// 主循环：定期清理超时尝试，直到收到关闭信号
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            timeout = ?self.timeout,
            poll_interval = ?self.poll_interval,
            batch_size = self.batch_size,
            "ExchangeTimeoutWorker 已启动"
        );

        loop {
            if let Err(e) = self.saga.sweep_stale(self.timeout, self.batch_size).await {
                error!(error = %e, "清理超时兑换出错");
            }

            metrics::set_worker_last_run("exchange_timeout_worker");

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {
                    info!("ExchangeTimeoutWorker 收到关闭信号");
                    break;
                }
            }
        }
    }
}
