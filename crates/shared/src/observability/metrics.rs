//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出，并在指定端口暴露 `/metrics` 端点
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "points_applied_total",
        "Point mutations by direction and outcome"
    );
    metrics::describe_counter!(
        "achievements_reached_total",
        "Achievements reached by kind"
    );
    metrics::describe_counter!(
        "exchanges_total",
        "Exchange attempts that reached a terminal state"
    );
    metrics::describe_counter!(
        "reconcile_records_total",
        "Attendance records handled by the reconciler"
    );
    metrics::describe_histogram!(
        "reconcile_duration_seconds",
        "Reconciler run duration in seconds"
    );
    metrics::describe_counter!("events_handled_total", "Event deliveries by handler");
    metrics::describe_histogram!(
        "event_handle_duration_seconds",
        "Event handler duration in seconds"
    );
    metrics::describe_counter!("dead_letters_total", "Deliveries moved to the dead letter queue");
    metrics::describe_gauge!(
        "worker_last_run_timestamp",
        "Unix timestamp of the last background worker run"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录积分变动，outcome 如 applied / duplicate / rejected
#[inline]
pub fn record_points_applied(direction: &str, outcome: &str, amount: i64) {
    metrics::counter!(
        "points_applied_total",
        "direction" => direction.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    if outcome == "applied" {
        metrics::counter!("points_amount_total", "direction" => direction.to_string())
            .increment(amount.max(0) as u64);
    }
}

/// 记录成就达成
#[inline]
pub fn record_achievement(kind: &str) {
    metrics::counter!("achievements_reached_total", "kind" => kind.to_string()).increment(1);
}

/// 记录兑换终态
#[inline]
pub fn record_exchange(state: &str) {
    metrics::counter!("exchanges_total", "state" => state.to_string()).increment(1);
}

/// 记录一次对账运行
#[inline]
pub fn record_reconcile_run(
    succeeded: usize,
    failed: usize,
    skipped: usize,
    duration_secs: f64,
) {
    metrics::counter!("reconcile_records_total", "result" => "succeeded")
        .increment(succeeded as u64);
    metrics::counter!("reconcile_records_total", "result" => "failed").increment(failed as u64);
    metrics::counter!("reconcile_records_total", "result" => "skipped").increment(skipped as u64);
    metrics::histogram!("reconcile_duration_seconds").record(duration_secs);
}

/// 记录一次事件投递的处理结果
#[inline]
pub fn record_event_handled(event_type: &str, handler: &str, status: &str, duration_secs: f64) {
    metrics::counter!(
        "events_handled_total",
        "event_type" => event_type.to_string(),
        "handler" => handler.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "event_handle_duration_seconds",
        "event_type" => event_type.to_string(),
        "handler" => handler.to_string()
    )
    .record(duration_secs);
}

/// 记录死信
#[inline]
pub fn record_dead_letter(event_type: &str, handler: &str) {
    metrics::counter!(
        "dead_letters_total",
        "event_type" => event_type.to_string(),
        "handler" => handler.to_string()
    )
    .increment(1);
}

/// 记录后台 worker 最近一次运行时间
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!("worker_last_run_timestamp", "worker" => worker.to_string())
        .set(chrono::Utc::now().timestamp() as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_functions_do_not_panic() {
        // 未安装 recorder 时这些函数也不应 panic
        record_http_request("GET", "/api/passes/1", 200, 0.1);
        record_points_applied("EARN", "applied", 5);
        record_points_applied("SPEND", "rejected", 20);
        record_achievement("CERTIFICATE");
        record_exchange("COMPLETED");
        record_reconcile_run(3, 1, 2, 0.05);
        record_event_handled("POINTS_EARNED", "notifier", "ok", 0.001);
        record_dead_letter("EXCHANGE_FAILED", "stock");
        set_worker_last_run("reconcile_worker");
    }
}
