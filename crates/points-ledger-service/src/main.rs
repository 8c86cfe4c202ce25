//! 会议积分账本服务
//!
//! 提供通行证积分、出席结算、兑换编排与批量对账的 HTTP 服务入口。

use std::time::Duration;

use anyhow::Result;
use points_shared::{config::StorageBackend, database::Database, observability};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use points_ledger::{App, LedgerSettings, Repositories};

const SERVICE_NAME: &str = "points-ledger-service";

/// 关闭时等待事件总线排空的最长时间
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置：default -> {env} -> {service} -> 环境变量
    let settings = LedgerSettings::load(SERVICE_NAME)?;
    settings.validate()?;

    // 2. 初始化日志与指标
    let obs_config = settings
        .app
        .observability
        .clone()
        .with_service_name(&settings.app.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(
        environment = %settings.app.environment,
        storage = ?settings.app.storage.backend,
        "Starting points-ledger-service..."
    );

    // 3. 初始化存储
    let (repos, db) = match settings.app.storage.backend {
        StorageBackend::Memory => {
            warn!("使用内存存储，进程退出后数据丢失");
            (Repositories::in_memory(), None)
        }
        StorageBackend::Postgres => {
            let db = Database::connect(&settings.app.database).await?;
            if settings.app.database.run_migrations {
                sqlx::migrate!("./migrations").run(db.pool()).await?;
                info!("Database migrations applied");
            }
            db.health_check().await?;
            (Repositories::postgres(db.pool().clone()), Some(db))
        }
    };

    // 4. 装配服务并注册监听器
    let app = App::build(settings, repos);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // 5. 启动事件总线与后台 Worker
    let bus_handles = app.start_bus(shutdown_rx.clone())?;
    let worker_handles = app.spawn_workers(shutdown_rx)?;
    info!(
        bus_workers = bus_handles.len(),
        background_workers = worker_handles.len(),
        "Event bus and workers started"
    );

    // 6. 启动 HTTP 服务
    let addr = app.settings.app.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app.router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 7. 排空事件后停止总线与 Worker
    if !app.bus.wait_idle(DRAIN_TIMEOUT).await {
        warn!(in_flight = app.bus.in_flight(), "事件总线未能在超时内排空");
    }
    let _ = shutdown_tx.send(true);
    for handle in bus_handles.into_iter().chain(worker_handles) {
        if let Err(e) = handle.await {
            error!(error = %e, "后台任务异常退出");
        }
    }

    if let Some(db) = db {
        db.close().await;
    }

    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
