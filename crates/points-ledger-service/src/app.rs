//! 应用装配
//!
//! 按配置创建仓储、事件总线、服务与监听器，main 与端到端测试共用同一套装配逻辑。

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use points_shared::bus::{EventHandler, EventPublisher, InProcessEventBus};
use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::api::{AppState, build_router};
use crate::config::LedgerSettings;
use crate::error::Result;
use crate::listeners::{
    ExchangeSagaListener, NotificationLogListener, PointsEarnListener, StockListener,
};
use crate::lock::{KeyedLocks, LockConfig};
use crate::repository::memory::{
    InMemoryAttendanceRepository, InMemoryExchangeRepository, InMemoryPassRepository,
    InMemoryStockRepository,
};
use crate::repository::{
    AttendanceRepository, AttendanceRepositoryTrait, ExchangeRepository, ExchangeRepositoryTrait,
    PassRepository, PassRepositoryTrait, StockRepository, StockRepositoryTrait,
};
use crate::service::{
    AttendanceService, ExchangeSaga, PassService, PointsApplier, Reconciler, StockService,
};
use crate::worker::{ExchangeTimeoutWorker, ReconcileWorker};

/// 仓储集合
#[derive(Clone)]
pub struct Repositories {
    pub passes: Arc<dyn PassRepositoryTrait>,
    pub attendance: Arc<dyn AttendanceRepositoryTrait>,
    pub exchanges: Arc<dyn ExchangeRepositoryTrait>,
    pub stock: Arc<dyn StockRepositoryTrait>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            passes: Arc::new(InMemoryPassRepository::new()),
            attendance: Arc::new(InMemoryAttendanceRepository::new()),
            exchanges: Arc::new(InMemoryExchangeRepository::new()),
            stock: Arc::new(InMemoryStockRepository::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            passes: Arc::new(PassRepository::new(pool.clone())),
            attendance: Arc::new(AttendanceRepository::new(pool.clone())),
            exchanges: Arc::new(ExchangeRepository::new(pool.clone())),
            stock: Arc::new(StockRepository::new(pool)),
        }
    }
}

/// 装配完成的应用
pub struct App {
    pub settings: LedgerSettings,
    pub bus: Arc<InProcessEventBus>,
    pub applier: Arc<PointsApplier>,
    pub pass_service: Arc<PassService>,
    pub attendance_service: Arc<AttendanceService>,
    pub stock_service: Arc<StockService>,
    pub exchange_saga: Arc<ExchangeSaga>,
    pub reconciler: Arc<Reconciler>,
}

impl App {
    /// 创建服务并向事件总线注册监听器（总线尚未启动）
    pub fn build(settings: LedgerSettings, repos: Repositories) -> Self {
        let bus = InProcessEventBus::new(&settings.app.event_bus);
        let publisher: Arc<dyn EventPublisher> = bus.clone();

        let lock_config = LockConfig {
            acquire_timeout: settings.points.lock_timeout(),
        };
        let pass_locks = Arc::new(KeyedLocks::<i64>::new("pass", lock_config.clone()));
        let attempt_locks = KeyedLocks::<Uuid>::new("exchange_attempt", lock_config);

        let applier = Arc::new(PointsApplier::new(
            repos.passes.clone(),
            publisher.clone(),
            pass_locks.clone(),
            settings.points.max_conflict_retries,
        ));
        let pass_service = Arc::new(PassService::new(
            repos.passes.clone(),
            pass_locks,
            settings.points.thresholds(),
        ));
        let attendance_service = Arc::new(AttendanceService::new(
            repos.attendance.clone(),
            repos.passes.clone(),
            applier.clone(),
            publisher.clone(),
            settings.points.attendance_award,
        ));
        let stock_service = Arc::new(StockService::new(repos.stock.clone(), publisher.clone()));
        let exchange_saga = Arc::new(ExchangeSaga::new(
            repos.exchanges.clone(),
            repos.passes.clone(),
            applier.clone(),
            publisher,
            attempt_locks,
        ));
        let reconciler = Arc::new(Reconciler::new(
            repos.attendance,
            attendance_service.clone(),
            settings.reconciler.batch_size,
        ));

        // 注册顺序即投递顺序
        let listeners: [Arc<dyn EventHandler>; 4] = [
            Arc::new(PointsEarnListener::new(attendance_service.clone())),
            Arc::new(StockListener::new(stock_service.clone())),
            Arc::new(ExchangeSagaListener::new(exchange_saga.clone())),
            Arc::new(NotificationLogListener::new()),
        ];
        for listener in listeners {
            bus.register(listener);
        }

        Self {
            settings,
            bus,
            applier,
            pass_service,
            attendance_service,
            stock_service,
            exchange_saga,
            reconciler,
        }
    }

    /// 启动事件总线 worker 池
    pub fn start_bus(&self, shutdown: watch::Receiver<bool>) -> Result<Vec<JoinHandle<()>>> {
        Ok(self.bus.start(shutdown)?)
    }

    /// 启动后台 Worker
    pub fn spawn_workers(&self, shutdown: watch::Receiver<bool>) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();

        if self.settings.reconciler.enabled {
            let worker =
                ReconcileWorker::new(self.reconciler.clone(), &self.settings.reconciler.cron)?;
            handles.push(tokio::spawn(worker.run(shutdown.clone())));
        } else {
            info!("定时对账已关闭");
        }

        let worker = ExchangeTimeoutWorker::new(self.exchange_saga.clone(), &self.settings.exchange);
        handles.push(tokio::spawn(worker.run(shutdown)));

        Ok(handles)
    }

    pub fn state(&self) -> AppState {
        AppState {
            pass_service: self.pass_service.clone(),
            attendance_service: self.attendance_service.clone(),
            stock_service: self.stock_service.clone(),
            exchange_saga: self.exchange_saga.clone(),
            reconciler: self.reconciler.clone(),
            bus: self.bus.clone(),
        }
    }

    pub fn router(&self) -> Router {
        let timeout = Duration::from_secs(self.settings.app.server.request_timeout_seconds);
        build_router(self.state(), timeout)
    }
}
