//! 测试环境
//!
//! 每个测试独立装配一套内存存储与事件总线，测试之间互不影响。

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use points_ledger::models::{CatalogItem, ExchangeAttempt, NewCatalogItem, Pass};
use points_ledger::repository::memory::{
    InMemoryAttendanceRepository, InMemoryExchangeRepository, InMemoryPassRepository,
    InMemoryStockRepository,
};
use points_ledger::{App, LedgerSettings, Repositories};
use points_shared::test_utils::{test_bus_config, test_participant_id};
use tokio::sync::watch;
use uuid::Uuid;

mod collector;

pub use collector::EventCollector;

const IDLE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestEnvironment {
    pub app: App,
    pub passes: Arc<InMemoryPassRepository>,
    pub attendance: Arc<InMemoryAttendanceRepository>,
    pub exchanges: Arc<InMemoryExchangeRepository>,
    pub events: Arc<EventCollector>,
    shutdown: watch::Sender<bool>,
}

impl TestEnvironment {
    /// 装配并启动事件总线
    pub fn setup() -> Result<Self> {
        let env = Self::build();
        env.app.start_bus(env.shutdown.subscribe())?;
        Ok(env)
    }

    /// 只装配不启动，事件停留在队列中
    pub fn build() -> Self {
        let passes = Arc::new(InMemoryPassRepository::new());
        let attendance = Arc::new(InMemoryAttendanceRepository::new());
        let exchanges = Arc::new(InMemoryExchangeRepository::new());
        let repos = Repositories {
            passes: passes.clone(),
            attendance: attendance.clone(),
            exchanges: exchanges.clone(),
            stock: Arc::new(InMemoryStockRepository::new()),
        };

        let mut settings = LedgerSettings::default();
        settings.app.event_bus = test_bus_config();
        settings.reconciler.enabled = false;

        let app = App::build(settings, repos);
        let events = Arc::new(EventCollector::default());
        app.bus.register(events.clone());

        let (shutdown, _) = watch::channel(false);
        Self {
            app,
            passes,
            attendance,
            exchanges,
            events,
            shutdown,
        }
    }

    pub fn start(&self) -> Result<()> {
        self.app.start_bus(self.shutdown.subscribe())?;
        Ok(())
    }

    /// 等待编排结束
    pub async fn settle(&self) -> Result<()> {
        if !self.app.bus.wait_idle(IDLE_TIMEOUT).await {
            bail!("事件总线未能在 {IDLE_TIMEOUT:?} 内排空");
        }
        Ok(())
    }

    // ==================== 数据准备 ====================

    pub async fn open_pass(&self) -> Result<Pass> {
        Ok(self.app.pass_service.open_pass(&test_participant_id()).await?)
    }

    /// 通过出席记录为通行证充值，每场奖励 5 分
    pub async fn attend(&self, pass_id: i64, sessions: usize) -> Result<()> {
        for _ in 0..sessions {
            self.app
                .attendance_service
                .record_attendance(pass_id, &format!("session-{}", Uuid::now_v7()))
                .await?;
        }
        self.settle().await
    }

    pub async fn seed_item(&self, cost: i64, stock: i64) -> Result<CatalogItem> {
        Ok(self
            .app
            .stock_service
            .create_item(NewCatalogItem {
                name: format!("item-{cost}-{stock}"),
                cost,
                stock,
            })
            .await?)
    }

    // ==================== 查询 ====================

    pub async fn balance(&self, pass_id: i64) -> Result<i64> {
        Ok(self.app.pass_service.get_pass(pass_id).await?.balance)
    }

    pub async fn stock(&self, item_id: i64) -> Result<i64> {
        Ok(self.app.stock_service.get_item(item_id).await?.stock)
    }

    /// 发起兑换并等待编排结束，返回最终状态的兑换尝试
    pub async fn exchange(&self, pass_id: i64, item_id: i64) -> Result<ExchangeAttempt> {
        let attempt = self
            .app
            .exchange_saga
            .request_exchange(pass_id, item_id)
            .await?;
        self.settle().await?;
        Ok(self.app.exchange_saga.exchange_status(attempt.attempt_id).await?)
    }
}

impl Drop for TestEnvironment {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
