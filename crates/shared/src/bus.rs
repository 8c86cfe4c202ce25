//! 进程内事件总线
//!
//! 取代隐式的注解监听：处理器通过 `HandlerRegistry` 显式注册，
//! 注册表维护 事件类型 -> 有序处理器列表 的映射，注册顺序即投递顺序。
//!
//! 投递语义为至少一次：
//! - 每个 (事件, 处理器) 是一次独立投递，一个处理器失败不影响其他处理器
//! - 可重试错误按 `RetryPolicy` 退避后重新投递，event_id 保持不变
//! - 不可重试错误或重投次数耗尽后写入死信队列
//!
//! 发布者不等待处理完成，也观察不到处理器的失败。

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::EventBusConfig;
use crate::dlq::{DeadLetterMessage, DeadLetterQueue};
use crate::error::{PointsError, Result};
use crate::events::{DomainEvent, EventEnvelope, EventType};
use crate::observability::metrics;
use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// 发布与处理抽象
// ---------------------------------------------------------------------------

/// 事件发布者
///
/// 作为显式依赖传入各组件，测试中以 `RecordingPublisher` 替换。
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_envelope(&self, envelope: EventEnvelope) -> Result<()>;

    async fn publish(&self, event: DomainEvent) -> Result<()> {
        self.publish_envelope(EventEnvelope::new(event)).await
    }
}

/// 事件处理器
///
/// 处理器必须在重复投递下保持幂等。
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// 处理器名称，用于日志、指标和死信重放定位
    fn name(&self) -> &'static str;

    /// 订阅的事件类型
    fn subscribed_types(&self) -> Vec<EventType>;

    async fn handle(&self, envelope: &EventEnvelope) -> Result<()>;
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// 处理器注册表
#[derive(Default)]
pub struct HandlerRegistry {
    routes: HashMap<EventType, Vec<Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册处理器到其声明的所有事件类型
    pub fn register(&mut self, handler: Arc<dyn EventHandler>) -> &mut Self {
        for event_type in handler.subscribed_types() {
            let handlers = self.routes.entry(event_type).or_default();
            if handlers.iter().any(|h| h.name() == handler.name()) {
                warn!(
                    handler = handler.name(),
                    event_type = %event_type,
                    "处理器已注册，忽略重复注册"
                );
                continue;
            }
            debug!(handler = handler.name(), event_type = %event_type, "注册事件处理器");
            handlers.push(Arc::clone(&handler));
        }
        self
    }

    /// 按注册顺序返回某事件类型的处理器
    pub fn handlers_for(&self, event_type: EventType) -> Vec<Arc<dyn EventHandler>> {
        self.routes.get(&event_type).cloned().unwrap_or_default()
    }

    /// 按名称查找处理器
    pub fn find(&self, name: &str) -> Option<Arc<dyn EventHandler>> {
        self.routes
            .values()
            .flatten()
            .find(|h| h.name() == name)
            .cloned()
    }

    /// 某事件类型的处理器名称（按投递顺序）
    pub fn handler_names(&self, event_type: EventType) -> Vec<&'static str> {
        self.routes
            .get(&event_type)
            .map(|handlers| handlers.iter().map(|h| h.name()).collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// InProcessEventBus
// ---------------------------------------------------------------------------

struct Delivery {
    envelope: Arc<EventEnvelope>,
    handler: Arc<dyn EventHandler>,
    /// 已失败的投递次数
    attempt: u32,
}

/// 进程内事件总线
///
/// 无界队列 + N 个 worker。`in_flight` 统计已入队但未结束的投递
/// （包括退避等待中的重投），用于 `wait_idle`。
pub struct InProcessEventBus {
    registry: RwLock<HandlerRegistry>,
    sender: mpsc::UnboundedSender<Delivery>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
    retry_policy: RetryPolicy,
    worker_count: usize,
    dead_letters: Arc<DeadLetterQueue>,
    in_flight: AtomicUsize,
    idle: Notify,
}

impl InProcessEventBus {
    pub fn new(config: &EventBusConfig) -> Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        Arc::new(Self {
            registry: RwLock::new(HandlerRegistry::new()),
            sender,
            receiver: Mutex::new(Some(receiver)),
            retry_policy: config.retry_policy(),
            worker_count: config.worker_count.max(1),
            dead_letters: Arc::new(DeadLetterQueue::new()),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        })
    }

    /// 注册处理器，可在启动前后调用
    pub fn register(&self, handler: Arc<dyn EventHandler>) -> &Self {
        self.registry.write().register(handler);
        self
    }

    pub fn handler_names(&self, event_type: EventType) -> Vec<&'static str> {
        self.registry.read().handler_names(event_type)
    }

    /// 启动 worker 池
    ///
    /// 只能启动一次；shutdown 置为 true 后 worker 退出，
    /// 之后的发布返回 `BusClosed`。
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<Vec<JoinHandle<()>>> {
        let receiver = self
            .receiver
            .lock()
            .take()
            .ok_or_else(|| PointsError::Internal("事件总线已启动".to_string()))?;
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        info!(workers = self.worker_count, "事件总线启动");

        let handles = (0..self.worker_count)
            .map(|worker_id| {
                let bus = Arc::clone(self);
                let receiver = Arc::clone(&receiver);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { bus.worker_loop(worker_id, receiver, shutdown).await })
            })
            .collect();

        Ok(handles)
    }

    async fn worker_loop(
        self: Arc<Self>,
        worker_id: usize,
        receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let next = {
                let mut rx = receiver.lock().await;
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            None
                        } else {
                            continue;
                        }
                    }
                    delivery = rx.recv() => delivery,
                }
            };

            match next {
                Some(delivery) => self.dispatch(delivery).await,
                None => break,
            }
        }

        debug!(worker_id, "事件总线 worker 退出");
    }

    async fn dispatch(self: &Arc<Self>, delivery: Delivery) {
        let handler_name = delivery.handler.name();
        let event_type = delivery.envelope.event_type;
        let start = Instant::now();

        let result = AssertUnwindSafe(delivery.handler.handle(&delivery.envelope))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(PointsError::rejected(handler_name, "处理器 panic")));

        let elapsed = start.elapsed().as_secs_f64();

        match result {
            Ok(()) => {
                metrics::record_event_handled(event_type.as_str(), handler_name, "ok", elapsed);
                debug!(
                    event_id = %delivery.envelope.event_id,
                    event_type = %event_type,
                    handler = handler_name,
                    attempt = delivery.attempt,
                    "事件处理成功"
                );
            }
            Err(err) if err.is_retryable() && self.retry_policy.should_retry(delivery.attempt) => {
                metrics::record_event_handled(event_type.as_str(), handler_name, "retry", elapsed);
                let delay = self.retry_policy.delay_for_attempt(delivery.attempt);
                warn!(
                    event_id = %delivery.envelope.event_id,
                    event_type = %event_type,
                    handler = handler_name,
                    pass_id = ?delivery.envelope.event.pass_id(),
                    attempt_id = ?delivery.envelope.event.attempt_id(),
                    attempt = delivery.attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "事件处理失败，退避后重新投递"
                );
                self.schedule_redelivery(
                    Delivery {
                        attempt: delivery.attempt + 1,
                        ..delivery
                    },
                    delay,
                );
            }
            Err(err) => {
                metrics::record_event_handled(event_type.as_str(), handler_name, "dead", elapsed);
                self.dead_letters.push(DeadLetterMessage::new(
                    (*delivery.envelope).clone(),
                    handler_name,
                    err.to_string(),
                    delivery.attempt + 1,
                ));
            }
        }

        self.finish_one();
    }

    fn schedule_redelivery(self: &Arc<Self>, delivery: Delivery, delay: Duration) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(mpsc::error::SendError(lost)) = bus.sender.send(delivery) {
                error!(
                    event_id = %lost.envelope.event_id,
                    handler = lost.handler.name(),
                    "事件总线已关闭，重投失败"
                );
                bus.dead_letters.push(DeadLetterMessage::new(
                    (*lost.envelope).clone(),
                    lost.handler.name(),
                    PointsError::BusClosed.to_string(),
                    lost.attempt,
                ));
                bus.finish_one();
            }
        });
    }

    fn enqueue(&self, delivery: Delivery) -> Result<()> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(delivery).is_err() {
            self.finish_one();
            return Err(PointsError::BusClosed);
        }
        Ok(())
    }

    fn finish_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// 当前未完成的投递数量
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// 等待所有投递（含连锁产生的事件与退避重投）结束
    ///
    /// 超时返回 false。
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.in_flight() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.in_flight() == 0;
            }
        }
    }

    // ==================== 死信 ====================

    pub fn dead_letters(&self) -> Vec<DeadLetterMessage> {
        self.dead_letters.list()
    }

    /// 将死信重新投递给原处理器，重投计数从零开始
    ///
    /// 返回成功入队的数量；处理器已不存在的死信留在队列中。
    pub fn replay_dead_letters(&self) -> Result<usize> {
        let messages = self.dead_letters.drain();
        let mut replayed = 0;
        let mut unknown = Vec::new();

        for message in messages {
            let handler = self.registry.read().find(&message.handler);
            match handler {
                Some(handler) => {
                    info!(
                        event_id = %message.event_id,
                        handler = %message.handler,
                        "重放死信"
                    );
                    self.enqueue(Delivery {
                        envelope: Arc::new(message.envelope),
                        handler,
                        attempt: 0,
                    })?;
                    replayed += 1;
                }
                None => {
                    warn!(handler = %message.handler, "死信对应的处理器不存在，保留在队列中");
                    unknown.push(message);
                }
            }
        }

        self.dead_letters.restore(unknown);
        Ok(replayed)
    }
}

#[async_trait]
impl EventPublisher for InProcessEventBus {
    async fn publish_envelope(&self, envelope: EventEnvelope) -> Result<()> {
        let handlers = self.registry.read().handlers_for(envelope.event_type);
        if handlers.is_empty() {
            debug!(event_type = %envelope.event_type, "事件无订阅者");
            return Ok(());
        }

        debug!(
            event_id = %envelope.event_id,
            event_type = %envelope.event_type,
            handlers = handlers.len(),
            "发布事件"
        );

        let envelope = Arc::new(envelope);
        for handler in handlers {
            self.enqueue(Delivery {
                envelope: Arc::clone(&envelope),
                handler,
                attempt: 0,
            })?;
        }
        Ok(())
    }
}
