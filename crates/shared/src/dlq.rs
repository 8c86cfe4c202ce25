//! 死信队列
//!
//! 事件处理器返回不可重试错误，或可重试错误的重新投递次数耗尽后，
//! 该 (事件, 处理器) 投递会被写入死信队列，保留原始信封以便人工排查后重放。
//! 死信不会被自动重试：自动重试已由事件总线的退避重投完成。

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::events::{EventEnvelope, EventType};
use crate::observability::metrics;

// ---------------------------------------------------------------------------
// DeadLetterMessage
// ---------------------------------------------------------------------------

/// 死信消息
///
/// 一条死信对应一个处理器对一个事件的失败投递；同一事件的其他处理器不受影响。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterMessage {
    pub id: Uuid,
    /// 原始事件 ID
    pub event_id: Uuid,
    pub event_type: EventType,
    /// 失败的处理器名称，重放时只投递给该处理器
    pub handler: String,
    pub envelope: EventEnvelope,
    /// 最后一次失败原因
    pub error: String,
    /// 已投递次数（含首次）
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterMessage {
    pub fn new(
        envelope: EventEnvelope,
        handler: impl Into<String>,
        error: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_id: envelope.event_id,
            event_type: envelope.event_type,
            handler: handler.into(),
            envelope,
            error: error.into(),
            attempts,
            failed_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// DeadLetterQueue
// ---------------------------------------------------------------------------

/// 进程内死信队列
#[derive(Debug, Default)]
pub struct DeadLetterQueue {
    messages: Mutex<Vec<DeadLetterMessage>>,
}

impl DeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入死信并记录日志
    pub fn push(&self, message: DeadLetterMessage) {
        error!(
            event_id = %message.event_id,
            event_type = %message.event_type,
            handler = %message.handler,
            pass_id = ?message.envelope.event.pass_id(),
            attempt_id = ?message.envelope.event.attempt_id(),
            attempts = message.attempts,
            error = %message.error,
            "事件投递失败，已写入死信队列"
        );
        metrics::record_dead_letter(message.event_type.as_str(), &message.handler);
        self.messages.lock().push(message);
    }

    /// 当前所有死信（按写入顺序）
    pub fn list(&self) -> Vec<DeadLetterMessage> {
        self.messages.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// 取出全部死信用于重放，队列随之清空
    pub fn drain(&self) -> Vec<DeadLetterMessage> {
        let drained: Vec<_> = std::mem::take(&mut *self.messages.lock());
        if !drained.is_empty() {
            info!(count = drained.len(), "取出死信准备重放");
        }
        drained
    }

    /// 放回未能重放的死信（不重复计数）
    pub fn restore(&self, messages: Vec<DeadLetterMessage>) {
        if messages.is_empty() {
            return;
        }
        self.messages.lock().extend(messages);
    }
}
