//! 按键加锁
//!
//! 每个键对应一把异步互斥锁，锁对象在无人持有时自动回收。

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::{LedgerError, Result};

/// 锁配置
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// 等待锁的最长时间，超时返回并发冲突
    pub acquire_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

type LockTable<K> = DashMap<K, Arc<Mutex<()>>>;

/// 键控锁
///
/// 同一进程内对同一通行证（或同一兑换尝试）的写操作串行执行。
/// 获取顺序约定：先兑换尝试，后通行证。
pub struct KeyedLocks<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    locks: Arc<LockTable<K>>,
    config: LockConfig,
    name: &'static str,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    pub fn new(name: &'static str, config: LockConfig) -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            config,
            name,
        }
    }

    /// 获取锁，超时返回 `ConcurrencyConflict`
    pub async fn acquire(&self, key: K) -> Result<KeyedGuard<K>> {
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        match tokio::time::timeout(self.config.acquire_timeout, mutex.lock_owned()).await {
            Ok(guard) => {
                debug!(lock = self.name, key = ?key, "Lock acquired");
                Ok(KeyedGuard {
                    guard: Some(guard),
                    key,
                    locks: Arc::clone(&self.locks),
                })
            }
            Err(_) => {
                warn!(
                    lock = self.name,
                    key = ?key,
                    timeout_ms = self.config.acquire_timeout.as_millis(),
                    "Lock acquire timed out"
                );
                Err(LedgerError::ConcurrencyConflict)
            }
        }
    }

    /// 当前登记的锁数量
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// 锁守卫，drop 时释放锁
pub struct KeyedGuard<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    guard: Option<OwnedMutexGuard<()>>,
    key: K,
    locks: Arc<LockTable<K>>,
}

impl<K> Drop for KeyedGuard<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    fn drop(&mut self) {
        // 先释放互斥锁，再回收没有其他等待者的条目
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
