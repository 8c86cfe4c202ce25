//! 进程内键控锁
//!
//! 通行证余额变更按 pass_id 串行，兑换编排按 attempt_id 串行。
//! 跨进程的正确性由存储层的版本号比较与唯一约束保证，这里的锁只减少冲突重试。
//!
//! ```ignore
//! let locks = KeyedLocks::new("pass", LockConfig::default());
//! let _guard = locks.acquire(pass_id).await?;
//! // 读取 - 计算 - 提交
//! ```

mod keyed_lock;

pub use keyed_lock::{KeyedGuard, KeyedLocks, LockConfig};
