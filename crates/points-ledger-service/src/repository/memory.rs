//! 内存仓储实现
//!
//! 用于本地运行和测试，语义与 PostgreSQL 实现一致：
//! 通行证提交与库存预占各自在一把互斥锁内完成，对应数据库事务。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use uuid::Uuid;

use super::traits::{
    AttendanceRepositoryTrait, ExchangeRepositoryTrait, PassRepositoryTrait,
    StockRepositoryTrait,
};
use crate::error::{LedgerError, Result};
use crate::models::{
    Achievement, AchievementStatus, AttemptTransition, AttendanceRecord, AttendanceStatus, CatalogItem,
    CommitOutcome, ExchangeAttempt, ExchangeRecord, NewCatalogItem, NewPass, Pass, PassMutation,
    PassStatus, PendingCursor, PointMovement, ReleaseOutcome, ReservationStatus, ReserveOutcome,
    StockReservation,
};

fn unavailable() -> LedgerError {
    LedgerError::Database(sqlx::Error::PoolTimedOut)
}

// ==================== 通行证 ====================

#[derive(Default)]
struct PassStore {
    passes: HashMap<i64, Pass>,
    movements: Vec<PointMovement>,
    sources: HashSet<(i64, String)>,
}

/// 内存通行证仓储
#[derive(Default)]
pub struct InMemoryPassRepository {
    store: Mutex<PassStore>,
    next_id: AtomicI64,
    next_movement_id: AtomicI64,
    unavailable: AtomicBool,
}

impl InMemoryPassRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟存储不可用：打开后读写都返回可重试的数据库错误
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }
}

#[async_trait]
impl PassRepositoryTrait for InMemoryPassRepository {
    async fn create_pass(&self, pass: &NewPass) -> Result<Pass> {
        self.check_available()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let created = Pass {
            id,
            participant_id: pass.participant_id.clone(),
            balance: 0,
            certificate_threshold: pass.thresholds.certificate,
            special_access_threshold: pass.thresholds.special_access,
            certificate_status: AchievementStatus::NotReached,
            special_access_status: AchievementStatus::NotReached,
            status: PassStatus::Active,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.store.lock().passes.insert(id, created.clone());
        Ok(created)
    }

    async fn get_pass(&self, id: i64) -> Result<Option<Pass>> {
        self.check_available()?;
        Ok(self.store.lock().passes.get(&id).cloned())
    }

    async fn commit_mutation(&self, mutation: &PassMutation) -> Result<CommitOutcome> {
        self.check_available()?;
        let mut guard = self.store.lock();
        let store = &mut *guard;

        let key = (mutation.pass_id, mutation.source_ref.clone());
        if store.sources.contains(&key) {
            return Ok(CommitOutcome::DuplicateSource);
        }

        let Some(pass) = store.passes.get_mut(&mutation.pass_id) else {
            return Err(LedgerError::PassNotFound(mutation.pass_id));
        };
        if pass.version != mutation.expected_version {
            return Ok(CommitOutcome::VersionConflict);
        }
        if mutation.new_balance < 0 {
            return Err(LedgerError::InsufficientBalance {
                required: mutation.amount,
                available: pass.balance,
            });
        }

        let now = Utc::now();
        pass.balance = mutation.new_balance;
        pass.certificate_status = mutation.certificate_status;
        pass.special_access_status = mutation.special_access_status;
        pass.version += 1;
        pass.updated_at = now;
        let committed = pass.clone();

        store.sources.insert(key);
        store.movements.push(PointMovement {
            id: self.next_movement_id.fetch_add(1, Ordering::SeqCst) + 1,
            pass_id: mutation.pass_id,
            direction: mutation.direction,
            amount: mutation.amount,
            balance_after: mutation.new_balance,
            source_type: mutation.source_type,
            source_ref: mutation.source_ref.clone(),
            certificate_reached: mutation.reaches(Achievement::Certificate),
            special_access_reached: mutation.reaches(Achievement::SpecialAccess),
            effects_published: false,
            created_at: now,
        });

        Ok(CommitOutcome::Committed(committed))
    }

    async fn update_status(
        &self,
        id: i64,
        expected_version: i64,
        status: PassStatus,
    ) -> Result<bool> {
        self.check_available()?;
        let mut store = self.store.lock();
        match store.passes.get_mut(&id) {
            Some(pass) if pass.version == expected_version => {
                pass.status = status;
                pass.version += 1;
                pass.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_movement(
        &self,
        pass_id: i64,
        source_ref: &str,
    ) -> Result<Option<PointMovement>> {
        self.check_available()?;
        let store = self.store.lock();
        Ok(store
            .movements
            .iter()
            .find(|m| m.pass_id == pass_id && m.source_ref == source_ref)
            .cloned())
    }

    async fn list_movements(&self, pass_id: i64, limit: i64) -> Result<Vec<PointMovement>> {
        self.check_available()?;
        let store = self.store.lock();
        Ok(store
            .movements
            .iter()
            .rev()
            .filter(|m| m.pass_id == pass_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
    async fn mark_effects_published(&self, pass_id: i64, source_ref: &str) -> Result<bool> {
        self.check_available()?;
        let mut store = self.store.lock();
        match store
            .movements
            .iter_mut()
            .find(|m| m.pass_id == pass_id && m.source_ref == source_ref)
        {
            Some(movement) if !movement.effects_published => {
                movement.effects_published = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ==================== 出席记录 ====================

/// 内存出席记录仓储
#[derive(Default)]
pub struct InMemoryAttendanceRepository {
    records: DashMap<i64, AttendanceRecord>,
    sessions: DashMap<(i64, String), i64>,
    next_id: AtomicI64,
}

impl InMemoryAttendanceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn finish(&self, id: i64, status: AttendanceStatus, reason: Option<&str>) -> bool {
        match self.records.get_mut(&id) {
            Some(mut record) if record.status == AttendanceStatus::Pending => {
                record.status = status;
                record.failure_reason = reason.map(str::to_string);
                record.processed_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl AttendanceRepositoryTrait for InMemoryAttendanceRepository {
    async fn create(
        &self,
        pass_id: i64,
        session_id: &str,
        points: i64,
    ) -> Result<AttendanceRecord> {
        let entry = self.sessions.entry((pass_id, session_id.to_string()));
        let Entry::Vacant(slot) = entry else {
            return Err(LedgerError::DuplicateAttendance {
                pass_id,
                session_id: session_id.to_string(),
            });
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = AttendanceRecord {
            id,
            pass_id,
            session_id: session_id.to_string(),
            points,
            status: AttendanceStatus::Pending,
            failure_reason: None,
            created_at: Utc::now(),
            processed_at: None,
        };
        self.records.insert(id, record.clone());
        slot.insert(id);
        Ok(record)
    }

    async fn get(&self, id: i64) -> Result<Option<AttendanceRecord>> {
        Ok(self.records.get(&id).map(|r| r.clone()))
    }

    async fn list_pending_after(
        &self,
        cursor: Option<PendingCursor>,
        limit: i64,
    ) -> Result<Vec<AttendanceRecord>> {
        let mut pending: Vec<AttendanceRecord> = self
            .records
            .iter()
            .filter(|r| r.status == AttendanceStatus::Pending)
            .filter(|r| match cursor {
                Some(c) => (r.created_at, r.id) > (c.created_at, c.id),
                None => true,
            })
            .map(|r| r.clone())
            .collect();

        pending.sort_by_key(|r| (r.created_at, r.id));
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn mark_processed(&self, id: i64) -> Result<bool> {
        Ok(self.finish(id, AttendanceStatus::Processed, None))
    }

    async fn mark_failed(&self, id: i64, reason: &str) -> Result<bool> {
        Ok(self.finish(id, AttendanceStatus::Failed, Some(reason)))
    }
}

// ==================== 兑换 ====================

/// 内存兑换仓储
#[derive(Default)]
pub struct InMemoryExchangeRepository {
    attempts: DashMap<Uuid, ExchangeAttempt>,
    records: DashMap<Uuid, ExchangeRecord>,
    next_record_id: AtomicI64,
}

impl InMemoryExchangeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 回拨最后更新时间，测试超时清理用
    pub fn backdate_attempt(&self, attempt_id: Uuid, updated_at: DateTime<Utc>) {
        if let Some(mut attempt) = self.attempts.get_mut(&attempt_id) {
            attempt.updated_at = updated_at;
        }
    }

    /// 每个兑换尝试只保留第一条记录
    fn insert_record(&self, record: &ExchangeRecord) {
        if let Entry::Vacant(slot) = self.records.entry(record.attempt_id) {
            let mut record = record.clone();
            record.id = self.next_record_id.fetch_add(1, Ordering::SeqCst) + 1;
            slot.insert(record);
        }
    }
}

#[async_trait]
impl ExchangeRepositoryTrait for InMemoryExchangeRepository {
    async fn create_attempt(&self, attempt: &ExchangeAttempt) -> Result<()> {
        self.attempts.insert(attempt.attempt_id, attempt.clone());
        Ok(())
    }

    async fn get_attempt(&self, attempt_id: Uuid) -> Result<Option<ExchangeAttempt>> {
        Ok(self.attempts.get(&attempt_id).map(|a| a.clone()))
    }

    async fn transition_attempt(&self, transition: &AttemptTransition) -> Result<bool> {
        match self.attempts.get_mut(&transition.attempt_id) {
            Some(mut attempt) if attempt.state == transition.from => {
                attempt.state = transition.to;
                if transition.cost.is_some() {
                    attempt.cost = transition.cost;
                }
                if transition.failure_reason.is_some() {
                    attempt.failure_reason = transition.failure_reason.clone();
                }
                attempt.updated_at = Utc::now();
                // 持有尝试的写锁时写入记录，与状态变更一同生效
                if let Some(record) = &transition.record {
                    self.insert_record(record);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_stale_attempts(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExchangeAttempt>> {
        let mut stale: Vec<ExchangeAttempt> = self
            .attempts
            .iter()
            .filter(|a| !a.state.is_terminal() && a.updated_at < older_than)
            .map(|a| a.clone())
            .collect();

        stale.sort_by_key(|a| a.updated_at);
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn mark_debit_published(&self, attempt_id: Uuid) -> Result<bool> {
        match self.attempts.get_mut(&attempt_id) {
            Some(mut attempt) if !attempt.debit_published => {
                attempt.debit_published = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_record(&self, attempt_id: Uuid) -> Result<Option<ExchangeRecord>> {
        Ok(self.records.get(&attempt_id).map(|r| r.clone()))
    }

    async fn list_records_by_pass(&self, pass_id: i64) -> Result<Vec<ExchangeRecord>> {
        let mut records: Vec<ExchangeRecord> = self
            .records
            .iter()
            .filter(|r| r.pass_id == pass_id)
            .map(|r| r.clone())
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

// ==================== 库存 ====================

#[derive(Default)]
struct StockStore {
    items: HashMap<i64, CatalogItem>,
    reservations: HashMap<Uuid, StockReservation>,
}

/// 内存库存仓储
#[derive(Default)]
pub struct InMemoryStockRepository {
    store: Mutex<StockStore>,
    next_id: AtomicI64,
}

impl InMemoryStockRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StockRepositoryTrait for InMemoryStockRepository {
    async fn create_item(&self, item: &NewCatalogItem) -> Result<CatalogItem> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let created = CatalogItem {
            id,
            name: item.name.clone(),
            cost: item.cost,
            stock: item.stock,
            created_at: now,
            updated_at: now,
        };
        self.store.lock().items.insert(id, created.clone());
        Ok(created)
    }

    async fn get_item(&self, id: i64) -> Result<Option<CatalogItem>> {
        Ok(self.store.lock().items.get(&id).cloned())
    }

    async fn get_reservation(&self, attempt_id: Uuid) -> Result<Option<StockReservation>> {
        Ok(self.store.lock().reservations.get(&attempt_id).cloned())
    }

    async fn reserve(
        &self,
        attempt_id: Uuid,
        pass_id: i64,
        item_id: i64,
    ) -> Result<ReserveOutcome> {
        let mut guard = self.store.lock();
        let store = &mut *guard;

        if let Some(existing) = store.reservations.get(&attempt_id) {
            return Ok(ReserveOutcome::Existing(existing.clone()));
        }

        let Some(item) = store.items.get_mut(&item_id) else {
            return Ok(ReserveOutcome::ItemNotFound);
        };
        if item.stock <= 0 {
            return Ok(ReserveOutcome::OutOfStock);
        }

        let now = Utc::now();
        item.stock -= 1;
        item.updated_at = now;
        let reservation = StockReservation {
            attempt_id,
            item_id,
            pass_id,
            cost: item.cost,
            status: ReservationStatus::Reserved,
            created_at: now,
            updated_at: now,
        };
        store.reservations.insert(attempt_id, reservation.clone());

        Ok(ReserveOutcome::Reserved(reservation))
    }

    async fn release(
        &self,
        attempt_id: Uuid,
        pass_id: i64,
        item_id: i64,
    ) -> Result<ReleaseOutcome> {
        let mut guard = self.store.lock();
        let store = &mut *guard;
        let now = Utc::now();

        let Some(reservation) = store.reservations.get_mut(&attempt_id) else {
            store.reservations.insert(
                attempt_id,
                StockReservation {
                    attempt_id,
                    item_id,
                    pass_id,
                    cost: 0,
                    status: ReservationStatus::Cancelled,
                    created_at: now,
                    updated_at: now,
                },
            );
            return Ok(ReleaseOutcome::Tombstoned);
        };

        match reservation.status {
            ReservationStatus::Reserved => {
                reservation.status = ReservationStatus::Released;
                reservation.updated_at = now;
                let released = reservation.clone();
                if let Some(item) = store.items.get_mut(&released.item_id) {
                    item.stock += 1;
                    item.updated_at = now;
                }
                Ok(ReleaseOutcome::Released(released))
            }
            ReservationStatus::Released => Ok(ReleaseOutcome::AlreadyReleased(reservation.clone())),
            ReservationStatus::Cancelled => Ok(ReleaseOutcome::Tombstoned),
            ReservationStatus::Consumed => Ok(ReleaseOutcome::Consumed(reservation.clone())),
        }
    }

    async fn consume(&self, attempt_id: Uuid) -> Result<bool> {
        let mut store = self.store.lock();
        match store.reservations.get_mut(&attempt_id) {
            Some(reservation) if reservation.status == ReservationStatus::Reserved => {
                reservation.status = ReservationStatus::Consumed;
                reservation.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
