//! 库存服务
//!
//! 兑换编排中的库存一方：响应 `ExchangeRequested` 预占库存，
//! 响应 `PointsDebited` 确认消耗，响应 `ExchangeFailed` 归还库存。
//! 所有动作以 attempt_id 为键，重复投递不会重复扣减或重复归还。

use std::sync::Arc;

use points_shared::bus::EventPublisher;
use points_shared::events::DomainEvent;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::models::{
    CatalogItem, NewCatalogItem, ReleaseOutcome, ReservationStatus, ReserveOutcome,
};
use crate::repository::StockRepositoryTrait;

/// 库存服务
pub struct StockService {
    stock_repo: Arc<dyn StockRepositoryTrait>,
    publisher: Arc<dyn EventPublisher>,
}

impl StockService {
    pub fn new(
        stock_repo: Arc<dyn StockRepositoryTrait>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            stock_repo,
            publisher,
        }
    }

    // ==================== 商品 ====================

    pub async fn create_item(&self, item: NewCatalogItem) -> Result<CatalogItem> {
        if item.name.trim().is_empty() {
            return Err(LedgerError::Validation("商品名称不能为空".to_string()));
        }
        if item.cost <= 0 {
            return Err(LedgerError::InvalidAmount(item.cost));
        }
        if item.stock < 0 {
            return Err(LedgerError::Validation("库存不能为负数".to_string()));
        }

        let created = self.stock_repo.create_item(&item).await?;
        info!(item_id = created.id, cost = created.cost, stock = created.stock, "商品已创建");
        Ok(created)
    }

    pub async fn get_item(&self, item_id: i64) -> Result<CatalogItem> {
        self.stock_repo
            .get_item(item_id)
            .await?
            .ok_or(LedgerError::ItemNotFound(item_id))
    }

    // ==================== 编排步骤 ====================

    /// 预占库存
    ///
    /// 已有预占（RESERVED / CONSUMED）时重新发布 `StockReserved`，
    /// 已归还或存在墓碑时忽略。
    #[instrument(skip(self))]
    pub async fn reserve(&self, attempt_id: Uuid, pass_id: i64, item_id: i64) -> Result<()> {
        let event = match self.stock_repo.reserve(attempt_id, pass_id, item_id).await? {
            ReserveOutcome::Reserved(reservation) => {
                info!(cost = reservation.cost, "库存已预占");
                Some(DomainEvent::StockReserved {
                    attempt_id,
                    pass_id,
                    item_id,
                    cost: reservation.cost,
                })
            }
            ReserveOutcome::Existing(reservation) => match reservation.status {
                ReservationStatus::Reserved | ReservationStatus::Consumed => {
                    debug!(status = ?reservation.status, "重复的预占请求，重新确认");
                    Some(DomainEvent::StockReserved {
                        attempt_id,
                        pass_id,
                        item_id,
                        cost: reservation.cost,
                    })
                }
                ReservationStatus::Released | ReservationStatus::Cancelled => {
                    info!(status = ?reservation.status, "兑换已补偿，忽略迟到的预占请求");
                    None
                }
            },
            ReserveOutcome::OutOfStock => {
                info!("库存不足，预占失败");
                Some(DomainEvent::StockReservationFailed {
                    attempt_id,
                    pass_id,
                    item_id,
                    reason: LedgerError::ItemOutOfStock(item_id).error_code().to_string(),
                })
            }
            ReserveOutcome::ItemNotFound => {
                warn!("商品不存在，预占失败");
                Some(DomainEvent::StockReservationFailed {
                    attempt_id,
                    pass_id,
                    item_id,
                    reason: LedgerError::ItemNotFound(item_id).error_code().to_string(),
                })
            }
        };

        if let Some(event) = event {
            self.publisher.publish(event).await?;
        }
        Ok(())
    }

    /// 扣分成功后确认消耗
    #[instrument(skip(self))]
    pub async fn consume(&self, attempt_id: Uuid) -> Result<()> {
        if self.stock_repo.consume(attempt_id).await? {
            debug!("预占已转为消耗");
        }
        Ok(())
    }

    /// 补偿：归还预占的库存
    ///
    /// 只有 RESERVED 状态会真正归还，每个兑换尝试至多一次
    #[instrument(skip(self))]
    pub async fn release(&self, attempt_id: Uuid, pass_id: i64, item_id: i64) -> Result<()> {
        let restored = match self.stock_repo.release(attempt_id, pass_id, item_id).await? {
            ReleaseOutcome::Released(_) => {
                info!("库存已归还");
                true
            }
            ReleaseOutcome::AlreadyReleased(_) => {
                debug!("库存此前已归还");
                true
            }
            ReleaseOutcome::Tombstoned => {
                info!("没有预占记录，已写入墓碑");
                false
            }
            ReleaseOutcome::Consumed(_) => {
                error!("预占已被消耗，拒绝归还");
                return Err(LedgerError::InvalidTransition {
                    from: "CONSUMED".to_string(),
                    input: "RELEASE".to_string(),
                });
            }
        };

        self.publisher
            .publish(DomainEvent::StockReleased {
                attempt_id,
                item_id,
                restored,
            })
            .await?;
        Ok(())
    }
}
