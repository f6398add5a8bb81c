use boxoffice_core::{
    AuditAction, AuditEntry, BookingResult, Clock, OrderStatus, SeatStatus, Store,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Actor recorded on audit entries written by the sweeps
pub const REAPER_ACTOR: &str = "system:reaper";

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct OrderSweep {
    pub expired_orders: u64,
    pub released_seats: u64,
    pub failed_orders: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct LockSweep {
    pub cleaned: u64,
}

/// Returns abandoned holds to the pool.
///
/// Both sweeps are idempotent and may overlap with each other, with another
/// reaper instance, or with live checkouts: every decision is re-made under
/// row locks inside the transaction that acts on it.
pub struct Reaper {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl Reaper {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Expire every PENDING order whose deadline has passed, one
    /// transaction per order.
    pub async fn expire_stale_pending_orders(&self) -> BookingResult<OrderSweep> {
        let now = self.clock.now();
        let stale = {
            let mut tx = self.store.begin().await?;
            tx.stale_pending_orders(now).await?
        };

        let mut sweep = OrderSweep::default();
        for order_id in stale {
            match self.expire_order(order_id, now).await {
                Ok(Some(released)) => {
                    sweep.expired_orders += 1;
                    sweep.released_seats += released;
                }
                Ok(None) => debug!(%order_id, "Order no longer stale, skipped"),
                Err(e) => {
                    sweep.failed_orders += 1;
                    error!(%order_id, "Failed to expire order: {}", e);
                }
            }
        }

        if sweep != OrderSweep::default() {
            info!(
                expired_orders = sweep.expired_orders,
                released_seats = sweep.released_seats,
                failed_orders = sweep.failed_orders,
                "Pending order sweep finished"
            );
        }
        Ok(sweep)
    }

    /// `None` when the order stopped being a lapsed PENDING order after it
    /// was listed.
    async fn expire_order(&self, order_id: Uuid, now: DateTime<Utc>) -> BookingResult<Option<u64>> {
        let mut tx = self.store.begin().await?;
        let Some(mut order) = tx.order_for_update(order_id).await? else {
            return Ok(None);
        };
        if order.status != OrderStatus::Pending || order.effective_status(now) != OrderStatus::Expired {
            return Ok(None);
        }

        let seat_ids: Vec<Uuid> = tx
            .order_items(order_id)
            .await?
            .into_iter()
            .map(|i| i.seat_id)
            .collect();
        let seats = tx.seats_for_update(order.event_id, &seat_ids).await?;

        // Seats another live order has since claimed stay with that order.
        let contested: Vec<Uuid> = tx
            .active_orders_for_seats(&seat_ids, now)
            .await?
            .into_iter()
            .filter(|(_, holder)| *holder != order_id)
            .map(|(seat_id, _)| seat_id)
            .collect();
        let releasable: Vec<Uuid> = seats
            .iter()
            .filter(|s| s.status != SeatStatus::Sold && !contested.contains(&s.id))
            .map(|s| s.id)
            .collect();

        let released = tx.set_seat_status(&releasable, SeatStatus::Available, now).await?;
        tx.delete_lapsed_locks(order.event_id, &seat_ids, now).await?;
        // The buyer's own locks go too, even if they were extended past the
        // order's deadline.
        let uncontested: Vec<Uuid> = seat_ids
            .iter()
            .copied()
            .filter(|id| !contested.contains(id))
            .collect();
        let filter = Some(uncontested.as_slice());
        tx.delete_session_locks(order.event_id, &order.session_id, filter).await?;

        let old_status = order.status;
        order.update_status(OrderStatus::Expired, now);
        tx.update_order(&order).await?;
        tx.append_audit(&AuditEntry::for_order(
            REAPER_ACTOR,
            AuditAction::Expire,
            "ORDER",
            &order,
            old_status,
            json!({
                "order_number": order.order_number,
                "released_seats": released,
            }),
            now,
        ))
        .await?;
        tx.commit().await?;

        debug!(order_number = %order.order_number, released, "Order expired");
        Ok(Some(released))
    }

    /// Delete every lock at or past its deadline. Seats and orders are left
    /// alone.
    pub async fn cleanup_expired_locks(&self) -> BookingResult<LockSweep> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let cleaned = tx.delete_expired_locks(now).await?;
        tx.commit().await?;

        if cleaned > 0 {
            info!(cleaned, "Expired seat locks removed");
        }
        Ok(LockSweep { cleaned })
    }
}
