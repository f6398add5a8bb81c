use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{AuditEntry, Order, OrderItem, Seat, SeatLock, SeatStatus};

/// Transactional handle on the seat, lock and order tables.
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;
}

/// One unit of work. Dropping it without `commit` rolls everything back.
///
/// Methods named `*_for_update` hold the rows they return until the
/// transaction ends, so a check made on them stays true for the writes that
/// follow. Rows are always locked in id order.
#[async_trait]
pub trait StoreTx: Send {
    /// Seats of `event_id` among `seat_ids`; unknown ids are simply absent.
    async fn seats_for_update(&mut self, event_id: Uuid, seat_ids: &[Uuid]) -> StoreResult<Vec<Seat>>;

    async fn set_seat_status(
        &mut self,
        seat_ids: &[Uuid],
        status: SeatStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Lock rows for the seats, active or not.
    async fn locks_for_seats(&mut self, seat_ids: &[Uuid]) -> StoreResult<Vec<SeatLock>>;

    /// Insert the lock, or take over the seat's existing row in place.
    async fn upsert_lock(&mut self, lock: &SeatLock) -> StoreResult<()>;

    async fn session_locks(
        &mut self,
        event_id: Uuid,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<SeatLock>>;

    /// `None` means every lock the session holds in the event.
    async fn delete_session_locks(
        &mut self,
        event_id: Uuid,
        session_id: &str,
        seat_ids: Option<&[Uuid]>,
    ) -> StoreResult<u64>;

    /// Moves the deadline of the session's still-active locks.
    async fn extend_session_locks(
        &mut self,
        event_id: Uuid,
        session_id: &str,
        seat_ids: Option<&[Uuid]>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Moves the deadline of the session's locks on the seats, live or not.
    /// Locks another session has taken over are left alone.
    async fn set_lock_expiry(
        &mut self,
        event_id: Uuid,
        session_id: &str,
        seat_ids: &[Uuid],
        expires_at: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// Deletes the seats' locks that are no longer active at `now`, whoever
    /// owns them.
    async fn delete_lapsed_locks(
        &mut self,
        event_id: Uuid,
        seat_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    async fn delete_expired_locks(&mut self, now: DateTime<Utc>) -> StoreResult<u64>;

    /// Every seat of the event, ordered for display, each paired with its
    /// lock if that lock is active at `now`.
    async fn event_seats_with_locks(
        &mut self,
        event_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<(Seat, Option<SeatLock>)>>;

    async fn insert_order(&mut self, order: &Order, items: &[OrderItem]) -> StoreResult<()>;

    async fn order_for_update(&mut self, order_id: Uuid) -> StoreResult<Option<Order>>;

    /// Plain read, takes no row lock.
    async fn order_by_id(&mut self, order_id: Uuid) -> StoreResult<Option<Order>>;

    async fn order_by_number(&mut self, order_number: &str) -> StoreResult<Option<Order>>;

    async fn order_items(&mut self, order_id: Uuid) -> StoreResult<Vec<OrderItem>>;

    /// Orders that still hold any of the seats at `now`, as
    /// `(seat_id, order_id)` pairs. A PENDING order past its deadline no
    /// longer holds anything.
    async fn active_orders_for_seats(
        &mut self,
        seat_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<(Uuid, Uuid)>>;

    async fn update_order(&mut self, order: &Order) -> StoreResult<()>;

    /// Ids of PENDING orders whose deadline is at or before `now`.
    async fn stale_pending_orders(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<Uuid>>;

    async fn append_audit(&mut self, entry: &AuditEntry) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
