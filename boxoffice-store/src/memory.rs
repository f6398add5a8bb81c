use async_trait::async_trait;
use boxoffice_core::{
    AuditEntry, Order, OrderItem, OrderStatus, Seat, SeatLock, SeatStatus, Store, StoreError,
    StoreResult, StoreTx,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    seats: HashMap<Uuid, Seat>,
    /// Keyed by seat id: one lock row per seat
    locks: HashMap<Uuid, SeatLock>,
    orders: HashMap<Uuid, Order>,
    items: HashMap<Uuid, Vec<OrderItem>>,
    audit: Vec<AuditEntry>,
}

/// Serializable in-process store.
///
/// A transaction owns the whole state for its lifetime and edits a copy of
/// it; `commit` swaps the copy in, dropping the transaction discards it.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    fail_commits: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_seat(&self, seat: Seat) {
        self.state.lock().await.seats.insert(seat.id, seat);
    }

    pub async fn seat(&self, seat_id: Uuid) -> Option<Seat> {
        self.state.lock().await.seats.get(&seat_id).cloned()
    }

    pub async fn lock(&self, seat_id: Uuid) -> Option<SeatLock> {
        self.state.lock().await.locks.get(&seat_id).cloned()
    }

    pub async fn locks(&self) -> Vec<SeatLock> {
        let mut locks: Vec<SeatLock> = self.state.lock().await.locks.values().cloned().collect();
        locks.sort_by_key(|l| l.seat_id);
        locks
    }

    pub async fn lock_count(&self) -> usize {
        self.state.lock().await.locks.len()
    }

    pub async fn order(&self, order_id: Uuid) -> Option<Order> {
        self.state.lock().await.orders.get(&order_id).cloned()
    }

    pub async fn order_items(&self, order_id: Uuid) -> Vec<OrderItem> {
        self.state
            .lock()
            .await
            .items
            .get(&order_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn audit_log(&self) -> Vec<AuditEntry> {
        self.state.lock().await.audit.clone()
    }

    /// Makes the next commit report failure and discard its changes.
    pub fn fail_next_commit(&self) {
        self.fail_commits.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            working,
            fail_commits: self.fail_commits.clone(),
        }))
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    fail_commits: Arc<AtomicUsize>,
}

fn selected(seat_ids: Option<&[Uuid]>, seat_id: &Uuid) -> bool {
    seat_ids.map_or(true, |ids| ids.contains(seat_id))
}

fn order_holds_seats(order: &Order, now: DateTime<Utc>) -> bool {
    match order.status {
        OrderStatus::PendingConfirmation => true,
        OrderStatus::Pending => order.expires_at.map_or(false, |deadline| deadline > now),
        _ => false,
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn seats_for_update(&mut self, event_id: Uuid, seat_ids: &[Uuid]) -> StoreResult<Vec<Seat>> {
        let mut seats: Vec<Seat> = self
            .working
            .seats
            .values()
            .filter(|s| s.event_id == event_id && seat_ids.contains(&s.id))
            .cloned()
            .collect();
        seats.sort_by_key(|s| s.id);
        Ok(seats)
    }

    async fn set_seat_status(
        &mut self,
        seat_ids: &[Uuid],
        status: SeatStatus,
        _now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut updated = 0;
        for seat_id in seat_ids {
            if let Some(seat) = self.working.seats.get_mut(seat_id) {
                seat.status = status;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn locks_for_seats(&mut self, seat_ids: &[Uuid]) -> StoreResult<Vec<SeatLock>> {
        let mut locks: Vec<SeatLock> = seat_ids
            .iter()
            .filter_map(|id| self.working.locks.get(id).cloned())
            .collect();
        locks.sort_by_key(|l| l.seat_id);
        locks.dedup_by_key(|l| l.seat_id);
        Ok(locks)
    }

    async fn upsert_lock(&mut self, lock: &SeatLock) -> StoreResult<()> {
        let mut row = lock.clone();
        if let Some(existing) = self.working.locks.get(&lock.seat_id) {
            row.id = existing.id;
            if existing.session_id == lock.session_id {
                row.created_at = existing.created_at;
            }
        }
        self.working.locks.insert(row.seat_id, row);
        Ok(())
    }

    async fn session_locks(
        &mut self,
        event_id: Uuid,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<SeatLock>> {
        let mut locks: Vec<SeatLock> = self
            .working
            .locks
            .values()
            .filter(|l| l.is_held_by(event_id, session_id, now))
            .cloned()
            .collect();
        locks.sort_by_key(|l| (l.expires_at, l.seat_id));
        Ok(locks)
    }

    async fn delete_session_locks(
        &mut self,
        event_id: Uuid,
        session_id: &str,
        seat_ids: Option<&[Uuid]>,
    ) -> StoreResult<u64> {
        let before = self.working.locks.len();
        self.working.locks.retain(|seat_id, l| {
            !(l.event_id == event_id && l.session_id == session_id && selected(seat_ids, seat_id))
        });
        Ok((before - self.working.locks.len()) as u64)
    }

    async fn extend_session_locks(
        &mut self,
        event_id: Uuid,
        session_id: &str,
        seat_ids: Option<&[Uuid]>,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut extended = 0;
        for (seat_id, lock) in self.working.locks.iter_mut() {
            if lock.is_held_by(event_id, session_id, now) && selected(seat_ids, seat_id) {
                lock.expires_at = expires_at;
                extended += 1;
            }
        }
        Ok(extended)
    }

    async fn set_lock_expiry(
        &mut self,
        event_id: Uuid,
        session_id: &str,
        seat_ids: &[Uuid],
        expires_at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut updated = 0;
        for seat_id in seat_ids {
            if let Some(lock) = self.working.locks.get_mut(seat_id) {
                if lock.event_id == event_id && lock.session_id == session_id {
                    lock.expires_at = expires_at;
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn delete_lapsed_locks(
        &mut self,
        event_id: Uuid,
        seat_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let before = self.working.locks.len();
        self.working.locks.retain(|seat_id, l| {
            !(l.event_id == event_id && seat_ids.contains(seat_id) && !l.is_active(now))
        });
        Ok((before - self.working.locks.len()) as u64)
    }

    async fn delete_expired_locks(&mut self, now: DateTime<Utc>) -> StoreResult<u64> {
        let before = self.working.locks.len();
        self.working.locks.retain(|_, l| l.is_active(now));
        Ok((before - self.working.locks.len()) as u64)
    }

    async fn event_seats_with_locks(
        &mut self,
        event_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<(Seat, Option<SeatLock>)>> {
        let mut seats: Vec<&Seat> = self
            .working
            .seats
            .values()
            .filter(|s| s.event_id == event_id)
            .collect();
        seats.sort_by(|a, b| {
            (&a.section, &a.row, &a.seat_number).cmp(&(&b.section, &b.row, &b.seat_number))
        });

        Ok(seats
            .into_iter()
            .map(|seat| {
                let lock = self
                    .working
                    .locks
                    .get(&seat.id)
                    .filter(|l| l.is_active(now))
                    .cloned();
                (seat.clone(), lock)
            })
            .collect())
    }

    async fn insert_order(&mut self, order: &Order, items: &[OrderItem]) -> StoreResult<()> {
        let duplicate = self
            .working
            .orders
            .values()
            .any(|o| o.id == order.id || o.order_number == order.order_number);
        if duplicate {
            return Err(StoreError::Backend(
                format!("duplicate order {}", order.order_number).into(),
            ));
        }
        self.working.orders.insert(order.id, order.clone());
        self.working.items.insert(order.id, items.to_vec());
        Ok(())
    }

    async fn order_for_update(&mut self, order_id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.working.orders.get(&order_id).cloned())
    }

    async fn order_by_id(&mut self, order_id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.working.orders.get(&order_id).cloned())
    }

    async fn order_by_number(&mut self, order_number: &str) -> StoreResult<Option<Order>> {
        Ok(self
            .working
            .orders
            .values()
            .find(|o| o.order_number == order_number)
            .cloned())
    }

    async fn order_items(&mut self, order_id: Uuid) -> StoreResult<Vec<OrderItem>> {
        let mut items = self.working.items.get(&order_id).cloned().unwrap_or_default();
        items.sort_by_key(|i| i.seat_id);
        Ok(items)
    }

    async fn active_orders_for_seats(
        &mut self,
        seat_ids: &[Uuid],
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<(Uuid, Uuid)>> {
        let mut held = Vec::new();
        for (order_id, items) in &self.working.items {
            let Some(order) = self.working.orders.get(order_id) else {
                continue;
            };
            if !order_holds_seats(order, now) {
                continue;
            }
            held.extend(
                items
                    .iter()
                    .filter(|i| seat_ids.contains(&i.seat_id))
                    .map(|i| (i.seat_id, *order_id)),
            );
        }
        held.sort();
        Ok(held)
    }

    async fn update_order(&mut self, order: &Order) -> StoreResult<()> {
        match self.working.orders.get_mut(&order.id) {
            Some(row) => {
                *row = order.clone();
                Ok(())
            }
            None => Err(StoreError::Corrupt(format!("order {} vanished", order.id))),
        }
    }

    async fn stale_pending_orders(&mut self, now: DateTime<Utc>) -> StoreResult<Vec<Uuid>> {
        let mut stale: Vec<&Order> = self
            .working
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::Pending && o.expires_at.map_or(false, |d| d <= now))
            .collect();
        stale.sort_by_key(|o| o.expires_at);
        Ok(stale.into_iter().map(|o| o.id).collect())
    }

    async fn append_audit(&mut self, entry: &AuditEntry) -> StoreResult<()> {
        self.working.audit.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx {
            mut guard,
            working,
            fail_commits,
        } = *self;

        let injected = fail_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::CommitFailed("injected commit failure".to_string()));
        }

        *guard = working;
        Ok(())
    }
}
