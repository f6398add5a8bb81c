//! End-to-end checkout scenarios across the lock manager, the order
//! lifecycle and the reaper, all over one in-memory store and clock.

use async_trait::async_trait;
use boxoffice_core::{
    AccessToken, BookingError, Clock, CustomerDetails, HoldPolicy, ManualClock,
    NotificationRequest, Notifier, NotifyOutcome, OrderStatus, Seat, SeatStatus, TicketSettings,
};
use boxoffice_inventory::{LockRequest, SeatLockManager};
use boxoffice_order::{CheckoutRequest, OrderLifecycle};
use boxoffice_reaper::{LockSweep, Reaper};
use boxoffice_store::MemoryStore;
use chrono::{Duration, Utc};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<NotificationRequest>>,
}

#[async_trait]
impl Notifier for Outbox {
    async fn notify(&self, request: NotificationRequest) -> NotifyOutcome {
        self.sent.lock().unwrap().push(request);
        NotifyOutcome::sent()
    }
}

struct Refusing;

#[async_trait]
impl Notifier for Refusing {
    async fn notify(&self, _request: NotificationRequest) -> NotifyOutcome {
        NotifyOutcome::failed("mailbox full")
    }
}

struct BoxOffice {
    store: MemoryStore,
    clock: Arc<ManualClock>,
    locks: SeatLockManager,
    orders: OrderLifecycle,
    reaper: Reaper,
    event_id: Uuid,
    seat_a: Uuid,
    seat_b: Uuid,
}

impl BoxOffice {
    async fn open(notifier: Arc<dyn Notifier>) -> Self {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let event_id = Uuid::new_v4();

        let mut ids = Vec::new();
        for (number, price) in [("A1", 5000i64), ("A2", 5000)] {
            let seat = Seat {
                id: Uuid::new_v4(),
                event_id,
                section: Some("Stalls".to_string()),
                row: Some("A".to_string()),
                seat_number: number.to_string(),
                seat_type: "STANDARD".to_string(),
                price,
                status: SeatStatus::Available,
            };
            ids.push(seat.id);
            store.insert_seat(seat).await;
        }

        let policy = HoldPolicy::default();
        Self {
            locks: SeatLockManager::new(Arc::new(store.clone()), clock.clone(), policy.clone()),
            orders: OrderLifecycle::new(
                Arc::new(store.clone()),
                clock.clone(),
                notifier,
                policy,
                TicketSettings::new("https://box.example.org"),
            ),
            reaper: Reaper::new(Arc::new(store.clone()), clock.clone()),
            store,
            clock,
            event_id,
            seat_a: ids[0],
            seat_b: ids[1],
        }
    }

    fn both(&self) -> Vec<Uuid> {
        vec![self.seat_a, self.seat_b]
    }

    fn lock_request(&self, session: &str) -> LockRequest {
        LockRequest {
            event_id: self.event_id,
            seat_ids: self.both(),
            session_id: session.to_string(),
            ticket_type_id: None,
        }
    }

    fn checkout(&self, session: &str) -> CheckoutRequest {
        CheckoutRequest {
            event_id: self.event_id,
            seat_ids: self.both(),
            session_id: session.to_string(),
            ticket_type_id: None,
        }
    }

    async fn status_of(&self, seat_id: Uuid) -> SeatStatus {
        self.store.seat(seat_id).await.unwrap().status
    }
}

fn customer() -> CustomerDetails {
    CustomerDetails::new("Grace Hopper", "grace@example.org", "+1 555 0100")
}

#[tokio::test]
async fn rival_session_waits_for_lock_expiry() {
    let office = BoxOffice::open(Arc::new(Outbox::default())).await;

    office
        .locks
        .acquire(&office.lock_request("s1"), Duration::seconds(600))
        .await
        .unwrap();

    let err = office.locks.lock_seats(&office.lock_request("s2")).await.unwrap_err();
    assert!(matches!(err, BookingError::SeatLocked { .. }));
    assert!(err.is_conflict());

    office.clock.advance(Duration::seconds(601));
    assert_eq!(office.reaper.cleanup_expired_locks().await.unwrap(), LockSweep { cleaned: 2 });

    office.locks.lock_seats(&office.lock_request("s2")).await.unwrap();
    let held = office.locks.list_for_session(office.event_id, "s2").await.unwrap();
    assert_eq!(held.len(), 2);
}

#[tokio::test]
async fn abandoned_checkout_is_reaped() {
    let office = BoxOffice::open(Arc::new(Outbox::default())).await;
    office.locks.lock_seats(&office.lock_request("s1")).await.unwrap();
    let pending = office.orders.create_pending(&office.checkout("s1")).await.unwrap();

    office.clock.advance(Duration::minutes(16));
    let sweep = office.reaper.expire_stale_pending_orders().await.unwrap();
    assert_eq!(sweep.expired_orders, 1);
    assert_eq!(sweep.released_seats, 2);

    let details = office.orders.order(pending.order_id).await.unwrap();
    assert_eq!(details.order.status, OrderStatus::Expired);
    assert_eq!(office.status_of(office.seat_a).await, SeatStatus::Available);
    assert_eq!(office.status_of(office.seat_b).await, SeatStatus::Available);
    assert_eq!(office.store.lock_count().await, 0);

    // the seats are immediately lockable by someone else
    office.locks.lock_seats(&office.lock_request("s2")).await.unwrap();
}

#[tokio::test]
async fn paid_round_trip() {
    let outbox = Arc::new(Outbox::default());
    let office = BoxOffice::open(outbox.clone()).await;
    office.locks.lock_seats(&office.lock_request("s1")).await.unwrap();

    let pending = office.orders.create_pending(&office.checkout("s1")).await.unwrap();
    assert_eq!(pending.total_amount, 10_000);

    office.orders.confirm(pending.order_id, customer()).await.unwrap();
    assert_eq!(office.status_of(office.seat_a).await, SeatStatus::Reserved);

    // the 24h hold outlives both sweeps
    office.clock.advance(Duration::hours(2));
    office.reaper.expire_stale_pending_orders().await.unwrap();
    office.reaper.cleanup_expired_locks().await.unwrap();
    assert_eq!(office.store.lock_count().await, 2);

    let paid = office.orders.finalize_as_paid(pending.order_id, "staff-1").await.unwrap();
    assert_eq!(paid.order.status, OrderStatus::Paid);
    assert_eq!(office.status_of(office.seat_a).await, SeatStatus::Sold);
    assert_eq!(office.status_of(office.seat_b).await, SeatStatus::Sold);
    assert_eq!(office.store.lock_count().await, 0);
    assert_eq!(outbox.sent.lock().unwrap().len(), 1);

    let err = office.locks.lock_seats(&office.lock_request("s2")).await.unwrap_err();
    assert!(matches!(err, BookingError::SeatUnavailable { status: SeatStatus::Sold, .. }));
}

#[tokio::test]
async fn rejected_payment_frees_seats() {
    let office = BoxOffice::open(Arc::new(Outbox::default())).await;
    office.locks.lock_seats(&office.lock_request("s1")).await.unwrap();
    let pending = office.orders.create_pending(&office.checkout("s1")).await.unwrap();
    office.orders.confirm(pending.order_id, customer()).await.unwrap();

    office
        .orders
        .finalize_as_cancelled(pending.order_id, "payment not received", "staff-1")
        .await
        .unwrap();

    assert_eq!(office.status_of(office.seat_a).await, SeatStatus::Available);
    assert_eq!(office.store.lock_count().await, 0);
    office.locks.lock_seats(&office.lock_request("s2")).await.unwrap();
}

#[tokio::test]
async fn lock_sweep_is_idempotent() {
    let office = BoxOffice::open(Arc::new(Outbox::default())).await;
    office
        .locks
        .acquire(&office.lock_request("s1"), Duration::seconds(30))
        .await
        .unwrap();
    office.clock.advance(Duration::seconds(30));

    let first = office.reaper.cleanup_expired_locks().await.unwrap();
    let second = office.reaper.cleanup_expired_locks().await.unwrap();
    assert_eq!(first.cleaned, 2);
    assert_eq!(second.cleaned, 0);
    assert_eq!(office.status_of(office.seat_a).await, SeatStatus::Available);
}

#[tokio::test]
async fn second_finalize_changes_nothing() {
    let office = BoxOffice::open(Arc::new(Outbox::default())).await;
    office.locks.lock_seats(&office.lock_request("s1")).await.unwrap();
    let pending = office.orders.create_pending(&office.checkout("s1")).await.unwrap();
    office.orders.confirm(pending.order_id, customer()).await.unwrap();
    office.orders.finalize_as_paid(pending.order_id, "staff-1").await.unwrap();
    let before = office.orders.order(pending.order_id).await.unwrap();

    let err = office
        .orders
        .finalize_as_paid(pending.order_id, "staff-2")
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::OrderNotConfirmable { status: OrderStatus::Paid, .. }));

    let after = office.orders.order(pending.order_id).await.unwrap();
    assert_eq!(after.order, before.order);
    assert_eq!(office.store.audit_log().await.len(), 1);
}

#[tokio::test]
async fn notifier_failure_keeps_payment() {
    let office = BoxOffice::open(Arc::new(Refusing)).await;
    office.locks.lock_seats(&office.lock_request("s1")).await.unwrap();
    let pending = office.orders.create_pending(&office.checkout("s1")).await.unwrap();
    office.orders.confirm(pending.order_id, customer()).await.unwrap();

    let paid = office.orders.finalize_as_paid(pending.order_id, "staff-1").await.unwrap();
    assert!(!paid.notification.success);

    let details = office.orders.order(pending.order_id).await.unwrap();
    assert_eq!(details.order.status, OrderStatus::Paid);
    assert_eq!(office.status_of(office.seat_b).await, SeatStatus::Sold);
}

#[tokio::test]
async fn checkout_token_stops_working_after_payment() {
    let office = BoxOffice::open(Arc::new(Outbox::default())).await;
    office.locks.lock_seats(&office.lock_request("s1")).await.unwrap();
    let pending = office.orders.create_pending(&office.checkout("s1")).await.unwrap();
    office.orders.confirm(pending.order_id, customer()).await.unwrap();
    let paid = office.orders.finalize_as_paid(pending.order_id, "staff-1").await.unwrap();

    let old = office
        .orders
        .verify_ticket_access(&pending.order_number, &pending.access_token)
        .await;
    assert!(matches!(old, Err(BookingError::AccessDenied)));

    let forged = office
        .orders
        .verify_ticket_access(&pending.order_number, &AccessToken::from_raw("0".repeat(64)))
        .await;
    assert!(matches!(forged, Err(BookingError::AccessDenied)));

    let ticket = office
        .orders
        .verify_ticket_access(&pending.order_number, &paid.access_token)
        .await
        .unwrap();
    assert_eq!(ticket.items.len(), 2);
    assert!(ticket.order.paid_at.unwrap() <= office.clock.now());
}

#[tokio::test]
async fn extended_cart_locks_die_with_the_order() {
    let office = BoxOffice::open(Arc::new(Outbox::default())).await;
    office.locks.lock_seats(&office.lock_request("s1")).await.unwrap();
    office.orders.create_pending(&office.checkout("s1")).await.unwrap();
    let ext = office.locks.extend(office.event_id, "s1", &[], 60).await.unwrap();
    assert_eq!(ext.extended, 2);

    office.clock.advance(Duration::minutes(16));
    let sweep = office.reaper.expire_stale_pending_orders().await.unwrap();
    assert_eq!(sweep.expired_orders, 1);
    assert_eq!(office.store.lock_count().await, 0);
    office.locks.lock_seats(&office.lock_request("s2")).await.unwrap();
}
