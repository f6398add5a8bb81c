use boxoffice_shared::Masked;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::StoreError;

/// Durable, coarse status of a seat
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Available,
    Reserved,
    Sold,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "AVAILABLE",
            SeatStatus::Reserved => "RESERVED",
            SeatStatus::Sold => "SOLD",
        }
    }
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeatStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(SeatStatus::Available),
            "RESERVED" => Ok(SeatStatus::Reserved),
            "SOLD" => Ok(SeatStatus::Sold),
            other => Err(StoreError::Corrupt(format!("unknown seat status {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Seat {
    pub id: Uuid,
    pub event_id: Uuid,
    pub section: Option<String>,
    pub row: Option<String>,
    pub seat_number: String,
    pub seat_type: String,
    /// Minor currency units
    pub price: i64,
    pub status: SeatStatus,
}

/// A time-boxed, session-owned claim on a seat.
///
/// It says nothing about the seat's durable status; a lock whose
/// `expires_at` has passed is dead even while its row still exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatLock {
    pub id: Uuid,
    pub seat_id: Uuid,
    pub event_id: Uuid,
    pub session_id: String,
    pub ticket_type_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl SeatLock {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    pub fn is_held_by(&self, event_id: Uuid, session_id: &str, now: DateTime<Utc>) -> bool {
        self.event_id == event_id && self.session_id == session_id && self.is_active(now)
    }
}

/// Order status in the checkout lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    PendingConfirmation,
    Paid,
    Cancelled,
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::PendingConfirmation => "PENDING_CONFIRMATION",
            OrderStatus::Paid => "PAID",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Paid | OrderStatus::Cancelled | OrderStatus::Expired
        )
    }

    /// The only legal edges of the order state machine.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::PendingConfirmation)
                | (OrderStatus::Pending, OrderStatus::Expired)
                | (OrderStatus::PendingConfirmation, OrderStatus::Paid)
                | (OrderStatus::PendingConfirmation, OrderStatus::Cancelled)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PENDING_CONFIRMATION" => Ok(OrderStatus::PendingConfirmation),
            "PAID" => Ok(OrderStatus::Paid),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "EXPIRED" => Ok(OrderStatus::Expired),
            other => Err(StoreError::Corrupt(format!("unknown order status {other}"))),
        }
    }
}

/// Buyer identity, supplied when the order is confirmed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomerDetails {
    pub name: String,
    pub email: Masked<String>,
    pub phone: Masked<String>,
}

impl CustomerDetails {
    pub fn new(name: impl Into<String>, email: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: Masked(email.into()),
            phone: Masked(phone.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub event_id: Uuid,
    /// Browsing session that checked out; owns the seat locks behind the order
    pub session_id: String,
    pub ticket_type_id: Option<Uuid>,
    pub customer: Option<CustomerDetails>,
    pub total_amount: i64,
    pub status: OrderStatus,
    /// Only meaningful while `Pending`
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing, default)]
    pub access_token_hash: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Status as observed at `now`: a pending order past its deadline is
    /// expired even before the reaper has recorded it.
    pub fn effective_status(&self, now: DateTime<Utc>) -> OrderStatus {
        match (self.status, self.expires_at) {
            (OrderStatus::Pending, Some(deadline)) if deadline <= now => OrderStatus::Expired,
            (status, _) => status,
        }
    }

    pub fn update_status(&mut self, status: OrderStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }
}

/// Snapshot of one seat at order creation. Never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub seat_id: Uuid,
    pub seat_number: String,
    pub seat_type: String,
    pub section: Option<String>,
    pub row: Option<String>,
    pub price: i64,
    pub created_at: DateTime<Utc>,
}

impl OrderItem {
    pub fn snapshot(order_id: Uuid, seat: &Seat, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            seat_id: seat.id,
            seat_number: seat.seat_number.clone(),
            seat_type: seat.seat_type.clone(),
            section: seat.section.clone(),
            row: seat.row.clone(),
            price: seat.price,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Confirm,
    Reject,
    Expire,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Confirm => "CONFIRM",
            AuditAction::Reject => "REJECT",
            AuditAction::Expire => "EXPIRE",
        }
    }
}

impl FromStr for AuditAction {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONFIRM" => Ok(AuditAction::Confirm),
            "REJECT" => Ok(AuditAction::Reject),
            "EXPIRE" => Ok(AuditAction::Expire),
            other => Err(StoreError::Corrupt(format!("unknown audit action {other}"))),
        }
    }
}

/// Append-only record of a staff or system transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub id: Uuid,
    pub actor_id: String,
    pub action: AuditAction,
    pub entity: String,
    pub entity_id: Uuid,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn for_order(
        actor_id: &str,
        action: AuditAction,
        entity: &str,
        order: &Order,
        old_status: OrderStatus,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_id: actor_id.to_string(),
            action,
            entity: entity.to_string(),
            entity_id: order.id,
            old_status,
            new_status: order.status,
            metadata,
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pending_order(expires_at: DateTime<Utc>) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            order_number: "TKH0A1B2C".to_string(),
            event_id: Uuid::new_v4(),
            session_id: "sess-1".to_string(),
            ticket_type_id: None,
            customer: None,
            total_amount: 100,
            status: OrderStatus::Pending,
            expires_at: Some(expires_at),
            access_token_hash: String::new(),
            paid_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_transition_table() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(PendingConfirmation));
        assert!(Pending.can_transition_to(Expired));
        assert!(PendingConfirmation.can_transition_to(Paid));
        assert!(PendingConfirmation.can_transition_to(Cancelled));

        assert!(!Pending.can_transition_to(Paid));
        assert!(!Pending.can_transition_to(Cancelled));
        assert!(!PendingConfirmation.can_transition_to(Expired));
        for terminal in [Paid, Cancelled, Expired] {
            for next in [Pending, PendingConfirmation, Paid, Cancelled, Expired] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_status_strings_round_trip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::PendingConfirmation,
            OrderStatus::Paid,
            OrderStatus::Cancelled,
            OrderStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("SHIPPED".parse::<OrderStatus>().is_err());
        assert!("HELD".parse::<SeatStatus>().is_err());
    }

    #[test]
    fn test_effective_status_lapses_pending() {
        let now = Utc::now();
        let live = pending_order(now + Duration::minutes(1));
        assert_eq!(live.effective_status(now), OrderStatus::Pending);

        let lapsed = pending_order(now - Duration::seconds(1));
        assert_eq!(lapsed.effective_status(now), OrderStatus::Expired);
    }

    #[test]
    fn test_lock_activity() {
        let now = Utc::now();
        let event_id = Uuid::new_v4();
        let lock = SeatLock {
            id: Uuid::new_v4(),
            seat_id: Uuid::new_v4(),
            event_id,
            session_id: "sess-1".to_string(),
            ticket_type_id: None,
            expires_at: now,
            created_at: now,
        };
        // expiry instant itself is no longer active
        assert!(!lock.is_active(now));
        assert!(lock.is_held_by(event_id, "sess-1", now - Duration::seconds(1)));
        assert!(!lock.is_held_by(event_id, "sess-2", now - Duration::seconds(1)));
    }
}
