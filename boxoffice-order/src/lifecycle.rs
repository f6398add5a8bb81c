use boxoffice_core::{
    AccessToken, AuditAction, AuditEntry, BookingError, BookingResult, Clock, CustomerDetails,
    HoldPolicy, NotificationPurpose, NotificationRequest, Notifier, NotifyOutcome, Order,
    OrderItem, OrderStatus, SeatStatus, Store, TicketSettings,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ticket::{generate_order_number, ticket_variables};

const PAYMENT_ENTITY: &str = "PAYMENT";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub event_id: Uuid,
    pub seat_ids: Vec<Uuid>,
    pub session_id: String,
    pub ticket_type_id: Option<Uuid>,
}

/// Result of checkout. `access_token` is the only copy of the raw token.
#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub order_id: Uuid,
    pub order_number: String,
    pub total_amount: i64,
    pub expires_at: DateTime<Utc>,
    pub access_token: AccessToken,
}

#[derive(Debug, Clone)]
pub struct PaidOrder {
    pub order: Order,
    /// Replaces the pre-payment token; carried in the ticket link.
    pub access_token: AccessToken,
    pub notification: NotifyOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    pub order: Order,
    pub items: Vec<OrderItem>,
    /// Status as of the read, see `Order::effective_status`
    pub status: OrderStatus,
}

/// Drives an order from checkout through staff confirmation.
///
/// PENDING → PENDING_CONFIRMATION → {PAID, CANCELLED}. The PENDING → EXPIRED
/// edge belongs to the reaper.
pub struct OrderLifecycle {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    policy: HoldPolicy,
    tickets: TicketSettings,
}

impl OrderLifecycle {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        policy: HoldPolicy,
        tickets: TicketSettings,
    ) -> Self {
        Self {
            store,
            clock,
            notifier,
            policy,
            tickets,
        }
    }

    /// Bind the session's locked seats into a PENDING order.
    pub async fn create_pending(&self, request: &CheckoutRequest) -> BookingResult<PendingOrder> {
        let mut seat_ids: Vec<Uuid> = Vec::with_capacity(request.seat_ids.len());
        for id in &request.seat_ids {
            if !seat_ids.contains(id) {
                seat_ids.push(*id);
            }
        }
        if seat_ids.is_empty() {
            return Err(BookingError::InvalidRequest("at least one seat is required".into()));
        }

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let seats = tx.seats_for_update(request.event_id, &seat_ids).await?;
        let mut ordered = Vec::with_capacity(seat_ids.len());
        for seat_id in &seat_ids {
            let seat = seats
                .iter()
                .find(|s| s.id == *seat_id)
                .ok_or(BookingError::SeatNotFound {
                    event_id: request.event_id,
                    seat_id: *seat_id,
                })?;
            ordered.push(seat);
        }

        let locks = tx.locks_for_seats(&seat_ids).await?;
        for seat_id in &seat_ids {
            let held = locks
                .iter()
                .any(|l| l.seat_id == *seat_id && l.is_held_by(request.event_id, &request.session_id, now));
            if !held {
                return Err(BookingError::SeatNotLockedByCaller { seat_id: *seat_id });
            }
        }

        if let Some((seat_id, order_id)) = tx.active_orders_for_seats(&seat_ids, now).await?.first() {
            return Err(BookingError::SeatInActiveOrder {
                seat_id: *seat_id,
                order_id: *order_id,
            });
        }
        if let Some(seat) = ordered.iter().find(|s| s.status != SeatStatus::Available) {
            return Err(BookingError::SeatUnavailable {
                seat_id: seat.id,
                status: seat.status,
            });
        }

        let order_id = Uuid::new_v4();
        let deadline = now + self.policy.pending_order_window();
        let access_token = AccessToken::generate();
        let items: Vec<OrderItem> = ordered
            .iter()
            .map(|seat| OrderItem::snapshot(order_id, seat, now))
            .collect();

        let order = Order {
            id: order_id,
            order_number: generate_order_number(),
            event_id: request.event_id,
            session_id: request.session_id.clone(),
            ticket_type_id: request.ticket_type_id,
            customer: None,
            total_amount: items.iter().map(|i| i.price).sum(),
            status: OrderStatus::Pending,
            expires_at: Some(deadline),
            access_token_hash: access_token.hash(),
            paid_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };

        tx.insert_order(&order, &items).await?;
        tx.set_lock_expiry(request.event_id, &request.session_id, &seat_ids, deadline)
            .await?;
        tx.commit().await?;

        info!(
            order_number = %order.order_number,
            event_id = %order.event_id,
            seats = items.len(),
            total_amount = order.total_amount,
            "Pending order created"
        );

        Ok(PendingOrder {
            order_id,
            order_number: order.order_number,
            total_amount: order.total_amount,
            expires_at: deadline,
            access_token,
        })
    }

    /// Attach the buyer and hold the seats for staff review.
    pub async fn confirm(&self, order_id: Uuid, customer: CustomerDetails) -> BookingResult<Order> {
        if customer.name.trim().is_empty()
            || customer.email.expose().trim().is_empty()
            || customer.phone.expose().trim().is_empty()
        {
            return Err(BookingError::InvalidRequest(
                "customer name, email and phone are required".into(),
            ));
        }

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .order_for_update(order_id)
            .await?
            .ok_or_else(|| BookingError::OrderNotFound(order_id.to_string()))?;

        let status = order.effective_status(now);
        if !status.can_transition_to(OrderStatus::PendingConfirmation) {
            return Err(BookingError::OrderNotPending { order_id, status });
        }

        let seat_ids = item_seats(&tx.order_items(order_id).await?);

        order.customer = Some(customer);
        order.expires_at = None;
        order.update_status(OrderStatus::PendingConfirmation, now);

        tx.update_order(&order).await?;
        tx.set_seat_status(&seat_ids, SeatStatus::Reserved, now).await?;
        tx.set_lock_expiry(
            order.event_id,
            &order.session_id,
            &seat_ids,
            now + self.policy.confirmation_hold(),
        )
        .await?;
        tx.commit().await?;

        info!(
            order_number = %order.order_number,
            seats = seat_ids.len(),
            "Order awaiting payment confirmation"
        );
        Ok(order)
    }

    /// Staff accepted the payment: sell the seats and send the ticket.
    pub async fn finalize_as_paid(&self, order_id: Uuid, actor_id: &str) -> BookingResult<PaidOrder> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .order_for_update(order_id)
            .await?
            .ok_or_else(|| BookingError::OrderNotFound(order_id.to_string()))?;

        if !order.status.can_transition_to(OrderStatus::Paid) {
            return Err(BookingError::OrderNotConfirmable {
                order_id,
                status: order.status,
            });
        }

        let items = tx.order_items(order_id).await?;
        let seat_ids = item_seats(&items);
        let old_status = order.status;
        let access_token = AccessToken::generate();

        order.access_token_hash = access_token.hash();
        order.paid_at = Some(now);
        order.update_status(OrderStatus::Paid, now);

        tx.update_order(&order).await?;
        tx.set_seat_status(&seat_ids, SeatStatus::Sold, now).await?;
        let filter = Some(seat_ids.as_slice());
        tx.delete_session_locks(order.event_id, &order.session_id, filter).await?;
        tx.append_audit(&AuditEntry::for_order(
            actor_id,
            AuditAction::Confirm,
            PAYMENT_ENTITY,
            &order,
            old_status,
            json!({
                "order_number": order.order_number,
                "total_amount": order.total_amount,
                "seats": seat_ids.len(),
            }),
            now,
        ))
        .await?;
        tx.commit().await?;

        info!(order_number = %order.order_number, actor_id, "Order paid");

        let notification = self.send_ticket(&order, &items, &access_token).await;

        Ok(PaidOrder {
            order,
            access_token,
            notification,
        })
    }

    /// Staff rejected the payment: put the seats back on sale.
    pub async fn finalize_as_cancelled(
        &self,
        order_id: Uuid,
        reason: &str,
        actor_id: &str,
    ) -> BookingResult<()> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(BookingError::InvalidRequest("a cancellation reason is required".into()));
        }

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .order_for_update(order_id)
            .await?
            .ok_or_else(|| BookingError::OrderNotFound(order_id.to_string()))?;

        if !order.status.can_transition_to(OrderStatus::Cancelled) {
            return Err(BookingError::OrderNotConfirmable {
                order_id,
                status: order.status,
            });
        }

        let seat_ids = item_seats(&tx.order_items(order_id).await?);
        let old_status = order.status;

        order.cancelled_at = Some(now);
        order.cancellation_reason = Some(reason.to_string());
        order.update_status(OrderStatus::Cancelled, now);

        tx.update_order(&order).await?;
        let released = tx.set_seat_status(&seat_ids, SeatStatus::Available, now).await?;
        let filter = Some(seat_ids.as_slice());
        tx.delete_session_locks(order.event_id, &order.session_id, filter).await?;
        tx.append_audit(&AuditEntry::for_order(
            actor_id,
            AuditAction::Reject,
            PAYMENT_ENTITY,
            &order,
            old_status,
            json!({
                "order_number": order.order_number,
                "reason": reason,
                "released_seats": released,
            }),
            now,
        ))
        .await?;
        tx.commit().await?;

        info!(order_number = %order.order_number, actor_id, released, "Order cancelled");
        Ok(())
    }

    pub async fn order(&self, order_id: Uuid) -> BookingResult<OrderDetails> {
        let mut tx = self.store.begin().await?;
        let order = tx
            .order_by_id(order_id)
            .await?
            .ok_or_else(|| BookingError::OrderNotFound(order_id.to_string()))?;
        let items = tx.order_items(order_id).await?;

        Ok(OrderDetails {
            status: order.effective_status(self.clock.now()),
            order,
            items,
        })
    }

    /// Ticket lookup by order number, gated on the holder's access token.
    pub async fn verify_ticket_access(
        &self,
        order_number: &str,
        token: &AccessToken,
    ) -> BookingResult<OrderDetails> {
        let mut tx = self.store.begin().await?;
        let order = tx
            .order_by_number(order_number)
            .await?
            .ok_or_else(|| BookingError::OrderNotFound(order_number.to_string()))?;

        if !token.matches(&order.access_token_hash) {
            warn!(order_number, "Ticket access denied");
            return Err(BookingError::AccessDenied);
        }

        let items = tx.order_items(order.id).await?;
        Ok(OrderDetails {
            status: order.effective_status(self.clock.now()),
            order,
            items,
        })
    }

    async fn send_ticket(
        &self,
        order: &Order,
        items: &[OrderItem],
        token: &AccessToken,
    ) -> NotifyOutcome {
        let Some(customer) = order.customer.as_ref() else {
            warn!(order_number = %order.order_number, "Paid order has no customer to notify");
            return NotifyOutcome::failed("order has no customer contact");
        };

        let ticket_url = self.tickets.ticket_url(&order.order_number, token.expose());
        let request = NotificationRequest {
            purpose: NotificationPurpose::TicketConfirmed,
            recipient: customer.email.clone(),
            variables: ticket_variables(order, items, &ticket_url),
            order_id: order.id,
        };

        match tokio::time::timeout(self.tickets.notify_timeout(), self.notifier.notify(request)).await {
            Ok(outcome) => {
                if !outcome.success {
                    warn!(
                        order_number = %order.order_number,
                        error = outcome.error.as_deref().unwrap_or("unknown"),
                        "Ticket notification failed"
                    );
                }
                outcome
            }
            Err(_) => {
                warn!(order_number = %order.order_number, "Ticket notification timed out");
                NotifyOutcome::failed("notification timed out")
            }
        }
    }
}

fn item_seats(items: &[OrderItem]) -> Vec<Uuid> {
    items.iter().map(|i| i.seat_id).collect()
}
