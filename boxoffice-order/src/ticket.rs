use boxoffice_core::{Order, OrderItem};
use rand::Rng;
use serde_json::{json, Value};

const ORDER_PREFIX: &str = "TKH";
const ORDER_SUFFIX_LEN: usize = 6;
const BASE36: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Human-facing order reference, e.g. `TKH4Z0Q9B`
pub fn generate_order_number() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ORDER_SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("{}{}", ORDER_PREFIX, suffix)
}

/// Template variables for the ticket-confirmed message.
pub(crate) fn ticket_variables(order: &Order, items: &[OrderItem], ticket_url: &str) -> Value {
    let seats: Vec<Value> = items
        .iter()
        .map(|item| {
            json!({
                "section": item.section,
                "row": item.row,
                "seat_number": item.seat_number,
                "seat_type": item.seat_type,
                "price": item.price,
            })
        })
        .collect();

    json!({
        "customer_name": order.customer.as_ref().map(|c| c.name.clone()),
        "order_number": order.order_number,
        "event_id": order.event_id,
        "seats": seats,
        "total_amount": order.total_amount,
        "paid_at": order.paid_at,
        "ticket_url": ticket_url,
    })
}
