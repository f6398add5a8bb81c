pub mod lifecycle;
pub mod ticket;

pub use lifecycle::{CheckoutRequest, OrderDetails, OrderLifecycle, PaidOrder, PendingOrder};
pub use ticket::generate_order_number;
