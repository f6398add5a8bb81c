pub mod clock;
pub mod error;
pub mod models;
pub mod notify;
pub mod policy;
pub mod store;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BookingError, BookingResult, StoreError, StoreResult};
pub use models::{
    AuditAction, AuditEntry, CustomerDetails, Order, OrderItem, OrderStatus, Seat, SeatLock,
    SeatStatus,
};
pub use notify::{LogNotifier, NotificationPurpose, NotificationRequest, Notifier, NotifyOutcome};
pub use policy::{HoldPolicy, ReaperSettings, TicketSettings};
pub use store::{Store, StoreTx};
pub use token::AccessToken;
