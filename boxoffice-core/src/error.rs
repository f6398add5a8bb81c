use uuid::Uuid;

use crate::models::{OrderStatus, SeatStatus};

/// Failures raised by the backing store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Commit failed: {0}")]
    CommitFailed(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Seat {seat_id} not found in event {event_id}")]
    SeatNotFound { event_id: Uuid, seat_id: Uuid },

    #[error("Seat {seat_id} is not available (status {status})")]
    SeatUnavailable { seat_id: Uuid, status: SeatStatus },

    #[error("Seat {seat_id} is being selected by another customer")]
    SeatLocked { seat_id: Uuid },

    #[error("Seat {seat_id} is not locked by this session")]
    SeatNotLockedByCaller { seat_id: Uuid },

    #[error("Seat {seat_id} already belongs to active order {order_id}")]
    SeatInActiveOrder { seat_id: Uuid, order_id: Uuid },

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order {order_id} is not pending (status {status})")]
    OrderNotPending { order_id: Uuid, status: OrderStatus },

    #[error("Order {order_id} cannot be finalized from status {status}")]
    OrderNotConfirmable { order_id: Uuid, status: OrderStatus },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid access token")]
    AccessDenied,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BookingError {
    /// Another buyer holds what was asked for; retrying needs new user intent.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            BookingError::SeatUnavailable { .. }
                | BookingError::SeatLocked { .. }
                | BookingError::SeatNotLockedByCaller { .. }
                | BookingError::SeatInActiveOrder { .. }
        )
    }

    /// Infrastructure failures the caller may retry under its own policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BookingError::Store(StoreError::Backend(_)) | BookingError::Store(StoreError::CommitFailed(_))
        )
    }
}

pub type BookingResult<T> = Result<T, BookingError>;
