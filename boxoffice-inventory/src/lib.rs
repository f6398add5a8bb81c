pub mod locks;

pub use locks::{LockExtension, LockGrant, LockRequest, SeatAvailability, SeatLockManager};
