pub mod scheduler;
pub mod sweep;

pub use sweep::{LockSweep, OrderSweep, Reaper, REAPER_ACTOR};
