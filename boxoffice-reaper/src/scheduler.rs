use boxoffice_core::ReaperSettings;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::sweep::Reaper;

impl Reaper {
    /// Run both sweeps on their own intervals until `shutdown` turns true or
    /// its sender goes away. The first tick of each fires immediately.
    pub async fn run(self: Arc<Self>, settings: ReaperSettings, mut shutdown: watch::Receiver<bool>) {
        let mut order_tick = interval(settings.order_sweep_interval());
        let mut lock_tick = interval(settings.lock_sweep_interval());
        order_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        lock_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            order_sweep_seconds = settings.order_sweep_seconds,
            lock_sweep_seconds = settings.lock_sweep_seconds,
            "Reaper started"
        );

        loop {
            tokio::select! {
                _ = order_tick.tick() => {
                    if let Err(e) = self.expire_stale_pending_orders().await {
                        error!("Pending order sweep failed: {}", e);
                    }
                }
                _ = lock_tick.tick() => {
                    if let Err(e) = self.cleanup_expired_locks().await {
                        error!("Seat lock sweep failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Reaper stopped");
    }
}
