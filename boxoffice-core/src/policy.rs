use chrono::Duration;
use serde::Deserialize;

/// Hold windows shared by the lock manager, the order lifecycle and the
/// reaper's sweep predicates.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct HoldPolicy {
    #[serde(default = "default_seat_lock_ttl")]
    pub seat_lock_ttl_seconds: u64,
    #[serde(default = "default_max_seats")]
    pub max_seats_per_lock: usize,
    #[serde(default = "default_pending_minutes")]
    pub pending_order_minutes: u64,
    #[serde(default = "default_confirmation_hours")]
    pub confirmation_hold_hours: u64,
}

fn default_seat_lock_ttl() -> u64 { 300 }
fn default_max_seats() -> usize { 10 }
fn default_pending_minutes() -> u64 { 15 }
fn default_confirmation_hours() -> u64 { 24 }

impl Default for HoldPolicy {
    fn default() -> Self {
        Self {
            seat_lock_ttl_seconds: default_seat_lock_ttl(),
            max_seats_per_lock: default_max_seats(),
            pending_order_minutes: default_pending_minutes(),
            confirmation_hold_hours: default_confirmation_hours(),
        }
    }
}

impl HoldPolicy {
    pub fn seat_lock_ttl(&self) -> Duration {
        Duration::seconds(self.seat_lock_ttl_seconds as i64)
    }

    pub fn pending_order_window(&self) -> Duration {
        Duration::minutes(self.pending_order_minutes as i64)
    }

    pub fn confirmation_hold(&self) -> Duration {
        Duration::hours(self.confirmation_hold_hours as i64)
    }
}

/// Where ticket links point and how long to wait on the notifier.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TicketSettings {
    pub base_url: String,
    #[serde(default = "default_notify_timeout")]
    pub notify_timeout_seconds: u64,
}

fn default_notify_timeout() -> u64 { 10 }

impl TicketSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            notify_timeout_seconds: default_notify_timeout(),
        }
    }

    pub fn notify_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.notify_timeout_seconds)
    }

    pub fn ticket_url(&self, order_number: &str, token: &str) -> String {
        format!(
            "{}/ticket/{}?token={}",
            self.base_url.trim_end_matches('/'),
            order_number,
            token
        )
    }
}

/// Sweep intervals for the reaper scheduler
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ReaperSettings {
    #[serde(default = "default_order_sweep")]
    pub order_sweep_seconds: u64,
    #[serde(default = "default_lock_sweep")]
    pub lock_sweep_seconds: u64,
}

fn default_order_sweep() -> u64 { 30 }
fn default_lock_sweep() -> u64 { 60 }

impl Default for ReaperSettings {
    fn default() -> Self {
        Self {
            order_sweep_seconds: default_order_sweep(),
            lock_sweep_seconds: default_lock_sweep(),
        }
    }
}

impl ReaperSettings {
    pub fn order_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.order_sweep_seconds.max(1))
    }

    pub fn lock_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lock_sweep_seconds.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_checkout_windows() {
        let policy = HoldPolicy::default();
        assert_eq!(policy.seat_lock_ttl(), Duration::minutes(5));
        assert_eq!(policy.pending_order_window(), Duration::minutes(15));
        assert_eq!(policy.confirmation_hold(), Duration::hours(24));
        assert_eq!(policy.max_seats_per_lock, 10);
    }

    #[test]
    fn test_ticket_url_trims_trailing_slash() {
        let tickets = TicketSettings::new("https://tickets.example.com/");
        assert_eq!(
            tickets.ticket_url("TKH8Q2Z1M", "abc123"),
            "https://tickets.example.com/ticket/TKH8Q2Z1M?token=abc123"
        );
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let settings = ReaperSettings {
            order_sweep_seconds: 0,
            lock_sweep_seconds: 5,
        };
        assert_eq!(settings.order_sweep_interval(), std::time::Duration::from_secs(1));
        assert_eq!(settings.lock_sweep_interval(), std::time::Duration::from_secs(5));
    }
}
