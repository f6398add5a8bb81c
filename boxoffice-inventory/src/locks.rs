use boxoffice_core::{
    BookingError, BookingResult, Clock, HoldPolicy, Seat, SeatLock, SeatStatus, Store,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRequest {
    pub event_id: Uuid,
    pub seat_ids: Vec<Uuid>,
    pub session_id: String,
    pub ticket_type_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockGrant {
    pub seat_ids: Vec<Uuid>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockExtension {
    pub extended: u64,
    pub expires_at: DateTime<Utc>,
}

/// One seat of the event map as a given session sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatAvailability {
    #[serde(flatten)]
    pub seat: Seat,
    pub is_locked: bool,
    pub locked_by_me: bool,
    pub lock_expires_at: Option<DateTime<Utc>>,
}

/// Grants, refreshes and drops the short-lived seat claims a browsing
/// session holds while it fills its cart.
///
/// Every check runs against seat rows locked inside the writing
/// transaction, so two sessions racing for a seat cannot both win.
pub struct SeatLockManager {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    policy: HoldPolicy,
}

impl SeatLockManager {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, policy: HoldPolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Lock with the configured default TTL
    pub async fn lock_seats(&self, request: &LockRequest) -> BookingResult<LockGrant> {
        self.acquire(request, self.policy.seat_lock_ttl()).await
    }

    /// Lock every requested seat for `ttl`, or none of them.
    pub async fn acquire(&self, request: &LockRequest, ttl: Duration) -> BookingResult<LockGrant> {
        if request.session_id.trim().is_empty() {
            return Err(BookingError::InvalidRequest("session id is required".into()));
        }
        if ttl <= Duration::zero() {
            return Err(BookingError::InvalidRequest("lock ttl must be positive".into()));
        }
        let seat_ids = distinct(&request.seat_ids);
        if seat_ids.is_empty() {
            return Err(BookingError::InvalidRequest("at least one seat is required".into()));
        }
        if seat_ids.len() > self.policy.max_seats_per_lock {
            return Err(BookingError::InvalidRequest(format!(
                "at most {} seats can be locked at once",
                self.policy.max_seats_per_lock
            )));
        }

        let now = self.clock.now();
        let expires_at = now + ttl;
        let mut tx = self.store.begin().await?;

        let seats = tx.seats_for_update(request.event_id, &seat_ids).await?;
        for seat_id in &seat_ids {
            let seat = seats
                .iter()
                .find(|s| s.id == *seat_id)
                .ok_or(BookingError::SeatNotFound {
                    event_id: request.event_id,
                    seat_id: *seat_id,
                })?;
            if seat.status != SeatStatus::Available {
                return Err(BookingError::SeatUnavailable {
                    seat_id: seat.id,
                    status: seat.status,
                });
            }
        }

        let existing = tx.locks_for_seats(&seat_ids).await?;
        if let Some(taken) = existing
            .iter()
            .find(|l| l.is_active(now) && l.session_id != request.session_id)
        {
            debug!(seat_id = %taken.seat_id, "Seat held by another session");
            return Err(BookingError::SeatLocked {
                seat_id: taken.seat_id,
            });
        }

        for seat_id in &seat_ids {
            tx.upsert_lock(&SeatLock {
                id: Uuid::new_v4(),
                seat_id: *seat_id,
                event_id: request.event_id,
                session_id: request.session_id.clone(),
                ticket_type_id: request.ticket_type_id,
                expires_at,
                created_at: now,
            })
            .await?;
        }
        tx.commit().await?;

        info!(
            event_id = %request.event_id,
            session = short_session(&request.session_id),
            seats = seat_ids.len(),
            %expires_at,
            "Seats locked"
        );

        Ok(LockGrant {
            seat_ids,
            expires_at,
        })
    }

    /// Drop the session's locks on `seat_ids`, or all of them in the event
    /// when the list is empty. Returns how many were removed.
    pub async fn release(
        &self,
        event_id: Uuid,
        session_id: &str,
        seat_ids: &[Uuid],
    ) -> BookingResult<u64> {
        let mut tx = self.store.begin().await?;
        let filter = (!seat_ids.is_empty()).then_some(seat_ids);
        let released = tx.delete_session_locks(event_id, session_id, filter).await?;
        tx.commit().await?;

        debug!(%event_id, session = short_session(session_id), released, "Seat locks released");
        Ok(released)
    }

    /// Push the deadline of the session's live locks to now + duration.
    /// Seats the session does not hold are skipped.
    pub async fn extend(
        &self,
        event_id: Uuid,
        session_id: &str,
        seat_ids: &[Uuid],
        duration_minutes: i64,
    ) -> BookingResult<LockExtension> {
        if duration_minutes <= 0 {
            return Err(BookingError::InvalidRequest(
                "extension must be a positive number of minutes".into(),
            ));
        }

        let now = self.clock.now();
        let expires_at = now + Duration::minutes(duration_minutes);
        let filter = (!seat_ids.is_empty()).then_some(seat_ids);

        let mut tx = self.store.begin().await?;
        let extended = tx
            .extend_session_locks(event_id, session_id, filter, now, expires_at)
            .await?;
        tx.commit().await?;

        debug!(%event_id, session = short_session(session_id), extended, "Seat locks extended");
        Ok(LockExtension {
            extended,
            expires_at,
        })
    }

    pub async fn list_for_session(
        &self,
        event_id: Uuid,
        session_id: &str,
    ) -> BookingResult<Vec<SeatLock>> {
        let mut tx = self.store.begin().await?;
        let locks = tx.session_locks(event_id, session_id, self.clock.now()).await?;
        Ok(locks)
    }

    /// Every seat of the event with its live lock state relative to
    /// `session_id`, ordered by section, row and seat number.
    pub async fn seat_map(
        &self,
        event_id: Uuid,
        session_id: &str,
    ) -> BookingResult<Vec<SeatAvailability>> {
        let mut tx = self.store.begin().await?;
        let rows = tx.event_seats_with_locks(event_id, self.clock.now()).await?;

        Ok(rows
            .into_iter()
            .map(|(seat, lock)| SeatAvailability {
                seat,
                is_locked: lock.is_some(),
                locked_by_me: lock.as_ref().map_or(false, |l| l.session_id == session_id),
                lock_expires_at: lock.map(|l| l.expires_at),
            })
            .collect())
    }
}

/// Request order, duplicates dropped
fn distinct(ids: &[Uuid]) -> Vec<Uuid> {
    let mut out: Vec<Uuid> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(id) {
            out.push(*id);
        }
    }
    out
}

fn short_session(session_id: &str) -> &str {
    match session_id.char_indices().nth(8) {
        Some((idx, _)) => &session_id[..idx],
        None => session_id,
    }
}
