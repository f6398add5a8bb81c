use boxoffice_core::{BookingError, Clock, HoldPolicy, ManualClock, Seat, SeatStatus};
use boxoffice_inventory::{LockRequest, SeatLockManager};
use boxoffice_store::MemoryStore;
use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

const SEATS: usize = 4;
const SESSIONS: [&str; 3] = ["sess-a", "sess-b", "sess-c"];

#[derive(Debug, Clone)]
enum Op {
    Lock { session: usize, seats: Vec<usize>, ttl_secs: i64 },
    Release { session: usize, seats: Vec<usize> },
    Advance { secs: i64 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..SESSIONS.len(), prop::collection::vec(0..SEATS, 1..=SEATS), 1i64..120)
            .prop_map(|(session, seats, ttl_secs)| Op::Lock { session, seats, ttl_secs }),
        (0..SESSIONS.len(), prop::collection::vec(0..SEATS, 0..=2))
            .prop_map(|(session, seats)| Op::Release { session, seats }),
        (1i64..90).prop_map(|secs| Op::Advance { secs }),
    ]
}

/// Who should own each seat, as far as the operations so far imply.
type Model = HashMap<usize, (usize, DateTime<Utc>)>;

fn active_owner(model: &Model, seat: usize, now: DateTime<Utc>) -> Option<usize> {
    model
        .get(&seat)
        .filter(|(_, expires_at)| *expires_at > now)
        .map(|(session, _)| *session)
}

async fn run_ops(ops: Vec<Op>) -> Result<(), TestCaseError> {
    let store = MemoryStore::new();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let event_id = Uuid::new_v4();
    let mut seat_ids = Vec::new();
    for n in 0..SEATS {
        let seat = Seat {
            id: Uuid::new_v4(),
            event_id,
            section: None,
            row: None,
            seat_number: format!("{}", n + 1),
            seat_type: "STANDARD".to_string(),
            price: 1000,
            status: SeatStatus::Available,
        };
        seat_ids.push(seat.id);
        store.insert_seat(seat).await;
    }
    let manager = SeatLockManager::new(Arc::new(store.clone()), clock.clone(), HoldPolicy::default());
    let mut model = Model::new();

    for op in ops {
        let now = clock.now();
        match op {
            Op::Lock { session, seats, ttl_secs } => {
                let expected_ok = seats
                    .iter()
                    .all(|s| active_owner(&model, *s, now).map_or(true, |owner| owner == session));
                let result = manager
                    .acquire(
                        &LockRequest {
                            event_id,
                            seat_ids: seats.iter().map(|s| seat_ids[*s]).collect(),
                            session_id: SESSIONS[session].to_string(),
                            ticket_type_id: None,
                        },
                        Duration::seconds(ttl_secs),
                    )
                    .await;
                match result {
                    Ok(grant) => {
                        prop_assert!(expected_ok);
                        for s in &seats {
                            model.insert(*s, (session, grant.expires_at));
                        }
                    }
                    Err(BookingError::SeatLocked { .. }) => prop_assert!(!expected_ok),
                    Err(other) => return Err(TestCaseError::fail(other.to_string())),
                }
            }
            Op::Release { session, seats } => {
                let ids: Vec<Uuid> = seats.iter().map(|s| seat_ids[*s]).collect();
                manager
                    .release(event_id, SESSIONS[session], &ids)
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                model.retain(|seat, (owner, _)| {
                    !(*owner == session && (seats.is_empty() || seats.contains(seat)))
                });
            }
            Op::Advance { secs } => clock.advance(Duration::seconds(secs)),
        }

        let now = clock.now();
        let mut live: Vec<(Uuid, String)> = store
            .locks()
            .await
            .into_iter()
            .filter(|l| l.is_active(now))
            .map(|l| (l.seat_id, l.session_id))
            .collect();
        live.sort();
        let mut expected: Vec<(Uuid, String)> = (0..SEATS)
            .filter_map(|s| active_owner(&model, s, now).map(|o| (seat_ids[s], SESSIONS[o].to_string())))
            .collect();
        expected.sort();
        prop_assert_eq!(live, expected);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn at_most_one_active_lock_per_seat(ops in prop::collection::vec(op(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run_ops(ops))?;
    }
}
