//! Concurrent access to shared state.
//!
//! Many callers racing for the same airspace must produce exactly one winner.

mod common;

use std::sync::Arc;
use std::thread;

use chrono::Duration;
use common::{agent, start_time, state_with_clock, DESTINATION, ORIGIN};
use fleet_coordinator::FlightRequest;
use fleet_core::{AltitudeRange, FleetError, PriorityTier, ReservationRequest, TimeWindow};

const CALLERS: usize = 16;

#[test]
fn test_racing_reservations_have_single_winner() {
    let (_clock, state) = state_with_clock();
    let state = Arc::new(state);
    let window = TimeWindow::starting_at(start_time() + Duration::minutes(10), Duration::minutes(30));

    let handles: Vec<_> = (0..CALLERS)
        .map(|i| {
            let state = state.clone();
            thread::spawn(move || {
                state.reserve_airspace(ReservationRequest::new(
                    i as u64,
                    format!("DRONE-{i:03}"),
                    window,
                    AltitudeRange::new(40.0, 60.0),
                    PriorityTier::Normal,
                ))
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|result| result.as_ref().err())
        .all(|err| matches!(err, FleetError::Conflict(_))));
    assert_eq!(state.active_slots().len(), 1);
    assert_eq!(state.airspace_stats().total_flights, 1);
}

#[test]
fn test_racing_flight_plans_keep_one_session() {
    let (_clock, state) = state_with_clock();
    let state = Arc::new(state);
    let departure = start_time() + Duration::hours(1);

    let handles: Vec<_> = (0..CALLERS)
        .map(|i| {
            let state = state.clone();
            thread::spawn(move || {
                let drone = agent(&format!("DRONE-{i:03}"), ORIGIN, 90);
                state.plan_flight(FlightRequest::new(drone, ORIGIN, DESTINATION, departure))
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert_eq!(state.active_flight_count(), 1);
    assert_eq!(state.active_slots().len(), 1);
}

#[test]
fn test_higher_priority_racers_end_with_one_active_slot() {
    let (_clock, state) = state_with_clock();
    let state = Arc::new(state);
    let window = TimeWindow::starting_at(start_time() + Duration::minutes(10), Duration::minutes(30));
    let tiers = [PriorityTier::Low, PriorityTier::Normal, PriorityTier::High, PriorityTier::Emergency];

    let handles: Vec<_> = tiers
        .iter()
        .enumerate()
        .map(|(i, tier)| {
            let state = state.clone();
            let tier = *tier;
            thread::spawn(move || {
                state.reserve_airspace(ReservationRequest::new(
                    i as u64,
                    format!("DRONE-{i:03}"),
                    window,
                    AltitudeRange::new(40.0, 60.0),
                    tier,
                ))
            })
        })
        .collect();
    for handle in handles {
        let _ = handle.join().unwrap();
    }

    // Whatever the arrival order, the emergency request always wins
    let active = state.active_slots();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].priority, PriorityTier::Emergency);
}
