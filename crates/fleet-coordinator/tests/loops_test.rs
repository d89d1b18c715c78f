//! Background loop tests on paused tokio time.

mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use common::{agent, start_time, state_with_clock, DESTINATION, ORIGIN};
use fleet_coordinator::loops::{rebalance_loop, slot_expiry_loop, spawn_background_loops};
use fleet_coordinator::FlightRequest;
use fleet_core::{
    AltitudeRange, Authority, FleetError, GeoPoint, NotFoundError, Obstacle, PendingOrder, PriorityTier,
    ReservationRequest, ThreatLevel, TimeWindow,
};
use tokio::sync::broadcast;

#[tokio::test(start_paused = true)]
async fn test_loops_rebalance_expire_and_shut_down() {
    let (clock, state) = state_with_clock();
    let state = Arc::new(state);

    state
        .register_agent(&Authority::coordinator(), agent("DRONE-001", ORIGIN, 90))
        .unwrap();
    state.enqueue_order(PendingOrder {
        order_id: "ORD-1".into(),
        pickup: GeoPoint::new(37.7760, -122.4180),
        payload_kg: 1.0,
        priority: PriorityTier::Normal,
    });
    let slot = state
        .reserve_airspace(ReservationRequest::new(
            1,
            "DRONE-001",
            TimeWindow::starting_at(start_time(), Duration::minutes(10)),
            AltitudeRange::new(40.0, 60.0),
            PriorityTier::Normal,
        ))
        .unwrap();

    let (shutdown, _) = broadcast::channel(1);
    let handles = spawn_background_loops(state.clone(), &shutdown);

    tokio::time::sleep(StdDuration::from_secs(1)).await;
    assert_eq!(state.assignments_for("DRONE-001").len(), 1);
    assert!(state.loop_heartbeat(rebalance_loop::LOOP_NAME).is_some());
    assert!(state.active_slots().iter().any(|active| active.slot_id == slot.slot_id));

    clock.advance(Duration::minutes(11));
    tokio::time::sleep(StdDuration::from_secs(6)).await;
    assert!(state.loop_heartbeat(slot_expiry_loop::LOOP_NAME).is_some());
    assert!(state.active_slots().is_empty());
    assert_eq!(state.airspace_stats().expired_total, 1);

    shutdown.send(()).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_rebalance_loop_respects_interval() {
    let (clock, state) = state_with_clock();
    let state = Arc::new(state);
    state
        .register_agent(&Authority::coordinator(), agent("DRONE-001", ORIGIN, 90))
        .unwrap();

    let (shutdown, _) = broadcast::channel(1);
    let handle = tokio::spawn(rebalance_loop::run_rebalance_loop(state.clone(), shutdown.subscribe()));

    tokio::time::sleep(StdDuration::from_secs(1)).await;
    assert_eq!(state.balancer_state().rebalance_count, 1);

    // Ticks keep firing but the balancer clock has not moved
    tokio::time::sleep(StdDuration::from_secs(120)).await;
    assert_eq!(state.balancer_state().rebalance_count, 1);

    clock.advance(Duration::seconds(301));
    tokio::time::sleep(StdDuration::from_secs(31)).await;
    assert_eq!(state.balancer_state().rebalance_count, 2);

    shutdown.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_expiry_loop_prunes_finished_records() {
    let (clock, state) = state_with_clock();
    let state = Arc::new(state);

    let ticket = state
        .plan_flight(FlightRequest::new(
            agent("DRONE-001", ORIGIN, 85),
            ORIGIN,
            DESTINATION,
            start_time() + Duration::minutes(5),
        ))
        .unwrap();
    let position = state.flight(&ticket.flight_id).unwrap().navigation.position;
    let hazard = Obstacle {
        id: "CRANE-2".into(),
        position,
        altitude_m: 60.0,
        radius_m: 20.0,
        threat_level: ThreatLevel::Critical,
    };
    let responders = vec![agent("HELPER-1", "37.7760,-122.4180", 90)];
    let report = state.report_obstacle(&ticket.flight_id, &hazard, &responders).unwrap();
    let response = report.emergency.unwrap().unwrap();
    state.complete_emergency(&response.response_id, true).unwrap();
    state.complete_flight(&ticket.flight_id, false).unwrap();

    let (shutdown, _) = broadcast::channel(1);
    let handle = tokio::spawn(slot_expiry_loop::run_slot_expiry_loop(state.clone(), shutdown.subscribe()));

    tokio::time::sleep(StdDuration::from_secs(1)).await;
    assert!(state.archived_flight(&ticket.flight_id).is_some());

    clock.advance(Duration::seconds(3_601));
    tokio::time::sleep(StdDuration::from_secs(6)).await;
    assert!(state.archived_flight(&ticket.flight_id).is_none());
    let err = state.complete_emergency(&response.response_id, true).unwrap_err();
    assert!(matches!(err, FleetError::NotFound(NotFoundError::Response(_))));
    assert_eq!(state.emergency_stats().successful_responses, 1);

    shutdown.send(()).unwrap();
    handle.await.unwrap();
}
