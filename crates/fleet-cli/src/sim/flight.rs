//! Fly a planned flight along its route, one telemetry tick at a time.
//!
//! The simulated drone follows the coordinator's decisions: speed and
//! altitude adjustments are applied, holds stop movement, and everything
//! else keeps it moving towards the current target waypoint.

use fleet_coordinator::AppState;
use fleet_core::spatial::{bearing_deg, distance_between, offset_point};
use fleet_core::{
    Decision, DecisionAction, EnvironmentSnapshot, FlightMode, GeoPoint, NavigationTelemetry, NotFoundError,
    Obstacle, Result,
};

/// Seconds of flight between two telemetry updates
pub const TICK_SECS: f64 = 30.0;
pub const MAX_TICKS: usize = 500;
/// Obstacles farther than this are not reported to the flight
const SENSOR_RANGE_M: f64 = 600.0;
const DEFAULT_SPEED_MPS: f64 = 10.0;

#[derive(Debug, Clone, PartialEq)]
pub enum FlightEnd {
    Arrived,
    /// Stopped because the flight entered emergency mode
    Emergency,
    /// Tick budget used up before arrival
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct FlightLog {
    pub decisions: Vec<Decision>,
    pub ticks: usize,
    pub end: FlightEnd,
}

impl FlightLog {
    pub fn count(&self, label: &str) -> usize {
        self.decisions
            .iter()
            .filter(|decision| decision.action.label() == label)
            .count()
    }
}

/// Advance one position towards `target` by at most `step_m`.
pub fn step_towards(from: GeoPoint, target: GeoPoint, step_m: f64) -> GeoPoint {
    if distance_between(from, target) <= step_m {
        target
    } else {
        offset_point(from, step_m, bearing_deg(from, target))
    }
}

/// Fly until arrival, emergency or the tick budget runs out.
///
/// `hazards` are static obstacles; those within sensor range are reported
/// with every telemetry update.
pub fn fly(
    state: &AppState,
    flight_id: &str,
    environment: &EnvironmentSnapshot,
    hazards: &[Obstacle],
) -> Result<FlightLog> {
    let session = state
        .flight(flight_id)
        .ok_or_else(|| NotFoundError::Flight(flight_id.to_string()))?;
    let mut position = session.navigation.position;
    let mut altitude_m = session.route.cruise_altitude_m;
    let mut speed_mps = session
        .route
        .waypoints
        .iter()
        .find_map(|waypoint| waypoint.speed_mps)
        .unwrap_or(DEFAULT_SPEED_MPS);
    let mut holding = false;

    let mut decisions = Vec::new();
    for tick in 1..=MAX_TICKS {
        let session = state
            .flight(flight_id)
            .ok_or_else(|| NotFoundError::Flight(flight_id.to_string()))?;
        if session.navigation.flight_mode == FlightMode::Emergency {
            return Ok(FlightLog {
                decisions,
                ticks: tick - 1,
                end: FlightEnd::Emergency,
            });
        }

        let target = session.route.current_target().map(|waypoint| waypoint.point());
        let mut heading_deg = session.navigation.heading_deg;
        if let (Some(target), false) = (target, holding) {
            heading_deg = bearing_deg(position, target);
            position = step_towards(position, target, speed_mps * TICK_SECS);
        }

        let nearby: Vec<Obstacle> = hazards
            .iter()
            .filter(|hazard| distance_between(position, hazard.position) <= SENSOR_RANGE_M)
            .cloned()
            .collect();
        state.update_telemetry(
            flight_id,
            NavigationTelemetry {
                position,
                altitude_m,
                speed_mps,
                heading_deg,
            },
            nearby,
            environment,
        )?;

        let decision = state.decide(flight_id)?;
        holding = matches!(decision.action, DecisionAction::Hold);
        match decision.action {
            DecisionAction::AdjustSpeed { target_mps } => speed_mps = target_mps,
            DecisionAction::AdjustAltitude { target_m } => altitude_m = target_m,
            _ => {}
        }
        let arrived = matches!(decision.action, DecisionAction::ArriveDestination);
        decisions.push(decision);
        if arrived {
            return Ok(FlightLog {
                decisions,
                ticks: tick,
                end: FlightEnd::Arrived,
            });
        }
    }

    Ok(FlightLog {
        decisions,
        ticks: MAX_TICKS,
        end: FlightEnd::TimedOut,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_stops_at_target() {
        let from = GeoPoint::new(37.7749, -122.4194);
        let target = GeoPoint::new(37.7759, -122.4194);
        assert_eq!(step_towards(from, target, 5_000.0), target);

        let partial = step_towards(from, target, 50.0);
        assert!((distance_between(from, partial) - 50.0).abs() < 0.5);
        assert!(distance_between(partial, target) < distance_between(from, target));
    }
}
