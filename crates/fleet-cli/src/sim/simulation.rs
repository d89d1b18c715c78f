//! Seeded random fleet simulation.
//!
//! Registers a random fleet, balances a random order book across it, then
//! plans and flies one pickup leg per loaded agent with randomly placed
//! obstacles along the way.

use std::collections::BTreeMap;

use chrono::Duration;
use fleet_coordinator::{AppState, FlightRequest, FlightTicket};
use fleet_core::spatial::{bearing_deg, distance_between, offset_point};
use fleet_core::{
    AirspaceStats, Authority, EmergencyStats, EnvironmentSnapshot, LoadBalancerState, Obstacle,
    OptimizationWeights, RebalanceOutcome, RecoveryMode, Result, ThreatLevel,
};
use rand::Rng;

use super::fleet::{generate_fleet, generate_orders, HUB};
use super::flight::{fly, FlightEnd};
use super::scenarios::clear_weather;

/// Chance that a leg has an obstacle worth rerouting around
const ELEVATED_HAZARD_CHANCE: f64 = 0.25;
const CRITICAL_HAZARD_CHANCE: f64 = 0.05;
const EMERGENCY_SUCCESS_CHANCE: f64 = 0.85;
const DEPARTURE_STAGGER_MINUTES: i64 = 2;
const ALTERNATE_DELAY_MINUTES: i64 = 45;

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationReport {
    pub registered: usize,
    pub rebalance: RebalanceOutcome,
    pub balancer: LoadBalancerState,
    pub flights_planned: usize,
    /// Failed plans keyed by error kind
    pub rejections: BTreeMap<&'static str, usize>,
    pub arrived: usize,
    pub aborted: usize,
    pub reroutes: usize,
    pub emergencies: usize,
    pub emergency_stats: EmergencyStats,
    pub airspace_stats: AirspaceStats,
    pub events_emitted: u64,
}

pub fn run_simulation<R: Rng>(state: &AppState, rng: &mut R, drones: usize, orders: usize) -> Result<SimulationReport> {
    let authority = Authority::coordinator();
    let fleet = generate_fleet(rng, drones, HUB);
    for agent in &fleet {
        state.register_agent(&authority, agent.clone())?;
    }
    for order in generate_orders(rng, orders, HUB) {
        state.enqueue_order(order);
    }
    let rebalance = state.rebalance();

    let environment = EnvironmentSnapshot {
        traffic_density: rng.random_range(0..40),
        ..clear_weather()
    };

    let start = state.clock().now();
    let mut rejections: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut tickets = Vec::new();
    for (i, agent) in fleet.iter().enumerate() {
        let Some(order) = state.assignments_for(&agent.id).into_iter().next() else {
            continue;
        };
        let departure = start + Duration::minutes(DEPARTURE_STAGGER_MINUTES * i as i64);
        let mut request = FlightRequest::new(agent.clone(), &agent.position, &order.pickup.to_string(), departure);
        request.environment = environment.clone();
        request.priority = order.priority;
        request.weights = OptimizationWeights {
            altitude_preference: rng.random_range(0..=100),
            ..OptimizationWeights::default()
        };
        request.alternate_departure = Some(departure + Duration::minutes(ALTERNATE_DELAY_MINUTES));

        match state.plan_flight(request) {
            Ok(ticket) => tickets.push(ticket),
            Err(err) => {
                tracing::debug!("{} could not fly {}: {}", agent.id, order.order_id, err);
                *rejections.entry(err.kind()).or_insert(0) += 1;
            }
        }
    }

    let mut report = SimulationReport {
        registered: fleet.len(),
        rebalance,
        balancer: state.balancer_state(),
        flights_planned: tickets.len(),
        rejections,
        arrived: 0,
        aborted: 0,
        reroutes: 0,
        emergencies: 0,
        emergency_stats: EmergencyStats::default(),
        airspace_stats: AirspaceStats::default(),
        events_emitted: 0,
    };

    for ticket in &tickets {
        let hazards = random_hazards(rng, ticket);
        let mut log = fly(state, &ticket.flight_id, &environment, &hazards)?;
        report.reroutes += log.count("reroute");

        if log.end == FlightEnd::Emergency {
            report.emergencies += 1;
            if let Some(hazard) = hazards.iter().find(|h| h.threat_level == ThreatLevel::Critical) {
                let escalation = state.report_obstacle(&ticket.flight_id, hazard, &state.agents())?;
                if let Some(Ok(response)) = escalation.emergency {
                    state.complete_emergency(&response.response_id, rng.random_bool(EMERGENCY_SUCCESS_CHANCE))?;
                }
            }
            state.recover_flight(&ticket.flight_id, &authority, RecoveryMode::Auto)?;
            log = fly(state, &ticket.flight_id, &environment, &[])?;
        }

        let arrived = log.end == FlightEnd::Arrived;
        state.complete_flight(&ticket.flight_id, arrived)?;
        if arrived {
            report.arrived += 1;
        } else {
            report.aborted += 1;
        }
    }

    report.emergency_stats = state.emergency_stats();
    report.airspace_stats = state.airspace_stats();
    report.events_emitted = state.events().emitted();
    Ok(report)
}

fn random_hazards<R: Rng>(rng: &mut R, ticket: &FlightTicket) -> Vec<Obstacle> {
    let (Some(first), Some(last)) = (ticket.route.waypoints.first(), ticket.route.waypoints.last()) else {
        return Vec::new();
    };
    let (from, to) = (first.point(), last.point());
    let along = bearing_deg(from, to);
    let length_m = distance_between(from, to);

    let mut hazards = Vec::new();
    if rng.random_bool(ELEVATED_HAZARD_CHANCE) {
        hazards.push(Obstacle {
            id: format!("{}-TOWER", ticket.route.agent_id),
            position: offset_point(from, length_m / 2.0, along),
            altitude_m: ticket.route.cruise_altitude_m,
            radius_m: rng.random_range(20.0..60.0),
            threat_level: ThreatLevel::Elevated,
        });
    }
    if rng.random_bool(CRITICAL_HAZARD_CHANCE) {
        hazards.push(Obstacle {
            id: format!("{}-COLLAPSE", ticket.route.agent_id),
            position: offset_point(from, (length_m / 4.0).min(200.0), along),
            altitude_m: ticket.route.cruise_altitude_m,
            radius_m: 30.0,
            threat_level: ThreatLevel::Critical,
        });
    }
    hazards
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use fleet_coordinator::Config;
    use fleet_core::ManualClock;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn run(seed: u64) -> SimulationReport {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 7, 1, 8, 0, 0).unwrap()));
        let state = AppState::new(Config::default(), clock);
        run_simulation(&state, &mut StdRng::seed_from_u64(seed), 12, 30).unwrap()
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        assert_eq!(run(11), run(11));
    }

    #[test]
    fn every_planned_flight_is_closed() {
        let report = run(5);
        assert_eq!(report.registered, 12);
        assert_eq!(report.arrived + report.aborted, report.flights_planned);
        assert_eq!(report.airspace_stats.active_slots, 0);
        assert!(report.events_emitted > 0);
        assert!(matches!(report.rebalance, RebalanceOutcome::Rebalanced { .. }));
    }
}
