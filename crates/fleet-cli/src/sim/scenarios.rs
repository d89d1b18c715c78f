//! Canned end-to-end scenarios.
//!
//! Each scenario drives a fresh [`AppState`] through the coordinator's
//! public operations and returns what happened for the caller to print.

use chrono::Duration;
use clap::ValueEnum;
use fleet_coordinator::{AppState, FlightRequest, FlightTicket, ObstacleReport};
use fleet_core::spatial::{offset_point, parse_coordinates};
use fleet_core::{
    AgentSnapshot, AirspaceSlot, AirspaceStats, Authority, EmergencyResponse, EnvironmentSnapshot, FleetError,
    NavigationSummary, Obstacle, OptimizationWeights, PriorityTier, RecoveryMode, Result, Role, ThreatLevel,
};

use super::flight::{fly, FlightEnd, FlightLog};

pub const ORIGIN: &str = "37.7749,-122.4194";
pub const DESTINATION: &str = "37.7849,-122.4094";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScenarioKind {
    /// One delivery in clear weather
    Clear,
    /// Storm conditions with a critical obstacle mid-flight
    Storm,
    /// Several agents competing for the same airspace
    Contention,
}

pub fn clear_weather() -> EnvironmentSnapshot {
    EnvironmentSnapshot {
        weather_code: 0,
        visibility_percent: 90,
        wind_speed_kmh: 15.0,
        ..EnvironmentSnapshot::clear()
    }
}

pub fn storm_weather() -> EnvironmentSnapshot {
    EnvironmentSnapshot {
        weather_code: 4,
        visibility_percent: 30,
        wind_speed_kmh: 45.0,
        ..EnvironmentSnapshot::clear()
    }
}

pub fn demo_agent(id: &str, position: &str, battery_percent: u8) -> AgentSnapshot {
    AgentSnapshot {
        id: id.to_string(),
        autonomy_level: 80,
        battery_percent,
        payload_capacity_kg: 2.5,
        max_range_m: 20_000.0,
        position: position.to_string(),
    }
}

fn request(state: &AppState, agent: AgentSnapshot, environment: &EnvironmentSnapshot) -> FlightRequest {
    FlightRequest {
        environment: environment.clone(),
        ..FlightRequest::new(agent, ORIGIN, DESTINATION, state.clock().now() + Duration::minutes(5))
    }
}

#[derive(Debug, Clone)]
pub struct ClearOutcome {
    pub ticket: FlightTicket,
    pub log: FlightLog,
    pub summary: NavigationSummary,
}

/// Plan, fly and complete a single delivery in clear weather.
pub fn run_clear(state: &AppState) -> Result<ClearOutcome> {
    let environment = clear_weather();
    let ticket = state.plan_flight(request(state, demo_agent("DRONE001", ORIGIN, 85), &environment))?;
    let log = fly(state, &ticket.flight_id, &environment, &[])?;
    let summary = state.complete_flight(&ticket.flight_id, log.end == FlightEnd::Arrived)?;
    Ok(ClearOutcome { ticket, log, summary })
}

#[derive(Debug, Clone)]
pub struct StormOutcome {
    pub clear_score: f64,
    pub storm_score: f64,
    pub ticket: FlightTicket,
    pub before_escalation: FlightLog,
    pub escalation: ObstacleReport,
    pub resolved: Option<EmergencyResponse>,
    pub after_recovery: FlightLog,
    pub summary: NavigationSummary,
}

/// Fly through a storm, hit a critical obstacle, dispatch helpers, recover
/// and finish the delivery.
pub fn run_storm(state: &AppState) -> Result<StormOutcome> {
    let clear_score = state
        .plan_flight(request(state, demo_agent("SCOUT", ORIGIN, 90), &clear_weather()))?
        .route
        .optimization_score;

    let environment = storm_weather();
    let mut storm_request = request(state, demo_agent("DRONE001", ORIGIN, 85), &environment);
    // The scout holds the nominal window
    storm_request.alternate_departure = Some(state.clock().now() + Duration::hours(1));
    let ticket = state.plan_flight(storm_request)?;

    // A crane appears a few hundred meters along the route
    let origin = parse_coordinates("origin", ORIGIN)?;
    let crane = Obstacle {
        id: "CRANE-7".into(),
        position: offset_point(origin, 300.0, 45.0),
        altitude_m: ticket.route.cruise_altitude_m,
        radius_m: 40.0,
        threat_level: ThreatLevel::Critical,
    };
    let before_escalation = fly(state, &ticket.flight_id, &environment, std::slice::from_ref(&crane))?;

    let helpers = vec![
        demo_agent("HELPER-A", "37.7760,-122.4170", 95),
        demo_agent("HELPER-B", "37.7800,-122.4250", 70),
        demo_agent("HELPER-C", "37.7700,-122.4100", 35),
    ];
    let escalation = state.report_obstacle(&ticket.flight_id, &crane, &helpers)?;
    let resolved = match &escalation.emergency {
        Some(Ok(response)) => Some(state.complete_emergency(&response.response_id, true)?),
        _ => None,
    };

    let operator = Authority::new("ops-console", Role::Operator);
    state.recover_flight(&ticket.flight_id, &operator, RecoveryMode::Auto)?;
    let after_recovery = fly(state, &ticket.flight_id, &environment, &[])?;
    let summary = state.complete_flight(&ticket.flight_id, after_recovery.end == FlightEnd::Arrived)?;

    Ok(StormOutcome {
        clear_score,
        storm_score: ticket.route.optimization_score,
        ticket,
        before_escalation,
        escalation,
        resolved,
        after_recovery,
        summary,
    })
}

#[derive(Debug, Clone)]
pub struct ContentionOutcome {
    pub first: AirspaceSlot,
    /// Conflict returned to the second agent's first attempt
    pub rejected: Option<FleetError>,
    pub rescheduled: AirspaceSlot,
    pub priority: AirspaceSlot,
    pub active: Vec<AirspaceSlot>,
    pub stats: AirspaceStats,
}

/// Three agents want the same window: one conflicts and moves to its
/// alternate, an emergency flight then bumps the original holder.
pub fn run_contention(state: &AppState) -> Result<ContentionOutcome> {
    let environment = clear_weather();
    let departure = state.clock().now() + Duration::minutes(5);

    let mut first = request(state, demo_agent("DRONE001", ORIGIN, 85), &environment);
    first.alternate_departure = Some(departure + Duration::hours(2));
    let first = state.plan_flight(first)?.slot;

    let rejected = state
        .plan_flight(request(state, demo_agent("DRONE002", ORIGIN, 80), &environment))
        .err();

    let mut retry = request(state, demo_agent("DRONE002", ORIGIN, 80), &environment);
    retry.alternate_departure = Some(departure + Duration::hours(1));
    let rescheduled = state.plan_flight(retry)?.slot;

    let mut medic = request(state, demo_agent("MEDIC01", ORIGIN, 100), &environment);
    medic.priority = PriorityTier::Emergency;
    medic.weights = OptimizationWeights {
        altitude_preference: OptimizationWeights::default().altitude_preference,
        ..OptimizationWeights::emergency()
    };
    let priority = state.plan_flight(medic)?.slot;

    Ok(ContentionOutcome {
        first,
        rejected,
        rescheduled,
        priority,
        active: state.active_slots(),
        stats: state.airspace_stats(),
    })
}
