//! Flight-session orchestration.
//!
//! A session ties together one agent's route, its airspace slot and its live
//! navigation state, from planning until the route is finished.

use chrono::{DateTime, Duration, Utc};
use fleet_core::{
    AgentSnapshot, AirspaceSlot, AltitudeRange, AssistanceType, Authority, AvoidanceOutcome, Decision,
    EmergencyRequest, EmergencyResponse, EnvironmentSnapshot, EventSink, FleetEvent, NavigationState,
    NavigationSummary, NavigationTelemetry, NotFoundError, Obstacle, OptimizationWeights, PriorityTier,
    RecoveryMode, ReservationRequest, Result, Route, SlotStatus, TimeWindow, Urgency,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::store::{lock, AppState};

/// Everything needed to plan and reserve one flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightRequest {
    pub agent: AgentSnapshot,
    pub origin: String,
    pub destination: String,
    pub weights: OptimizationWeights,
    pub environment: EnvironmentSnapshot,
    pub departure: DateTime<Utc>,
    pub priority: PriorityTier,
    /// Half-height of the reserved band around cruise altitude
    pub altitude_margin_m: f64,
    /// Fallback departure if the first window is taken
    pub alternate_departure: Option<DateTime<Utc>>,
}

impl FlightRequest {
    pub fn new(agent: AgentSnapshot, origin: &str, destination: &str, departure: DateTime<Utc>) -> Self {
        Self {
            agent,
            origin: origin.to_string(),
            destination: destination.to_string(),
            weights: OptimizationWeights::default(),
            environment: EnvironmentSnapshot::clear(),
            departure,
            priority: PriorityTier::Normal,
            altitude_margin_m: 10.0,
            alternate_departure: None,
        }
    }
}

/// Live state of one flight.
#[derive(Debug, Clone, Serialize)]
pub struct FlightSession {
    pub flight_id: String,
    pub agent: AgentSnapshot,
    pub route: Route,
    pub navigation: NavigationState,
    pub slot_id: u64,
    pub priority: PriorityTier,
}

/// Result of a successful [`AppState::plan_flight`].
#[derive(Debug, Clone, Serialize)]
pub struct FlightTicket {
    pub flight_id: String,
    pub route: Route,
    pub slot: AirspaceSlot,
}

/// Navigation log of a finished flight.
#[derive(Debug, Clone)]
pub(crate) struct ArchivedFlight {
    pub(crate) summary: NavigationSummary,
    pub(crate) archived_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ObstacleReport {
    pub avoidance: AvoidanceOutcome,
    /// Present when the obstacle required an emergency dispatch
    pub emergency: Option<Result<EmergencyResponse>>,
}

impl AppState {
    /// Optimize a route, reserve its airspace and start navigation.
    ///
    /// Nothing is kept unless every step succeeds.
    pub fn plan_flight(&self, request: FlightRequest) -> Result<FlightTicket> {
        let FlightRequest {
            agent,
            origin,
            destination,
            weights,
            environment,
            departure,
            priority,
            altitude_margin_m,
            alternate_departure,
        } = request;

        let route = self
            .optimizer
            .calculate_optimal_route(&agent, &origin, &destination, &weights, &environment)?;
        self.events.emit(FleetEvent::RouteCalculated {
            agent_id: agent.id.clone(),
            route_hash: route.route_hash,
            distance_m: route.distance_m,
            estimated_time_ms: route.estimated_time_ms,
            optimization_score: route.optimization_score,
        });

        let mut active_route = route.clone();
        let start = route
            .waypoints
            .first()
            .map(|wp| wp.point())
            .ok_or_else(|| NotFoundError::Flight(format!("route {:016x} has no waypoints", route.route_hash)))?;
        let navigation = self
            .navigator
            .initialize_navigation(&agent, &mut active_route, start, &environment)?;

        let duration = Duration::milliseconds(i64::try_from(route.estimated_time_ms).unwrap_or(i64::MAX));
        let margin = altitude_margin_m.max(1.0);
        let max_altitude = self.config.airspace().max_altitude_m;
        let altitude = AltitudeRange::new(
            (route.cruise_altitude_m - margin).max(0.0),
            (route.cruise_altitude_m + margin).min(max_altitude),
        );
        let mut reservation = ReservationRequest::new(
            route.route_hash,
            agent.id.clone(),
            TimeWindow::starting_at(departure, duration),
            altitude,
            priority,
        );
        if let Some(alternate) = alternate_departure {
            reservation = reservation.with_alternate(TimeWindow::starting_at(alternate, duration));
        }
        let slot = lock(&self.airspace).request_airspace_reservation(reservation)?;

        let flight_id = format!("FLT-{}", Uuid::new_v4().simple());
        tracing::info!(
            "Planned flight {} for {}: {:.0}m, score {:.1}, slot {}",
            flight_id,
            agent.id,
            route.distance_m,
            route.optimization_score,
            slot.slot_id
        );
        self.flights.insert(
            flight_id.clone(),
            FlightSession {
                flight_id: flight_id.clone(),
                agent,
                route: active_route.clone(),
                navigation,
                slot_id: slot.slot_id,
                priority,
            },
        );

        Ok(FlightTicket {
            flight_id,
            route: active_route,
            slot,
        })
    }

    pub fn update_telemetry(
        &self,
        flight_id: &str,
        telemetry: NavigationTelemetry,
        obstacles: Vec<Obstacle>,
        environment: &EnvironmentSnapshot,
    ) -> Result<()> {
        let mut session = self
            .flights
            .get_mut(flight_id)
            .ok_or_else(|| NotFoundError::Flight(flight_id.to_string()))?;
        self.navigator
            .update_navigation_state(&mut session.navigation, telemetry, obstacles, environment);
        Ok(())
    }

    /// Make the next navigation decision. A flight whose slot was superseded
    /// without being rebooked holds until it is given airspace again.
    pub fn decide(&self, flight_id: &str) -> Result<Decision> {
        let mut session = self
            .flights
            .get_mut(flight_id)
            .ok_or_else(|| NotFoundError::Flight(flight_id.to_string()))?;
        let clearance = self.refresh_slot(&mut *session);
        let FlightSession { navigation, route, .. } = &mut *session;
        let decision = match clearance {
            Some(SlotStatus::Superseded { by }) => {
                self.navigator
                    .hold_for_clearance(navigation, route, format!("airspace slot superseded by slot {by}"))
            }
            _ => self.navigator.make_autonomous_decision(navigation, route),
        };
        tracing::debug!(
            "Flight {} decision #{}: {} ({}%)",
            flight_id,
            decision.sequence,
            decision.action.label(),
            decision.confidence
        );
        Ok(decision)
    }

    /// Run obstacle avoidance for a flight. A critical obstacle also
    /// dispatches an emergency response from `responders`.
    pub fn report_obstacle(
        &self,
        flight_id: &str,
        obstacle: &Obstacle,
        responders: &[AgentSnapshot],
    ) -> Result<ObstacleReport> {
        let (avoidance, request) = {
            let mut session = self
                .flights
                .get_mut(flight_id)
                .ok_or_else(|| NotFoundError::Flight(flight_id.to_string()))?;
            let FlightSession {
                navigation, route, ..
            } = &mut *session;
            let avoidance = self.navigator.execute_obstacle_avoidance(navigation, route, obstacle);

            self.events.emit(FleetEvent::ObstacleAvoided {
                agent_id: navigation.agent_id.clone(),
                route_hash: navigation.route_hash,
                obstacle_id: obstacle.id.clone(),
                threat_level: obstacle.threat_level.level(),
                action: avoidance.decision.action.label().to_string(),
                flight_mode: avoidance.flight_mode,
            });

            let request = avoidance.requires_emergency_response.then(|| {
                EmergencyRequest::new(
                    format!("EM-{}-{}", flight_id, navigation.decision_count),
                    navigation.agent_id.clone(),
                    navigation.position,
                    AssistanceType::Collision,
                    Urgency::Critical,
                )
            });
            (avoidance, request)
        };

        // Session guard is released before taking the emergency lock
        let emergency = request.map(|request| {
            tracing::warn!(
                "Flight {} escalated to emergency {} (obstacle {})",
                flight_id,
                request.emergency_id,
                obstacle.id
            );
            let result = lock(&self.emergency).coordinate_emergency_response(request, responders);
            if let Err(err) = &result {
                tracing::warn!("Emergency dispatch for flight {} failed: {}", flight_id, err);
            }
            result
        });

        Ok(ObstacleReport { avoidance, emergency })
    }

    pub fn recover_flight(&self, flight_id: &str, authority: &Authority, mode: RecoveryMode) -> Result<Decision> {
        let mut session = self
            .flights
            .get_mut(flight_id)
            .ok_or_else(|| NotFoundError::Flight(flight_id.to_string()))?;
        let decision = self
            .navigator
            .recover_flight_mode(&mut session.navigation, authority, mode)?;
        tracing::info!("Flight {} recovered to {:?} by {}", flight_id, mode, authority.caller_id);
        Ok(decision)
    }

    pub fn set_manual_control(&self, flight_id: &str, authority: &Authority, manual: bool) -> Result<Decision> {
        let mut session = self
            .flights
            .get_mut(flight_id)
            .ok_or_else(|| NotFoundError::Flight(flight_id.to_string()))?;
        self.navigator
            .set_manual_control(&mut session.navigation, authority, manual)
    }

    /// Finish a flight: close the route, release its slot and archive the
    /// navigation log.
    pub fn complete_flight(&self, flight_id: &str, completed: bool) -> Result<NavigationSummary> {
        let (_, mut session) = self
            .flights
            .remove(flight_id)
            .ok_or_else(|| NotFoundError::Flight(flight_id.to_string()))?;

        let summary = match self
            .navigator
            .finish_navigation(session.navigation.clone(), &mut session.route, completed)
        {
            Ok(summary) => summary,
            Err(err) => {
                self.flights.insert(flight_id.to_string(), session);
                return Err(err);
            }
        };

        {
            let mut airspace = lock(&self.airspace);
            // The original slot may have been superseded and rebooked under a new id
            let held: Vec<u64> = airspace
                .active_slots()
                .into_iter()
                .filter(|slot| slot.agent_id == session.agent.id && slot.route_hash == session.route.route_hash)
                .map(|slot| slot.slot_id)
                .collect();
            if !held.contains(&session.slot_id) {
                tracing::debug!("Slot {} for flight {} is no longer active", session.slot_id, flight_id);
            }
            for slot_id in held {
                if let Err(err) = airspace.release_slot(slot_id) {
                    tracing::warn!("Slot {} for flight {} not released: {}", slot_id, flight_id, err);
                }
            }
        }

        tracing::info!(
            "Flight {} {} after {} decision(s)",
            flight_id,
            summary.final_status.as_str(),
            summary.decision_count
        );
        self.archive.insert(
            flight_id.to_string(),
            ArchivedFlight {
                summary: summary.clone(),
                archived_at: self.clock.now(),
            },
        );
        Ok(summary)
    }

    /// Point the session at the agent's active slot for this route, which
    /// changes when a superseded slot is rebooked. Returns the status of the
    /// session's slot when no active slot is left.
    fn refresh_slot(&self, session: &mut FlightSession) -> Option<SlotStatus> {
        let airspace = lock(&self.airspace);
        let current = airspace
            .slot(session.slot_id)
            .filter(|slot| slot.is_active())
            .or_else(|| {
                airspace.active_slots().into_iter().find(|slot| {
                    slot.agent_id == session.agent.id && slot.route_hash == session.route.route_hash
                })
            });
        match current {
            Some(slot) => {
                if slot.slot_id != session.slot_id {
                    tracing::info!("Flight {} moved to slot {}", session.flight_id, slot.slot_id);
                    session.slot_id = slot.slot_id;
                }
                None
            }
            None => airspace.slot(session.slot_id).map(|slot| slot.status),
        }
    }

    /// Current airspace slot of a flight.
    pub fn flight_slot(&self, flight_id: &str) -> Option<AirspaceSlot> {
        let slot_id = self.flights.get(flight_id)?.slot_id;
        lock(&self.airspace).slot(slot_id).cloned()
    }

    pub fn flight(&self, flight_id: &str) -> Option<FlightSession> {
        self.flights.get(flight_id).map(|entry| entry.value().clone())
    }

    pub fn archived_flight(&self, flight_id: &str) -> Option<NavigationSummary> {
        self.archive.get(flight_id).map(|entry| entry.value().summary.clone())
    }

    pub fn active_flight_count(&self) -> usize {
        self.flights.len()
    }
}
