//! Per-flight navigation state machine.
//!
//! A [`NavigationState`] lives from the moment a route becomes active until
//! the route reaches a terminal status. Telemetry updates replace its live
//! fields; decisions and obstacle responses are appended to an audit log.
//!
//! Flight mode rules:
//! - `Auto` and `Manual` can be switched between by fleet control.
//! - Any critical obstacle forces `Emergency`, from either mode.
//! - Leaving `Emergency` requires [`NavigationController::recover_flight_mode`].

use serde::{Deserialize, Serialize};

use crate::authority::Authority;
use crate::error::{Result, StateError};
use crate::models::{AgentSnapshot, EnvironmentSnapshot, GeoPoint, Route, RouteStatus, Waypoint};
use crate::rules::SafetyRules;
use crate::spatial::{self, bearing_deg, detour_around, distance_between, normalize_heading};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlightMode {
    /// Autonomous flight
    Auto,
    /// Operator in control; the controller only advises
    Manual,
    /// Holding for emergency response
    Emergency,
}

/// Target mode when leaving emergency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryMode {
    Auto,
    Manual,
}

impl From<RecoveryMode> for FlightMode {
    fn from(mode: RecoveryMode) -> Self {
        match mode {
            RecoveryMode::Auto => FlightMode::Auto,
            RecoveryMode::Manual => FlightMode::Manual,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    Negligible = 0,
    Low = 1,
    /// Requires a reroute
    Elevated = 2,
    /// No-fly intrusion or imminent collision
    Critical = 3,
}

impl ThreatLevel {
    /// Map a raw sensor level. Values above 3 are malformed and refused.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(ThreatLevel::Negligible),
            1 => Some(ThreatLevel::Low),
            2 => Some(ThreatLevel::Elevated),
            3 => Some(ThreatLevel::Critical),
            _ => None,
        }
    }

    pub fn level(&self) -> u8 {
        *self as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub id: String,
    pub position: GeoPoint,
    pub altitude_m: f64,
    pub radius_m: f64,
    pub threat_level: ThreatLevel,
}

/// Live telemetry fields replaced on every update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NavigationTelemetry {
    pub position: GeoPoint,
    pub altitude_m: f64,
    pub speed_mps: f64,
    pub heading_deg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DecisionAction {
    /// Keep flying towards the current target
    Continue { heading_deg: f64 },
    AdvanceWaypoint { index: usize },
    ArriveDestination,
    AdjustSpeed { target_mps: f64 },
    AdjustAltitude { target_m: f64 },
    /// Small heading change to pass a minor obstacle
    Nudge { heading_deg: f64 },
    Reroute { detour: Waypoint },
    Hold,
    /// Manual mode: recommendation only
    DeferToOperator { suggested_heading_deg: f64 },
    ModeChange { mode: FlightMode },
}

impl DecisionAction {
    pub fn label(&self) -> &'static str {
        match self {
            DecisionAction::Continue { .. } => "continue",
            DecisionAction::AdvanceWaypoint { .. } => "advance_waypoint",
            DecisionAction::ArriveDestination => "arrive_destination",
            DecisionAction::AdjustSpeed { .. } => "adjust_speed",
            DecisionAction::AdjustAltitude { .. } => "adjust_altitude",
            DecisionAction::Nudge { .. } => "nudge",
            DecisionAction::Reroute { .. } => "reroute",
            DecisionAction::Hold => "hold",
            DecisionAction::DeferToOperator { .. } => "defer_to_operator",
            DecisionAction::ModeChange { .. } => "mode_change",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionPriority {
    Routine,
    High,
    Critical,
}

/// One entry of the decision log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub sequence: u64,
    pub action: DecisionAction,
    /// 0-100
    pub confidence: u8,
    pub priority: DecisionPriority,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationState {
    pub agent_id: String,
    pub route_hash: u64,
    pub autonomy_level: u8,
    pub position: GeoPoint,
    pub altitude_m: f64,
    pub speed_mps: f64,
    pub heading_deg: f64,
    pub flight_mode: FlightMode,
    pub obstacles: Vec<Obstacle>,
    pub environment: EnvironmentSnapshot,
    /// Append-only
    pub decisions: Vec<Decision>,
    pub decision_count: u64,
}

impl NavigationState {
    pub fn telemetry(&self) -> NavigationTelemetry {
        NavigationTelemetry {
            position: self.position,
            altitude_m: self.altitude_m,
            speed_mps: self.speed_mps,
            heading_deg: self.heading_deg,
        }
    }

    pub fn last_decision(&self) -> Option<&Decision> {
        self.decisions.last()
    }

    fn record(&mut self, action: DecisionAction, confidence: u8, priority: DecisionPriority, reason: impl Into<String>) -> Decision {
        self.decision_count += 1;
        let decision = Decision {
            sequence: self.decision_count,
            action,
            confidence: confidence.min(100),
            priority,
            reason: reason.into(),
        };
        self.decisions.push(decision.clone());
        decision
    }

    fn observe(&mut self, obstacle: &Obstacle) {
        match self.obstacles.iter_mut().find(|known| known.id == obstacle.id) {
            Some(known) => *known = obstacle.clone(),
            None => self.obstacles.push(obstacle.clone()),
        }
    }
}

/// Result of handling one obstacle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvoidanceOutcome {
    pub decision: Decision,
    pub flight_mode: FlightMode,
    /// Set for critical threats; the caller should dispatch an emergency response
    pub requires_emergency_response: bool,
}

/// Archived record of a finished flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationSummary {
    pub agent_id: String,
    pub route_hash: u64,
    pub final_status: RouteStatus,
    pub final_position: GeoPoint,
    pub decision_count: u64,
    pub decisions: Vec<Decision>,
    pub obstacles_encountered: usize,
    pub entered_emergency: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationConfig {
    /// Distance at which a waypoint counts as reached
    pub arrival_radius_m: f64,
    /// Obstacles farther ahead than this are ignored by route decisions
    pub lookahead_m: f64,
    pub nudge_heading_deg: f64,
    pub detour_clearance_m: f64,
    pub high_wind_kmh: f64,
    /// Speed multiplier applied in high wind
    pub high_wind_speed_factor: f64,
    pub low_visibility_percent: u8,
    /// Descent below cruise level in low visibility
    pub low_visibility_descent_m: f64,
    pub min_confidence: u8,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            arrival_radius_m: 25.0,
            lookahead_m: 500.0,
            nudge_heading_deg: 15.0,
            detour_clearance_m: 30.0,
            high_wind_kmh: 35.0,
            high_wind_speed_factor: 0.7,
            low_visibility_percent: 40,
            low_visibility_descent_m: 20.0,
            min_confidence: 10,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NavigationController {
    pub config: NavigationConfig,
    pub rules: SafetyRules,
}

impl NavigationController {
    pub fn new(config: NavigationConfig, rules: SafetyRules) -> Self {
        Self { config, rules }
    }

    /// Activate `route` and create the live state for flying it.
    pub fn initialize_navigation(
        &self,
        agent: &AgentSnapshot,
        route: &mut Route,
        start_position: GeoPoint,
        environment: &EnvironmentSnapshot,
    ) -> Result<NavigationState> {
        route.activate()?;

        let heading_deg = route
            .current_target()
            .map(|target| bearing_deg(start_position, target.point()))
            .unwrap_or(0.0);

        Ok(NavigationState {
            agent_id: agent.id.clone(),
            route_hash: route.route_hash,
            autonomy_level: agent.autonomy_level.min(100),
            position: start_position,
            altitude_m: 0.0,
            speed_mps: 0.0,
            heading_deg,
            flight_mode: FlightMode::Auto,
            obstacles: Vec::new(),
            environment: environment.clone(),
            decisions: Vec::new(),
            decision_count: 0,
        })
    }

    /// Replace live telemetry and the observed obstacle list. The flight mode
    /// is left alone; only decisions and avoidance change it.
    pub fn update_navigation_state(
        &self,
        state: &mut NavigationState,
        telemetry: NavigationTelemetry,
        obstacles: Vec<Obstacle>,
        environment: &EnvironmentSnapshot,
    ) {
        state.position = telemetry.position;
        state.altitude_m = telemetry.altitude_m;
        state.speed_mps = telemetry.speed_mps.max(0.0);
        state.heading_deg = normalize_heading(telemetry.heading_deg);
        state.obstacles = obstacles;
        state.environment = environment.clone();
    }

    /// Evaluate the current situation, log a decision and return it.
    pub fn make_autonomous_decision(&self, state: &mut NavigationState, route: &mut Route) -> Decision {
        if state.flight_mode != FlightMode::Emergency {
            let critical = state
                .obstacles
                .iter()
                .find(|obstacle| obstacle.threat_level == ThreatLevel::Critical)
                .map(|obstacle| obstacle.id.clone());
            if let Some(obstacle_id) = critical {
                state.flight_mode = FlightMode::Emergency;
                return state.record(
                    DecisionAction::ModeChange { mode: FlightMode::Emergency },
                    self.confidence(state, 95),
                    DecisionPriority::Critical,
                    format!("critical obstacle {obstacle_id} observed"),
                );
            }
        }

        match state.flight_mode {
            FlightMode::Emergency => state.record(
                DecisionAction::Hold,
                self.confidence(state, 90),
                DecisionPriority::Critical,
                "emergency mode: holding for response",
            ),
            FlightMode::Manual => {
                let suggested_heading_deg = route
                    .current_target()
                    .map(|target| bearing_deg(state.position, target.point()))
                    .unwrap_or(state.heading_deg);
                let confidence = self.confidence(state, 0);
                state.record(
                    DecisionAction::DeferToOperator { suggested_heading_deg },
                    confidence,
                    DecisionPriority::Routine,
                    "manual mode: advisory only",
                )
            }
            FlightMode::Auto => self.auto_decision(state, route),
        }
    }

    fn auto_decision(&self, state: &mut NavigationState, route: &mut Route) -> Decision {
        if route.status != RouteStatus::Active {
            let confidence = self.confidence(state, 0);
            return state.record(
                DecisionAction::Hold,
                confidence,
                DecisionPriority::High,
                format!("route is {}", route.status.as_str()),
            );
        }

        let Some(target) = route.current_target().copied() else {
            let confidence = self.confidence(state, 10);
            return state.record(
                DecisionAction::ArriveDestination,
                confidence,
                DecisionPriority::Routine,
                "all waypoints reached",
            );
        };

        let to_target_m = distance_between(state.position, target.point());
        if to_target_m <= self.config.arrival_radius_m {
            let confidence = self.confidence(state, 10);
            if route.is_final_leg() {
                route.advance_waypoint();
                return state.record(
                    DecisionAction::ArriveDestination,
                    confidence,
                    DecisionPriority::Routine,
                    format!("destination within {:.0}m", to_target_m),
                );
            }
            route.advance_waypoint();
            return state.record(
                DecisionAction::AdvanceWaypoint { index: route.next_waypoint },
                confidence,
                DecisionPriority::Routine,
                format!("waypoint reached ({:.0}m)", to_target_m),
            );
        }

        if let Some(blocking) = self.blocking_obstacle(state, target.point()) {
            let detour = self.detour_waypoint(state.position, &target, &blocking, route.cruise_altitude_m);
            if route.insert_detour(detour) {
                let confidence = self.confidence(state, -10);
                return state.record(
                    DecisionAction::Reroute { detour },
                    confidence,
                    DecisionPriority::High,
                    format!("obstacle {} blocks leg", blocking.id),
                );
            }
        }

        if state.environment.wind_speed_kmh > self.config.high_wind_kmh {
            let cruise = target.speed_mps.unwrap_or(state.speed_mps);
            let target_mps = cruise * self.config.high_wind_speed_factor;
            if state.speed_mps > target_mps + 0.1 {
                let confidence = self.confidence(state, -5);
                return state.record(
                    DecisionAction::AdjustSpeed { target_mps },
                    confidence,
                    DecisionPriority::Routine,
                    format!("wind {:.0}km/h", state.environment.wind_speed_kmh),
                );
            }
        }

        if state.environment.visibility() < self.config.low_visibility_percent {
            let target_m = (route.cruise_altitude_m - self.config.low_visibility_descent_m)
                .max(self.rules.min_altitude_m);
            if state.altitude_m > target_m + 1.0 {
                let confidence = self.confidence(state, -5);
                return state.record(
                    DecisionAction::AdjustAltitude { target_m },
                    confidence,
                    DecisionPriority::Routine,
                    format!("visibility {}%", state.environment.visibility()),
                );
            }
        }

        let heading_deg = bearing_deg(state.position, target.point());
        let confidence = self.confidence(state, 5);
        state.record(
            DecisionAction::Continue { heading_deg },
            confidence,
            DecisionPriority::Routine,
            format!("{:.0}m to waypoint {}", to_target_m, route.next_waypoint),
        )
    }

    /// Hold position while the flight has lost its airspace clearance.
    /// Critical obstacles and manual control are still handled as usual.
    pub fn hold_for_clearance(
        &self,
        state: &mut NavigationState,
        route: &mut Route,
        reason: impl Into<String>,
    ) -> Decision {
        let critical = state
            .obstacles
            .iter()
            .any(|obstacle| obstacle.threat_level == ThreatLevel::Critical);
        if state.flight_mode != FlightMode::Auto || critical {
            return self.make_autonomous_decision(state, route);
        }
        let confidence = self.confidence(state, 0);
        state.record(DecisionAction::Hold, confidence, DecisionPriority::High, reason)
    }

    /// Respond to a single obstacle according to its threat level.
    pub fn execute_obstacle_avoidance(
        &self,
        state: &mut NavigationState,
        route: &mut Route,
        obstacle: &Obstacle,
    ) -> AvoidanceOutcome {
        state.observe(obstacle);

        let decision = match obstacle.threat_level {
            ThreatLevel::Negligible | ThreatLevel::Low => {
                let relative = normalize_heading(bearing_deg(state.position, obstacle.position) - state.heading_deg);
                // Obstacle to the right: turn left, and vice versa
                let heading_deg = if relative < 180.0 {
                    normalize_heading(state.heading_deg - self.config.nudge_heading_deg)
                } else {
                    normalize_heading(state.heading_deg + self.config.nudge_heading_deg)
                };
                let confidence = self.confidence(state, 5);
                state.record(
                    DecisionAction::Nudge { heading_deg },
                    confidence,
                    DecisionPriority::Routine,
                    format!("minor obstacle {}", obstacle.id),
                )
            }
            ThreatLevel::Elevated => {
                let detour = route
                    .current_target()
                    .copied()
                    .map(|target| self.detour_waypoint(state.position, &target, obstacle, route.cruise_altitude_m));
                match detour {
                    Some(detour) if route.insert_detour(detour) => {
                        let confidence = self.confidence(state, -10);
                        state.record(
                            DecisionAction::Reroute { detour },
                            confidence,
                            DecisionPriority::High,
                            format!("rerouting around obstacle {}", obstacle.id),
                        )
                    }
                    _ => {
                        let confidence = self.confidence(state, -20);
                        state.record(
                            DecisionAction::Hold,
                            confidence,
                            DecisionPriority::High,
                            format!("no reroute possible around obstacle {}", obstacle.id),
                        )
                    }
                }
            }
            ThreatLevel::Critical => {
                state.flight_mode = FlightMode::Emergency;
                let confidence = self.confidence(state, 95);
                state.record(
                    DecisionAction::Hold,
                    confidence,
                    DecisionPriority::Critical,
                    format!("critical obstacle {}: emergency hold", obstacle.id),
                )
            }
        };

        AvoidanceOutcome {
            decision,
            flight_mode: state.flight_mode,
            requires_emergency_response: obstacle.threat_level == ThreatLevel::Critical,
        }
    }

    /// Leave emergency mode. Critical obstacles are considered resolved and
    /// dropped from the observed list.
    pub fn recover_flight_mode(
        &self,
        state: &mut NavigationState,
        authority: &Authority,
        mode: RecoveryMode,
    ) -> Result<Decision> {
        authority.require_fleet_control("recover flight mode")?;
        if state.flight_mode != FlightMode::Emergency {
            return Err(StateError::NotInEmergency {
                agent_id: state.agent_id.clone(),
            }
            .into());
        }

        state
            .obstacles
            .retain(|obstacle| obstacle.threat_level != ThreatLevel::Critical);
        state.flight_mode = mode.into();
        let confidence = self.confidence(state, 0);
        Ok(state.record(
            DecisionAction::ModeChange { mode: state.flight_mode },
            confidence,
            DecisionPriority::High,
            format!("recovered by {}", authority.caller_id),
        ))
    }

    /// Switch between `Auto` and `Manual`. Refused while in emergency.
    pub fn set_manual_control(
        &self,
        state: &mut NavigationState,
        authority: &Authority,
        manual: bool,
    ) -> Result<Decision> {
        authority.require_fleet_control("change flight mode")?;
        if state.flight_mode == FlightMode::Emergency {
            return Err(StateError::EmergencyLocked {
                agent_id: state.agent_id.clone(),
            }
            .into());
        }

        state.flight_mode = if manual { FlightMode::Manual } else { FlightMode::Auto };
        let confidence = self.confidence(state, 0);
        Ok(state.record(
            DecisionAction::ModeChange { mode: state.flight_mode },
            confidence,
            DecisionPriority::Routine,
            format!("set by {}", authority.caller_id),
        ))
    }

    /// Move the route to its terminal status and archive the state.
    pub fn finish_navigation(
        &self,
        state: NavigationState,
        route: &mut Route,
        completed: bool,
    ) -> Result<NavigationSummary> {
        if completed {
            route.complete()?;
        } else {
            route.abort()?;
        }

        let entered_emergency = state.flight_mode == FlightMode::Emergency
            || state
                .decisions
                .iter()
                .any(|decision| decision.priority == DecisionPriority::Critical);

        Ok(NavigationSummary {
            agent_id: state.agent_id,
            route_hash: state.route_hash,
            final_status: route.status,
            final_position: state.position,
            decision_count: state.decision_count,
            obstacles_encountered: state.obstacles.len(),
            decisions: state.decisions,
            entered_emergency,
        })
    }

    /// Nearest obstacle of elevated threat whose footprint touches the leg
    /// from the current position to `target`.
    fn blocking_obstacle(&self, state: &NavigationState, target: GeoPoint) -> Option<Obstacle> {
        state
            .obstacles
            .iter()
            .filter(|obstacle| obstacle.threat_level == ThreatLevel::Elevated)
            .filter(|obstacle| distance_between(state.position, obstacle.position) <= self.config.lookahead_m)
            .filter(|obstacle| {
                spatial::distance_to_segment_m(obstacle.position, state.position, target)
                    < obstacle.radius_m + self.config.detour_clearance_m
            })
            .min_by(|a, b| {
                distance_between(state.position, a.position)
                    .total_cmp(&distance_between(state.position, b.position))
            })
            .cloned()
    }

    fn detour_waypoint(&self, from: GeoPoint, target: &Waypoint, obstacle: &Obstacle, altitude_m: f64) -> Waypoint {
        let point = detour_around(
            from,
            target.point(),
            obstacle.position,
            obstacle.radius_m,
            self.config.detour_clearance_m,
        );
        Waypoint {
            speed_mps: target.speed_mps,
            ..Waypoint::at(point, altitude_m)
        }
    }

    /// Confidence from autonomy and conditions, shifted by `adjust`.
    fn confidence(&self, state: &NavigationState, adjust: i32) -> u8 {
        let env = &state.environment;
        let base = 50 + i32::from(state.autonomy_level.min(100)) / 2;
        let visibility_loss = i32::from(100 - env.visibility()) / 4;
        let weather_loss = i32::from(env.weather_severity()) * 5;
        let clutter_loss = (state.obstacles.len() as i32 * 5).min(25);

        let raw = base - visibility_loss - weather_loss - clutter_loss + adjust;
        raw.clamp(i32::from(self.config.min_confidence), 100) as u8
    }
}
