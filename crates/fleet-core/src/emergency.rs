//! Emergency response dispatch.
//!
//! Matches available agents to distress requests and tracks each dispatched
//! response until it is finalized. A response is finalized exactly once; a
//! failed response reopens its request so it can be dispatched again.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{NotFoundError, Result, StateError};
use crate::events::{EventSink, FleetEvent};
use crate::models::{AgentSnapshot, GeoPoint};
use crate::rules::SafetyRules;
use crate::spatial::distance_between;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistanceType {
    PowerFailure,
    NavigationFailure,
    /// Package must be taken over by another agent
    PayloadRecovery,
    Collision,
    SearchAndRescue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    PowerAssist,
    GuidanceEscort,
    PayloadTransfer,
    CollisionResponse,
    AreaSearch,
}

impl From<AssistanceType> for ResponseType {
    fn from(assistance: AssistanceType) -> Self {
        match assistance {
            AssistanceType::PowerFailure => ResponseType::PowerAssist,
            AssistanceType::NavigationFailure => ResponseType::GuidanceEscort,
            AssistanceType::PayloadRecovery => ResponseType::PayloadTransfer,
            AssistanceType::Collision => ResponseType::CollisionResponse,
            AssistanceType::SearchAndRescue => ResponseType::AreaSearch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    /// Responders wanted before the configured cap is applied.
    pub fn responders_wanted(&self) -> usize {
        match self {
            Urgency::Low | Urgency::Medium => 1,
            Urgency::High => 2,
            Urgency::Critical => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmergencyStatus {
    Open,
    Responding,
    Resolved,
}

impl EmergencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmergencyStatus::Open => "open",
            EmergencyStatus::Responding => "responding",
            EmergencyStatus::Resolved => "resolved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyRequest {
    pub emergency_id: String,
    pub requesting_agent_id: String,
    pub location: GeoPoint,
    pub assistance_type: AssistanceType,
    pub urgency: Urgency,
    pub status: EmergencyStatus,
}

impl EmergencyRequest {
    pub fn new(
        emergency_id: impl Into<String>,
        requesting_agent_id: impl Into<String>,
        location: GeoPoint,
        assistance_type: AssistanceType,
        urgency: Urgency,
    ) -> Self {
        Self {
            emergency_id: emergency_id.into(),
            requesting_agent_id: requesting_agent_id.into(),
            location,
            assistance_type,
            urgency,
            status: EmergencyStatus::Open,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseOutcome {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyResponse {
    pub response_id: String,
    pub emergency_id: String,
    /// Nearest first
    pub responders: Vec<String>,
    pub response_type: ResponseType,
    pub estimated_response_time_ms: u64,
    pub actual_response_time_ms: Option<u64>,
    /// 0-100
    pub success_rate: u8,
    pub outcome: ResponseOutcome,
    pub dispatched_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl EmergencyResponse {
    pub fn is_finalized(&self) -> bool {
        self.outcome != ResponseOutcome::Pending
    }
}

/// Success-rate figures attached to responses.
pub trait SuccessRatePolicy: Send + Sync {
    /// Rate reported at dispatch time.
    fn estimate(&self, request: &EmergencyRequest, responders: &[&AgentSnapshot]) -> u8;

    /// Rate recorded once the outcome is known.
    fn finalize(&self, success: bool) -> u8 {
        if success {
            100
        } else {
            0
        }
    }
}

/// Fixed estimate regardless of request or responders.
#[derive(Debug, Clone, Copy)]
pub struct BaselinePolicy {
    pub baseline_percent: u8,
}

impl Default for BaselinePolicy {
    fn default() -> Self {
        Self { baseline_percent: 85 }
    }
}

impl SuccessRatePolicy for BaselinePolicy {
    fn estimate(&self, _request: &EmergencyRequest, _responders: &[&AgentSnapshot]) -> u8 {
        self.baseline_percent.min(100)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyConfig {
    pub max_responders: usize,
    pub responder_speed_kmh: f64,
    /// Fixed time to launch a responder
    pub dispatch_overhead_ms: u64,
    /// Finalized responses are dropped this long after their outcome
    pub retention_secs: i64,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            max_responders: 3,
            responder_speed_kmh: 15.0,
            dispatch_overhead_ms: 30_000,
            retention_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyStats {
    pub total_dispatched: u64,
    pub successful_responses: u64,
    pub failed_responses: u64,
    pub pending_responses: usize,
}

pub struct EmergencyCoordinator {
    config: EmergencyConfig,
    rules: SafetyRules,
    policy: Box<dyn SuccessRatePolicy>,
    requests: HashMap<String, EmergencyRequest>,
    responses: HashMap<String, EmergencyResponse>,
    next_response_seq: u64,
    stats: EmergencyStats,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl EmergencyCoordinator {
    pub fn new(config: EmergencyConfig, events: Arc<dyn EventSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            rules: SafetyRules::default(),
            policy: Box::new(BaselinePolicy::default()),
            requests: HashMap::new(),
            responses: HashMap::new(),
            next_response_seq: 1,
            stats: EmergencyStats::default(),
            events,
            clock,
        }
    }

    pub fn with_policy(mut self, policy: impl SuccessRatePolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn with_rules(mut self, rules: SafetyRules) -> Self {
        self.rules = rules;
        self
    }

    /// Dispatch responders to `request` from `available_agents`.
    ///
    /// Nothing is recorded unless a response is actually created.
    pub fn coordinate_emergency_response(
        &mut self,
        request: EmergencyRequest,
        available_agents: &[AgentSnapshot],
    ) -> Result<EmergencyResponse> {
        if available_agents.is_empty() {
            return Err(NotFoundError::NoAvailableResponders {
                emergency_id: request.emergency_id,
            }
            .into());
        }

        if let Some(known) = self.requests.get(&request.emergency_id) {
            if known.status != EmergencyStatus::Open {
                return Err(StateError::EmergencyNotOpen {
                    emergency_id: request.emergency_id,
                    status: known.status.as_str(),
                }
                .into());
            }
        }

        let busy: Vec<&str> = self
            .responses
            .values()
            .filter(|response| !response.is_finalized())
            .flat_map(|response| response.responders.iter().map(String::as_str))
            .collect();

        let floor = self.rules.responder_battery_floor_percent;
        let mut candidates: Vec<(f64, &AgentSnapshot)> = available_agents
            .iter()
            .filter(|agent| agent.id != request.requesting_agent_id)
            .filter(|agent| agent.battery_percent >= floor)
            .filter(|agent| !busy.contains(&agent.id.as_str()))
            .filter_map(|agent| {
                let position = agent.position_point().ok()?;
                Some((distance_between(position, request.location), agent))
            })
            .collect();

        if candidates.is_empty() {
            tracing::warn!(
                "No eligible responders for emergency {} ({} offered)",
                request.emergency_id,
                available_agents.len()
            );
            return Err(NotFoundError::NoAvailableResponders {
                emergency_id: request.emergency_id,
            }
            .into());
        }

        candidates.sort_by(|(dist_a, a), (dist_b, b)| {
            dist_a
                .total_cmp(dist_b)
                .then_with(|| Reverse(a.battery_percent).cmp(&Reverse(b.battery_percent)))
                .then_with(|| Reverse(a.autonomy_level).cmp(&Reverse(b.autonomy_level)))
        });
        let wanted = request
            .urgency
            .responders_wanted()
            .min(self.config.max_responders.max(1));
        candidates.truncate(wanted);

        let nearest_m = candidates.first().map(|(dist, _)| *dist).unwrap_or(0.0);
        let speed_mps = self.config.responder_speed_kmh.max(0.1) / 3.6;
        let estimated_response_time_ms =
            self.config.dispatch_overhead_ms + (nearest_m / speed_mps * 1000.0).round() as u64;

        let chosen: Vec<&AgentSnapshot> = candidates.iter().map(|(_, agent)| *agent).collect();
        let success_rate = self.policy.estimate(&request, &chosen).min(100);

        let response = EmergencyResponse {
            response_id: format!("RESP-{:06}", self.next_response_seq),
            emergency_id: request.emergency_id.clone(),
            responders: chosen.iter().map(|agent| agent.id.clone()).collect(),
            response_type: request.assistance_type.into(),
            estimated_response_time_ms,
            actual_response_time_ms: None,
            success_rate,
            outcome: ResponseOutcome::Pending,
            dispatched_at: self.clock.now(),
            finalized_at: None,
        };

        self.next_response_seq += 1;
        self.stats.total_dispatched += 1;
        self.stats.pending_responses += 1;
        self.requests.insert(
            request.emergency_id.clone(),
            EmergencyRequest {
                status: EmergencyStatus::Responding,
                ..request
            },
        );
        self.responses
            .insert(response.response_id.clone(), response.clone());

        tracing::info!(
            "Dispatched {} to emergency {} ({:?}, eta {}s): {}",
            response.response_id,
            response.emergency_id,
            response.response_type,
            response.estimated_response_time_ms / 1000,
            response.responders.join(", ")
        );
        self.events.emit(FleetEvent::EmergencyDispatched {
            response_id: response.response_id.clone(),
            emergency_id: response.emergency_id.clone(),
            responders: response.responders.clone(),
            response_type: response.response_type,
            estimated_success_rate: response.success_rate,
        });

        Ok(response)
    }

    /// Record the outcome of a dispatched response.
    pub fn complete_emergency_response(&mut self, response_id: &str, success: bool) -> Result<EmergencyResponse> {
        let now = self.clock.now();
        let response = self
            .responses
            .get_mut(response_id)
            .ok_or_else(|| NotFoundError::Response(response_id.to_string()))?;
        if response.is_finalized() {
            return Err(StateError::ResponseAlreadyFinalized {
                response_id: response_id.to_string(),
            }
            .into());
        }

        let elapsed_ms = (now - response.dispatched_at).num_milliseconds().max(0) as u64;
        response.outcome = if success {
            ResponseOutcome::Succeeded
        } else {
            ResponseOutcome::Failed
        };
        response.success_rate = self.policy.finalize(success).min(100);
        response.actual_response_time_ms = Some(elapsed_ms);
        response.finalized_at = Some(now);
        let response = response.clone();

        self.stats.pending_responses = self.stats.pending_responses.saturating_sub(1);
        if success {
            self.stats.successful_responses += 1;
        } else {
            self.stats.failed_responses += 1;
        }

        if let Some(request) = self.requests.get_mut(&response.emergency_id) {
            request.status = if success {
                EmergencyStatus::Resolved
            } else {
                EmergencyStatus::Open
            };
        }

        if success {
            tracing::info!("Emergency {} resolved by {}", response.emergency_id, response.response_id);
        } else {
            tracing::warn!(
                "Response {} failed; emergency {} reopened",
                response.response_id,
                response.emergency_id
            );
        }
        self.events.emit(FleetEvent::EmergencyResolved {
            response_id: response.response_id.clone(),
            emergency_id: response.emergency_id.clone(),
            success,
            success_rate: response.success_rate,
            actual_response_time_ms: elapsed_ms,
        });

        Ok(response)
    }

    pub fn request(&self, emergency_id: &str) -> Option<&EmergencyRequest> {
        self.requests.get(emergency_id)
    }

    pub fn response(&self, response_id: &str) -> Option<&EmergencyResponse> {
        self.responses.get(response_id)
    }

    /// Responses still awaiting an outcome, oldest first.
    pub fn pending_responses(&self) -> Vec<&EmergencyResponse> {
        let mut pending: Vec<&EmergencyResponse> = self
            .responses
            .values()
            .filter(|response| !response.is_finalized())
            .collect();
        pending.sort_by(|a, b| a.dispatched_at.cmp(&b.dispatched_at).then_with(|| a.response_id.cmp(&b.response_id)));
        pending
    }

    pub fn stats(&self) -> EmergencyStats {
        self.stats
    }

    /// Drop responses finalized before the retention period, then resolved
    /// requests with no response left. Open requests are kept so they can be
    /// dispatched again. Returns the number of responses dropped.
    pub fn prune_finalized(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::seconds(self.config.retention_secs.max(0));
        let before = self.responses.len();
        self.responses
            .retain(|_, response| response.finalized_at.map_or(true, |at| at > cutoff));
        let pruned = before - self.responses.len();

        let responses = &self.responses;
        self.requests.retain(|emergency_id, request| {
            request.status != EmergencyStatus::Resolved
                || responses.values().any(|response| &response.emergency_id == emergency_id)
        });

        if pruned > 0 {
            tracing::debug!("Pruned {} finalized emergency response(s)", pruned);
        }
        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::FleetError;
    use crate::events::{NoopSink, RecordingSink};
    use chrono::Duration;

    const SCENE: GeoPoint = GeoPoint {
        lat: 37.7749,
        lon: -122.4194,
    };

    fn responder(id: &str, meters_north: f64, battery: u8, autonomy: u8) -> AgentSnapshot {
        let position = crate::spatial::offset_point(SCENE, meters_north, 0.0);
        AgentSnapshot {
            id: id.into(),
            autonomy_level: autonomy,
            battery_percent: battery,
            payload_capacity_kg: 2.0,
            max_range_m: 15_000.0,
            position: position.to_string(),
        }
    }

    fn setup() -> (EmergencyCoordinator, Arc<RecordingSink>, Arc<ManualClock>) {
        let sink = Arc::new(RecordingSink::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let coordinator = EmergencyCoordinator::new(EmergencyConfig::default(), sink.clone(), clock.clone());
        (coordinator, sink, clock)
    }

    fn request(id: &str, urgency: Urgency) -> EmergencyRequest {
        EmergencyRequest::new(id, "DRONE-DOWN", SCENE, AssistanceType::PowerFailure, urgency)
    }

    fn fleet() -> Vec<AgentSnapshot> {
        vec![
            responder("DRONE-DOWN", 0.0, 5, 90),
            responder("FAR", 3_000.0, 95, 90),
            responder("NEAR", 200.0, 60, 50),
            responder("LOW-BATT", 50.0, 20, 90),
            responder("MID", 800.0, 80, 70),
        ]
    }

    #[test]
    fn empty_agent_list_changes_nothing() {
        let (mut emergency, sink, _) = setup();
        let before = emergency.stats();
        let err = emergency
            .coordinate_emergency_response(request("EM-1", Urgency::Critical), &[])
            .unwrap_err();
        assert!(matches!(err, FleetError::NotFound(NotFoundError::NoAvailableResponders { .. })));
        assert_eq!(emergency.stats(), before);
        assert!(emergency.request("EM-1").is_none());
        assert!(sink.events().is_empty());
    }

    #[test]
    fn requester_and_low_battery_agents_are_never_dispatched() {
        let (mut emergency, _, _) = setup();
        let only_ineligible = vec![responder("DRONE-DOWN", 0.0, 90, 90), responder("LOW-BATT", 50.0, 39, 90)];
        let err = emergency
            .coordinate_emergency_response(request("EM-1", Urgency::High), &only_ineligible)
            .unwrap_err();
        assert!(matches!(err, FleetError::NotFound(NotFoundError::NoAvailableResponders { .. })));
        assert_eq!(emergency.stats().total_dispatched, 0);
    }

    #[test]
    fn responders_ordered_by_proximity_and_sized_by_urgency() {
        let (mut emergency, sink, _) = setup();
        let low = emergency
            .coordinate_emergency_response(request("EM-1", Urgency::Low), &fleet())
            .unwrap();
        assert_eq!(low.responders, vec!["NEAR"]);
        assert_eq!(low.success_rate, 85);
        assert_eq!(low.response_type, ResponseType::PowerAssist);
        assert_eq!(low.outcome, ResponseOutcome::Pending);
        assert_eq!(emergency.request("EM-1").map(|r| r.status), Some(EmergencyStatus::Responding));

        let (mut emergency, _, _) = setup();
        let critical = emergency
            .coordinate_emergency_response(request("EM-2", Urgency::Critical), &fleet())
            .unwrap();
        assert_eq!(critical.responders, vec!["NEAR", "MID", "FAR"]);
        assert!(critical.estimated_response_time_ms > EmergencyConfig::default().dispatch_overhead_ms);
        assert_eq!(sink.count("emergency_dispatched"), 1);
    }

    #[test]
    fn ties_break_on_battery_then_autonomy() {
        let (mut emergency, _, _) = setup();
        let agents = vec![
            responder("A", 500.0, 70, 90),
            responder("B", 500.0, 90, 10),
            responder("C", 500.0, 90, 60),
        ];
        let response = emergency
            .coordinate_emergency_response(request("EM-1", Urgency::Critical), &agents)
            .unwrap();
        assert_eq!(response.responders, vec!["C", "B", "A"]);
    }

    #[test]
    fn responder_cap_applies() {
        let mut emergency = EmergencyCoordinator::new(
            EmergencyConfig {
                max_responders: 1,
                ..EmergencyConfig::default()
            },
            Arc::new(NoopSink),
            Arc::new(ManualClock::new(Utc::now())),
        );
        let response = emergency
            .coordinate_emergency_response(request("EM-1", Urgency::Critical), &fleet())
            .unwrap();
        assert_eq!(response.responders.len(), 1);
    }

    #[test]
    fn success_finalizes_once() {
        let (mut emergency, sink, clock) = setup();
        let response = emergency
            .coordinate_emergency_response(request("EM-1", Urgency::High), &fleet())
            .unwrap();
        clock.advance(Duration::seconds(95));

        let done = emergency
            .complete_emergency_response(&response.response_id, true)
            .unwrap();
        assert_eq!(done.success_rate, 100);
        assert_eq!(done.outcome, ResponseOutcome::Succeeded);
        assert_eq!(done.actual_response_time_ms, Some(95_000));
        assert_eq!(emergency.stats().successful_responses, 1);
        assert_eq!(emergency.request("EM-1").map(|r| r.status), Some(EmergencyStatus::Resolved));

        let err = emergency
            .complete_emergency_response(&response.response_id, false)
            .unwrap_err();
        assert!(matches!(err, FleetError::State(StateError::ResponseAlreadyFinalized { .. })));
        assert_eq!(emergency.response(&response.response_id).map(|r| r.success_rate), Some(100));
        assert_eq!(emergency.stats().successful_responses, 1);
        assert_eq!(sink.count("emergency_resolved"), 1);

        let again = emergency.coordinate_emergency_response(request("EM-1", Urgency::High), &fleet());
        assert!(matches!(again, Err(FleetError::State(StateError::EmergencyNotOpen { status: "resolved", .. }))));
    }

    #[test]
    fn failure_reopens_for_redispatch() {
        let (mut emergency, _, _) = setup();
        let first = emergency
            .coordinate_emergency_response(request("EM-1", Urgency::Low), &fleet())
            .unwrap();
        assert!(matches!(
            emergency.coordinate_emergency_response(request("EM-1", Urgency::Low), &fleet()),
            Err(FleetError::State(StateError::EmergencyNotOpen { status: "responding", .. }))
        ));

        let failed = emergency
            .complete_emergency_response(&first.response_id, false)
            .unwrap();
        assert_eq!(failed.success_rate, 0);
        assert_eq!(emergency.stats().successful_responses, 0);
        assert_eq!(emergency.stats().failed_responses, 1);
        assert_eq!(emergency.request("EM-1").map(|r| r.status), Some(EmergencyStatus::Open));

        let second = emergency
            .coordinate_emergency_response(request("EM-1", Urgency::Low), &fleet())
            .unwrap();
        assert_ne!(second.response_id, first.response_id);
        assert_eq!(emergency.stats().total_dispatched, 2);
    }

    #[test]
    fn committed_responders_are_not_double_booked() {
        let (mut emergency, _, _) = setup();
        let first = emergency
            .coordinate_emergency_response(request("EM-1", Urgency::Low), &fleet())
            .unwrap();
        let mut other = request("EM-2", Urgency::Low);
        other.requesting_agent_id = "DRONE-OTHER".into();
        let second = emergency.coordinate_emergency_response(other, &fleet()).unwrap();
        assert_eq!(first.responders, vec!["NEAR"]);
        assert_eq!(second.responders, vec!["MID"]);
        assert_eq!(emergency.pending_responses().len(), 2);
    }

    #[test]
    fn finalized_records_are_pruned_after_retention() {
        let (mut emergency, _, clock) = setup();
        let resolved = emergency
            .coordinate_emergency_response(request("EM-1", Urgency::Low), &fleet())
            .unwrap();
        let failed = emergency
            .coordinate_emergency_response(request("EM-2", Urgency::Low), &fleet())
            .unwrap();
        let pending = emergency
            .coordinate_emergency_response(request("EM-3", Urgency::Low), &fleet())
            .unwrap();
        emergency.complete_emergency_response(&resolved.response_id, true).unwrap();
        emergency.complete_emergency_response(&failed.response_id, false).unwrap();

        clock.advance(Duration::minutes(30));
        assert_eq!(emergency.prune_finalized(clock.now()), 0);
        assert!(emergency.response(&resolved.response_id).is_some());

        clock.advance(Duration::minutes(31));
        assert_eq!(emergency.prune_finalized(clock.now()), 2);
        assert!(emergency.response(&resolved.response_id).is_none());
        assert!(emergency.response(&failed.response_id).is_none());
        assert!(emergency.request("EM-1").is_none());
        assert_eq!(emergency.request("EM-2").unwrap().status, EmergencyStatus::Open);
        assert!(emergency.response(&pending.response_id).is_some());
        assert_eq!(emergency.request("EM-3").unwrap().status, EmergencyStatus::Responding);
        assert_eq!(emergency.stats().total_dispatched, 3);
        assert_eq!(emergency.stats().pending_responses, 1);
    }

    #[test]
    fn unknown_response_is_not_found() {
        let (mut emergency, _, _) = setup();
        assert!(matches!(
            emergency.complete_emergency_response("RESP-404", true),
            Err(FleetError::NotFound(NotFoundError::Response(_)))
        ));
    }

    #[test]
    fn custom_policy_sets_estimates() {
        struct ByResponders;
        impl SuccessRatePolicy for ByResponders {
            fn estimate(&self, _request: &EmergencyRequest, responders: &[&AgentSnapshot]) -> u8 {
                (50 + responders.len() * 15) as u8
            }
        }

        let (emergency, _, _) = setup();
        let mut emergency = emergency.with_policy(ByResponders);
        let response = emergency
            .coordinate_emergency_response(request("EM-1", Urgency::Critical), &fleet())
            .unwrap();
        assert_eq!(response.success_rate, 95);
    }
}
