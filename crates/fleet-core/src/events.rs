//! Structured events emitted for the external observability pipeline.
//!
//! The core only emits; it never persists or replays events.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::emergency::ResponseType;
use crate::load_balancer::BalancingAlgorithm;
use crate::models::PriorityTier;
use crate::navigation::FlightMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FleetEvent {
    RouteCalculated {
        agent_id: String,
        route_hash: u64,
        distance_m: f64,
        estimated_time_ms: u64,
        optimization_score: f64,
    },
    ObstacleAvoided {
        agent_id: String,
        route_hash: u64,
        obstacle_id: String,
        threat_level: u8,
        action: String,
        flight_mode: FlightMode,
    },
    AirspaceReserved {
        slot_id: u64,
        agent_id: String,
        route_hash: u64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        floor_m: f64,
        ceiling_m: f64,
        priority: PriorityTier,
        /// True when the slot was booked into a fallback window
        rescheduled: bool,
    },
    AirspaceSuperseded {
        slot_id: u64,
        agent_id: String,
        superseded_by: u64,
        rebooked_as: Option<u64>,
    },
    EmergencyDispatched {
        response_id: String,
        emergency_id: String,
        responders: Vec<String>,
        response_type: ResponseType,
        estimated_success_rate: u8,
    },
    EmergencyResolved {
        response_id: String,
        emergency_id: String,
        success: bool,
        success_rate: u8,
        actual_response_time_ms: u64,
    },
    WorkloadRebalanced {
        algorithm: BalancingAlgorithm,
        assigned_orders: usize,
        pending_orders: usize,
        efficiency_score: f64,
    },
}

impl FleetEvent {
    pub fn name(&self) -> &'static str {
        match self {
            FleetEvent::RouteCalculated { .. } => "route_calculated",
            FleetEvent::ObstacleAvoided { .. } => "obstacle_avoided",
            FleetEvent::AirspaceReserved { .. } => "airspace_reserved",
            FleetEvent::AirspaceSuperseded { .. } => "airspace_superseded",
            FleetEvent::EmergencyDispatched { .. } => "emergency_dispatched",
            FleetEvent::EmergencyResolved { .. } => "emergency_resolved",
            FleetEvent::WorkloadRebalanced { .. } => "workload_rebalanced",
        }
    }
}

/// Destination for emitted events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: FleetEvent);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: FleetEvent) {}
}

/// Keeps events in memory, for tests and offline runs.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<FleetEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FleetEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|event| event.name() == name)
            .count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: FleetEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = FleetEvent::EmergencyResolved {
            response_id: "resp-1".into(),
            emergency_id: "em-1".into(),
            success: true,
            success_rate: 100,
            actual_response_time_ms: 42_000,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "EMERGENCY_RESOLVED");
        assert_eq!(json["success_rate"], 100);
    }

    #[test]
    fn recording_sink_counts_by_name() {
        let sink = RecordingSink::new();
        sink.emit(FleetEvent::WorkloadRebalanced {
            algorithm: BalancingAlgorithm::RoundRobin,
            assigned_orders: 3,
            pending_orders: 0,
            efficiency_score: 100.0,
        });
        assert_eq!(sink.count("workload_rebalanced"), 1);
        assert_eq!(sink.count("route_calculated"), 0);
    }
}
