//! Error types for the coordination core.
//!
//! Every operation returns a typed [`FleetError`]; nothing in the core panics
//! on bad input. Errors are grouped by how a caller is expected to react:
//! validation and resource errors are terminal for the call, conflicts can be
//! retried with a different window, and state errors indicate a programming
//! mistake on the caller's side.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::PriorityTier;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, FleetError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FleetError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Authority(#[from] AuthorityError),
}

impl FleetError {
    /// Conflicts are the only failures a caller can resolve by retrying with
    /// a different time or altitude window.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FleetError::Conflict(_))
    }

    /// Short machine-readable category label.
    pub fn kind(&self) -> &'static str {
        match self {
            FleetError::Validation(_) => "validation",
            FleetError::Resource(_) => "resource",
            FleetError::Conflict(_) => "conflict",
            FleetError::NotFound(_) => "not_found",
            FleetError::State(_) => "state",
            FleetError::Authority(_) => "authority",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("invalid coordinates for {field}: {value:?}")]
    InvalidCoordinates { field: &'static str, value: String },

    #[error("invalid altitude range: floor {floor_m}m must be below ceiling {ceiling_m}m within [0, {max_m}]m")]
    InvalidAltitudeRange {
        floor_m: f64,
        ceiling_m: f64,
        max_m: f64,
    },

    #[error("invalid time window: start {start} must be before end {end}")]
    InvalidTimeWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("invalid weight {field}={value}, expected a percentage in [0, 100]")]
    InvalidWeight { field: &'static str, value: u8 },

    #[error("agent {agent_id} is already registered")]
    DuplicateAgent { agent_id: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResourceError {
    #[error("agent {agent_id} battery {battery_percent}% is below the {required_percent}% safety threshold")]
    InsufficientBattery {
        agent_id: String,
        battery_percent: u8,
        required_percent: u8,
    },

    #[error("agent {agent_id} cannot fly {distance_m:.0}m (max range {max_range_m:.0}m)")]
    MaxRangeExceeded {
        agent_id: String,
        distance_m: f64,
        max_range_m: f64,
    },

    #[error("agent {agent_id} has no path around no-fly zone {zone_id}")]
    NoFlyZoneBlocked { agent_id: String, zone_id: String },

    #[error("airspace at capacity ({active} active slots, limit {capacity})")]
    AirspaceAtCapacity { active: usize, capacity: usize },
}

/// An airspace overlap that priority resolution could not settle.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("airspace conflict with slot {conflicting_slot_id} held by {conflicting_agent_id} ({conflicting_priority:?}) until {conflicting_end}")]
pub struct ConflictError {
    pub conflicting_slot_id: u64,
    pub conflicting_agent_id: String,
    pub conflicting_priority: PriorityTier,
    pub conflicting_end: DateTime<Utc>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotFoundError {
    #[error("no available responders for emergency {emergency_id}")]
    NoAvailableResponders { emergency_id: String },

    #[error("airspace slot {0} not found")]
    Slot(u64),

    #[error("emergency response {0} not found")]
    Response(String),

    #[error("emergency {0} not found")]
    Emergency(String),

    #[error("agent {0} not registered")]
    Agent(String),

    #[error("flight session {0} not found")]
    Flight(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("route {route_hash:016x} cannot move from {from} to {to}")]
    InvalidRouteTransition {
        route_hash: u64,
        from: &'static str,
        to: &'static str,
    },

    #[error("emergency response {response_id} was already finalized")]
    ResponseAlreadyFinalized { response_id: String },

    #[error("emergency {emergency_id} is already {status}")]
    EmergencyNotOpen {
        emergency_id: String,
        status: &'static str,
    },

    #[error("flight {agent_id} is not in emergency mode")]
    NotInEmergency { agent_id: String },

    #[error("flight {agent_id} is in emergency mode and must be recovered first")]
    EmergencyLocked { agent_id: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{caller_id} ({role:?}) is not allowed to {operation}")]
pub struct AuthorityError {
    pub caller_id: String,
    pub role: crate::authority::Role,
    pub operation: &'static str,
}
