//! Core data models shared by the coordination components.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StateError, ValidationError};
use crate::spatial;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lon)
    }
}

// ========== EXTERNAL SNAPSHOTS ==========

/// Capability snapshot of a delivery agent, supplied by the drone registry.
///
/// The core never mutates a snapshot; it only validates requests against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: String,
    /// Autonomy level, 0-100
    pub autonomy_level: u8,
    /// Remaining battery, 0-100
    pub battery_percent: u8,
    pub payload_capacity_kg: f64,
    pub max_range_m: f64,
    /// Current position as a "lat,lon" string
    pub position: String,
}

impl AgentSnapshot {
    /// Parse the reported position.
    pub fn position_point(&self) -> Result<GeoPoint, ValidationError> {
        spatial::parse_coordinates("agent.position", &self.position)
    }
}

/// A circular restricted area reported by the environment feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoFlyZone {
    pub id: String,
    pub center: GeoPoint,
    pub radius_m: f64,
    /// Lower altitude limit in meters (floor)
    #[serde(default)]
    pub floor_m: f64,
    /// Upper altitude limit in meters (ceiling)
    #[serde(default = "default_zone_ceiling")]
    pub ceiling_m: f64,
}

fn default_zone_ceiling() -> f64 {
    10_000.0
}

impl NoFlyZone {
    pub fn contains(&self, point: GeoPoint, altitude_m: f64) -> bool {
        if altitude_m < self.floor_m || altitude_m > self.ceiling_m {
            return false;
        }
        spatial::distance_between(self.center, point) <= self.radius_m
    }

    /// Whether a straight leg at `altitude_m` passes within `clearance_m` of
    /// the zone boundary.
    pub fn intersects_leg(&self, from: GeoPoint, to: GeoPoint, altitude_m: f64, clearance_m: f64) -> bool {
        if altitude_m < self.floor_m || altitude_m > self.ceiling_m {
            return false;
        }
        spatial::distance_to_segment_m(self.center, from, to) < self.radius_m + clearance_m.max(0.0)
    }
}

/// Environmental conditions at planning/flight time. Immutable per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    /// Weather severity: 0 = clear, 1 = cloudy, 2 = rain, 3 = heavy rain, 4 = storm
    pub weather_code: u8,
    /// Visibility, 0-100
    pub visibility_percent: u8,
    pub wind_speed_kmh: f64,
    pub temperature_c: f64,
    /// Air-traffic density, 0-100
    #[serde(default)]
    pub traffic_density: u8,
    #[serde(default)]
    pub no_fly_zones: Vec<NoFlyZone>,
}

impl EnvironmentSnapshot {
    pub const MAX_WEATHER_SEVERITY: u8 = 4;

    /// Calm, clear conditions with no restrictions.
    pub fn clear() -> Self {
        Self {
            weather_code: 0,
            visibility_percent: 100,
            wind_speed_kmh: 0.0,
            temperature_c: 20.0,
            traffic_density: 0,
            no_fly_zones: Vec::new(),
        }
    }

    pub fn weather_severity(&self) -> u8 {
        self.weather_code.min(Self::MAX_WEATHER_SEVERITY)
    }

    pub fn visibility(&self) -> u8 {
        self.visibility_percent.min(100)
    }

    pub fn traffic(&self) -> u8 {
        self.traffic_density.min(100)
    }

    /// First no-fly zone containing the point, if any.
    pub fn no_fly_zone_at(&self, point: GeoPoint, altitude_m: f64) -> Option<&NoFlyZone> {
        self.no_fly_zones
            .iter()
            .find(|zone| zone.contains(point, altitude_m))
    }
}

// ========== ROUTES ==========

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lon: f64,
    pub altitude_m: f64,
    #[serde(default)]
    pub speed_mps: Option<f64>,
}

impl Waypoint {
    pub fn at(point: GeoPoint, altitude_m: f64) -> Self {
        Self {
            lat: point.lat,
            lon: point.lon,
            altitude_m,
            speed_mps: None,
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteStatus {
    /// Computed, not yet flown
    Planned,
    /// Currently being flown
    Active,
    /// Destination reached
    Completed,
    /// Flight ended before reaching the destination
    Aborted,
}

impl RouteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteStatus::Planned => "planned",
            RouteStatus::Active => "active",
            RouteStatus::Completed => "completed",
            RouteStatus::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RouteStatus::Completed | RouteStatus::Aborted)
    }
}

/// A scored path between two coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Stable reference used by airspace slots
    pub route_hash: u64,
    pub agent_id: String,
    pub origin: String,
    pub destination: String,
    pub waypoints: Vec<Waypoint>,
    /// Index of the waypoint currently being flown towards
    pub next_waypoint: usize,
    pub distance_m: f64,
    pub estimated_time_ms: u64,
    pub estimated_energy_wh: f64,
    /// 0-100, higher is better
    pub optimization_score: f64,
    pub cruise_altitude_m: f64,
    pub status: RouteStatus,
}

impl Route {
    pub fn compute_hash(agent_id: &str, origin: &str, destination: &str, waypoints: &[Waypoint]) -> u64 {
        let mut hasher = DefaultHasher::new();
        agent_id.hash(&mut hasher);
        origin.hash(&mut hasher);
        destination.hash(&mut hasher);
        for wp in waypoints {
            wp.lat.to_bits().hash(&mut hasher);
            wp.lon.to_bits().hash(&mut hasher);
            wp.altitude_m.to_bits().hash(&mut hasher);
        }
        hasher.finish()
    }

    pub fn activate(&mut self) -> Result<(), StateError> {
        self.transition(RouteStatus::Active)
    }

    pub fn complete(&mut self) -> Result<(), StateError> {
        self.transition(RouteStatus::Completed)
    }

    pub fn abort(&mut self) -> Result<(), StateError> {
        self.transition(RouteStatus::Aborted)
    }

    fn transition(&mut self, to: RouteStatus) -> Result<(), StateError> {
        let allowed = matches!(
            (self.status, to),
            (RouteStatus::Planned, RouteStatus::Active)
                | (RouteStatus::Active, RouteStatus::Completed)
                | (RouteStatus::Active, RouteStatus::Aborted)
        );
        if !allowed {
            return Err(StateError::InvalidRouteTransition {
                route_hash: self.route_hash,
                from: self.status.as_str(),
                to: to.as_str(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// Waypoint currently being flown towards.
    pub fn current_target(&self) -> Option<&Waypoint> {
        self.waypoints.get(self.next_waypoint)
    }

    pub fn remaining_waypoints(&self) -> &[Waypoint] {
        self.waypoints.get(self.next_waypoint..).unwrap_or(&[])
    }

    /// Move the cursor to the next waypoint. Returns false once the final
    /// waypoint has already been reached.
    pub fn advance_waypoint(&mut self) -> bool {
        if self.next_waypoint < self.waypoints.len() {
            self.next_waypoint += 1;
        }
        self.next_waypoint < self.waypoints.len()
    }

    pub fn is_final_leg(&self) -> bool {
        self.next_waypoint + 1 >= self.waypoints.len()
    }

    /// Insert a waypoint ahead of the current target. Only an active route's
    /// remaining waypoints can be changed.
    pub fn insert_detour(&mut self, waypoint: Waypoint) -> bool {
        if self.status != RouteStatus::Active || self.next_waypoint > self.waypoints.len() {
            return false;
        }
        self.waypoints.insert(self.next_waypoint, waypoint);
        true
    }
}

// ========== AIRSPACE PRIMITIVES ==========

/// Vertical extent of a slot, half-open: `[floor_m, ceiling_m)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AltitudeRange {
    pub floor_m: f64,
    pub ceiling_m: f64,
}

impl AltitudeRange {
    pub fn new(floor_m: f64, ceiling_m: f64) -> Self {
        Self { floor_m, ceiling_m }
    }

    pub fn validate(&self, max_altitude_m: f64) -> Result<(), ValidationError> {
        let valid = self.floor_m.is_finite()
            && self.ceiling_m.is_finite()
            && self.floor_m >= 0.0
            && self.floor_m < self.ceiling_m
            && self.ceiling_m <= max_altitude_m;
        if valid {
            Ok(())
        } else {
            Err(ValidationError::InvalidAltitudeRange {
                floor_m: self.floor_m,
                ceiling_m: self.ceiling_m,
                max_m: max_altitude_m,
            })
        }
    }

    pub fn overlaps(&self, other: &AltitudeRange, buffer_m: f64) -> bool {
        spatial::ranges_overlap(self.floor_m, self.ceiling_m, other.floor_m, other.ceiling_m, buffer_m)
    }
}

/// Half-open time window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn starting_at(start: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            start,
            end: start + duration,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.start < self.end {
            Ok(())
        } else {
            Err(ValidationError::InvalidTimeWindow {
                start: self.start,
                end: self.end,
            })
        }
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityTier {
    Low,
    Normal,
    High,
    /// Emergency response traffic
    Emergency,
}
