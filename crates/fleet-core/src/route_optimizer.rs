//! Route optimization under environmental conditions.
//!
//! Pure computation: given an agent snapshot, two coordinates, weights and an
//! environment snapshot, produce a scored [`Route`]. Nothing here touches
//! shared state.

use serde::{Deserialize, Serialize};

use crate::error::{ResourceError, Result, ValidationError};
use crate::models::{AgentSnapshot, EnvironmentSnapshot, GeoPoint, NoFlyZone, Route, RouteStatus, Waypoint};
use crate::rules::SafetyRules;
use crate::spatial::{self, detour_around, path_length_m};

/// Tunable percentages steering the optimizer. Each field is in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationWeights {
    /// Trade energy for speed: 50 flies at nominal cruise, 100 at 1.5x
    pub priority_weight: u8,
    pub energy_efficiency: u8,
    pub safety_margin: u8,
    pub weather_sensitivity: u8,
    pub traffic_avoidance: u8,
    /// Position of the cruise level inside the operating band
    pub altitude_preference: u8,
}

impl Default for OptimizationWeights {
    fn default() -> Self {
        Self {
            priority_weight: 50,
            energy_efficiency: 60,
            safety_margin: 70,
            weather_sensitivity: 80,
            traffic_avoidance: 70,
            altitude_preference: 50,
        }
    }
}

impl OptimizationWeights {
    /// Emergency profile: speed and safety margin over energy efficiency.
    pub fn emergency() -> Self {
        Self {
            priority_weight: 100,
            energy_efficiency: 20,
            safety_margin: 90,
            weather_sensitivity: 80,
            traffic_avoidance: 90,
            altitude_preference: 70,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let fields = [
            ("priority_weight", self.priority_weight),
            ("energy_efficiency", self.energy_efficiency),
            ("safety_margin", self.safety_margin),
            ("weather_sensitivity", self.weather_sensitivity),
            ("traffic_avoidance", self.traffic_avoidance),
            ("altitude_preference", self.altitude_preference),
        ];
        for (field, value) in fields {
            if value > 100 {
                return Err(ValidationError::InvalidWeight { field, value });
            }
        }
        Ok(())
    }
}

fn pct(value: u8) -> f64 {
    f64::from(value.min(100)) / 100.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    pub cruise_speed_kmh: f64,
    /// Planned distance never drops below this; covers departure and approach corridors
    pub min_route_distance_m: f64,
    pub base_wh_per_km: f64,
    pub wh_per_km_per_kg: f64,
    /// Extra energy share when flying outside the comfortable temperature band
    pub thermal_energy_factor: f64,
    pub no_fly_clearance_m: f64,
    pub max_detours: usize,
    // Penalty scales, in score points at 100% weight
    pub weather_penalty_per_level: f64,
    pub visibility_penalty_per_percent: f64,
    pub calm_wind_kmh: f64,
    pub wind_penalty_per_kmh: f64,
    pub traffic_penalty_per_percent: f64,
    pub range_penalty_per_percent: f64,
    pub detour_penalty: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            cruise_speed_kmh: 10.0,
            min_route_distance_m: 5_000.0,
            base_wh_per_km: 20.0,
            wh_per_km_per_kg: 5.0,
            thermal_energy_factor: 0.15,
            no_fly_clearance_m: 50.0,
            max_detours: 8,
            weather_penalty_per_level: 10.0,
            visibility_penalty_per_percent: 0.5,
            calm_wind_kmh: 10.0,
            wind_penalty_per_kmh: 0.5,
            traffic_penalty_per_percent: 0.3,
            range_penalty_per_percent: 0.2,
            detour_penalty: 5.0,
        }
    }
}

/// Per-factor penalties that make up an optimization score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub weather: f64,
    pub visibility: f64,
    pub wind: f64,
    pub traffic: f64,
    pub range: f64,
    pub detours: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RouteOptimizer {
    pub config: OptimizerConfig,
    pub rules: SafetyRules,
}

impl RouteOptimizer {
    pub fn new(config: OptimizerConfig, rules: SafetyRules) -> Self {
        Self { config, rules }
    }

    /// Compute a scored route from `origin` to `destination`.
    ///
    /// Coordinates are validated before the agent's battery, so an empty
    /// coordinate is always reported as [`ValidationError::InvalidCoordinates`].
    pub fn calculate_optimal_route(
        &self,
        agent: &AgentSnapshot,
        origin: &str,
        destination: &str,
        weights: &OptimizationWeights,
        environment: &EnvironmentSnapshot,
    ) -> Result<Route> {
        let from = spatial::parse_coordinates("origin", origin)?;
        let to = spatial::parse_coordinates("destination", destination)?;
        weights.validate()?;

        if !self.rules.battery_ok(agent.battery_percent) {
            return Err(ResourceError::InsufficientBattery {
                agent_id: agent.id.clone(),
                battery_percent: agent.battery_percent,
                required_percent: self.rules.battery_safety_threshold_percent,
            }
            .into());
        }

        let cruise_altitude_m = self.cruise_altitude(weights);
        let clearance_m = self.config.no_fly_clearance_m * (0.5 + pct(weights.safety_margin));
        let (points, detours) = self.plan_path(&agent.id, from, to, cruise_altitude_m, clearance_m, environment)?;

        let distance_m = path_length_m(&points).max(self.config.min_route_distance_m);
        if distance_m > agent.max_range_m {
            return Err(ResourceError::MaxRangeExceeded {
                agent_id: agent.id.clone(),
                distance_m,
                max_range_m: agent.max_range_m,
            }
            .into());
        }

        let speed_mps = self.cruise_speed_mps(weights);
        let estimated_time_ms = (distance_m / speed_mps * 1000.0).round() as u64;
        let estimated_energy_wh = self.estimate_energy_wh(distance_m, agent.payload_capacity_kg, environment);

        let range_usage_percent = (distance_m / agent.max_range_m * 100.0).clamp(0.0, 100.0);
        let breakdown = self.score(environment, weights, range_usage_percent, detours);

        let waypoints: Vec<Waypoint> = points
            .iter()
            .map(|point| Waypoint {
                speed_mps: Some(speed_mps),
                ..Waypoint::at(*point, cruise_altitude_m)
            })
            .collect();

        Ok(Route {
            route_hash: Route::compute_hash(&agent.id, origin, destination, &waypoints),
            agent_id: agent.id.clone(),
            origin: origin.to_string(),
            destination: destination.to_string(),
            waypoints,
            next_waypoint: 1,
            distance_m,
            estimated_time_ms,
            estimated_energy_wh,
            optimization_score: breakdown.score,
            cruise_altitude_m,
            status: RouteStatus::Planned,
        })
    }

    /// Score environmental conditions. Every penalty is monotone in its
    /// factor, so worsening one condition never raises the score.
    pub fn score(
        &self,
        environment: &EnvironmentSnapshot,
        weights: &OptimizationWeights,
        range_usage_percent: f64,
        detours: usize,
    ) -> ScoreBreakdown {
        let cfg = &self.config;

        let weather = f64::from(environment.weather_severity())
            * cfg.weather_penalty_per_level
            * pct(weights.weather_sensitivity);
        let visibility = f64::from(100 - environment.visibility())
            * cfg.visibility_penalty_per_percent
            * pct(weights.safety_margin);
        let wind = (environment.wind_speed_kmh - cfg.calm_wind_kmh).max(0.0)
            * cfg.wind_penalty_per_kmh
            * pct(weights.weather_sensitivity);
        let traffic = f64::from(environment.traffic())
            * cfg.traffic_penalty_per_percent
            * pct(weights.traffic_avoidance);
        let range = range_usage_percent.clamp(0.0, 100.0)
            * cfg.range_penalty_per_percent
            * pct(weights.energy_efficiency);
        let detours = detours as f64 * cfg.detour_penalty * pct(weights.safety_margin);

        let total = weather + visibility + wind + traffic + range + detours;
        let score = if total.is_finite() {
            (100.0 - total).clamp(0.0, 100.0)
        } else {
            0.0
        };

        ScoreBreakdown {
            weather,
            visibility,
            wind,
            traffic,
            range,
            detours,
            score,
        }
    }

    pub fn cruise_speed_mps(&self, weights: &OptimizationWeights) -> f64 {
        let kmh = self.config.cruise_speed_kmh.max(0.1) * (0.5 + pct(weights.priority_weight));
        kmh / 3.6
    }

    fn cruise_altitude(&self, weights: &OptimizationWeights) -> f64 {
        let min = self.rules.min_altitude_m;
        let max = self.rules.max_altitude_m.max(min);
        min + (max - min) * pct(weights.altitude_preference)
    }

    fn estimate_energy_wh(&self, distance_m: f64, payload_kg: f64, environment: &EnvironmentSnapshot) -> f64 {
        let per_km = self.config.base_wh_per_km + payload_kg.max(0.0) * self.config.wh_per_km_per_kg;
        let thermal = if environment.temperature_c < 0.0 || environment.temperature_c > 35.0 {
            1.0 + self.config.thermal_energy_factor
        } else {
            1.0
        };
        distance_m / 1000.0 * per_km * thermal
    }

    /// Straight path with detour points inserted beside any no-fly zone the
    /// path would cross. Zones containing either endpoint cannot be avoided
    /// and are left to the caller. Fails when a leg still crosses a zone
    /// once the detour budget is spent.
    fn plan_path(
        &self,
        agent_id: &str,
        from: GeoPoint,
        to: GeoPoint,
        altitude_m: f64,
        clearance_m: f64,
        environment: &EnvironmentSnapshot,
    ) -> Result<(Vec<GeoPoint>, usize)> {
        let avoidable: Vec<&NoFlyZone> = environment
            .no_fly_zones
            .iter()
            .filter(|zone| !zone.contains(from, altitude_m) && !zone.contains(to, altitude_m))
            .collect();

        let blocked_leg = |points: &[GeoPoint]| {
            points.windows(2).enumerate().find_map(|(idx, leg)| {
                avoidable
                    .iter()
                    .find(|zone| zone.intersects_leg(leg[0], leg[1], altitude_m, clearance_m))
                    .map(|zone| (idx, *zone))
            })
        };

        let mut points = vec![from, to];
        let mut detours = 0;
        while let Some((idx, zone)) = blocked_leg(&points) {
            if detours >= self.config.max_detours {
                tracing::debug!("{} still crosses no-fly zone {} after {} detours", agent_id, zone.id, detours);
                return Err(ResourceError::NoFlyZoneBlocked {
                    agent_id: agent_id.to_string(),
                    zone_id: zone.id.clone(),
                }
                .into());
            }
            let detour = detour_around(points[idx], points[idx + 1], zone.center, zone.radius_m, clearance_m);
            points.insert(idx + 1, detour);
            detours += 1;
        }

        Ok((points, detours))
    }
}

/// Plan with the default optimizer configuration and safety rules.
pub fn calculate_optimal_route(
    agent: &AgentSnapshot,
    origin: &str,
    destination: &str,
    weights: &OptimizationWeights,
    environment: &EnvironmentSnapshot,
) -> Result<Route> {
    RouteOptimizer::default().calculate_optimal_route(agent, origin, destination, weights, environment)
}
