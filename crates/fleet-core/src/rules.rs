//! Safety rules and thresholds shared by the coordinators.

use serde::{Deserialize, Serialize};

/// Battery percentage below which no new route is planned for an agent.
pub const BATTERY_SAFETY_THRESHOLD_PERCENT: u8 = 30;

/// Configuration for safety rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyRules {
    /// Minimum battery for a new route or work assignment
    pub battery_safety_threshold_percent: u8,
    /// Minimum battery for an agent to respond to an emergency
    pub responder_battery_floor_percent: u8,
    /// Maximum allowed altitude in meters
    pub max_altitude_m: f64,
    /// Minimum allowed altitude in meters
    pub min_altitude_m: f64,
}

impl Default for SafetyRules {
    fn default() -> Self {
        Self {
            battery_safety_threshold_percent: BATTERY_SAFETY_THRESHOLD_PERCENT,
            responder_battery_floor_percent: 40,
            max_altitude_m: 121.0, // FAA Part 107 limit (~400ft)
            min_altitude_m: 10.0,
        }
    }
}

impl SafetyRules {
    pub fn battery_ok(&self, battery_percent: u8) -> bool {
        battery_percent >= self.battery_safety_threshold_percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn battery_threshold_is_inclusive() {
        let rules = SafetyRules::default();
        assert!(!rules.battery_ok(29));
        assert!(rules.battery_ok(30));
    }
}
