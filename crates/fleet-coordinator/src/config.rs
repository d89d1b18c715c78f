//! Coordinator configuration from environment.

use std::env;
use std::str::FromStr;

use fleet_core::{AirspaceConfig, BalancingAlgorithm, EmergencyConfig, LoadBalancerConfig};

#[derive(Debug, Clone)]
pub struct Config {
    /// Minimum time between two workload rebalances
    pub rebalance_interval_secs: u64,
    /// How often the rebalance loop wakes up to check
    pub rebalance_tick_secs: u64,
    pub expiry_sweep_secs: u64,
    /// How long finished slots, emergency records and flight logs are kept
    pub retention_secs: u64,
    pub max_active_slots: usize,
    pub vertical_buffer_m: f64,
    pub max_responders: usize,
    pub algorithm: BalancingAlgorithm,
    pub event_channel_capacity: usize,
    pub json_logs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rebalance_interval_secs: 300,
            rebalance_tick_secs: 30,
            expiry_sweep_secs: 5,
            retention_secs: 3_600,
            max_active_slots: 500,
            vertical_buffer_m: 0.0,
            max_responders: 3,
            algorithm: BalancingAlgorithm::AIOptimized,
            event_channel_capacity: 1024,
            json_logs: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            rebalance_interval_secs: parse_var("FLEET_REBALANCE_INTERVAL_SECS", defaults.rebalance_interval_secs),
            rebalance_tick_secs: parse_var("FLEET_REBALANCE_TICK_SECS", defaults.rebalance_tick_secs),
            expiry_sweep_secs: parse_var("FLEET_EXPIRY_SWEEP_SECS", defaults.expiry_sweep_secs),
            retention_secs: parse_var("FLEET_RETENTION_SECS", defaults.retention_secs),
            max_active_slots: parse_var("FLEET_MAX_ACTIVE_SLOTS", defaults.max_active_slots),
            vertical_buffer_m: parse_var("FLEET_VERTICAL_BUFFER_M", defaults.vertical_buffer_m),
            max_responders: parse_var("FLEET_MAX_RESPONDERS", defaults.max_responders),
            algorithm: env::var("FLEET_BALANCING_ALGORITHM")
                .ok()
                .and_then(|name| {
                    let parsed = BalancingAlgorithm::parse(&name);
                    if parsed.is_none() {
                        tracing::warn!("Unknown FLEET_BALANCING_ALGORITHM {:?}, using default", name);
                    }
                    parsed
                })
                .unwrap_or(defaults.algorithm),
            event_channel_capacity: parse_var("FLEET_EVENT_CAPACITY", defaults.event_channel_capacity).max(1),
            json_logs: env::var("FLEET_LOG_JSON")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.json_logs),
        }
    }

    pub fn airspace(&self) -> AirspaceConfig {
        AirspaceConfig {
            max_active_slots: self.max_active_slots,
            vertical_buffer_m: self.vertical_buffer_m.max(0.0),
            retention_secs: self.retention(),
            ..AirspaceConfig::default()
        }
    }

    pub fn emergency(&self) -> EmergencyConfig {
        EmergencyConfig {
            max_responders: self.max_responders.max(1),
            retention_secs: self.retention(),
            ..EmergencyConfig::default()
        }
    }

    pub fn load_balancer(&self) -> LoadBalancerConfig {
        LoadBalancerConfig {
            algorithm: self.algorithm,
            rebalance_interval_secs: i64::try_from(self.rebalance_interval_secs).unwrap_or(i64::MAX),
            ..LoadBalancerConfig::default()
        }
    }

    /// Retention in the signed seconds the core configs use.
    pub fn retention(&self) -> i64 {
        i64::try_from(self.retention_secs).unwrap_or(i64::MAX)
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
