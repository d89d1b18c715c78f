//! Shared fixtures for coordinator tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use fleet_coordinator::{AppState, Config};
use fleet_core::{AgentSnapshot, ManualClock};

pub const ORIGIN: &str = "37.7749,-122.4194";
pub const DESTINATION: &str = "37.7849,-122.4094";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn state_with_clock() -> (Arc<ManualClock>, AppState) {
    let clock = Arc::new(ManualClock::new(start_time()));
    let state = AppState::new(Config::default(), clock.clone());
    (clock, state)
}

pub fn agent(id: &str, position: &str, battery_percent: u8) -> AgentSnapshot {
    AgentSnapshot {
        id: id.to_string(),
        autonomy_level: 80,
        battery_percent,
        payload_capacity_kg: 2.5,
        max_range_m: 20_000.0,
        position: position.to_string(),
    }
}
