//! Fleet CLI - in-process demonstrations of the fleet coordinator.
//!
//! - `fleet_demo scenario`: canned end-to-end scenarios
//! - `fleet_demo simulate`: seeded random fleet simulation

pub mod sim;
