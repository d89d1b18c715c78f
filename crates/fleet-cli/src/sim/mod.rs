//! Simulation helpers shared by the demo binary.

pub mod fleet;
pub mod flight;
pub mod scenarios;
pub mod simulation;
