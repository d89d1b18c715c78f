//! Service runtime around the fleet coordination core.
//!
//! Owns one coordinator per resource domain behind its own lock, keeps the
//! live flight sessions, and runs the periodic maintenance loops.

pub mod config;
pub mod events;
pub mod loops;
pub mod state;
pub mod telemetry;

pub use config::Config;
pub use events::{EventBus, StampedEvent};
pub use state::{AppState, FlightRequest, FlightTicket, ObstacleReport};
