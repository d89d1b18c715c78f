//! Shared coordinator state and flight-session operations.

mod sessions;
mod store;

pub use sessions::{FlightRequest, FlightSession, FlightTicket, ObstacleReport};
pub use store::AppState;
