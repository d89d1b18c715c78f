//! Writes every emitted event to the log as one JSON line.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};

use crate::state::AppState;

pub async fn run_event_log_loop(state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) {
    let mut events = state.events().subscribe();

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Event log loop shutting down");
                break;
            }
            received = events.recv() => match received {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => tracing::info!(target: "fleet_events", "{}", line),
                    Err(err) => tracing::warn!("Failed to encode {} event: {}", event.event.name(), err),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event log lagged, {} event(s) dropped", skipped);
                }
                Err(RecvError::Closed) => {
                    tracing::info!("Event bus closed");
                    break;
                }
            }
        }
    }
}
