//! Background loops for continuous processing.

pub mod event_log_loop;
pub mod rebalance_loop;
pub mod slot_expiry_loop;

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::state::AppState;

/// Start every background loop. Each one exits when `shutdown` fires.
pub fn spawn_background_loops(state: Arc<AppState>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(rebalance_loop::run_rebalance_loop(state.clone(), shutdown.subscribe())),
        tokio::spawn(slot_expiry_loop::run_slot_expiry_loop(state.clone(), shutdown.subscribe())),
        tokio::spawn(event_log_loop::run_event_log_loop(state, shutdown.subscribe())),
    ]
}
