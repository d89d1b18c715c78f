//! Airspace slot expiry loop.
//!
//! Expires slots whose window has ended so they stop blocking new requests,
//! and drops finished emergency records and flight logs past retention.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::interval;

use crate::state::AppState;

pub const LOOP_NAME: &str = "slot-expiry";

pub async fn run_slot_expiry_loop(state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) {
    let mut ticker = interval(Duration::from_secs(state.config().expiry_sweep_secs.max(1)));

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Slot expiry loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                state.mark_loop_heartbeat(LOOP_NAME);
                let expired = state.expire_slots();
                if !expired.is_empty() {
                    tracing::info!("Expired {} airspace slot(s): {:?}", expired.len(), expired);
                }
                let pruned = state.prune_finished();
                if pruned > 0 {
                    tracing::debug!("Pruned {} finished record(s)", pruned);
                }
            }
        }
    }
}
