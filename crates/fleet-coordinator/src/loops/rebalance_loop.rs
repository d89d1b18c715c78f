//! Workload rebalance loop.
//!
//! Wakes up every tick and asks the load balancer to redistribute orders.
//! The balancer itself enforces the minimum interval between runs.

use std::sync::Arc;
use std::time::Duration;

use fleet_core::RebalanceOutcome;
use tokio::sync::broadcast;
use tokio::time::interval;

use crate::state::AppState;

pub const LOOP_NAME: &str = "rebalance";

pub async fn run_rebalance_loop(state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) {
    let tick_secs = state.config().rebalance_tick_secs.max(1);
    let mut ticker = interval(Duration::from_secs(tick_secs));
    tracing::info!("Rebalance loop started (tick {}s)", tick_secs);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Rebalance loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                state.mark_loop_heartbeat(LOOP_NAME);
                match state.rebalance() {
                    RebalanceOutcome::Rebalanced { assigned, pending, efficiency_score } => {
                        tracing::info!(
                            "Rebalanced workload: {} assigned, {} pending, efficiency {:.1}",
                            assigned,
                            pending,
                            efficiency_score
                        );
                    }
                    RebalanceOutcome::Skipped { next_eligible_at } => {
                        tracing::trace!("Rebalance not due until {}", next_eligible_at);
                    }
                }
            }
        }
    }
}
