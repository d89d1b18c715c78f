//! Broadcast fan-out for core events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleet_core::{Clock, EventSink, FleetEvent};
use serde::Serialize;
use tokio::sync::broadcast;

/// A core event with the time it was emitted.
#[derive(Debug, Clone, Serialize)]
pub struct StampedEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: FleetEvent,
}

/// [`EventSink`] that publishes to every subscriber. Events emitted while
/// nobody is subscribed are dropped.
pub struct EventBus {
    sender: broadcast::Sender<StampedEvent>,
    clock: Arc<dyn Clock>,
    emitted: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            clock,
            emitted: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StampedEvent> {
        self.sender.subscribe()
    }

    /// Events emitted since start, delivered or not.
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: FleetEvent) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("event {}", event.name());
        let stamped = StampedEvent {
            at: self.clock.now(),
            event,
        };
        // Err only means no subscribers
        let _ = self.sender.send(stamped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::{BalancingAlgorithm, ManualClock};

    #[tokio::test]
    async fn subscribers_receive_stamped_events() {
        let start = Utc::now();
        let bus = EventBus::new(8, Arc::new(ManualClock::new(start)));
        bus.emit(FleetEvent::WorkloadRebalanced {
            algorithm: BalancingAlgorithm::RoundRobin,
            assigned_orders: 0,
            pending_orders: 0,
            efficiency_score: 100.0,
        });

        let mut rx = bus.subscribe();
        bus.emit(FleetEvent::WorkloadRebalanced {
            algorithm: BalancingAlgorithm::CapacityBased,
            assigned_orders: 2,
            pending_orders: 1,
            efficiency_score: 66.0,
        });

        let received = rx.recv().await.unwrap();
        assert_eq!(received.at, start);
        assert_eq!(received.event.name(), "workload_rebalanced");
        assert_eq!(bus.emitted(), 2);

        let json = serde_json::to_value(&received).unwrap();
        assert_eq!(json["type"], "WORKLOAD_REBALANCED");
        assert_eq!(json["algorithm"], "capacity_based");
        assert!(json["at"].is_string());
    }
}
