//! In-memory state store.
//!
//! Each resource domain (airspace, emergencies, load balancing) sits behind
//! its own mutex so conflict checks in one domain are strictly serialized.
//! Flight sessions live in a `DashMap` so navigation for different flights
//! proceeds in parallel.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use fleet_core::{
    AgentSnapshot, AirspaceCoordinator, AirspaceSlot, AirspaceStats, Authority, Clock, EmergencyCoordinator,
    EmergencyResponse, EmergencyStats, LoadBalancer, LoadBalancerState, NavigationController, PendingOrder, RebalanceOutcome, ReservationRequest, Result, RouteOptimizer, SystemClock,
};

use super::sessions::{ArchivedFlight, FlightSession};
use crate::config::Config;
use crate::events::EventBus;

/// Application state shared by every task.
pub struct AppState {
    pub(crate) config: Config,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) optimizer: RouteOptimizer,
    pub(crate) navigator: NavigationController,
    pub(crate) airspace: Mutex<AirspaceCoordinator>,
    pub(crate) emergency: Mutex<EmergencyCoordinator>,
    pub(crate) balancer: Mutex<LoadBalancer>,
    pub(crate) flights: DashMap<String, FlightSession>,
    pub(crate) archive: DashMap<String, ArchivedFlight>,
    loop_heartbeats: DashMap<&'static str, DateTime<Utc>>,
}

impl AppState {
    pub fn new(config: Config, clock: Arc<dyn Clock>) -> Self {
        let events = Arc::new(EventBus::new(config.event_channel_capacity, clock.clone()));
        Self {
            airspace: Mutex::new(AirspaceCoordinator::new(config.airspace(), events.clone(), clock.clone())),
            emergency: Mutex::new(EmergencyCoordinator::new(config.emergency(), events.clone(), clock.clone())),
            balancer: Mutex::new(LoadBalancer::new(config.load_balancer(), events.clone())),
            optimizer: RouteOptimizer::default(),
            navigator: NavigationController::default(),
            flights: DashMap::new(),
            archive: DashMap::new(),
            loop_heartbeats: DashMap::new(),
            config,
            clock,
            events,
        }
    }

    pub fn with_system_clock(config: Config) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn mark_loop_heartbeat(&self, name: &'static str) {
        self.loop_heartbeats.insert(name, self.clock.now());
    }

    /// Last time the named background loop ran a tick.
    pub fn loop_heartbeat(&self, name: &str) -> Option<DateTime<Utc>> {
        self.loop_heartbeats.get(name).map(|entry| *entry.value())
    }

    // ========== AIRSPACE ==========

    /// Reserve airspace directly, outside a flight session.
    pub fn reserve_airspace(&self, request: ReservationRequest) -> Result<AirspaceSlot> {
        lock(&self.airspace).request_airspace_reservation(request)
    }

    pub fn release_slot(&self, slot_id: u64) -> Result<AirspaceSlot> {
        lock(&self.airspace).release_slot(slot_id)
    }

    /// Expire slots whose window has passed at the current clock time.
    pub fn expire_slots(&self) -> Vec<u64> {
        let now = self.clock.now();
        lock(&self.airspace).expire_slots(now)
    }

    pub fn active_slots(&self) -> Vec<AirspaceSlot> {
        lock(&self.airspace).active_slots().into_iter().cloned().collect()
    }

    pub fn airspace_stats(&self) -> AirspaceStats {
        lock(&self.airspace).stats()
    }

    // ========== EMERGENCIES ==========

    pub fn complete_emergency(&self, response_id: &str, success: bool) -> Result<EmergencyResponse> {
        lock(&self.emergency).complete_emergency_response(response_id, success)
    }

    pub fn pending_responses(&self) -> Vec<EmergencyResponse> {
        lock(&self.emergency).pending_responses().into_iter().cloned().collect()
    }

    pub fn emergency_stats(&self) -> EmergencyStats {
        lock(&self.emergency).stats()
    }

    // ========== RETENTION ==========

    /// Drop finalized emergency records and archived flights older than the
    /// retention period. Returns how many entries were dropped.
    pub fn prune_finished(&self) -> usize {
        let now = self.clock.now();
        let responses = lock(&self.emergency).prune_finalized(now);

        let cutoff = now - Duration::seconds(self.config.retention());
        let before = self.archive.len();
        self.archive.retain(|_, archived| archived.archived_at > cutoff);
        let flights = before - self.archive.len();

        if flights > 0 {
            tracing::debug!("Pruned {} archived flight(s)", flights);
        }
        responses + flights
    }

    // ========== FLEET ==========

    pub fn register_agent(&self, authority: &Authority, agent: AgentSnapshot) -> Result<()> {
        lock(&self.balancer).add_drone_to_load_balancer(authority, agent)
    }

    pub fn remove_agent(&self, authority: &Authority, agent_id: &str) -> Result<Vec<String>> {
        lock(&self.balancer).remove_drone_from_load_balancer(authority, agent_id)
    }

    pub fn update_agent(&self, agent: AgentSnapshot) -> Result<()> {
        lock(&self.balancer).update_agent(agent)
    }

    /// Snapshots of every registered agent.
    pub fn agents(&self) -> Vec<AgentSnapshot> {
        lock(&self.balancer).agents()
    }

    pub fn enqueue_order(&self, order: PendingOrder) {
        lock(&self.balancer).enqueue_order(order)
    }

    pub fn assignments_for(&self, agent_id: &str) -> Vec<PendingOrder> {
        lock(&self.balancer).assignments_for(agent_id).to_vec()
    }

    pub fn rebalance(&self) -> RebalanceOutcome {
        lock(&self.balancer).optimize_workload_distribution(self.clock.as_ref())
    }

    pub fn balancer_state(&self) -> LoadBalancerState {
        lock(&self.balancer).stats()
    }
}

/// Lock a domain, taking the guard back if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Recovering poisoned state lock");
        poisoned.into_inner()
    })
}
