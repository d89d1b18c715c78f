//! Fleet workload distribution.
//!
//! Keeps the registered agent set and the orders not yet flown, and spreads
//! those orders across agents with a selectable algorithm. Rebalancing is
//! rate-limited: a call inside the configured interval is a no-op.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::authority::Authority;
use crate::clock::Clock;
use crate::error::{NotFoundError, Result, ValidationError};
use crate::events::{EventSink, FleetEvent};
use crate::models::{AgentSnapshot, GeoPoint, PriorityTier};
use crate::rules::SafetyRules;
use crate::spatial::distance_between;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BalancingAlgorithm {
    #[serde(rename = "round_robin")]
    RoundRobin,
    #[serde(rename = "capacity_based")]
    CapacityBased,
    #[serde(rename = "distance_based")]
    DistanceBased,
    /// Weighted blend of proximity, spare capacity and battery
    #[serde(rename = "ai_optimized")]
    AIOptimized,
}

impl BalancingAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalancingAlgorithm::RoundRobin => "round_robin",
            BalancingAlgorithm::CapacityBased => "capacity_based",
            BalancingAlgorithm::DistanceBased => "distance_based",
            BalancingAlgorithm::AIOptimized => "ai_optimized",
        }
    }

    /// Accepts the snake_case names, case-insensitively.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "round_robin" | "roundrobin" => Some(BalancingAlgorithm::RoundRobin),
            "capacity_based" | "capacity" => Some(BalancingAlgorithm::CapacityBased),
            "distance_based" | "distance" => Some(BalancingAlgorithm::DistanceBased),
            "ai_optimized" | "ai" => Some(BalancingAlgorithm::AIOptimized),
            _ => None,
        }
    }
}

/// An order waiting for an agent, supplied by the logistics layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub order_id: String,
    pub pickup: GeoPoint,
    pub payload_kg: f64,
    pub priority: PriorityTier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    pub algorithm: BalancingAlgorithm,
    pub rebalance_interval_secs: i64,
    pub max_orders_per_agent: usize,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            algorithm: BalancingAlgorithm::AIOptimized,
            rebalance_interval_secs: 300,
            max_orders_per_agent: 4,
        }
    }
}

/// Snapshot of the balancer for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerState {
    pub registered_agents: Vec<String>,
    pub algorithm: BalancingAlgorithm,
    pub last_rebalance: Option<DateTime<Utc>>,
    pub pending_orders: usize,
    pub assigned_orders: usize,
    /// 0-100
    pub efficiency_score: f64,
    pub rebalance_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RebalanceOutcome {
    Skipped {
        next_eligible_at: DateTime<Utc>,
    },
    Rebalanced {
        assigned: usize,
        pending: usize,
        efficiency_score: f64,
    },
}

pub struct LoadBalancer {
    config: LoadBalancerConfig,
    rules: SafetyRules,
    agents: BTreeMap<String, AgentSnapshot>,
    pending: Vec<PendingOrder>,
    assignments: BTreeMap<String, Vec<PendingOrder>>,
    last_rebalance: Option<DateTime<Utc>>,
    efficiency_score: f64,
    rebalance_count: u64,
    round_robin_cursor: usize,
    events: Arc<dyn EventSink>,
}

impl LoadBalancer {
    pub fn new(config: LoadBalancerConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            rules: SafetyRules::default(),
            agents: BTreeMap::new(),
            pending: Vec::new(),
            assignments: BTreeMap::new(),
            last_rebalance: None,
            efficiency_score: 100.0,
            rebalance_count: 0,
            round_robin_cursor: 0,
            events,
        }
    }

    pub fn algorithm(&self) -> BalancingAlgorithm {
        self.config.algorithm
    }

    pub fn set_algorithm(&mut self, authority: &Authority, algorithm: BalancingAlgorithm) -> Result<()> {
        authority.require_fleet_control("change balancing algorithm")?;
        tracing::info!(
            "Balancing algorithm {} -> {} (by {})",
            self.config.algorithm.as_str(),
            algorithm.as_str(),
            authority.caller_id
        );
        self.config.algorithm = algorithm;
        Ok(())
    }

    pub fn add_drone_to_load_balancer(&mut self, authority: &Authority, agent: AgentSnapshot) -> Result<()> {
        authority.require_fleet_control("add drone to load balancer")?;
        if self.agents.contains_key(&agent.id) {
            return Err(ValidationError::DuplicateAgent { agent_id: agent.id }.into());
        }
        tracing::info!("Registered {} with load balancer", agent.id);
        self.agents.insert(agent.id.clone(), agent);
        Ok(())
    }

    /// Unregister an agent. Its assigned orders go back to pending; their ids
    /// are returned.
    pub fn remove_drone_from_load_balancer(&mut self, authority: &Authority, agent_id: &str) -> Result<Vec<String>> {
        authority.require_fleet_control("remove drone from load balancer")?;
        if self.agents.remove(agent_id).is_none() {
            return Err(NotFoundError::Agent(agent_id.to_string()).into());
        }
        let orphaned = self.assignments.remove(agent_id).unwrap_or_default();
        let ids: Vec<String> = orphaned.iter().map(|order| order.order_id.clone()).collect();
        self.pending.extend(orphaned);
        tracing::info!("Removed {} from load balancer ({} order(s) returned)", agent_id, ids.len());
        Ok(ids)
    }

    /// Refresh the snapshot of a registered agent.
    pub fn update_agent(&mut self, agent: AgentSnapshot) -> Result<()> {
        let slot = self
            .agents
            .get_mut(&agent.id)
            .ok_or_else(|| NotFoundError::Agent(agent.id.clone()))?;
        *slot = agent;
        Ok(())
    }

    pub fn enqueue_order(&mut self, order: PendingOrder) {
        tracing::debug!("Queued order {} ({:.1}kg)", order.order_id, order.payload_kg);
        self.pending.push(order);
    }

    /// Drop a delivered order. Returns false if it was not assigned.
    pub fn complete_order(&mut self, order_id: &str) -> bool {
        for orders in self.assignments.values_mut() {
            if let Some(idx) = orders.iter().position(|order| order.order_id == order_id) {
                orders.remove(idx);
                return true;
            }
        }
        false
    }

    pub fn assignments_for(&self, agent_id: &str) -> &[PendingOrder] {
        self.assignments.get(agent_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn pending_orders(&self) -> &[PendingOrder] {
        &self.pending
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentSnapshot> {
        self.agents.get(agent_id)
    }

    /// Registered agents in id order.
    pub fn agents(&self) -> Vec<AgentSnapshot> {
        self.agents.values().cloned().collect()
    }

    /// Redistribute every order not yet delivered across eligible agents.
    pub fn optimize_workload_distribution(&mut self, clock: &dyn Clock) -> RebalanceOutcome {
        let now = clock.now();
        let interval = Duration::seconds(self.config.rebalance_interval_secs.max(0));
        if let Some(last) = self.last_rebalance {
            if now - last < interval {
                let next_eligible_at = last + interval;
                tracing::debug!("Rebalance skipped; next eligible at {}", next_eligible_at);
                return RebalanceOutcome::Skipped { next_eligible_at };
            }
        }

        let mut orders: Vec<PendingOrder> = std::mem::take(&mut self.pending);
        for assigned in std::mem::take(&mut self.assignments).into_values() {
            orders.extend(assigned);
        }
        // Highest priority first, then by id for a stable result
        orders.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.order_id.cmp(&b.order_id)));

        let eligible: Vec<AgentSnapshot> = self
            .agents
            .values()
            .filter(|agent| self.rules.battery_ok(agent.battery_percent))
            .cloned()
            .collect();

        let mut loads: BTreeMap<String, Vec<PendingOrder>> = eligible
            .iter()
            .map(|agent| (agent.id.clone(), Vec::new()))
            .collect();
        let mut unassigned = Vec::new();
        let total = orders.len();

        for order in orders {
            match self.pick_agent(&eligible, &loads, &order) {
                Some(agent_id) => loads.entry(agent_id).or_default().push(order),
                None => unassigned.push(order),
            }
        }

        let assigned = total - unassigned.len();
        let efficiency_score = efficiency(total, assigned, &loads);

        loads.retain(|_, orders| !orders.is_empty());
        self.assignments = loads;
        self.pending = unassigned;
        self.last_rebalance = Some(now);
        self.efficiency_score = efficiency_score;
        self.rebalance_count += 1;

        tracing::info!(
            "Rebalanced {} order(s) across {} agent(s) with {}: {} assigned, {} pending, efficiency {:.1}",
            total,
            eligible.len(),
            self.config.algorithm.as_str(),
            assigned,
            self.pending.len(),
            efficiency_score
        );
        self.events.emit(FleetEvent::WorkloadRebalanced {
            algorithm: self.config.algorithm,
            assigned_orders: assigned,
            pending_orders: self.pending.len(),
            efficiency_score,
        });

        RebalanceOutcome::Rebalanced {
            assigned,
            pending: self.pending.len(),
            efficiency_score,
        }
    }

    fn pick_agent(
        &mut self,
        eligible: &[AgentSnapshot],
        loads: &BTreeMap<String, Vec<PendingOrder>>,
        order: &PendingOrder,
    ) -> Option<String> {
        let max_orders = self.config.max_orders_per_agent.max(1);
        let load_of = |agent: &AgentSnapshot| loads.get(&agent.id).map(Vec::len).unwrap_or(0);
        let can_take =
            |agent: &AgentSnapshot| agent.payload_capacity_kg >= order.payload_kg && load_of(agent) < max_orders;

        let chosen = match self.config.algorithm {
            BalancingAlgorithm::RoundRobin => {
                let count = eligible.len();
                let found = (0..count)
                    .map(|step| (self.round_robin_cursor + step) % count)
                    .find(|idx| can_take(&eligible[*idx]));
                if let Some(idx) = found {
                    self.round_robin_cursor = idx + 1;
                }
                found.map(|idx| &eligible[idx])
            }
            BalancingAlgorithm::CapacityBased => eligible
                .iter()
                .filter(|agent| can_take(agent))
                .min_by(|a, b| {
                    load_of(a)
                        .cmp(&load_of(b))
                        .then_with(|| b.payload_capacity_kg.total_cmp(&a.payload_capacity_kg))
                }),
            BalancingAlgorithm::DistanceBased => eligible
                .iter()
                .filter(|agent| can_take(agent))
                .min_by(|a, b| pickup_distance(a, order).total_cmp(&pickup_distance(b, order))),
            BalancingAlgorithm::AIOptimized => eligible
                .iter()
                .filter(|agent| can_take(agent))
                .max_by(|a, b| {
                    blended_score(a, order, load_of(a), max_orders)
                        .total_cmp(&blended_score(b, order, load_of(b), max_orders))
                        // max_by keeps the last maximum; prefer the lower id on ties
                        .then_with(|| b.id.cmp(&a.id))
                }),
        };
        chosen.map(|agent| agent.id.clone())
    }

    pub fn stats(&self) -> LoadBalancerState {
        LoadBalancerState {
            registered_agents: self.agents.keys().cloned().collect(),
            algorithm: self.config.algorithm,
            last_rebalance: self.last_rebalance,
            pending_orders: self.pending.len(),
            assigned_orders: self.assignments.values().map(Vec::len).sum(),
            efficiency_score: self.efficiency_score,
            rebalance_count: self.rebalance_count,
        }
    }
}

/// Unparseable positions sort last.
fn pickup_distance(agent: &AgentSnapshot, order: &PendingOrder) -> f64 {
    agent
        .position_point()
        .map(|position| distance_between(position, order.pickup))
        .unwrap_or(f64::INFINITY)
}

fn blended_score(agent: &AgentSnapshot, order: &PendingOrder, load: usize, max_orders: usize) -> f64 {
    let proximity = 1.0 / (1.0 + pickup_distance(agent, order) / 1000.0);
    let spare = 1.0 - load as f64 / max_orders as f64;
    let battery = f64::from(agent.battery_percent.min(100)) / 100.0;
    0.4 * proximity + 0.35 * spare + 0.25 * battery
}

/// Share of orders assigned times evenness of the per-agent load.
fn efficiency(total: usize, assigned: usize, loads: &BTreeMap<String, Vec<PendingOrder>>) -> f64 {
    if total == 0 {
        return 100.0;
    }
    if loads.is_empty() {
        return 0.0;
    }
    let counts: Vec<usize> = loads.values().map(Vec::len).collect();
    let max = counts.iter().copied().max().unwrap_or(0);
    let min = counts.iter().copied().min().unwrap_or(0);
    let evenness = if max == 0 {
        1.0
    } else {
        1.0 - (max - min) as f64 / max as f64
    };
    // One order more on some agents is as even as the split allows
    let evenness = if max - min <= 1 { 1.0 } else { evenness };

    (assigned as f64 / total as f64 * evenness * 100.0).clamp(0.0, 100.0)
}
