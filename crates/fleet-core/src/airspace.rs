//! Airspace slot reservation.
//!
//! A slot grants one agent exclusive use of an altitude band for a half-open
//! time window. Overlaps are settled by priority tier: a request that strictly
//! outranks every slot it overlaps supersedes them, anything else loses.
//! Every reservation is planned in full against the current registry before a
//! single slot is written.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{ConflictError, NotFoundError, ResourceError, Result};
use crate::events::{EventSink, FleetEvent};
use crate::models::{AltitudeRange, PriorityTier, TimeWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SlotStatus {
    Active,
    /// Displaced by a higher-priority slot
    Superseded { by: u64 },
    /// Flight finished and gave the slot back
    Released,
    /// Window ended without a release
    Expired,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Active => "active",
            SlotStatus::Superseded { .. } => "superseded",
            SlotStatus::Released => "released",
            SlotStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirspaceSlot {
    pub slot_id: u64,
    pub route_hash: u64,
    pub agent_id: String,
    pub window: TimeWindow,
    pub altitude: AltitudeRange,
    pub priority: PriorityTier,
    pub status: SlotStatus,
    /// Where this slot moves if it is ever superseded
    pub fallback_window: Option<TimeWindow>,
    /// Booked into a window other than the one first requested
    pub rescheduled: bool,
    pub created_at: DateTime<Utc>,
}

impl AirspaceSlot {
    pub fn is_active(&self) -> bool {
        self.status == SlotStatus::Active
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.window.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.window.end
    }

    fn occupies(&self, altitude: &AltitudeRange, window: &TimeWindow, buffer_m: f64) -> bool {
        self.is_active() && self.altitude.overlaps(altitude, buffer_m) && self.window.overlaps(window)
    }
}

/// Input to [`AirspaceCoordinator::request_airspace_reservation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub route_hash: u64,
    pub agent_id: String,
    pub window: TimeWindow,
    pub altitude: AltitudeRange,
    pub priority: PriorityTier,
    /// Tried once if `window` loses; also kept as the slot's fallback
    #[serde(default)]
    pub alternate_window: Option<TimeWindow>,
}

impl ReservationRequest {
    pub fn new(
        route_hash: u64,
        agent_id: impl Into<String>,
        window: TimeWindow,
        altitude: AltitudeRange,
        priority: PriorityTier,
    ) -> Self {
        Self {
            route_hash,
            agent_id: agent_id.into(),
            window,
            altitude,
            priority,
            alternate_window: None,
        }
    }

    pub fn with_alternate(mut self, window: TimeWindow) -> Self {
        self.alternate_window = Some(window);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AirspaceConfig {
    pub max_active_slots: usize,
    /// Extra vertical separation between slots; 0 means touching bands are fine
    pub vertical_buffer_m: f64,
    pub max_altitude_m: f64,
    /// Finalized slots are dropped this long after their window ends
    pub retention_secs: i64,
}

impl Default for AirspaceConfig {
    fn default() -> Self {
        Self {
            max_active_slots: 500,
            vertical_buffer_m: 0.0,
            max_altitude_m: 121.0,
            retention_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirspaceStats {
    /// Successful reservations; rebookings of superseded slots are not counted
    pub total_flights: u64,
    pub superseded_total: u64,
    pub rebooked_total: u64,
    pub released_total: u64,
    pub expired_total: u64,
    pub active_slots: usize,
}

#[derive(Debug)]
struct ReservationPlan {
    window: TimeWindow,
    rescheduled: bool,
    superseded: Vec<u64>,
    rebookings: Vec<(u64, TimeWindow)>,
}

pub struct AirspaceCoordinator {
    config: AirspaceConfig,
    slots: BTreeMap<u64, AirspaceSlot>,
    next_slot_id: u64,
    stats: AirspaceStats,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl AirspaceCoordinator {
    pub fn new(config: AirspaceConfig, events: Arc<dyn EventSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            slots: BTreeMap::new(),
            next_slot_id: 1,
            stats: AirspaceStats::default(),
            events,
            clock,
        }
    }

    pub fn config(&self) -> &AirspaceConfig {
        &self.config
    }

    /// Reserve airspace for a route.
    ///
    /// Fails with a [`ConflictError`] naming the blocking slot when neither
    /// the requested window nor the alternate can be won.
    pub fn request_airspace_reservation(&mut self, request: ReservationRequest) -> Result<AirspaceSlot> {
        request.altitude.validate(self.config.max_altitude_m)?;
        request.window.validate()?;
        if let Some(alternate) = &request.alternate_window {
            alternate.validate()?;
        }

        let plan = match self.plan(&request, request.window, false) {
            Ok(plan) => plan,
            Err(conflict) => match request.alternate_window {
                Some(alternate) => {
                    tracing::debug!(
                        "Slot request for {} lost to slot {}, retrying alternate window",
                        request.agent_id,
                        conflict.conflicting_slot_id
                    );
                    self.plan(&request, alternate, true).inspect_err(|conflict| {
                        tracing::warn!(
                            "Airspace conflict for {}: both windows blocked by slot {}",
                            request.agent_id,
                            conflict.conflicting_slot_id
                        );
                    })?
                }
                None => {
                    tracing::warn!(
                        "Airspace conflict for {}: blocked by slot {} ({:?})",
                        request.agent_id,
                        conflict.conflicting_slot_id,
                        conflict.conflicting_priority
                    );
                    return Err(conflict.into());
                }
            },
        };

        let active = self.stats.active_slots;
        let active_after = active - plan.superseded.len() + plan.rebookings.len() + 1;
        if active_after > self.config.max_active_slots {
            return Err(ResourceError::AirspaceAtCapacity {
                active,
                capacity: self.config.max_active_slots,
            }
            .into());
        }

        Ok(self.apply(request, plan))
    }

    /// Work out the full outcome of booking `request` into `window` without
    /// touching the registry.
    fn plan(
        &self,
        request: &ReservationRequest,
        window: TimeWindow,
        rescheduled: bool,
    ) -> std::result::Result<ReservationPlan, ConflictError> {
        let buffer = self.config.vertical_buffer_m;
        let overlapping: Vec<&AirspaceSlot> = self
            .slots
            .values()
            .filter(|slot| slot.occupies(&request.altitude, &window, buffer))
            .collect();

        let blocking = overlapping
            .iter()
            .filter(|slot| slot.priority >= request.priority)
            .max_by_key(|slot| (slot.priority, std::cmp::Reverse(slot.slot_id)));
        if let Some(slot) = blocking {
            return Err(ConflictError {
                conflicting_slot_id: slot.slot_id,
                conflicting_agent_id: slot.agent_id.clone(),
                conflicting_priority: slot.priority,
                conflicting_end: slot.window.end,
            });
        }

        let superseded: Vec<u64> = overlapping.iter().map(|slot| slot.slot_id).collect();

        // Space already promised by this plan, checked alongside the registry
        let mut claimed: Vec<(AltitudeRange, TimeWindow)> = vec![(request.altitude, window)];
        let mut rebookings = Vec::new();
        for loser in &overlapping {
            let Some(fallback) = loser.fallback_window else {
                continue;
            };
            let registry_free = self
                .slots
                .values()
                .filter(|slot| !superseded.contains(&slot.slot_id))
                .all(|slot| !slot.occupies(&loser.altitude, &fallback, buffer));
            let plan_free = claimed
                .iter()
                .all(|(altitude, taken)| !(altitude.overlaps(&loser.altitude, buffer) && taken.overlaps(&fallback)));
            if registry_free && plan_free {
                claimed.push((loser.altitude, fallback));
                rebookings.push((loser.slot_id, fallback));
            }
        }

        Ok(ReservationPlan {
            window,
            rescheduled,
            superseded,
            rebookings,
        })
    }

    fn apply(&mut self, request: ReservationRequest, plan: ReservationPlan) -> AirspaceSlot {
        let now = self.clock.now();
        let slot_id = self.allocate_id();
        let slot = AirspaceSlot {
            slot_id,
            route_hash: request.route_hash,
            agent_id: request.agent_id,
            window: plan.window,
            altitude: request.altitude,
            priority: request.priority,
            status: SlotStatus::Active,
            fallback_window: if plan.rescheduled { None } else { request.alternate_window },
            rescheduled: plan.rescheduled,
            created_at: now,
        };

        for loser_id in &plan.superseded {
            let rebooked_window = plan
                .rebookings
                .iter()
                .find(|(id, _)| id == loser_id)
                .map(|(_, window)| *window);

            let Some(loser) = self.slots.get_mut(loser_id) else {
                continue;
            };
            loser.status = SlotStatus::Superseded { by: slot_id };
            let loser = loser.clone();
            self.stats.superseded_total += 1;
            self.stats.active_slots -= 1;

            let rebooked_as = rebooked_window.map(|window| {
                let id = self.allocate_id();
                let rebooked = AirspaceSlot {
                    slot_id: id,
                    window,
                    status: SlotStatus::Active,
                    fallback_window: None,
                    rescheduled: true,
                    created_at: now,
                    ..loser.clone()
                };
                self.emit_reserved(&rebooked);
                self.slots.insert(id, rebooked);
                self.stats.rebooked_total += 1;
                self.stats.active_slots += 1;
                id
            });

            tracing::warn!(
                "Slot {} ({}) superseded by slot {}{}",
                loser.slot_id,
                loser.agent_id,
                slot_id,
                rebooked_as
                    .map(|id| format!(", rebooked as {id}"))
                    .unwrap_or_default()
            );
            self.events.emit(FleetEvent::AirspaceSuperseded {
                slot_id: loser.slot_id,
                agent_id: loser.agent_id.clone(),
                superseded_by: slot_id,
                rebooked_as,
            });
        }

        tracing::info!(
            "Reserved slot {} for {} [{} - {}) at {}-{}m ({:?})",
            slot.slot_id,
            slot.agent_id,
            slot.window.start,
            slot.window.end,
            slot.altitude.floor_m,
            slot.altitude.ceiling_m,
            slot.priority
        );
        self.emit_reserved(&slot);
        self.slots.insert(slot_id, slot.clone());
        self.stats.total_flights += 1;
        self.stats.active_slots += 1;
        slot
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_slot_id;
        self.next_slot_id += 1;
        id
    }

    fn emit_reserved(&self, slot: &AirspaceSlot) {
        self.events.emit(FleetEvent::AirspaceReserved {
            slot_id: slot.slot_id,
            agent_id: slot.agent_id.clone(),
            route_hash: slot.route_hash,
            start: slot.window.start,
            end: slot.window.end,
            floor_m: slot.altitude.floor_m,
            ceiling_m: slot.altitude.ceiling_m,
            priority: slot.priority,
            rescheduled: slot.rescheduled,
        });
    }

    /// Give an active slot back. Slots that were already finalized are
    /// returned unchanged.
    pub fn release_slot(&mut self, slot_id: u64) -> Result<AirspaceSlot> {
        let slot = self
            .slots
            .get_mut(&slot_id)
            .ok_or(NotFoundError::Slot(slot_id))?;
        if slot.is_active() {
            slot.status = SlotStatus::Released;
            self.stats.released_total += 1;
            self.stats.active_slots -= 1;
            tracing::info!("Released slot {} ({})", slot_id, slot.agent_id);
        }
        Ok(slot.clone())
    }

    /// Mark active slots whose window has ended as expired and drop finalized
    /// slots past the retention period. Returns the ids that expired.
    pub fn expire_slots(&mut self, now: DateTime<Utc>) -> Vec<u64> {
        let mut expired = Vec::new();
        for slot in self.slots.values_mut() {
            if slot.is_active() && slot.window.end <= now {
                slot.status = SlotStatus::Expired;
                expired.push(slot.slot_id);
            }
        }
        self.stats.expired_total += expired.len() as u64;
        self.stats.active_slots -= expired.len();

        let cutoff = now - Duration::seconds(self.config.retention_secs.max(0));
        let before = self.slots.len();
        self.slots
            .retain(|_, slot| slot.is_active() || slot.window.end > cutoff);
        let pruned = before - self.slots.len();

        if !expired.is_empty() || pruned > 0 {
            tracing::debug!("Expired {} slot(s), pruned {}", expired.len(), pruned);
        }
        expired
    }

    /// Earliest window of `duration` starting at or after `earliest` that is
    /// free at `altitude` and ends within `horizon`.
    pub fn find_next_window(
        &self,
        altitude: &AltitudeRange,
        duration: Duration,
        earliest: DateTime<Utc>,
        horizon: Duration,
    ) -> Option<TimeWindow> {
        let buffer = self.config.vertical_buffer_m;
        let latest_end = earliest + horizon;

        let mut candidates: Vec<DateTime<Utc>> = self
            .slots
            .values()
            .filter(|slot| slot.is_active() && slot.altitude.overlaps(altitude, buffer))
            .map(|slot| slot.window.end)
            .filter(|end| *end > earliest)
            .collect();
        candidates.push(earliest);
        candidates.sort();

        candidates
            .into_iter()
            .map(|start| TimeWindow::starting_at(start, duration))
            .take_while(|window| window.end <= latest_end)
            .find(|window| {
                self.slots
                    .values()
                    .all(|slot| !slot.occupies(altitude, window, buffer))
            })
    }

    pub fn slot(&self, slot_id: u64) -> Option<&AirspaceSlot> {
        self.slots.get(&slot_id)
    }

    /// Active slots ordered by start time.
    pub fn active_slots(&self) -> Vec<&AirspaceSlot> {
        let mut active: Vec<&AirspaceSlot> = self.slots.values().filter(|slot| slot.is_active()).collect();
        active.sort_by_key(|slot| (slot.window.start, slot.slot_id));
        active
    }

    pub fn stats(&self) -> AirspaceStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{FleetError, ValidationError};
    use crate::events::{NoopSink, RecordingSink};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn window(start_min: i64, end_min: i64) -> TimeWindow {
        TimeWindow::new(t0() + Duration::minutes(start_min), t0() + Duration::minutes(end_min))
    }

    fn band() -> AltitudeRange {
        AltitudeRange::new(50.0, 100.0)
    }

    fn coordinator_with(config: AirspaceConfig) -> AirspaceCoordinator {
        AirspaceCoordinator::new(config, Arc::new(NoopSink), Arc::new(ManualClock::new(t0())))
    }

    fn coordinator() -> (AirspaceCoordinator, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let coordinator =
            AirspaceCoordinator::new(AirspaceConfig::default(), sink.clone(), Arc::new(ManualClock::new(t0())));
        (coordinator, sink)
    }

    fn request(agent: &str, window: TimeWindow, priority: PriorityTier) -> ReservationRequest {
        ReservationRequest::new(agent.len() as u64, agent, window, band(), priority)
    }

    #[test]
    fn equal_priority_overlap_is_a_conflict() {
        let (mut airspace, _) = coordinator();
        let first = airspace
            .request_airspace_reservation(request("DRONE-A", window(0, 30), PriorityTier::Normal))
            .unwrap();

        let err = airspace
            .request_airspace_reservation(request("DRONE-B", window(15, 45), PriorityTier::Normal))
            .unwrap_err();
        let FleetError::Conflict(conflict) = err else {
            panic!("expected conflict, got {err:?}");
        };
        assert_eq!(conflict.conflicting_slot_id, first.slot_id);
        assert_eq!(conflict.conflicting_agent_id, "DRONE-A");
        assert_eq!(airspace.stats().total_flights, 1);
        assert_eq!(airspace.active_slots().len(), 1);
    }

    #[test]
    fn higher_priority_supersedes() {
        let (mut airspace, sink) = coordinator();
        let first = airspace
            .request_airspace_reservation(request("DRONE-A", window(0, 30), PriorityTier::Normal))
            .unwrap();
        let second = airspace
            .request_airspace_reservation(request("DRONE-B", window(15, 45), PriorityTier::High))
            .unwrap();

        assert_eq!(
            airspace.slot(first.slot_id).map(|slot| slot.status),
            Some(SlotStatus::Superseded { by: second.slot_id })
        );
        assert_eq!(airspace.active_slots().len(), 1);
        assert_eq!(airspace.stats().total_flights, 2);
        assert_eq!(airspace.stats().superseded_total, 1);
        assert_eq!(sink.count("airspace_superseded"), 1);
        assert_eq!(sink.count("airspace_reserved"), 2);
    }

    #[test]
    fn losing_request_retries_alternate_window_once() {
        let (mut airspace, _) = coordinator();
        airspace
            .request_airspace_reservation(request("DRONE-A", window(0, 30), PriorityTier::High))
            .unwrap();

        let slot = airspace
            .request_airspace_reservation(
                request("DRONE-B", window(10, 40), PriorityTier::Normal).with_alternate(window(30, 60)),
            )
            .unwrap();
        assert_eq!(slot.window, window(30, 60));
        assert!(slot.rescheduled);

        let err = airspace
            .request_airspace_reservation(
                request("DRONE-C", window(0, 10), PriorityTier::Normal).with_alternate(window(35, 50)),
            )
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(airspace.stats().total_flights, 2);
    }

    #[test]
    fn superseded_slot_moves_to_its_fallback() {
        let (mut airspace, sink) = coordinator();
        let first = airspace
            .request_airspace_reservation(
                request("DRONE-A", window(0, 30), PriorityTier::Normal).with_alternate(window(60, 90)),
            )
            .unwrap();
        let urgent = airspace
            .request_airspace_reservation(request("MEDIC-1", window(10, 20), PriorityTier::Emergency))
            .unwrap();

        let active = airspace.active_slots();
        assert_eq!(active.len(), 2);
        let rebooked = active
            .iter()
            .find(|slot| slot.agent_id == "DRONE-A")
            .expect("rebooked slot");
        assert_eq!(rebooked.window, window(60, 90));
        assert!(rebooked.rescheduled);
        assert_eq!(
            airspace.slot(first.slot_id).map(|slot| slot.status),
            Some(SlotStatus::Superseded { by: urgent.slot_id })
        );
        // rebooking is not a new flight
        assert_eq!(airspace.stats().total_flights, 2);
        assert_eq!(airspace.stats().rebooked_total, 1);

        let superseded = sink
            .events()
            .into_iter()
            .find(|event| event.name() == "airspace_superseded");
        assert!(matches!(
            superseded,
            Some(FleetEvent::AirspaceSuperseded { rebooked_as: Some(id), .. }) if id == rebooked.slot_id
        ));
    }

    #[test]
    fn fallback_is_skipped_when_occupied() {
        let (mut airspace, _) = coordinator();
        airspace
            .request_airspace_reservation(request("DRONE-X", window(60, 90), PriorityTier::Low))
            .unwrap();
        airspace
            .request_airspace_reservation(
                request("DRONE-A", window(0, 30), PriorityTier::Normal).with_alternate(window(70, 80)),
            )
            .unwrap();
        airspace
            .request_airspace_reservation(request("MEDIC-1", window(0, 30), PriorityTier::Emergency))
            .unwrap();

        let agents: Vec<&str> = airspace
            .active_slots()
            .iter()
            .map(|slot| slot.agent_id.as_str())
            .collect();
        assert_eq!(agents, vec!["MEDIC-1", "DRONE-X"]);
    }

    #[test]
    fn mixed_priorities_block_supersession() {
        let (mut airspace, _) = coordinator();
        airspace
            .request_airspace_reservation(request("DRONE-A", window(0, 30), PriorityTier::Low))
            .unwrap();
        let high = airspace
            .request_airspace_reservation(request("DRONE-B", window(20, 50), PriorityTier::High))
            .unwrap();
        assert_eq!(airspace.active_slots().len(), 1);

        // Outranks neither High slot: conflict names it, nothing is superseded
        let err = airspace
            .request_airspace_reservation(request("DRONE-C", window(10, 40), PriorityTier::High))
            .unwrap_err();
        assert!(matches!(err, FleetError::Conflict(ref c) if c.conflicting_slot_id == high.slot_id));
        assert_eq!(airspace.stats().superseded_total, 1);
    }

    #[test]
    fn separated_bands_and_touching_windows_coexist() {
        let (mut airspace, _) = coordinator();
        airspace
            .request_airspace_reservation(request("DRONE-A", window(0, 30), PriorityTier::Normal))
            .unwrap();
        airspace
            .request_airspace_reservation(request("DRONE-B", window(30, 60), PriorityTier::Normal))
            .unwrap();
        let mut above = request("DRONE-C", window(0, 60), PriorityTier::Normal);
        above.altitude = AltitudeRange::new(100.0, 120.0);
        airspace.request_airspace_reservation(above).unwrap();
        assert_eq!(airspace.active_slots().len(), 3);
    }

    #[test]
    fn vertical_buffer_widens_bands() {
        let mut airspace = coordinator_with(AirspaceConfig {
            vertical_buffer_m: 10.0,
            ..AirspaceConfig::default()
        });
        airspace
            .request_airspace_reservation(request("DRONE-A", window(0, 30), PriorityTier::Normal))
            .unwrap();
        let mut above = request("DRONE-B", window(0, 30), PriorityTier::Normal);
        above.altitude = AltitudeRange::new(105.0, 120.0);
        assert!(airspace.request_airspace_reservation(above).is_err());
    }

    #[test]
    fn invalid_requests_are_rejected_before_any_write() {
        let (mut airspace, sink) = coordinator();

        let mut inverted = request("DRONE-A", window(0, 30), PriorityTier::Normal);
        inverted.altitude = AltitudeRange::new(80.0, 40.0);
        assert!(matches!(
            airspace.request_airspace_reservation(inverted),
            Err(FleetError::Validation(ValidationError::InvalidAltitudeRange { .. }))
        ));

        let mut too_high = request("DRONE-A", window(0, 30), PriorityTier::Normal);
        too_high.altitude = AltitudeRange::new(100.0, 300.0);
        assert!(airspace.request_airspace_reservation(too_high).is_err());

        assert!(matches!(
            airspace.request_airspace_reservation(request("DRONE-A", window(30, 30), PriorityTier::Normal)),
            Err(FleetError::Validation(ValidationError::InvalidTimeWindow { .. }))
        ));

        assert!(airspace.active_slots().is_empty());
        assert!(sink.events().is_empty());
    }

    #[test]
    fn capacity_limit_is_enforced() {
        let mut airspace = coordinator_with(AirspaceConfig {
            max_active_slots: 2,
            ..AirspaceConfig::default()
        });
        for i in 0..2 {
            airspace
                .request_airspace_reservation(request("DRONE-A", window(i * 30, i * 30 + 30), PriorityTier::Normal))
                .unwrap();
        }
        let err = airspace
            .request_airspace_reservation(request("DRONE-A", window(90, 120), PriorityTier::Normal))
            .unwrap_err();
        assert!(matches!(err, FleetError::Resource(ResourceError::AirspaceAtCapacity { active: 2, capacity: 2 })));

        // Supersession frees the slot it displaces
        airspace
            .request_airspace_reservation(request("MEDIC-1", window(0, 30), PriorityTier::Emergency))
            .unwrap();
    }

    #[test]
    fn release_and_expiry_free_the_region() {
        let (mut airspace, _) = coordinator();
        let slot = airspace
            .request_airspace_reservation(request("DRONE-A", window(0, 30), PriorityTier::Normal))
            .unwrap();
        let released = airspace.release_slot(slot.slot_id).unwrap();
        assert_eq!(released.status, SlotStatus::Released);
        assert_eq!(airspace.release_slot(slot.slot_id).unwrap().status, SlotStatus::Released);
        assert!(matches!(
            airspace.release_slot(999),
            Err(FleetError::NotFound(NotFoundError::Slot(999)))
        ));

        let late = airspace
            .request_airspace_reservation(request("DRONE-B", window(0, 30), PriorityTier::Normal))
            .unwrap();
        assert_eq!(airspace.expire_slots(t0() + Duration::minutes(29)), Vec::<u64>::new());
        assert_eq!(airspace.expire_slots(t0() + Duration::minutes(30)), vec![late.slot_id]);
        assert!(airspace.active_slots().is_empty());
        assert_eq!(airspace.stats().expired_total, 1);

        airspace.expire_slots(t0() + Duration::hours(3));
        assert!(airspace.slot(late.slot_id).is_none());
    }

    #[test]
    fn next_window_skips_busy_periods() {
        let (mut airspace, _) = coordinator();
        airspace
            .request_airspace_reservation(request("DRONE-A", window(0, 30), PriorityTier::Normal))
            .unwrap();
        airspace
            .request_airspace_reservation(request("DRONE-B", window(40, 70), PriorityTier::Normal))
            .unwrap();

        let found = airspace.find_next_window(&band(), Duration::minutes(20), t0(), Duration::hours(2));
        assert_eq!(found, Some(window(70, 90)));

        let short = airspace.find_next_window(&band(), Duration::minutes(10), t0(), Duration::hours(2));
        assert_eq!(short, Some(window(30, 40)));

        assert_eq!(
            airspace.find_next_window(&band(), Duration::minutes(20), t0(), Duration::minutes(60)),
            None
        );
    }

    #[test]
    fn active_slots_never_overlap() {
        let (mut airspace, _) = coordinator();
        let priorities = [PriorityTier::Low, PriorityTier::Normal, PriorityTier::High, PriorityTier::Emergency];
        for i in 0..60i64 {
            let start = (i * 17) % 120;
            let floor = ((i * 7) % 5) as f64 * 20.0;
            let mut req = request(
                &format!("DRONE-{i}"),
                window(start, start + 25),
                priorities[(i as usize * 3) % 4],
            );
            req.altitude = AltitudeRange::new(floor, floor + 30.0);
            if i % 3 == 0 {
                req = req.with_alternate(window(start + 30, start + 55));
            }
            let _ = airspace.request_airspace_reservation(req);
        }

        let active = airspace.active_slots();
        for (i, a) in active.iter().enumerate() {
            for b in &active[i + 1..] {
                assert!(
                    !(a.altitude.overlaps(&b.altitude, 0.0) && a.window.overlaps(&b.window)),
                    "slots {} and {} overlap",
                    a.slot_id,
                    b.slot_id
                );
            }
        }
    }
}
