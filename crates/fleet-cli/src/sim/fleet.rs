//! Seeded random fleets and order books.

use fleet_core::spatial::offset_point;
use fleet_core::{AgentSnapshot, GeoPoint, PendingOrder, PriorityTier};
use rand::Rng;

/// San Francisco dispatch hub
pub const HUB: GeoPoint = GeoPoint {
    lat: 37.7749,
    lon: -122.4194,
};

/// Agents and pickups are scattered within this distance of the hub
pub const SERVICE_RADIUS_M: f64 = 3_000.0;

const PAYLOAD_CLASSES_KG: [f64; 3] = [1.0, 2.5, 5.0];

/// Uniformly distributed point inside a disc.
pub fn random_point<R: Rng>(rng: &mut R, center: GeoPoint, radius_m: f64) -> GeoPoint {
    let distance_m = radius_m * rng.random::<f64>().sqrt();
    let bearing = rng.random_range(0.0..360.0);
    offset_point(center, distance_m, bearing)
}

pub fn generate_fleet<R: Rng>(rng: &mut R, count: usize, center: GeoPoint) -> Vec<AgentSnapshot> {
    (0..count)
        .map(|i| {
            let position = random_point(rng, center, SERVICE_RADIUS_M);
            AgentSnapshot {
                id: format!("DRONE{:03}", i + 1),
                autonomy_level: rng.random_range(50..=100),
                battery_percent: rng.random_range(20..=100),
                payload_capacity_kg: PAYLOAD_CLASSES_KG[rng.random_range(0..PAYLOAD_CLASSES_KG.len())],
                max_range_m: rng.random_range(8_000.0..25_000.0_f64).round(),
                position: position.to_string(),
            }
        })
        .collect()
}

pub fn generate_orders<R: Rng>(rng: &mut R, count: usize, center: GeoPoint) -> Vec<PendingOrder> {
    (0..count)
        .map(|i| {
            // Roughly 10% urgent, 20% low priority
            let priority = match rng.random_range(0..10) {
                0 => PriorityTier::High,
                1 | 2 => PriorityTier::Low,
                _ => PriorityTier::Normal,
            };
            PendingOrder {
                order_id: format!("ORD-{:04}", i + 1),
                pickup: random_point(rng, center, SERVICE_RADIUS_M),
                payload_kg: (rng.random_range(0.2..4.0_f64) * 10.0).round() / 10.0,
                priority,
            }
        })
        .collect()
}
