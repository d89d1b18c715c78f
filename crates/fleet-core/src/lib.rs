pub mod airspace;
pub mod authority;
pub mod clock;
pub mod emergency;
pub mod error;
pub mod events;
pub mod load_balancer;
pub mod models;
pub mod navigation;
pub mod route_optimizer;
pub mod rules;
pub mod spatial;

pub use airspace::{
    AirspaceConfig, AirspaceCoordinator, AirspaceSlot, AirspaceStats, ReservationRequest, SlotStatus,
};
pub use authority::{Authority, Role};
pub use clock::{Clock, ManualClock, SystemClock};
pub use emergency::{
    AssistanceType, BaselinePolicy, EmergencyConfig, EmergencyCoordinator, EmergencyRequest,
    EmergencyResponse, EmergencyStats, EmergencyStatus, ResponseOutcome, ResponseType,
    SuccessRatePolicy, Urgency,
};
pub use error::{
    AuthorityError, ConflictError, FleetError, NotFoundError, ResourceError, Result, StateError,
    ValidationError,
};
pub use events::{EventSink, FleetEvent, NoopSink, RecordingSink};
pub use load_balancer::{
    BalancingAlgorithm, LoadBalancer, LoadBalancerConfig, LoadBalancerState, PendingOrder,
    RebalanceOutcome,
};
pub use models::{
    AgentSnapshot, AltitudeRange, EnvironmentSnapshot, GeoPoint, NoFlyZone, PriorityTier, Route,
    RouteStatus, TimeWindow, Waypoint,
};
pub use navigation::{
    AvoidanceOutcome, Decision, DecisionAction, DecisionPriority, FlightMode, NavigationConfig,
    NavigationController, NavigationState, NavigationSummary, NavigationTelemetry, Obstacle,
    RecoveryMode, ThreatLevel,
};
pub use route_optimizer::{
    calculate_optimal_route, OptimizationWeights, OptimizerConfig, RouteOptimizer, ScoreBreakdown,
};
pub use rules::SafetyRules;
pub use spatial::haversine_distance;
