pub use config::SimulationConfig;
pub use error::{SimError, Violation};
pub use following::{
    AccParams, ActionPoint, CarFollowingModel, FollowingInput, GippsParams, IdmParams,
    KraussParams, OptimalVelocity, OvmParams, PerceptionParams,
};
pub use lane::Lane;
pub use lane_change::{Direction, LaneChangeParams, OvertakingRule};
pub use light::{FixedCycle, LightApproach, LightPhase, TrafficLight};
pub use segment::{Connection, RoadSegment, SegmentAttributes};
pub use simulation::{
    BoundaryEvent, HoldReason, LaneChangeEvent, Simulation, SourceEvent, StepReport,
};
pub use slotmap::{Key, KeyData};
pub use snapshot::{
    LaneSnapshot, LightSnapshot, SnapshotSink, StepSnapshot, VehicleDynamics, VehicleState,
};
pub use util::Interval;
pub use vehicle::{Vehicle, VehicleType};

mod config;
mod error;
pub mod following;
mod lane;
mod lane_change;
mod light;
mod obstacle;
mod segment;
mod simulation;
mod snapshot;
mod source;
mod util;
mod vehicle;

use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Unique ID of a [RoadSegment].
    pub struct SegmentId;
    /// Unique ID of a [Vehicle].
    pub struct VehicleId;
    /// Unique ID of a [TrafficLight].
    pub struct TrafficLightId;
    /// Unique ID of a vehicle source.
    pub struct SourceId;
}

type SegmentSet = SlotMap<SegmentId, RoadSegment>;
type VehicleSet = SlotMap<VehicleId, Vehicle>;
type LightSet = SlotMap<TrafficLightId, TrafficLight>;
