use crate::{SegmentId, SourceId, TrafficLightId, VehicleId};
use thiserror::Error;

/// An error raised by the simulation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    /// A model or vehicle type parameter is missing or out of range.
    #[error("invalid parameter `{name}` for {model}: {reason}")]
    InvalidParameter {
        model: &'static str,
        name: &'static str,
        reason: String,
    },
    /// The simulation configuration is invalid.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// A lane lost its ordering or no-overlap guarantee. Fatal for the run.
    #[error("invariant violated on lane {lane} of segment {segment:?}: {violation}")]
    InvariantViolation {
        segment: SegmentId,
        lane: usize,
        violation: Violation,
    },
    /// A previous step failed, so the simulation can no longer advance.
    #[error("simulation was aborted at step {step}")]
    Aborted { step: u64 },
    #[error("unknown segment {0:?}")]
    UnknownSegment(SegmentId),
    #[error("unknown vehicle {0:?}")]
    UnknownVehicle(VehicleId),
    #[error("unknown traffic light {0:?}")]
    UnknownLight(TrafficLightId),
    #[error("unknown source {0:?}")]
    UnknownSource(SourceId),
    #[error("segment {segment:?} has no lane {lane}")]
    LaneOutOfRange { segment: SegmentId, lane: usize },
    /// A route contains consecutive segments with no connection between them.
    #[error("segment {from:?} does not connect to segment {to:?}")]
    DisconnectedRoute { from: SegmentId, to: SegmentId },
    /// A vehicle could not be placed without overlapping its neighbours.
    #[error("cannot place vehicle at {pos} m on lane {lane} of segment {segment:?}")]
    PlacementBlocked {
        segment: SegmentId,
        lane: usize,
        pos: f64,
    },
}

/// The kind of lane invariant that was broken.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Violation {
    /// The follower's front is ahead of the leader's front.
    #[error("vehicle {follower:?} is ahead of its leader {leader:?}")]
    OutOfOrder { leader: VehicleId, follower: VehicleId },
    /// The follower overlaps its leader by more than the jam distance.
    #[error("vehicle {follower:?} overlaps its leader {leader:?} (gap {gap:.3} m)")]
    Overlap {
        leader: VehicleId,
        follower: VehicleId,
        gap: f64,
    },
    /// The vehicle is not on the lane it was expected on.
    #[error("vehicle {0:?} is not on the lane")]
    MissingVehicle(VehicleId),
    /// The vehicle's rear moved backwards during a step.
    #[error("vehicle {vehicle:?} moved backwards by {by:.3} m")]
    BackwardMotion { vehicle: VehicleId, by: f64 },
    /// The vehicle's speed is negative or not finite.
    #[error("vehicle {vehicle:?} has invalid speed {speed}")]
    InvalidSpeed { vehicle: VehicleId, speed: f64 },
}

impl SimError {
    pub(crate) fn invalid(model: &'static str, name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            model,
            name,
            reason: reason.into(),
        }
    }
}

/// Checks that a model parameter is finite and strictly positive.
pub(crate) fn positive(model: &'static str, name: &'static str, value: f64) -> Result<(), SimError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SimError::invalid(model, name, format!("must be positive, got {value}")))
    }
}

/// Checks that a model parameter is finite and not negative.
pub(crate) fn non_negative(
    model: &'static str,
    name: &'static str,
    value: f64,
) -> Result<(), SimError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SimError::invalid(model, name, format!("must not be negative, got {value}")))
    }
}

/// Checks that a model parameter lies within `[0, 1]`.
pub(crate) fn unit_interval(
    model: &'static str,
    name: &'static str,
    value: f64,
) -> Result<(), SimError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SimError::invalid(model, name, format!("must lie within [0, 1], got {value}")))
    }
}
