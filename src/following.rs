//! Car-following models.
//!
//! A car-following model maps a vehicle's own state and the state of its
//! immediate leader to an acceleration. Models know nothing about lanes or the
//! network; the [Simulation](crate::Simulation) gathers the inputs.

pub use idm::{AccParams, IdmParams};
pub use kinematic::{GippsParams, KraussParams};
pub use ovm::{OptimalVelocity, OvmParams};
pub use perception::{ActionPoint, PerceptionParams};

use crate::error::SimError;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

mod idm;
mod kinematic;
mod ovm;
mod perception;

/// Gaps are floored at this value before dividing by them, in m.
pub(crate) const MIN_DIVISOR_GAP: f64 = 0.01;

/// A car-following model together with its coefficients.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(tag = "model", content = "params")
)]
pub enum CarFollowingModel {
    /// The intelligent driver model.
    Idm(IdmParams),
    /// The improved intelligent driver model, which does not brake
    /// below the desired speed when the gap is larger than desired.
    Iidm(IdmParams),
    /// The adaptive cruise control model, blending the IIDM with a
    /// constant-acceleration heuristic controlled by a "coolness" factor.
    Acc(AccParams),
    /// The optimal velocity model with a velocity-difference term.
    Ovm(OvmParams),
    /// Gipps' safe-speed model.
    Gipps(GippsParams),
    /// Krauss' safety-margin model, evaluated at its expected value.
    Krauss(KraussParams),
    /// The IDM driven only at action points, when a change in the
    /// situation exceeds the driver's perception thresholds.
    Perception(PerceptionParams),
}

/// The inputs of a car-following model.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FollowingInput {
    /// The vehicle's own speed in m/s.
    pub speed: f64,
    /// The net distance from the vehicle's front to its leader's rear in m,
    /// or `f64::INFINITY` if there is no leader.
    pub gap: f64,
    /// The vehicle's speed minus its leader's speed, in m/s.
    pub speed_diff: f64,
    /// The leader's acceleration in m/s^2.
    pub leader_acc: f64,
    /// The speed limit in m/s.
    pub speed_limit: f64,
    /// A factor applied to the desired speed.
    pub speed_factor: f64,
}

impl FollowingInput {
    /// Creates the input for a vehicle following a leader.
    pub fn new(speed: f64, gap: f64, speed_diff: f64) -> Self {
        Self {
            speed,
            gap,
            speed_diff,
            leader_acc: 0.0,
            speed_limit: f64::INFINITY,
            speed_factor: 1.0,
        }
    }

    /// Creates the input for a vehicle with nothing ahead of it.
    pub fn free(speed: f64) -> Self {
        Self::new(speed, f64::INFINITY, 0.0)
    }

    /// Sets the leader's acceleration.
    pub fn with_leader_acc(self, leader_acc: f64) -> Self {
        Self { leader_acc, ..self }
    }

    /// Sets the speed limit.
    pub fn with_speed_limit(self, speed_limit: f64) -> Self {
        Self {
            speed_limit,
            ..self
        }
    }

    /// Sets the desired speed factor.
    pub fn with_speed_factor(self, speed_factor: f64) -> Self {
        Self {
            speed_factor,
            ..self
        }
    }

    /// Whether the vehicle has no leader in range.
    pub fn is_free(&self) -> bool {
        self.gap.is_infinite()
    }

    /// The effective desired speed given the model's own desired speed.
    pub fn desired_speed(&self, v0: f64) -> f64 {
        self.speed_factor * f64::min(v0, self.speed_limit)
    }
}

impl Default for CarFollowingModel {
    fn default() -> Self {
        Self::Idm(IdmParams::default())
    }
}

impl CarFollowingModel {
    /// A short name for the model.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idm(_) => "IDM",
            Self::Iidm(_) => "IIDM",
            Self::Acc(_) => "ACC",
            Self::Ovm(_) => "OVM",
            Self::Gipps(_) => "Gipps",
            Self::Krauss(_) => "Krauss",
            Self::Perception(_) => "Perception",
        }
    }

    /// Checks that the model's coefficients are valid.
    pub fn validate(&self) -> Result<(), SimError> {
        let name = self.name();
        match self {
            Self::Idm(params) | Self::Iidm(params) => params.validate(name),
            Self::Acc(params) => params.validate(name),
            Self::Ovm(params) => params.validate(name),
            Self::Gipps(params) => params.validate(name),
            Self::Krauss(params) => params.validate(name),
            Self::Perception(params) => params.validate(name),
        }
    }

    /// The model's desired speed in m/s, before speed limits are applied.
    pub fn desired_speed(&self) -> f64 {
        match self {
            Self::Idm(params) | Self::Iidm(params) => params.desired_speed,
            Self::Acc(params) => params.idm.desired_speed,
            Self::Ovm(params) => params.desired_speed,
            Self::Gipps(params) => params.desired_speed,
            Self::Krauss(params) => params.desired_speed,
            Self::Perception(params) => params.idm.desired_speed,
        }
    }

    /// Computes the vehicle's acceleration in m/s^2.
    pub fn acceleration(&self, input: &FollowingInput) -> f64 {
        match self {
            Self::Idm(params) => params.idm(input),
            Self::Iidm(params) => params.iidm(input),
            Self::Acc(params) => params.acceleration(input),
            Self::Ovm(params) => params.acceleration(input),
            Self::Gipps(params) => params.acceleration(input),
            Self::Krauss(params) => params.acceleration(input),
            Self::Perception(params) => params.acceleration(input),
        }
    }

    /// Computes the acceleration of a driver who last acted at `last`.
    /// Models with perception thresholds return the action point to
    /// remember; the others always act and return `None`.
    pub fn respond(&self, input: &FollowingInput, last: Option<&ActionPoint>) -> (f64, Option<ActionPoint>) {
        match self {
            Self::Perception(params) => {
                let (acc, point) = params.respond(input, last);
                (acc, Some(point))
            }
            _ => (self.acceleration(input), None),
        }
    }
}
