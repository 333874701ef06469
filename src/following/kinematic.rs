//! Models which choose a safe speed for the next reaction interval
//! and convert it into an acceleration.

use super::FollowingInput;
use crate::error::{non_negative, positive, unit_interval, SimError};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The parameters of Gipps' model.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GippsParams {
    /// The desired speed in m/s.
    pub desired_speed: f64,
    /// The maximum acceleration in m/s^2.
    pub max_acc: f64,
    /// The comfortable deceleration, a positive number in m/s^2.
    pub comf_dec: f64,
    /// The minimum gap to the leader in m.
    pub min_gap: f64,
    /// The reaction time in s.
    pub reaction_time: f64,
}

/// The parameters of Krauss' model.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KraussParams {
    /// The desired speed in m/s.
    pub desired_speed: f64,
    /// The maximum acceleration in m/s^2.
    pub max_acc: f64,
    /// The comfortable deceleration, a positive number in m/s^2.
    pub comf_dec: f64,
    /// The minimum gap to the leader in m.
    pub min_gap: f64,
    /// The reaction time in s.
    pub reaction_time: f64,
    /// The dawdling factor ε within `[0, 1]`.
    pub dawdle: f64,
}

impl Default for GippsParams {
    fn default() -> Self {
        Self {
            desired_speed: 30.0,
            max_acc: 1.5,
            comf_dec: 2.0,
            min_gap: 2.0,
            reaction_time: 1.0,
        }
    }
}

impl Default for KraussParams {
    fn default() -> Self {
        Self {
            desired_speed: 30.0,
            max_acc: 1.5,
            comf_dec: 2.0,
            min_gap: 2.0,
            reaction_time: 1.0,
            dawdle: 0.4,
        }
    }
}

impl GippsParams {
    pub(crate) fn validate(&self, model: &'static str) -> Result<(), SimError> {
        positive(model, "desired_speed", self.desired_speed)?;
        positive(model, "max_acc", self.max_acc)?;
        positive(model, "comf_dec", self.comf_dec)?;
        non_negative(model, "min_gap", self.min_gap)?;
        positive(model, "reaction_time", self.reaction_time)
    }

    pub(crate) fn acceleration(&self, input: &FollowingInput) -> f64 {
        let (v, t, b) = (input.speed, self.reaction_time, self.comf_dec);
        let v0 = input.desired_speed(self.desired_speed);
        let v_free = f64::min(v + self.max_acc * t, v0);
        let v_new = if input.is_free() {
            v_free
        } else {
            let v_lead = f64::max(v - input.speed_diff, 0.0);
            let s = f64::max(input.gap - self.min_gap, 0.0);
            let v_safe = -b * t + ((b * t).powi(2) + v_lead * v_lead + 2.0 * b * s).sqrt();
            f64::min(v_safe, v_free)
        };
        (v_new.max(0.0) - v) / t
    }
}

impl KraussParams {
    pub(crate) fn validate(&self, model: &'static str) -> Result<(), SimError> {
        positive(model, "desired_speed", self.desired_speed)?;
        positive(model, "max_acc", self.max_acc)?;
        positive(model, "comf_dec", self.comf_dec)?;
        non_negative(model, "min_gap", self.min_gap)?;
        positive(model, "reaction_time", self.reaction_time)?;
        unit_interval(model, "dawdle", self.dawdle)
    }

    /// The dawdling speed is drawn uniformly between the lower and upper
    /// bound in the stochastic model; this uses its expected value.
    pub(crate) fn acceleration(&self, input: &FollowingInput) -> f64 {
        let (v, t, b) = (input.speed, self.reaction_time, self.comf_dec);
        let v0 = input.desired_speed(self.desired_speed);
        let v_free = f64::min(v + self.max_acc * t, v0);
        let v_upper = if input.is_free() {
            v_free
        } else {
            let v_lead = f64::max(v - input.speed_diff, 0.0);
            let s = f64::max(input.gap - self.min_gap, 0.0);
            let v_safe = v_lead + (s - v_lead * t) / ((v + v_lead) / (2.0 * b) + t);
            f64::min(v_safe, v_free)
        }
        .max(0.0);
        let eps = self.dawdle;
        let v_lower = f64::min(
            (1.0 - eps) * v_upper + eps * f64::max(v - b * t, 0.0),
            v_upper,
        );
        (0.5 * (v_lower + v_upper) - v) / t
    }
}
