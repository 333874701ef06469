use super::FollowingInput;
use crate::error::{non_negative, positive, SimError};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The shape of the optimal velocity function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OptimalVelocity {
    /// Bando's hyperbolic tangent function.
    Bando,
    /// A linear ramp from zero at the minimum gap to the desired speed
    /// at the minimum gap plus the transition width.
    Triangular,
}

/// The parameters of the optimal velocity model with a velocity-difference term
/// (the "full velocity difference" model when `speed_diff_sensitivity` is non-zero).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OvmParams {
    /// The desired speed v0 in m/s.
    pub desired_speed: f64,
    /// The speed relaxation time τ in s.
    pub relaxation_time: f64,
    /// The gap at which the optimal velocity drops to zero, in m.
    pub min_gap: f64,
    /// The width of the transition region of the optimal velocity function, in m.
    pub transition_width: f64,
    /// The form factor β of the Bando function.
    pub form_factor: f64,
    /// The sensitivity γ to the speed difference, in 1/s.
    pub speed_diff_sensitivity: f64,
    /// The optimal velocity function.
    pub function: OptimalVelocity,
}

impl Default for OvmParams {
    fn default() -> Self {
        Self {
            desired_speed: 30.0,
            relaxation_time: 0.65,
            min_gap: 2.0,
            transition_width: 15.0,
            form_factor: 1.5,
            speed_diff_sensitivity: 0.6,
            function: OptimalVelocity::Bando,
        }
    }
}

impl OvmParams {
    pub(crate) fn validate(&self, model: &'static str) -> Result<(), SimError> {
        positive(model, "desired_speed", self.desired_speed)?;
        positive(model, "relaxation_time", self.relaxation_time)?;
        non_negative(model, "min_gap", self.min_gap)?;
        positive(model, "transition_width", self.transition_width)?;
        non_negative(model, "form_factor", self.form_factor)?;
        non_negative(model, "speed_diff_sensitivity", self.speed_diff_sensitivity)
    }

    /// The speed the driver would like to travel at with the given gap.
    fn optimal_speed(&self, gap: f64, v0: f64) -> f64 {
        if gap.is_infinite() {
            return v0;
        }
        let x = (gap - self.min_gap) / self.transition_width;
        let speed = match self.function {
            OptimalVelocity::Bando => {
                let beta = self.form_factor.tanh();
                v0 * ((x - self.form_factor).tanh() + beta) / (1.0 + beta)
            }
            OptimalVelocity::Triangular => v0 * x.clamp(0.0, 1.0),
        };
        speed.max(0.0)
    }

    pub(crate) fn acceleration(&self, input: &FollowingInput) -> f64 {
        let v0 = input.desired_speed(self.desired_speed);
        let v_opt = self.optimal_speed(input.gap, v0);
        let relax = (v_opt - input.speed) / self.relaxation_time;
        if input.is_free() {
            relax
        } else {
            relax - self.speed_diff_sensitivity * input.speed_diff
        }
    }
}
