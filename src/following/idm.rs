use super::{FollowingInput, MIN_DIVISOR_GAP};
use crate::error::{non_negative, positive, unit_interval, SimError};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The exponent of the IIDM interaction term is capped at this value.
const MAX_IIDM_EXPONENT: f64 = 100.0;

/// The parameters of the intelligent driver model.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IdmParams {
    /// The desired speed v0 in m/s.
    pub desired_speed: f64,
    /// The desired time gap T to the leader in s.
    pub time_gap: f64,
    /// The minimum gap s0 to the leader in m.
    pub min_gap: f64,
    /// The speed-dependent jam distance s1 in m.
    pub nonlinear_gap: f64,
    /// The maximum acceleration a in m/s^2.
    pub max_acc: f64,
    /// The comfortable deceleration b, a positive number in m/s^2.
    pub comf_dec: f64,
    /// The acceleration exponent δ.
    pub exponent: f64,
}

/// The parameters of the adaptive cruise control model.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AccParams {
    /// The underlying IIDM coefficients.
    pub idm: IdmParams,
    /// The coolness factor c within `[0, 1]`. Zero gives the pure IIDM.
    pub coolness: f64,
}

impl Default for IdmParams {
    fn default() -> Self {
        Self {
            desired_speed: 30.0,
            time_gap: 1.5,
            min_gap: 2.0,
            nonlinear_gap: 0.0,
            max_acc: 1.0,
            comf_dec: 1.5,
            exponent: 4.0,
        }
    }
}

impl Default for AccParams {
    fn default() -> Self {
        Self {
            idm: IdmParams::default(),
            coolness: 0.99,
        }
    }
}

impl IdmParams {
    pub(crate) fn validate(&self, model: &'static str) -> Result<(), SimError> {
        positive(model, "desired_speed", self.desired_speed)?;
        non_negative(model, "time_gap", self.time_gap)?;
        non_negative(model, "min_gap", self.min_gap)?;
        non_negative(model, "nonlinear_gap", self.nonlinear_gap)?;
        positive(model, "max_acc", self.max_acc)?;
        positive(model, "comf_dec", self.comf_dec)?;
        positive(model, "exponent", self.exponent)
    }

    /// The desired dynamic gap s*, never smaller than the minimum gap.
    fn desired_gap(&self, speed: f64, speed_diff: f64, v0: f64) -> f64 {
        let dynamic = self.time_gap * speed
            + self.nonlinear_gap * ((speed + 0.0001) / v0).sqrt()
            + (0.5 * speed * speed_diff) / (self.max_acc * self.comf_dec).sqrt();
        self.min_gap + f64::max(dynamic, 0.0)
    }

    /// Computes an acceleration using the intelligent driver model.
    pub(crate) fn idm(&self, input: &FollowingInput) -> f64 {
        let v0 = input.desired_speed(self.desired_speed);
        let free = 1.0 - (input.speed / v0).powf(self.exponent);
        if input.is_free() {
            return self.max_acc * free;
        }
        let s_star = self.desired_gap(input.speed, input.speed_diff, v0);
        let z = s_star / f64::max(input.gap, MIN_DIVISOR_GAP);
        self.max_acc * (free - z * z)
    }

    /// The IIDM free-road acceleration, which decelerates smoothly
    /// when driving faster than the desired speed.
    fn free_acc(&self, speed: f64, v0: f64) -> f64 {
        if speed <= v0 {
            self.max_acc * (1.0 - (speed / v0).powf(self.exponent))
        } else {
            let exp = self.max_acc * self.exponent / self.comf_dec;
            -self.comf_dec * (1.0 - (v0 / speed).powf(exp))
        }
    }

    /// Computes an acceleration using the improved intelligent driver model.
    pub(crate) fn iidm(&self, input: &FollowingInput) -> f64 {
        let v0 = input.desired_speed(self.desired_speed);
        let acc_free = self.free_acc(input.speed, v0);
        if input.is_free() {
            return acc_free;
        }
        let s_star = self.desired_gap(input.speed, input.speed_diff, v0);
        let z = s_star / f64::max(input.gap, MIN_DIVISOR_GAP);
        let acc_int = self.max_acc * (1.0 - z * z);

        match (input.speed < v0, z < 1.0) {
            (true, true) => {
                let exp = f64::min(2.0 * self.max_acc / acc_free, MAX_IIDM_EXPONENT);
                acc_free * (1.0 - z.powf(exp))
            }
            (true, false) => acc_int,
            (false, true) => acc_free,
            (false, false) => acc_free + acc_int,
        }
    }
}

impl AccParams {
    pub(crate) fn validate(&self, model: &'static str) -> Result<(), SimError> {
        self.idm.validate(model)?;
        unit_interval(model, "coolness", self.coolness)
    }

    /// Computes an acceleration using the ACC model.
    pub(crate) fn acceleration(&self, input: &FollowingInput) -> f64 {
        let acc_iidm = self.idm.iidm(input);
        if input.is_free() {
            return acc_iidm;
        }

        // Constant-acceleration heuristic
        let speed = input.speed;
        let gap = f64::max(input.gap, MIN_DIVISOR_GAP);
        let lead_acc = f64::min(input.leader_acc, self.idm.max_acc);
        let dv_pos = f64::max(input.speed_diff, 0.0);
        let lead_speed = speed - input.speed_diff;
        let denom = lead_speed * lead_speed - 2.0 * gap * lead_acc;
        let acc_cah = if lead_speed * dv_pos < -2.0 * gap * lead_acc && denom != 0.0 {
            speed * speed * lead_acc / denom
        } else {
            lead_acc - 0.5 * dv_pos * dv_pos / gap
        };

        if acc_iidm > acc_cah {
            acc_iidm
        } else {
            let b = self.idm.comf_dec;
            let c = self.coolness;
            (1.0 - c) * acc_iidm + c * (acc_cah + b * ((acc_iidm - acc_cah) / b).tanh())
        }
    }
}
