//! An action-point model: the driver keeps their acceleration until a
//! change in the situation ahead becomes noticeable.

use super::{FollowingInput, IdmParams};
use crate::error::{non_negative, SimError};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The parameters of the perception-threshold model, which drives
/// according to the IDM but only at action points.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PerceptionParams {
    /// The coefficients used whenever the driver acts.
    pub idm: IdmParams,
    /// The smallest change in the speed difference to the leader the
    /// driver notices, in m/s.
    pub speed_diff_threshold: f64,
    /// The smallest change in the gap the driver notices, relative to the
    /// gap at the last action point.
    pub gap_threshold: f64,
    /// The smallest change in the driver's own speed they notice, in m/s.
    pub speed_threshold: f64,
}

/// What a driver perceived when they last chose an acceleration.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ActionPoint {
    pub speed: f64,
    pub gap: f64,
    pub speed_diff: f64,
    /// The acceleration chosen, in m/s^2.
    pub acc: f64,
}

impl Default for PerceptionParams {
    fn default() -> Self {
        Self {
            idm: IdmParams::default(),
            speed_diff_threshold: 0.3,
            gap_threshold: 0.1,
            speed_threshold: 1.0,
        }
    }
}

impl ActionPoint {
    fn new(input: &FollowingInput, acc: f64) -> Self {
        Self {
            speed: input.speed,
            gap: input.gap,
            speed_diff: input.speed_diff,
            acc,
        }
    }
}

impl PerceptionParams {
    pub(crate) fn validate(&self, model: &'static str) -> Result<(), SimError> {
        self.idm.validate(model)?;
        non_negative(model, "speed_diff_threshold", self.speed_diff_threshold)?;
        non_negative(model, "gap_threshold", self.gap_threshold)?;
        non_negative(model, "speed_threshold", self.speed_threshold)
    }

    /// The acceleration of a fully attentive driver.
    pub(crate) fn acceleration(&self, input: &FollowingInput) -> f64 {
        self.idm.idm(input)
    }

    /// Chooses an acceleration given the previous action point, returning it
    /// along with the action point the driver now remembers.
    pub(crate) fn respond(&self, input: &FollowingInput, last: Option<&ActionPoint>) -> (f64, ActionPoint) {
        let acc = self.acceleration(input);
        match last {
            Some(last) if !self.noticeable(last, input, acc) => (last.acc, *last),
            _ => (acc, ActionPoint::new(input, acc)),
        }
    }

    /// Whether the situation has changed enough since `last` for the driver to act.
    fn noticeable(&self, last: &ActionPoint, input: &FollowingInput, acc: f64) -> bool {
        // With nothing ahead there is nothing to misjudge
        if input.is_free() {
            return true;
        }
        let gap_changed = if last.gap.is_finite() {
            (input.gap - last.gap).abs() > self.gap_threshold * last.gap
        } else {
            true
        };
        gap_changed
            || (input.speed_diff - last.speed_diff).abs() > self.speed_diff_threshold
            || (input.speed - last.speed).abs() > self.speed_threshold
            || acc < last.acc - self.idm.comf_dec
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn holds_acceleration_below_thresholds() {
        let params = PerceptionParams::default();
        let first = FollowingInput::new(15.0, 40.0, 1.0);
        let (acc, point) = params.respond(&first, None);
        assert_eq!(acc, params.acceleration(&first));

        // 2.5% closer and 0.1 m/s faster goes unnoticed
        let second = FollowingInput::new(15.1, 39.0, 1.1);
        let (held, same) = params.respond(&second, Some(&point));
        assert_eq!(held, acc);
        assert_eq!(same, point);
        assert_ne!(params.acceleration(&second), acc);
    }

    #[test]
    fn acts_once_a_threshold_is_crossed() {
        let params = PerceptionParams::default();
        let (_, point) = params.respond(&FollowingInput::new(15.0, 40.0, 1.0), None);

        for input in [
            FollowingInput::new(15.0, 35.0, 1.0),
            FollowingInput::new(15.0, 40.0, 1.5),
            FollowingInput::new(16.5, 40.0, 1.0),
            FollowingInput::free(15.0),
        ] {
            let (acc, next) = params.respond(&input, Some(&point));
            assert_eq!(acc, params.acceleration(&input));
            assert_eq!(next.acc, acc);
            assert_eq!(next.gap, input.gap);
        }
    }

    #[test]
    fn hard_braking_is_never_put_off() {
        let params = PerceptionParams {
            gap_threshold: 0.5,
            speed_diff_threshold: 10.0,
            ..Default::default()
        };
        let (_, point) = params.respond(&FollowingInput::new(15.0, 40.0, 0.0), None);
        let urgent = FollowingInput::new(15.0, 30.0, 5.0);
        let (acc, _) = params.respond(&urgent, Some(&point));
        assert!(acc < point.acc - params.idm.comf_dec);
        assert_eq!(acc, params.acceleration(&urgent));
    }
}
