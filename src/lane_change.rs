//! The MOBIL lane-changing criterion.

use crate::error::{non_negative, positive, SimError};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The parameters of the lane-changing model.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LaneChangeParams {
    /// The strongest deceleration a lane change may impose on the new
    /// follower, a positive number in m/s^2.
    pub safe_deceleration: f64,
    /// The smallest acceptable gap to the new leader and new follower, in m.
    pub min_gap: f64,
    /// The acceleration advantage needed before changing lanes, in m/s^2.
    pub threshold: f64,
    /// An acceleration bonus for moving to the right, and penalty for
    /// moving to the left, in m/s^2.
    pub right_bias: f64,
    /// How much the driver weighs the disadvantage to the new follower.
    pub politeness: f64,
    /// Restricts overtaking on the left, if set.
    pub overtaking: Option<OvertakingRule>,
}

/// Forbids changing left just to pass a slower vehicle unless travelling fast.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OvertakingRule {
    /// Only above this speed, in m/s, may a vehicle move left to pass a slower leader.
    pub speed_threshold: f64,
}

/// The direction of a lane change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Direction {
    Right,
    Left,
}

/// A vehicle's circumstances on its current lane.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Situation {
    /// The vehicle's speed in m/s.
    pub speed: f64,
    /// The vehicle's acceleration if it stays on its lane.
    pub acc: f64,
    /// The speed of the vehicle's current leader, if it has one.
    pub leader_speed: Option<f64>,
}

/// The consequences of moving to one adjacent lane.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Candidate {
    pub direction: Direction,
    /// The index of the target lane.
    pub lane: usize,
    /// The gap to the new leader, or infinity.
    pub gap_ahead: f64,
    /// The gap to the new follower, or infinity.
    pub gap_behind: f64,
    /// The vehicle's acceleration on the target lane.
    pub acc: f64,
    /// The new follower's acceleration before and after the change.
    pub follower_acc: Option<(f64, f64)>,
}

impl Default for LaneChangeParams {
    fn default() -> Self {
        Self {
            safe_deceleration: 4.0,
            min_gap: 2.0,
            threshold: 0.1,
            right_bias: 0.1,
            politeness: 0.1,
            overtaking: None,
        }
    }
}

impl LaneChangeParams {
    /// Checks that the parameters are valid.
    pub fn validate(&self) -> Result<(), SimError> {
        const MODEL: &str = "MOBIL";
        positive(MODEL, "safe_deceleration", self.safe_deceleration)?;
        non_negative(MODEL, "min_gap", self.min_gap)?;
        non_negative(MODEL, "threshold", self.threshold)?;
        non_negative(MODEL, "politeness", self.politeness)?;
        if !self.right_bias.is_finite() {
            return Err(SimError::invalid(MODEL, "right_bias", "must be finite"));
        }
        if let Some(rule) = self.overtaking {
            non_negative(MODEL, "speed_threshold", rule.speed_threshold)?;
        }
        Ok(())
    }

    /// Whether the lane change leaves enough room and does not force the new
    /// follower to brake harder than the safe deceleration.
    pub(crate) fn is_safe(&self, candidate: &Candidate) -> bool {
        if candidate.gap_ahead <= self.min_gap || candidate.gap_behind <= self.min_gap {
            return false;
        }
        match candidate.follower_acc {
            Some((_, acc_new)) => acc_new >= -self.safe_deceleration,
            None => true,
        }
    }

    /// The acceleration advantage of the lane change, net of the threshold.
    /// The change is worthwhile if this is positive.
    pub(crate) fn incentive(&self, situation: &Situation, candidate: &Candidate) -> f64 {
        let own_gain = candidate.acc - situation.acc;
        let follower_loss = candidate
            .follower_acc
            .map(|(old, new)| old - new)
            .unwrap_or(0.0);
        let bias = match candidate.direction {
            Direction::Right => self.right_bias,
            Direction::Left => -self.right_bias,
        };
        own_gain - self.politeness * follower_loss + bias - self.threshold
    }

    /// Whether overtaking rules permit a change in `direction`.
    pub(crate) fn overtaking_allowed(&self, situation: &Situation, direction: Direction) -> bool {
        let Some(rule) = self.overtaking else {
            return true;
        };
        let passing_slower = situation
            .leader_speed
            .map_or(false, |vel| vel < situation.speed);
        direction == Direction::Right || !passing_slower || situation.speed > rule.speed_threshold
    }

    /// Picks the first candidate, in the given order, which is permitted,
    /// safe and worthwhile.
    pub(crate) fn choose<'a>(
        &self,
        situation: &Situation,
        candidates: &'a [Candidate],
    ) -> Option<&'a Candidate> {
        candidates.iter().find(|candidate| {
            self.overtaking_allowed(situation, candidate.direction)
                && self.is_safe(candidate)
                && self.incentive(situation, candidate) > 0.0
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn stuck_behind_truck() -> Situation {
        Situation {
            speed: 12.0,
            acc: -2.0,
            leader_speed: Some(8.0),
        }
    }

    fn open_lane(direction: Direction) -> Candidate {
        Candidate {
            direction,
            lane: 1,
            gap_ahead: f64::INFINITY,
            gap_behind: f64::INFINITY,
            acc: 0.8,
            follower_acc: None,
        }
    }

    #[test]
    fn changes_into_open_lane() {
        let params = LaneChangeParams::default();
        let candidates = [open_lane(Direction::Left)];
        let choice = params.choose(&stuck_behind_truck(), &candidates);
        assert_eq!(choice.map(|c| c.lane), Some(1));
    }

    #[test]
    fn tight_follower_vetoes() {
        let params = LaneChangeParams::default();
        let candidates = [Candidate {
            gap_behind: 1.0,
            follower_acc: Some((0.5, 0.4)),
            ..open_lane(Direction::Left)
        }];
        assert!(params.choose(&stuck_behind_truck(), &candidates).is_none());
    }

    #[test]
    fn hard_braking_follower_vetoes() {
        let params = LaneChangeParams::default();
        let candidates = [Candidate {
            gap_behind: 20.0,
            follower_acc: Some((0.5, -5.0)),
            ..open_lane(Direction::Left)
        }];
        assert!(params.choose(&stuck_behind_truck(), &candidates).is_none());
    }

    #[test]
    fn politeness_weighs_follower_loss() {
        let selfish = LaneChangeParams {
            politeness: 0.0,
            ..Default::default()
        };
        let polite = LaneChangeParams {
            politeness: 1.0,
            ..Default::default()
        };
        let candidate = Candidate {
            gap_behind: 20.0,
            follower_acc: Some((1.0, -3.0)),
            ..open_lane(Direction::Left)
        };
        let situation = stuck_behind_truck();
        assert!(selfish.incentive(&situation, &candidate) > 0.0);
        assert!(polite.incentive(&situation, &candidate) < 0.0);
    }

    #[test]
    fn prefers_right_when_both_qualify() {
        let params = LaneChangeParams::default();
        let candidates = [
            Candidate {
                lane: 0,
                ..open_lane(Direction::Right)
            },
            Candidate {
                lane: 2,
                ..open_lane(Direction::Left)
            },
        ];
        let choice = params.choose(&stuck_behind_truck(), &candidates);
        assert_eq!(choice.map(|c| c.direction), Some(Direction::Right));
    }

    #[test]
    fn overtaking_rule_blocks_slow_left_pass() {
        let params = LaneChangeParams {
            overtaking: Some(OvertakingRule {
                speed_threshold: 16.0,
            }),
            ..Default::default()
        };
        let candidates = [open_lane(Direction::Left)];
        assert!(params.choose(&stuck_behind_truck(), &candidates).is_none());

        let fast = Situation {
            speed: 20.0,
            ..stuck_behind_truck()
        };
        assert!(params.choose(&fast, &candidates).is_some());
    }

    #[test]
    fn no_incentive_on_free_road() {
        let params = LaneChangeParams::default();
        let situation = Situation {
            speed: 20.0,
            acc: 0.5,
            leader_speed: None,
        };
        let candidate = Candidate {
            acc: 0.5,
            ..open_lane(Direction::Left)
        };
        assert!(params.incentive(&situation, &candidate) < 0.0);
    }
}
