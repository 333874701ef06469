use crate::VehicleId;

/// Represents a vehicle, stop line or other object
/// a vehicle may need to follow or stop before reaching.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct Obstacle {
    /// The longitudinal position of the rear of the obstacle in m,
    /// measured along the follower's lane.
    pub pos: f64,
    /// The velocity of the obstacle in m/s.
    pub vel: f64,
    /// The acceleration of the obstacle in m/s^2.
    pub acc: f64,
    /// The vehicle represented by the obstacle, if any.
    pub vehicle: Option<VehicleId>,
}

impl Obstacle {
    /// A stationary obstacle such as a stop line.
    pub fn stop_line(pos: f64) -> Self {
        Self {
            pos,
            vel: 0.0,
            acc: 0.0,
            vehicle: None,
        }
    }

    /// Returns whichever obstacle is closer.
    pub fn nearest(a: Option<Self>, b: Option<Self>) -> Option<Self> {
        match (a, b) {
            (Some(a), Some(b)) => Some(if b.pos < a.pos { b } else { a }),
            (a, b) => a.or(b),
        }
    }
}
