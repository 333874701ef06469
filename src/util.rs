//! Miscellaneous utility structs.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A closed interval along a lane, such as the stretch a vehicle occupies.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Interval<T> {
    pub min: T,
    pub max: T,
}

impl<T> Interval<T> {
    /// Creates a new interval.
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }
}

impl<T: PartialOrd> Interval<T> {
    /// Returns true if the interval contains the value, including its end points.
    pub fn contains(&self, value: T) -> bool {
        self.min <= value && value <= self.max
    }
}

impl Interval<f64> {
    /// The free space between two stretches of lane,
    /// negative when they overlap.
    pub fn clearance_with(&self, other: &Self) -> f64 {
        f64::max(other.min - self.max, self.min - other.max)
    }
}

#[cfg(test)]
mod test {
    use super::Interval;

    #[test]
    fn contains_end_points() {
        let stretch = Interval::new(10.0, 20.0);
        assert!(stretch.contains(10.0));
        assert!(stretch.contains(20.0));
        assert!(!stretch.contains(20.000001));
    }

    #[test]
    fn clearance_between_vehicles() {
        let rear = Interval::new(0.0, 5.0);
        assert_eq!(rear.clearance_with(&Interval::new(7.0, 12.0)), 2.0);
        assert_eq!(Interval::new(7.0, 12.0).clearance_with(&rear), 2.0);
        assert_eq!(rear.clearance_with(&Interval::new(4.0, 9.0)), -1.0);
    }
}
