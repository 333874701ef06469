use crate::error::SimError;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The fixed configuration of a [Simulation](crate::Simulation).
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimulationConfig {
    /// The fixed time step in s.
    pub time_step: f64,
    /// The strongest deceleration any vehicle can apply, a positive number in m/s^2.
    pub max_deceleration: f64,
    /// How far ahead a driver can see a traffic light, in m.
    pub light_sight_distance: f64,
    /// Drivers ignore an amber light if stopping would need a deceleration
    /// stronger than this, a positive number in m/s^2.
    pub amber_braking_threshold: f64,
    /// The smallest gap in m between a source's new vehicle and the vehicle ahead of it.
    pub min_insertion_gap: f64,
    /// The overlap in m tolerated between neighbouring vehicles before the
    /// lane invariant is considered broken.
    pub jam_distance: f64,
    /// The number of steps a vehicle may be held at a boundary (or a source may
    /// be blocked) before a warning is reported.
    pub stuck_warning_steps: u32,
    /// Whether to validate lane invariants after every phase.
    pub check_invariants: bool,
    /// Whether vehicles may change lanes.
    pub lane_changes: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            time_step: 0.25,
            max_deceleration: 9.0,
            light_sight_distance: 200.0,
            amber_braking_threshold: 4.0,
            min_insertion_gap: 2.0,
            jam_distance: 1e-6,
            stuck_warning_steps: 400,
            check_invariants: true,
            lane_changes: true,
        }
    }
}

impl SimulationConfig {
    /// Checks that the configuration is usable.
    pub fn validate(&self) -> Result<(), SimError> {
        let positive = [
            ("time_step", self.time_step),
            ("max_deceleration", self.max_deceleration),
            ("light_sight_distance", self.light_sight_distance),
            ("amber_braking_threshold", self.amber_braking_threshold),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(SimError::Configuration(format!(
                    "`{name}` must be positive, got {value}"
                )));
            }
        }
        let non_negative = [
            ("min_insertion_gap", self.min_insertion_gap),
            ("jam_distance", self.jam_distance),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(SimError::Configuration(format!(
                    "`{name}` must not be negative, got {value}"
                )));
            }
        }
        if self.stuck_warning_steps == 0 {
            return Err(SimError::Configuration(
                "`stuck_warning_steps` must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Parses and validates a configuration from JSON. Every field must be present.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self, SimError> {
        let config: Self =
            serde_json::from_str(json).map_err(|err| SimError::Configuration(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_time_step() {
        let config = SimulationConfig {
            time_step: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SimError::Configuration(_))));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_requires_every_field() {
        let err = SimulationConfig::from_json(r#"{ "time_step": 0.5 }"#).unwrap_err();
        assert!(matches!(err, SimError::Configuration(_)));

        let json = serde_json::to_string(&SimulationConfig::default()).unwrap();
        assert_eq!(
            SimulationConfig::from_json(&json).unwrap(),
            SimulationConfig::default()
        );
    }
}
