use crate::config::SimulationConfig;
use crate::error::SimError;
use crate::obstacle::Obstacle;
use crate::vehicle::Vehicle;
use crate::{SegmentId, TrafficLightId};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A traffic light at a fixed position on a segment.
#[derive(Clone, Debug)]
pub struct TrafficLight {
    /// The segment the light stands on.
    segment: SegmentId,
    /// The position of the stop line along the segment, in m.
    pos: f64,
    /// The current phase.
    phase: LightPhase,
    /// The time since the current phase was entered, in s.
    since: f64,
    /// The plan which drives the light's phases, if any.
    cycle: Option<FixedCycle>,
}

/// The phase of a traffic light.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LightPhase {
    Green,
    /// The amber phase between green and red.
    GreenToRed,
    Red,
}

/// A fixed-time signal plan cycling green, amber and red.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FixedCycle {
    /// The duration of the green phase in s.
    pub green: f64,
    /// The duration of the amber phase in s.
    pub amber: f64,
    /// The duration of the red phase in s.
    pub red: f64,
}

/// How a vehicle responds to the traffic light ahead of it.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LightApproach {
    /// The light in question.
    pub light: TrafficLightId,
    /// Whether the driver intends to stop for the light.
    pub consider: bool,
    /// The acceleration needed to stop at the light, never positive.
    pub approach_acc: f64,
    /// The distance from the vehicle's front to the stop line, in m.
    pub distance: f64,
}

impl TrafficLight {
    pub(crate) fn new(segment: SegmentId, pos: f64, phase: LightPhase) -> Self {
        Self {
            segment,
            pos,
            phase,
            since: 0.0,
            cycle: None,
        }
    }

    /// The segment the light stands on.
    pub fn segment_id(&self) -> SegmentId {
        self.segment
    }

    /// The position of the stop line along the segment, in m.
    pub fn pos(&self) -> f64 {
        self.pos
    }

    /// The current phase.
    pub fn phase(&self) -> LightPhase {
        self.phase
    }

    /// The signal plan driving the light, if any.
    pub fn cycle(&self) -> Option<&FixedCycle> {
        self.cycle.as_ref()
    }

    pub(crate) fn set_phase(&mut self, phase: LightPhase) {
        if phase != self.phase {
            self.phase = phase;
            self.since = 0.0;
        }
    }

    pub(crate) fn set_cycle(&mut self, cycle: Option<FixedCycle>) {
        self.cycle = cycle;
    }

    /// Advances the light's signal plan by `dt` seconds.
    pub(crate) fn step(&mut self, dt: f64) {
        let Some(cycle) = self.cycle else {
            return;
        };
        self.since += dt;
        while self.since >= cycle.duration(self.phase) {
            self.since -= cycle.duration(self.phase);
            self.phase = cycle.next(self.phase);
        }
    }

    /// Determines how the vehicle should respond to this light.
    ///
    /// The light is treated as a stopped vehicle at the stop line. A driver
    /// who could only stop by braking harder than is comfortable on amber,
    /// or who cannot stop in time at all, carries on through.
    pub(crate) fn approach(
        &self,
        id: TrafficLightId,
        vehicle: &Vehicle,
        speed_limit: f64,
        config: &SimulationConfig,
    ) -> LightApproach {
        let distance = self.pos - vehicle.pos_front();
        let mut approach = LightApproach {
            light: id,
            consider: false,
            approach_acc: 0.0,
            distance,
        };
        if distance < 0.0 || distance > config.light_sight_distance || self.phase == LightPhase::Green {
            return approach;
        }

        let stop_line = Obstacle::stop_line(self.pos);
        approach.approach_acc = f64::min(vehicle.acc_behind(Some(&stop_line), speed_limit), 0.0);
        if approach.approach_acc < 0.0 {
            let too_harsh = self.phase == LightPhase::GreenToRed
                && -approach.approach_acc > config.amber_braking_threshold;
            let vel = vehicle.vel();
            let stopping_distance = vel * vel / (2.0 * config.max_deceleration);
            let cannot_stop = stopping_distance > distance;
            approach.consider = !(too_harsh || cannot_stop);
        }
        approach
    }
}

impl FixedCycle {
    /// Checks the phase durations are valid.
    pub fn validate(&self) -> Result<(), SimError> {
        let durations = [self.green, self.amber, self.red];
        if durations.iter().any(|d| !d.is_finite() || *d < 0.0) {
            return Err(SimError::invalid("signal plan", "duration", "must not be negative"));
        }
        if self.green <= 0.0 || self.red <= 0.0 {
            return Err(SimError::invalid(
                "signal plan",
                "duration",
                "green and red must be positive",
            ));
        }
        Ok(())
    }

    /// The total length of the cycle in s.
    pub fn period(&self) -> f64 {
        self.green + self.amber + self.red
    }

    fn duration(&self, phase: LightPhase) -> f64 {
        match phase {
            LightPhase::Green => self.green,
            LightPhase::GreenToRed => self.amber,
            LightPhase::Red => self.red,
        }
    }

    fn next(&self, phase: LightPhase) -> LightPhase {
        match phase {
            LightPhase::Green => LightPhase::GreenToRed,
            LightPhase::GreenToRed => LightPhase::Red,
            LightPhase::Red => LightPhase::Green,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vehicle::VehicleType;
    use crate::VehicleId;
    use slotmap::KeyData;
    use std::sync::Arc;

    fn ids() -> (SegmentId, TrafficLightId, VehicleId) {
        (
            SegmentId::from(KeyData::from_ffi(1)),
            TrafficLightId::from(KeyData::from_ffi(1)),
            VehicleId::from(KeyData::from_ffi(1)),
        )
    }

    fn vehicle_at(pos: f64, vel: f64) -> Vehicle {
        let (segment, _, id) = ids();
        Vehicle::new(id, 0, Arc::new(VehicleType::default()), segment, 0, pos, vel)
    }

    #[test]
    fn stops_for_red_when_possible() {
        let (segment, light_id, _) = ids();
        let config = SimulationConfig::default();
        let light = TrafficLight::new(segment, 100.0, LightPhase::Red);
        // 50 m to stop from 20 m/s needs 4 m/s^2, more than is comfortable
        let approach = light.approach(light_id, &vehicle_at(50.0, 20.0), f64::INFINITY, &config);
        assert!(approach.consider);
        assert!(approach.approach_acc < 0.0);
        assert_eq!(approach.distance, 50.0);
    }

    #[test]
    fn runs_red_when_stopping_is_impossible() {
        let (segment, light_id, _) = ids();
        let config = SimulationConfig::default();
        let light = TrafficLight::new(segment, 100.0, LightPhase::Red);
        // Stopping from 20 m/s at 9 m/s^2 takes over 22 m
        let approach = light.approach(light_id, &vehicle_at(85.0, 20.0), f64::INFINITY, &config);
        assert!(!approach.consider);
    }

    #[test]
    fn runs_amber_when_braking_is_harsh() {
        let (segment, light_id, _) = ids();
        let config = SimulationConfig::default();
        let light = TrafficLight::new(segment, 100.0, LightPhase::GreenToRed);
        let approach = light.approach(light_id, &vehicle_at(50.0, 20.0), f64::INFINITY, &config);
        assert!(approach.approach_acc < -config.amber_braking_threshold);
        assert!(!approach.consider);

        // Far enough away, the same driver stops
        let approach = light.approach(light_id, &vehicle_at(-60.0, 20.0), f64::INFINITY, &config);
        assert!(approach.consider);
    }

    #[test]
    fn ignores_green_behind_and_distant_lights() {
        let (segment, light_id, _) = ids();
        let config = SimulationConfig::default();
        let green = TrafficLight::new(segment, 100.0, LightPhase::Green);
        assert!(!green.approach(light_id, &vehicle_at(50.0, 10.0), f64::INFINITY, &config).consider);

        let red = TrafficLight::new(segment, 100.0, LightPhase::Red);
        assert!(!red.approach(light_id, &vehicle_at(101.0, 10.0), f64::INFINITY, &config).consider);
        let far = 100.0 - config.light_sight_distance - 1.0;
        assert!(!red.approach(light_id, &vehicle_at(far, 10.0), f64::INFINITY, &config).consider);
    }

    #[test]
    fn fixed_cycle_steps_through_phases() {
        let (segment, _, _) = ids();
        let mut light = TrafficLight::new(segment, 0.0, LightPhase::Green);
        light.set_cycle(Some(FixedCycle {
            green: 10.0,
            amber: 3.0,
            red: 7.0,
        }));
        let mut phases = vec![];
        for _ in 0..20 {
            light.step(1.0);
            phases.push(light.phase());
        }
        assert_eq!(phases[8], LightPhase::Green);
        assert_eq!(phases[9], LightPhase::GreenToRed);
        assert_eq!(phases[12], LightPhase::Red);
        assert_eq!(phases[19], LightPhase::Green);
    }
}
