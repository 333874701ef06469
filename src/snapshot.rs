//! Immutable views of the simulation state, handed out after every step.

use crate::light::LightPhase;
use crate::vehicle::Vehicle;
use crate::{SegmentId, TrafficLightId, VehicleId};
#[cfg(feature = "serde")]
use serde::Serialize;
use std::sync::mpsc::Sender;
use std::sync::Arc;

/// The state of the whole network at the end of a step.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct StepSnapshot {
    /// The number of steps completed.
    pub step: u64,
    /// The simulated time in s.
    pub time: f64,
    /// Every lane of every segment, in segment creation order.
    pub lanes: Vec<LaneSnapshot>,
    pub lights: Vec<LightSnapshot>,
}

/// The vehicles on one lane, leader first.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct LaneSnapshot {
    pub segment: SegmentId,
    pub lane: usize,
    pub vehicles: Vec<VehicleState>,
}

/// The kinematic state of a vehicle.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct VehicleState {
    pub id: VehicleId,
    pub number: u64,
    /// Position of the front of the vehicle in m.
    pub pos: f64,
    /// The vehicle length in m.
    pub length: f64,
    /// Velocity in m/s.
    pub vel: f64,
    /// Acceleration in m/s^2.
    pub acc: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct LightSnapshot {
    pub id: TrafficLightId,
    pub segment: SegmentId,
    pub pos: f64,
    pub phase: LightPhase,
}

/// What a consumption model needs to know about a vehicle.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct VehicleDynamics {
    /// Speed in m/s.
    pub speed: f64,
    /// Acceleration in m/s^2.
    pub acceleration: f64,
    /// The gradient of the segment the vehicle is on, if known.
    pub gradient: Option<f64>,
}

impl From<&Vehicle> for VehicleState {
    fn from(vehicle: &Vehicle) -> Self {
        Self {
            id: vehicle.id(),
            number: vehicle.number(),
            pos: vehicle.pos_front(),
            length: vehicle.length(),
            vel: vehicle.vel(),
            acc: vehicle.acc(),
        }
    }
}

/// Receives a snapshot at the end of every successful step.
///
/// Sinks are registered with [Simulation::add_sink](crate::Simulation::add_sink)
/// and finished when the simulation is dropped.
pub trait SnapshotSink {
    /// Called once per step, after every phase has completed.
    fn on_step(&mut self, snapshot: Arc<StepSnapshot>);

    /// Called once when the simulation is dropped.
    fn finish(&mut self) {}
}

impl SnapshotSink for Vec<Arc<StepSnapshot>> {
    fn on_step(&mut self, snapshot: Arc<StepSnapshot>) {
        self.push(snapshot);
    }
}

impl SnapshotSink for Sender<Arc<StepSnapshot>> {
    fn on_step(&mut self, snapshot: Arc<StepSnapshot>) {
        if self.send(snapshot).is_err() {
            log::trace!("snapshot receiver has hung up");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc::channel;

    fn empty(step: u64) -> Arc<StepSnapshot> {
        Arc::new(StepSnapshot {
            step,
            time: step as f64,
            lanes: vec![],
            lights: vec![],
        })
    }

    #[test]
    fn vec_collects_snapshots() {
        let mut sink: Vec<Arc<StepSnapshot>> = vec![];
        sink.on_step(empty(1));
        sink.on_step(empty(2));
        assert_eq!(sink.iter().map(|s| s.step).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn sender_forwards_and_tolerates_hang_up() {
        let (mut tx, rx) = channel();
        tx.on_step(empty(1));
        assert_eq!(rx.recv().map(|s| s.step), Ok(1));
        drop(rx);
        tx.on_step(empty(2));
    }
}
