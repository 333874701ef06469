use crate::vehicle::VehicleType;
use crate::SegmentId;
use std::collections::VecDeque;
use std::sync::Arc;

/// Feeds queued vehicles onto the start of one lane.
#[derive(Clone, Debug)]
pub(crate) struct Source {
    /// The segment vehicles are inserted onto.
    pub segment: SegmentId,
    /// The lane vehicles are inserted onto.
    pub lane: usize,
    /// Vehicles waiting to enter, in arrival order.
    pub queue: VecDeque<PendingVehicle>,
    /// The number of consecutive steps the head of the queue has been kept waiting.
    pub blocked_steps: u32,
}

/// A vehicle waiting at a source.
#[derive(Clone, Debug)]
pub(crate) struct PendingVehicle {
    pub kind: Arc<VehicleType>,
    /// The speed the vehicle would like to enter at, in m/s.
    pub speed: f64,
    /// The route, starting with the source's segment.
    pub route: Vec<SegmentId>,
}

impl Source {
    pub fn new(segment: SegmentId, lane: usize) -> Self {
        Self {
            segment,
            lane,
            queue: VecDeque::new(),
            blocked_steps: 0,
        }
    }
}

/// The fastest a vehicle may enter behind a leader `gap` m ahead travelling at
/// `leader_vel`, such that it could still stop in time after one step of
/// reaction if the leader braked as hard as possible.
pub(crate) fn safe_entry_speed(gap: f64, leader_vel: f64, max_dec: f64, dt: f64) -> f64 {
    let b = max_dec;
    let disc = b * b * dt * dt + leader_vel * leader_vel + 2.0 * b * gap.max(0.0);
    f64::max(disc.sqrt() - b * dt, 0.0)
}
