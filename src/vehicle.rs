use crate::error::{positive, SimError};
use crate::following::{ActionPoint, CarFollowingModel, FollowingInput};
use crate::lane_change::LaneChangeParams;
use crate::light::LightApproach;
use crate::obstacle::Obstacle;
use crate::util::Interval;
use crate::{SegmentId, VehicleId};
use std::sync::Arc;

/// A simulated vehicle.
#[derive(Clone, Debug)]
pub struct Vehicle {
    /// The vehicle's ID.
    id: VehicleId,
    /// A sequence number, assigned in order of creation.
    number: u64,
    /// The vehicle's type, shared with other vehicles of the same type.
    kind: Arc<VehicleType>,
    /// The segment the vehicle is on.
    segment: SegmentId,
    /// The index of the lane the vehicle is on.
    lane: usize,
    /// The longitudinal position of the front of the vehicle in m.
    pos: f64,
    /// The position of the rear of the vehicle at the end of the previous step.
    prev_rear: f64,
    /// The velocity in m/s.
    vel: f64,
    /// The acceleration in m/s^2.
    acc: f64,
    /// Multiplies the desired speed of the vehicle's car-following model.
    speed_factor: f64,
    /// The segments the vehicle will travel along, including the one it's on.
    route: Vec<SegmentId>,
    /// The index into `route` of the segment the vehicle is on.
    route_idx: usize,
    /// Whether the vehicle is frozen in place.
    frozen: bool,
    /// The number of consecutive steps the vehicle has been held at the end of its segment.
    held_steps: u32,
    /// How the vehicle is responding to the next traffic light, if one is in sight.
    light: Option<LightApproach>,
    /// The driver's last action point, for models with perception thresholds.
    action_point: Option<ActionPoint>,
}

/// The attributes shared by all vehicles of one type.
#[derive(Clone, Debug, PartialEq)]
pub struct VehicleType {
    /// The vehicle length in m.
    length: f64,
    /// The car-following model.
    following: CarFollowingModel,
    /// The lane-changing parameters.
    lane_change: LaneChangeParams,
}

impl Default for VehicleType {
    /// A passenger car using the default IDM and lane-changing parameters.
    fn default() -> Self {
        Self {
            length: 5.0,
            following: CarFollowingModel::default(),
            lane_change: LaneChangeParams::default(),
        }
    }
}

impl VehicleType {
    /// Creates a vehicle type, validating all of its parameters.
    pub fn new(
        length: f64,
        following: CarFollowingModel,
        lane_change: LaneChangeParams,
    ) -> Result<Self, SimError> {
        positive("vehicle type", "length", length)?;
        following.validate()?;
        lane_change.validate()?;
        Ok(Self {
            length,
            following,
            lane_change,
        })
    }

    /// The vehicle length in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// The car-following model.
    pub fn following(&self) -> &CarFollowingModel {
        &self.following
    }

    /// The lane-changing parameters.
    pub fn lane_change(&self) -> &LaneChangeParams {
        &self.lane_change
    }
}

impl Vehicle {
    /// Creates a new vehicle.
    pub(crate) fn new(
        id: VehicleId,
        number: u64,
        kind: Arc<VehicleType>,
        segment: SegmentId,
        lane: usize,
        pos: f64,
        vel: f64,
    ) -> Self {
        let prev_rear = pos - kind.length;
        Self {
            id,
            number,
            kind,
            segment,
            lane,
            pos,
            prev_rear,
            vel,
            acc: 0.0,
            speed_factor: 1.0,
            route: vec![segment],
            route_idx: 0,
            frozen: false,
            held_steps: 0,
            light: None,
            action_point: None,
        }
    }

    /// Gets the vehicle's ID.
    pub fn id(&self) -> VehicleId {
        self.id
    }

    /// The vehicle's sequence number. Numbers increase in order of creation
    /// and are never reused.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// The vehicle's type.
    pub fn kind(&self) -> &Arc<VehicleType> {
        &self.kind
    }

    /// The vehicle's length in m.
    pub fn length(&self) -> f64 {
        self.kind.length
    }

    /// The ID of the segment the vehicle is currently travelling on.
    pub fn segment_id(&self) -> SegmentId {
        self.segment
    }

    /// The index of the lane the vehicle is travelling on. Lane 0 is the rightmost.
    pub fn lane(&self) -> usize {
        self.lane
    }

    /// The longitudinal position of the front of the vehicle in m.
    pub fn pos_front(&self) -> f64 {
        self.pos
    }

    /// The longitudinal position of the rear of the vehicle in m.
    pub fn pos_rear(&self) -> f64 {
        self.pos - self.kind.length
    }

    /// The position of the rear of the vehicle at the end of the previous step.
    pub fn prev_pos_rear(&self) -> f64 {
        self.prev_rear
    }

    /// The longitudinal extent of the vehicle on its lane.
    pub fn extent(&self) -> Interval<f64> {
        Interval::new(self.pos_rear(), self.pos)
    }

    /// The vehicle's velocity in m/s.
    pub fn vel(&self) -> f64 {
        self.vel
    }

    /// The vehicle's acceleration in m/s^2, as computed in the latest step.
    pub fn acc(&self) -> f64 {
        self.acc
    }

    /// The vehicle's desired speed factor.
    pub fn speed_factor(&self) -> f64 {
        self.speed_factor
    }

    /// Whether the vehicle is frozen. [Read more](crate::Simulation::set_vehicle_frozen).
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// The number of consecutive steps the vehicle has been held at the end of
    /// its segment because it could not move on.
    pub fn held_steps(&self) -> u32 {
        self.held_steps
    }

    /// How the vehicle responded to the next traffic light in the latest step.
    pub fn light_approach(&self) -> Option<&LightApproach> {
        self.light.as_ref()
    }

    /// What the driver perceived when they last chose an acceleration,
    /// for models with perception thresholds.
    pub fn action_point(&self) -> Option<&ActionPoint> {
        self.action_point.as_ref()
    }

    /// The vehicle's route, including the segment it's on.
    pub fn route(&self) -> &[SegmentId] {
        &self.route
    }

    /// The segment the vehicle's route continues onto, if any.
    pub fn next_segment(&self) -> Option<SegmentId> {
        self.route.get(self.route_idx + 1).copied()
    }

    /// Whether the rear of the vehicle passed `pos` during the latest step.
    pub fn passed_position(&self, pos: f64) -> bool {
        self.prev_rear <= pos && pos < self.pos_rear()
    }

    /// The input to the car-following model when following `leader`.
    pub(crate) fn following_input(&self, leader: Option<&Obstacle>, speed_limit: f64) -> FollowingInput {
        let input = match leader {
            Some(leader) => FollowingInput::new(self.vel, leader.pos - self.pos, self.vel - leader.vel)
                .with_leader_acc(leader.acc),
            None => FollowingInput::free(self.vel),
        };
        input
            .with_speed_limit(speed_limit)
            .with_speed_factor(self.speed_factor)
    }

    /// The acceleration the vehicle's car-following model gives when following `leader`.
    pub(crate) fn acc_behind(&self, leader: Option<&Obstacle>, speed_limit: f64) -> f64 {
        let input = self.following_input(leader, speed_limit);
        self.kind.following.acceleration(&input)
    }

    /// The acceleration the driver actually chooses when following `leader`,
    /// which may lag behind [Vehicle::acc_behind] for drivers with perception
    /// thresholds. Also returns the action point to remember.
    pub(crate) fn respond_behind(&self, leader: Option<&Obstacle>, speed_limit: f64) -> (f64, Option<ActionPoint>) {
        let input = self.following_input(leader, speed_limit);
        self.kind.following.respond(&input, self.action_point.as_ref())
    }

    /// The vehicle as seen by a follower whose lane position is offset by `offset`.
    pub(crate) fn as_obstacle(&self, offset: f64) -> Obstacle {
        Obstacle {
            pos: self.pos_rear() + offset,
            vel: self.vel,
            acc: self.acc,
            vehicle: Some(self.id),
        }
    }

    pub(crate) fn set_acc(&mut self, acc: f64) {
        self.acc = acc;
    }

    pub(crate) fn set_action_point(&mut self, point: Option<ActionPoint>) {
        self.action_point = point;
    }

    pub(crate) fn set_light_approach(&mut self, light: Option<LightApproach>) {
        self.light = light;
    }

    pub(crate) fn set_speed_factor(&mut self, factor: f64) {
        self.speed_factor = factor;
    }

    pub(crate) fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    /// Sets the vehicle's route. The first segment must be the one it's on.
    pub(crate) fn set_route(&mut self, route: Vec<SegmentId>) {
        self.route = route;
        self.route_idx = 0;
    }

    pub(crate) fn set_lane(&mut self, lane: usize) {
        self.lane = lane;
    }

    /// Integrates the vehicle's velocity and position over `dt` seconds
    /// using a ballistic update. A vehicle which would reverse stops instead.
    pub(crate) fn integrate(&mut self, dt: f64) {
        self.prev_rear = self.pos_rear();
        let vel = self.vel + self.acc * dt;
        if vel < 0.0 {
            // The vehicle comes to a halt part way through the step
            self.pos -= 0.5 * self.vel * self.vel / self.acc;
            self.vel = 0.0;
        } else {
            self.pos += (self.vel + 0.5 * self.acc * dt) * dt;
            self.vel = vel;
        }
    }

    /// Moves the vehicle onto the start of another segment, given the length
    /// of the segment it is leaving.
    pub(crate) fn advance(&mut self, length: f64, segment: SegmentId, lane: usize) {
        self.pos -= length;
        self.prev_rear -= length;
        if self.next_segment() == Some(segment) {
            self.route_idx += 1;
        } else {
            self.route = vec![segment];
            self.route_idx = 0;
        }
        self.segment = segment;
        self.lane = lane;
        self.held_steps = 0;
        self.light = None;
    }

    /// Holds the vehicle at the position `end`, bringing it to a standstill.
    pub(crate) fn hold(&mut self, end: f64) -> u32 {
        self.stop_at(end);
        self.held_steps += 1;
        self.held_steps
    }

    /// Brings the vehicle to a standstill with its front no further than `pos`.
    pub(crate) fn stop_at(&mut self, pos: f64) {
        self.pos = f64::min(self.pos, pos);
        self.prev_rear = f64::min(self.prev_rear, self.pos_rear());
        self.vel = 0.0;
    }

    pub(crate) fn release(&mut self) {
        self.held_steps = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use slotmap::KeyData;

    fn vehicle(pos: f64, vel: f64) -> Vehicle {
        let segment = SegmentId::from(KeyData::from_ffi(1));
        let id = VehicleId::from(KeyData::from_ffi(1));
        Vehicle::new(id, 0, Arc::new(VehicleType::default()), segment, 0, pos, vel)
    }

    #[test]
    fn integration_never_reverses() {
        let mut veh = vehicle(10.0, 2.0);
        veh.set_acc(-9.0);
        veh.integrate(0.5);
        assert_eq!(veh.vel(), 0.0);
        // Stops after v^2 / 2b
        assert!((veh.pos_front() - (10.0 + 4.0 / 18.0)).abs() < 1e-12);
        assert!(veh.pos_rear() >= veh.prev_pos_rear());
    }

    #[test]
    fn ballistic_update() {
        let mut veh = vehicle(0.0, 10.0);
        veh.set_acc(2.0);
        veh.integrate(0.5);
        assert!((veh.vel() - 11.0).abs() < 1e-12);
        assert!((veh.pos_front() - 5.25).abs() < 1e-12);
    }

    #[test]
    fn passed_position_uses_rear() {
        let mut veh = vehicle(10.0, 10.0);
        veh.integrate(1.0);
        // Rear went from 5 to 15
        assert!(veh.passed_position(5.0));
        assert!(veh.passed_position(14.9));
        assert!(!veh.passed_position(15.0));
        assert!(!veh.passed_position(4.9));
    }

    #[test]
    fn stopping_short_is_not_backward_motion() {
        let mut veh = vehicle(10.0, 10.0);
        veh.integrate(1.0);
        veh.stop_at(12.0);
        assert_eq!(veh.pos_front(), 12.0);
        assert_eq!(veh.vel(), 0.0);
        assert!(veh.pos_rear() >= veh.prev_pos_rear());

        // Already behind the limit, so only the speed changes
        let mut veh = vehicle(10.0, 10.0);
        veh.stop_at(50.0);
        assert_eq!(veh.pos_front(), 10.0);
        assert_eq!(veh.held_steps(), 0);
    }

    #[test]
    fn invalid_type_is_rejected() {
        let result = VehicleType::new(
            -1.0,
            CarFollowingModel::default(),
            LaneChangeParams::default(),
        );
        assert!(matches!(
            result,
            Err(SimError::InvalidParameter { name: "length", .. })
        ));
    }
}
