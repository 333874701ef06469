use crate::config::SimulationConfig;
use crate::error::{non_negative, SimError, Violation};
use crate::lane_change::{Candidate, Direction, Situation};
use crate::light::{FixedCycle, LightPhase, TrafficLight};
use crate::obstacle::Obstacle;
use crate::segment::{Connection, RoadSegment, SegmentAttributes};
use crate::snapshot::{
    LaneSnapshot, LightSnapshot, SnapshotSink, StepSnapshot, VehicleDynamics, VehicleState,
};
use crate::source::{safe_entry_speed, PendingVehicle, Source};
use crate::util::Interval;
use crate::vehicle::{Vehicle, VehicleType};
use crate::{LightSet, SegmentId, SegmentSet, SourceId, TrafficLightId, VehicleId, VehicleSet};
use arrayvec::ArrayVec;
use itertools::Itertools;
use log::{debug, error, trace, warn};
use pathfinding::directed::dijkstra::dijkstra;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use slotmap::SlotMap;
use std::sync::Arc;

/// Randomised desired speed factors are clamped to this range.
const SPEED_FACTOR_RANGE: (f64, f64) = (0.75, 1.25);
/// A vehicle stopped within this distance of the end of a dead-end lane, in m,
/// is held there.
const DEAD_END_REACH: f64 = 5.0;
/// Vehicles slower than this, in m/s, count as stopped.
const STOPPED_SPEED: f64 = 0.1;

/// A traffic simulation.
pub struct Simulation {
    /// The fixed configuration.
    config: SimulationConfig,
    /// The road segments in the network.
    segments: SegmentSet,
    /// The traffic lights.
    lights: LightSet,
    /// The vehicles being simulated.
    vehicles: VehicleSet,
    /// The sources which feed vehicles into the network.
    sources: SlotMap<SourceId, Source>,
    /// Receivers of the per-step snapshots.
    sinks: Vec<Box<dyn SnapshotSink>>,
    /// The number of completed steps.
    step: u64,
    /// The simulated time in s.
    time: f64,
    /// The next vehicle sequence number.
    seq: u64,
    /// The step at which the simulation was aborted, if it has been.
    aborted: Option<u64>,
}

/// What happened during a single step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepReport {
    /// The number of completed steps, including this one.
    pub step: u64,
    /// The simulated time at the end of the step, in s.
    pub time: f64,
    /// The lane changes made, in the order they were made.
    pub lane_changes: Vec<LaneChangeEvent>,
    /// What happened to vehicles reaching the end of their segment.
    pub boundary: Vec<BoundaryEvent>,
    /// What each non-empty source did.
    pub sources: Vec<SourceEvent>,
}

/// A vehicle moved to an adjacent lane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LaneChangeEvent {
    pub vehicle: VehicleId,
    pub segment: SegmentId,
    pub from_lane: usize,
    pub to_lane: usize,
    pub direction: Direction,
}

/// The outcome for a vehicle which reached the end of its segment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BoundaryEvent {
    /// The vehicle moved onto the start of the next segment.
    Transferred {
        vehicle: VehicleId,
        from: SegmentId,
        to: SegmentId,
        lane: usize,
    },
    /// The vehicle left the network at a sink.
    Exited { vehicle: VehicleId, segment: SegmentId },
    /// The vehicle could not move on and was stopped at the end of its segment.
    Held {
        vehicle: VehicleId,
        segment: SegmentId,
        /// The number of consecutive steps the vehicle has been held.
        steps: u32,
        reason: HoldReason,
    },
}

/// Why a vehicle was held at the end of its segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HoldReason {
    /// Nothing connects the vehicle's lane to where it is going.
    NoConnection,
    /// The start of the target lane is occupied.
    Blocked,
}

/// What a source did during a step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SourceEvent {
    /// The vehicle at the head of the queue entered the network.
    Inserted { source: SourceId, vehicle: VehicleId },
    /// There was no room for the vehicle at the head of the queue.
    Deferred {
        source: SourceId,
        /// The number of vehicles waiting.
        waiting: usize,
        /// The number of consecutive steps the head of the queue has waited.
        blocked_steps: u32,
    },
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            config: SimulationConfig::default(),
            segments: SegmentSet::default(),
            lights: LightSet::default(),
            vehicles: VehicleSet::default(),
            sources: SlotMap::default(),
            sinks: vec![],
            step: 0,
            time: 0.0,
            seq: 0,
            aborted: None,
        }
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        for sink in &mut self.sinks {
            sink.finish();
        }
    }
}

impl Simulation {
    /// Creates a new simulation with the given configuration.
    pub fn new(config: SimulationConfig) -> Result<Self, SimError> {
        config.validate()?;
        let mut sim = Self::default();
        sim.config = config;
        Ok(sim)
    }

    /// The simulation's configuration.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Adds a road segment to the network.
    pub fn add_segment(&mut self, attributes: &SegmentAttributes) -> Result<SegmentId, SimError> {
        attributes.validate()?;
        Ok(self
            .segments
            .insert_with_key(|id| RoadSegment::new(id, attributes)))
    }

    /// Specifies that the end of lane `from_lane` of segment `from` connects to
    /// the start of lane `to_lane` of segment `to`.
    pub fn add_connection(
        &mut self,
        from: SegmentId,
        from_lane: usize,
        to: SegmentId,
        to_lane: usize,
    ) -> Result<(), SimError> {
        self.check_lane(from, from_lane)?;
        self.check_lane(to, to_lane)?;
        self.segments[from].add_connection(Connection {
            from_lane,
            to_segment: to,
            to_lane,
        });
        self.segments[to].add_predecessor(from);
        Ok(())
    }

    /// Adds a traffic light with its stop line at `pos` along the given segment.
    pub fn add_traffic_light(
        &mut self,
        segment: SegmentId,
        pos: f64,
        phase: LightPhase,
    ) -> Result<TrafficLightId, SimError> {
        let length = self.get_segment(segment).ok_or(SimError::UnknownSegment(segment))?.length();
        if !Interval::new(0.0, length).contains(pos) {
            return Err(SimError::invalid(
                "traffic light",
                "pos",
                format!("{pos} m lies outside the segment"),
            ));
        }
        let id = self.lights.insert(TrafficLight::new(segment, pos, phase));
        self.segments[segment].add_light(pos, id);
        Ok(id)
    }

    /// Sets the phase of a traffic light.
    pub fn set_light_phase(&mut self, id: TrafficLightId, phase: LightPhase) -> Result<(), SimError> {
        let light = self.lights.get_mut(id).ok_or(SimError::UnknownLight(id))?;
        light.set_phase(phase);
        Ok(())
    }

    /// Attaches a fixed-time signal plan to a traffic light, or detaches it
    /// when `cycle` is `None`. The plan starts from the light's current phase.
    pub fn set_light_cycle(
        &mut self,
        id: TrafficLightId,
        cycle: Option<FixedCycle>,
    ) -> Result<(), SimError> {
        if let Some(cycle) = &cycle {
            cycle.validate()?;
        }
        let light = self.lights.get_mut(id).ok_or(SimError::UnknownLight(id))?;
        light.set_cycle(cycle);
        Ok(())
    }

    /// Adds a source which inserts queued vehicles at the start of a lane.
    pub fn add_source(&mut self, segment: SegmentId, lane: usize) -> Result<SourceId, SimError> {
        self.check_lane(segment, lane)?;
        Ok(self.sources.insert(Source::new(segment, lane)))
    }

    /// Queues a vehicle at a source. The vehicle enters the network once
    /// there is room for it, travelling at up to `speed`.
    pub fn enqueue_vehicle(
        &mut self,
        source: SourceId,
        kind: Arc<VehicleType>,
        speed: f64,
        route: &[SegmentId],
    ) -> Result<(), SimError> {
        non_negative("vehicle", "speed", speed)?;
        let start = self.sources.get(source).ok_or(SimError::UnknownSource(source))?.segment;
        let route = self.checked_route(start, route)?;
        self.sources[source].queue.push_back(PendingVehicle { kind, speed, route });
        Ok(())
    }

    /// The number of vehicles waiting at a source.
    pub fn queued_vehicles(&self, source: SourceId) -> Result<usize, SimError> {
        let source = self.sources.get(source).ok_or(SimError::UnknownSource(source))?;
        Ok(source.queue.len())
    }

    /// Adds a vehicle with its front at `pos` along a lane.
    pub fn add_vehicle(
        &mut self,
        kind: Arc<VehicleType>,
        segment: SegmentId,
        lane: usize,
        pos: f64,
        speed: f64,
    ) -> Result<VehicleId, SimError> {
        self.check_lane(segment, lane)?;
        non_negative("vehicle", "speed", speed)?;
        let seg = &self.segments[segment];
        let blocked = SimError::PlacementBlocked { segment, lane, pos };
        if !Interval::new(0.0, seg.length()).contains(pos) {
            return Err(blocked);
        }
        let extent = Interval::new(pos - kind.length(), pos);
        if !self.has_room(seg, lane, extent, None) {
            return Err(blocked);
        }

        let number = self.next_number();
        let vehicle_id = self
            .vehicles
            .insert_with_key(|id| Vehicle::new(id, number, kind, segment, lane, pos, speed));
        if let Some(lane) = self.segments[segment].lane_mut(lane) {
            lane.insert(&self.vehicles, vehicle_id);
        }
        Ok(vehicle_id)
    }

    /// Removes a vehicle from the simulation.
    pub fn remove_vehicle(&mut self, id: VehicleId) -> Result<(), SimError> {
        let vehicle = self.vehicles.remove(id).ok_or(SimError::UnknownVehicle(id))?;
        self.remove_from_lane(vehicle.segment_id(), vehicle.lane(), id)
    }

    /// Sets the route of a vehicle. The route is prefixed with the segment the
    /// vehicle is on if it does not already start with it.
    pub fn set_vehicle_route(&mut self, id: VehicleId, route: &[SegmentId]) -> Result<(), SimError> {
        let start = self.vehicles.get(id).ok_or(SimError::UnknownVehicle(id))?.segment_id();
        let route = self.checked_route(start, route)?;
        self.vehicles[id].set_route(route);
        Ok(())
    }

    /// Routes the vehicle along the shortest path to `dst`.
    /// Returns `false`, leaving the route unchanged, if `dst` is unreachable.
    pub fn set_vehicle_destination(&mut self, id: VehicleId, dst: SegmentId) -> Result<bool, SimError> {
        let start = self.vehicles.get(id).ok_or(SimError::UnknownVehicle(id))?.segment_id();
        match self.find_route(start, dst) {
            Some(route) => {
                self.vehicles[id].set_route(route);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Finds the shortest sequence of connected segments from `from` to `to`,
    /// inclusive of both.
    pub fn find_route(&self, from: SegmentId, to: SegmentId) -> Option<Vec<SegmentId>> {
        if !self.segments.contains_key(from) || !self.segments.contains_key(to) {
            return None;
        }
        dijkstra(&from, |id| successors(*id, &self.segments), |id| *id == to)
            .map(|(route, _)| route)
    }

    /// Sets the `frozen` attribute of a vehicle. When a vehicle is frozen,
    /// it will maximally decelerate until its velocity is zero and remain stopped
    /// until it is no longer frozen.
    pub fn set_vehicle_frozen(&mut self, id: VehicleId, frozen: bool) -> Result<(), SimError> {
        let vehicle = self.vehicles.get_mut(id).ok_or(SimError::UnknownVehicle(id))?;
        vehicle.set_frozen(frozen);
        Ok(())
    }

    /// Randomly assigns a desired speed factor to each vehicle, sampled from
    /// a normal distribution with a mean of 1 and standard deviation of `stddev`.
    /// The same seed always gives the same factors.
    pub fn randomise_speed_factors(&mut self, stddev: f64, seed: u64) -> Result<(), SimError> {
        let distr = Normal::new(1.0, stddev)
            .map_err(|err| SimError::Configuration(format!("invalid standard deviation: {err}")))?;
        let mut rng = StdRng::seed_from_u64(seed);
        let (min, max) = SPEED_FACTOR_RANGE;
        for vehicle in self.vehicles.values_mut() {
            let factor = distr.sample(&mut rng).clamp(min, max);
            vehicle.set_speed_factor(factor);
        }
        Ok(())
    }

    /// Registers a sink to receive a snapshot after every step.
    pub fn add_sink(&mut self, sink: Box<dyn SnapshotSink>) {
        self.sinks.push(sink);
    }

    /// Advances the simulation by one time step.
    ///
    /// If the step fails, the simulation is left in an inconsistent state and
    /// every subsequent call returns [SimError::Aborted].
    pub fn step(&mut self) -> Result<StepReport, SimError> {
        if let Some(step) = self.aborted {
            return Err(SimError::Aborted { step });
        }
        self.try_step().map_err(|err| {
            error!("step {} failed: {}", self.step + 1, err);
            self.aborted = Some(self.step + 1);
            err
        })
    }

    /// Gets the number of completed steps.
    pub fn step_count(&self) -> u64 {
        self.step
    }

    /// Gets the simulated time in s.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Whether a failed step has stopped the simulation.
    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    /// Returns an iterator over all the segments in the simulation, in creation order.
    pub fn iter_segments(&self) -> impl Iterator<Item = &RoadSegment> {
        self.segments.values()
    }

    /// Returns an iterator over all the vehicles in the simulation.
    pub fn iter_vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.values()
    }

    /// Returns an iterator over all the traffic lights in the simulation.
    pub fn iter_lights(&self) -> impl Iterator<Item = (TrafficLightId, &TrafficLight)> {
        self.lights.iter()
    }

    /// Gets a reference to the vehicle with the given ID.
    pub fn get_vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(id)
    }

    /// Gets a reference to the segment with the given ID.
    pub fn get_segment(&self, id: SegmentId) -> Option<&RoadSegment> {
        self.segments.get(id)
    }

    /// Gets a reference to the traffic light with the given ID.
    pub fn get_light(&self, id: TrafficLightId) -> Option<&TrafficLight> {
        self.lights.get(id)
    }

    /// The vehicle directly ahead of the given vehicle on its lane.
    pub fn leader_of(&self, id: VehicleId) -> Option<VehicleId> {
        let vehicle = self.vehicles.get(id)?;
        self.segments
            .get(vehicle.segment_id())?
            .lane(vehicle.lane())?
            .leader_of(id)
    }

    /// The vehicle directly behind the given vehicle on its lane.
    pub fn follower_of(&self, id: VehicleId) -> Option<VehicleId> {
        let vehicle = self.vehicles.get(id)?;
        self.segments
            .get(vehicle.segment_id())?
            .lane(vehicle.lane())?
            .follower_of(id)
    }

    /// The vehicles on a lane whose front lies within `[begin, end]`, leader first.
    pub fn vehicles_in_range(
        &self,
        segment: SegmentId,
        lane: usize,
        begin: f64,
        end: f64,
    ) -> Result<Vec<VehicleId>, SimError> {
        self.check_lane(segment, lane)?;
        let lane = &self.segments[segment].lanes()[lane];
        Ok(lane.vehicles_in_range(&self.vehicles, begin, end).collect())
    }

    /// The dynamic state of a vehicle, as needed by consumption models.
    pub fn dynamics(&self, id: VehicleId) -> Option<VehicleDynamics> {
        let vehicle = self.vehicles.get(id)?;
        Some(VehicleDynamics {
            speed: vehicle.vel(),
            acceleration: vehicle.acc(),
            gradient: self
                .segments
                .get(vehicle.segment_id())
                .and_then(|segment| segment.gradient()),
        })
    }

    /// Captures the current state of every lane and light.
    pub fn snapshot(&self) -> StepSnapshot {
        let vehicles = &self.vehicles;
        let lanes = self
            .segments
            .iter()
            .flat_map(|(segment_id, segment)| {
                segment.lanes().iter().enumerate().map(move |(lane, l)| LaneSnapshot {
                    segment: segment_id,
                    lane,
                    vehicles: l
                        .vehicles()
                        .iter()
                        .map(|id| VehicleState::from(&vehicles[*id]))
                        .collect(),
                })
            })
            .collect();
        let lights = self
            .lights
            .iter()
            .map(|(id, light)| LightSnapshot {
                id,
                segment: light.segment_id(),
                pos: light.pos(),
                phase: light.phase(),
            })
            .collect();
        StepSnapshot {
            step: self.step,
            time: self.time,
            lanes,
            lights,
        }
    }

    /// Runs every phase of a step in order.
    fn try_step(&mut self) -> Result<StepReport, SimError> {
        let dt = self.config.time_step;
        let mut report = StepReport {
            step: self.step + 1,
            time: (self.step + 1) as f64 * dt,
            ..Default::default()
        };

        self.update_lights(dt);
        self.update_accelerations();
        self.integrate(dt);
        self.check_invariants()?;
        if self.config.lane_changes {
            self.change_lanes(&mut report)?;
            self.check_invariants()?;
        }
        self.resolve_boundaries(&mut report)?;
        self.insert_from_sources(&mut report);
        self.check_invariants()?;

        self.step = report.step;
        self.time = report.time;
        self.publish();
        Ok(report)
    }

    /// Advances the signal plans of the traffic lights.
    fn update_lights(&mut self, dt: f64) {
        for light in self.lights.values_mut() {
            light.step(dt);
        }
    }

    /// Calculates every vehicle's acceleration from the state at the end of
    /// the previous step, then commits them all at once.
    fn update_accelerations(&mut self) {
        let max_dec = self.config.max_deceleration;
        let mut updates = Vec::with_capacity(self.vehicles.len());

        for segment in self.segments.values() {
            let speed_limit = segment.speed_limit_or_inf();
            for (lane_idx, lane) in segment.lanes().iter().enumerate() {
                for (idx, vehicle_id) in lane.vehicles().iter().enumerate() {
                    let vehicle = &self.vehicles[*vehicle_id];
                    let ahead = idx.checked_sub(1).map(|idx| lane.vehicles()[idx]);
                    let leader = self.obstacle_ahead(segment, lane_idx, ahead, vehicle);
                    let (mut acc, action_point) = vehicle.respond_behind(leader.as_ref(), speed_limit);

                    let light = segment.light_ahead(vehicle.pos_front()).and_then(|light_id| {
                        let light = self.lights.get(light_id)?;
                        Some(light.approach(light_id, vehicle, speed_limit, &self.config))
                    });
                    if let Some(approach) = light.filter(|approach| approach.consider) {
                        acc = acc.min(approach.approach_acc);
                    }
                    if vehicle.is_frozen() {
                        acc = -max_dec;
                    }
                    updates.push((*vehicle_id, acc.max(-max_dec), light, action_point));
                }
            }
        }

        for (id, acc, light, action_point) in updates {
            let vehicle = &mut self.vehicles[id];
            vehicle.set_acc(acc);
            vehicle.set_light_approach(light);
            vehicle.set_action_point(action_point);
        }
    }

    /// Integrates the velocities and positions of all vehicles.
    fn integrate(&mut self, dt: f64) {
        for vehicle in self.vehicles.values_mut() {
            vehicle.integrate(dt);
        }
    }

    /// Lets every vehicle consider changing to an adjacent lane.
    fn change_lanes(&mut self, report: &mut StepReport) -> Result<(), SimError> {
        let segment_ids = self.segments.keys().collect::<Vec<_>>();
        for segment_id in segment_ids {
            let order = {
                let segment = &self.segments[segment_id];
                if segment.num_lanes() < 2 {
                    continue;
                }
                segment
                    .lanes()
                    .iter()
                    .enumerate()
                    .flat_map(|(lane, l)| l.vehicles().iter().map(move |id| (lane, *id)))
                    .sorted_by(|(lane_a, a), (lane_b, b)| {
                        let (a, b) = (&self.vehicles[*a], &self.vehicles[*b]);
                        b.pos_front()
                            .total_cmp(&a.pos_front())
                            .then(lane_a.cmp(lane_b))
                    })
                    .map(|(_, id)| id)
                    .collect::<Vec<_>>()
            };

            for vehicle_id in order {
                if let Some(candidate) = self.choose_lane_change(segment_id, vehicle_id) {
                    let from_lane = self.vehicles[vehicle_id].lane();
                    self.move_to_lane(segment_id, vehicle_id, candidate.lane)?;
                    report.lane_changes.push(LaneChangeEvent {
                        vehicle: vehicle_id,
                        segment: segment_id,
                        from_lane,
                        to_lane: candidate.lane,
                        direction: candidate.direction,
                    });
                }
            }
        }
        Ok(())
    }

    /// Evaluates the adjacent lanes of a vehicle, right first, and returns
    /// the lane change it should make, if any.
    fn choose_lane_change(&self, segment_id: SegmentId, vehicle_id: VehicleId) -> Option<Candidate> {
        let segment = self.segments.get(segment_id)?;
        let vehicle = self.vehicles.get(vehicle_id)?;
        // A vehicle held short of a dead end may still change lanes to get out
        let held_at_end = vehicle.held_steps() > 0 && vehicle.pos_front() >= segment.length();
        if vehicle.is_frozen() || held_at_end {
            return None;
        }
        let lane_idx = vehicle.lane();
        let lane = segment.lane(lane_idx)?;
        let speed_limit = segment.speed_limit_or_inf();

        let leader = self.obstacle_ahead(segment, lane_idx, lane.leader_of(vehicle_id), vehicle);
        let situation = Situation {
            speed: vehicle.vel(),
            acc: vehicle.acc_behind(leader.as_ref(), speed_limit),
            leader_speed: leader.filter(|o| o.vehicle.is_some()).map(|o| o.vel),
        };

        let mut candidates = ArrayVec::<Candidate, 2>::new();
        let targets = [
            (Direction::Right, segment.right_of(lane_idx)),
            (Direction::Left, segment.left_of(lane_idx)),
        ];
        for (direction, target) in targets {
            let Some(target) = target else {
                continue;
            };
            let Some(target_lane) = segment.lane(target) else {
                continue;
            };
            let (ahead, behind) = target_lane.neighbours_at(&self.vehicles, vehicle.pos_front());
            let new_leader = self.obstacle_ahead(segment, target, ahead, vehicle);

            let (gap_behind, follower_acc) = match behind.and_then(|id| self.vehicles.get(id)) {
                Some(follower) => {
                    let old_leader = self.obstacle_ahead(segment, target, ahead, follower);
                    let old_acc = follower.acc_behind(old_leader.as_ref(), speed_limit);
                    let new_acc = follower.acc_behind(Some(&vehicle.as_obstacle(0.0)), speed_limit);
                    (vehicle.pos_rear() - follower.pos_front(), Some((old_acc, new_acc)))
                }
                None => (f64::INFINITY, None),
            };

            candidates.push(Candidate {
                direction,
                lane: target,
                gap_ahead: new_leader.map_or(f64::INFINITY, |o| o.pos - vehicle.pos_front()),
                gap_behind,
                acc: vehicle.acc_behind(new_leader.as_ref(), speed_limit),
                follower_acc,
            });
        }

        let params = vehicle.kind().lane_change();
        let choice = params.choose(&situation, &candidates).copied();
        if let Some(candidate) = &choice {
            trace!(
                "vehicle {} changes {:?} to lane {} (incentive {:.3})",
                vehicle.number(),
                candidate.direction,
                candidate.lane,
                params.incentive(&situation, candidate)
            );
        }
        choice
    }

    /// Moves a vehicle to another lane of its segment, keeping its position.
    fn move_to_lane(&mut self, segment_id: SegmentId, vehicle_id: VehicleId, to: usize) -> Result<(), SimError> {
        let from = self.vehicles[vehicle_id].lane();
        self.remove_from_lane(segment_id, from, vehicle_id)?;
        let vehicle = &mut self.vehicles[vehicle_id];
        vehicle.set_lane(to);
        vehicle.release();
        let lane = self.segments[segment_id]
            .lane_mut(to)
            .ok_or(SimError::LaneOutOfRange {
                segment: segment_id,
                lane: to,
            })?;
        lane.insert(&self.vehicles, vehicle_id);
        Ok(())
    }

    /// Moves vehicles which have passed the end of their segment onto the
    /// next segment, removes those which reached a sink, and holds the rest.
    fn resolve_boundaries(&mut self, report: &mut StepReport) -> Result<(), SimError> {
        // Queued behind a held vehicle rather than held themselves
        for vehicle in self.vehicles.values_mut() {
            let segment = &self.segments[vehicle.segment_id()];
            if vehicle.held_steps() > 0 && !at_boundary(segment, vehicle) {
                vehicle.release();
            }
        }

        let mut crossing = vec![];
        for segment in self.segments.values() {
            for lane in segment.lanes() {
                for id in lane.vehicles() {
                    let vehicle = &self.vehicles[*id];
                    if !at_boundary(segment, vehicle) {
                        break;
                    }
                    crossing.push((vehicle.pos_front() - segment.length(), vehicle.number(), *id));
                }
            }
        }

        // Furthest first, so vehicles merging into one lane keep their order
        crossing.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        for (_, _, id) in crossing {
            self.resolve_boundary(id, report)?;
        }
        Ok(())
    }

    fn resolve_boundary(&mut self, id: VehicleId, report: &mut StepReport) -> Result<(), SimError> {
        let vehicle = &self.vehicles[id];
        let segment_id = vehicle.segment_id();
        let lane_idx = vehicle.lane();
        let segment = &self.segments[segment_id];
        let length = segment.length();
        // Stopped when a vehicle ahead of it was held
        if !at_boundary(segment, vehicle) {
            return Ok(());
        }

        if segment.is_sink() {
            debug!("vehicle {} left the network", vehicle.number());
            self.remove_from_lane(segment_id, lane_idx, id)?;
            self.vehicles.remove(id);
            report.boundary.push(BoundaryEvent::Exited {
                vehicle: id,
                segment: segment_id,
            });
            return Ok(());
        }

        let reason = match segment.connection_for(lane_idx, vehicle.next_segment()) {
            None => HoldReason::NoConnection,
            Some(conn) => {
                let front = vehicle.pos_front() - length;
                let extent = Interval::new(front - vehicle.length(), front);
                let target = &self.segments[conn.to_segment];
                if self.has_room(target, conn.to_lane, extent, Some(id)) {
                    debug!(
                        "vehicle {} moved from segment {:?} to lane {} of segment {:?}",
                        vehicle.number(),
                        segment_id,
                        conn.to_lane,
                        conn.to_segment
                    );
                    self.remove_from_lane(segment_id, lane_idx, id)?;
                    self.vehicles[id].advance(length, conn.to_segment, conn.to_lane);
                    let lane = self.segments[conn.to_segment]
                        .lane_mut(conn.to_lane)
                        .ok_or(SimError::LaneOutOfRange {
                            segment: conn.to_segment,
                            lane: conn.to_lane,
                        })?;
                    lane.insert(&self.vehicles, id);
                    report.boundary.push(BoundaryEvent::Transferred {
                        vehicle: id,
                        from: segment_id,
                        to: conn.to_segment,
                        lane: conn.to_lane,
                    });
                    return Ok(());
                }
                HoldReason::Blocked
            }
        };

        // Stop at the end of the segment without running into a held leader
        let end = segment
            .lane(lane_idx)
            .and_then(|lane| lane.leader_of(id))
            .map_or(length, |leader| f64::min(self.vehicles[leader].pos_rear(), length));
        let vehicle = &mut self.vehicles[id];
        let steps = vehicle.hold(end);
        let number = vehicle.number();
        self.stop_followers(segment_id, lane_idx, id);
        if steps == self.config.stuck_warning_steps {
            warn!(
                "vehicle {} has been held at the end of segment {:?} for {} steps ({:?})",
                number,
                segment_id,
                steps,
                reason
            );
        }
        report.boundary.push(BoundaryEvent::Held {
            vehicle: id,
            segment: segment_id,
            steps,
            reason,
        });
        Ok(())
    }

    /// Stops the vehicles queued behind `id` which would otherwise overlap it
    /// after it was pulled back to the end of its segment.
    fn stop_followers(&mut self, segment_id: SegmentId, lane: usize, id: VehicleId) {
        let Some(lane) = self.segments.get(segment_id).and_then(|s| s.lane(lane)) else {
            return;
        };
        let Some(idx) = lane.index_of(id) else {
            return;
        };
        let mut limit = self.vehicles[id].pos_rear();
        for follower in &lane.vehicles()[idx + 1..] {
            let vehicle = &mut self.vehicles[*follower];
            if vehicle.pos_front() <= limit {
                break;
            }
            trace!("vehicle {} stopped behind a held vehicle", vehicle.number());
            vehicle.stop_at(limit);
            limit = vehicle.pos_rear();
        }
    }

    /// Inserts the vehicle at the head of each source's queue, if there is room.
    fn insert_from_sources(&mut self, report: &mut StepReport) {
        let dt = self.config.time_step;
        let max_dec = self.config.max_deceleration;

        for (source_id, source) in &mut self.sources {
            let Some(pending) = source.queue.front() else {
                continue;
            };
            let Some(lane) = self
                .segments
                .get(source.segment)
                .and_then(|segment| segment.lane(source.lane))
            else {
                continue;
            };
            let length = pending.kind.length();
            let (gap, speed) = match lane.last().map(|id| &self.vehicles[id]) {
                Some(last) => {
                    let gap = last.pos_rear() - length;
                    (gap, pending.speed.min(safe_entry_speed(gap, last.vel(), max_dec, dt)))
                }
                None => (f64::INFINITY, pending.speed),
            };

            if gap < self.config.min_insertion_gap {
                source.blocked_steps += 1;
                if source.blocked_steps == self.config.stuck_warning_steps {
                    warn!(
                        "source {:?} has been blocked for {} steps with {} vehicles waiting",
                        source_id,
                        source.blocked_steps,
                        source.queue.len()
                    );
                }
                report.sources.push(SourceEvent::Deferred {
                    source: source_id,
                    waiting: source.queue.len(),
                    blocked_steps: source.blocked_steps,
                });
                continue;
            }

            let Some(pending) = source.queue.pop_front() else {
                continue;
            };
            source.blocked_steps = 0;
            let number = self.seq;
            self.seq += 1;
            let (segment, lane) = (source.segment, source.lane);
            let vehicle_id = self.vehicles.insert_with_key(|id| {
                let mut vehicle = Vehicle::new(id, number, pending.kind, segment, lane, length, speed);
                vehicle.set_route(pending.route);
                vehicle
            });
            if let Some(lane) = self.segments[segment].lane_mut(lane) {
                lane.insert(&self.vehicles, vehicle_id);
            }
            debug!("vehicle {} entered from source {:?} at {:.2} m/s", number, source_id, speed);
            report.sources.push(SourceEvent::Inserted {
                source: source_id,
                vehicle: vehicle_id,
            });
        }
    }

    /// Checks every lane is ordered without overlaps, and that no vehicle
    /// moved backwards or has an invalid speed.
    fn check_invariants(&self) -> Result<(), SimError> {
        if !self.config.check_invariants {
            return Ok(());
        }
        for (segment_id, segment) in &self.segments {
            for (lane_idx, lane) in segment.lanes().iter().enumerate() {
                let fail = |violation| SimError::InvariantViolation {
                    segment: segment_id,
                    lane: lane_idx,
                    violation,
                };
                lane.check_order(&self.vehicles, self.config.jam_distance)
                    .map_err(fail)?;
                for id in lane.vehicles() {
                    let vehicle = self
                        .vehicles
                        .get(*id)
                        .filter(|v| v.segment_id() == segment_id && v.lane() == lane_idx)
                        .ok_or(fail(Violation::MissingVehicle(*id)))?;
                    let speed = vehicle.vel();
                    if !(speed.is_finite() && speed >= 0.0) {
                        return Err(fail(Violation::InvalidSpeed { vehicle: *id, speed }));
                    }
                    let by = vehicle.prev_pos_rear() - vehicle.pos_rear();
                    if by > self.config.jam_distance {
                        return Err(fail(Violation::BackwardMotion { vehicle: *id, by }));
                    }
                }
            }
        }
        Ok(())
    }

    /// Hands a snapshot of the current state to every sink.
    fn publish(&mut self) {
        if self.sinks.is_empty() {
            return;
        }
        let snapshot = Arc::new(self.snapshot());
        for sink in &mut self.sinks {
            sink.on_step(snapshot.clone());
        }
    }

    /// The nearest thing ahead of `vehicle` were it on lane `lane` of `segment`
    /// directly behind `ahead`. Without a vehicle ahead, the rearmost vehicle
    /// on the lane the vehicle continues onto is used. A vehicle held on its
    /// lane, or one whose lane leads nowhere it can go, must stop at the end
    /// of the segment.
    fn obstacle_ahead(
        &self,
        segment: &RoadSegment,
        lane: usize,
        ahead: Option<VehicleId>,
        vehicle: &Vehicle,
    ) -> Option<Obstacle> {
        let leader = match ahead {
            Some(id) => self.vehicles.get(id).map(|leader| leader.as_obstacle(0.0)),
            None => self.downstream_obstacle(segment, lane, vehicle),
        };
        let held = vehicle.held_steps() > 0 && lane == vehicle.lane();
        let stop = held || segment.is_dead_end(lane, vehicle.next_segment());
        let end = stop.then(|| Obstacle::stop_line(segment.length()));
        Obstacle::nearest(leader, end)
    }

    fn downstream_obstacle(&self, segment: &RoadSegment, lane: usize, vehicle: &Vehicle) -> Option<Obstacle> {
        let conn = segment.connection_for(lane, vehicle.next_segment())?;
        let last = self.segments.get(conn.to_segment)?.lane(conn.to_lane)?.last()?;
        Some(self.vehicles.get(last)?.as_obstacle(segment.length()))
    }

    /// Whether a vehicle occupying `extent` fits on a lane without
    /// overlapping its neighbours, ignoring the vehicle `ignore`.
    fn has_room(
        &self,
        segment: &RoadSegment,
        lane: usize,
        extent: Interval<f64>,
        ignore: Option<VehicleId>,
    ) -> bool {
        let Some(lane) = segment.lane(lane) else {
            return false;
        };
        let (ahead, behind) = lane.neighbours_at(&self.vehicles, extent.max);
        [ahead, behind]
            .into_iter()
            .flatten()
            .filter(|id| Some(*id) != ignore)
            .all(|id| extent.clearance_with(&self.vehicles[id].extent()) >= 0.0)
    }

    fn remove_from_lane(&mut self, segment: SegmentId, lane: usize, id: VehicleId) -> Result<(), SimError> {
        let fail = |violation| SimError::InvariantViolation {
            segment,
            lane,
            violation,
        };
        self.segments
            .get_mut(segment)
            .and_then(|s| s.lane_mut(lane))
            .ok_or(fail(Violation::MissingVehicle(id)))?
            .remove(id)
            .map_err(fail)
    }

    fn check_lane(&self, segment: SegmentId, lane: usize) -> Result<(), SimError> {
        let seg = self.segments.get(segment).ok_or(SimError::UnknownSegment(segment))?;
        if lane < seg.num_lanes() {
            Ok(())
        } else {
            Err(SimError::LaneOutOfRange { segment, lane })
        }
    }

    /// Prefixes the route with `start` if needed and checks it is connected.
    fn checked_route(&self, start: SegmentId, route: &[SegmentId]) -> Result<Vec<SegmentId>, SimError> {
        let mut full = Vec::with_capacity(route.len() + 1);
        if route.first() != Some(&start) {
            full.push(start);
        }
        full.extend_from_slice(route);
        if let Some(id) = full.iter().find(|id| !self.segments.contains_key(**id)) {
            return Err(SimError::UnknownSegment(*id));
        }
        for (from, to) in full.iter().tuple_windows() {
            if !self.segments[*from].connects_to(*to) {
                return Err(SimError::DisconnectedRoute {
                    from: *from,
                    to: *to,
                });
            }
        }
        Ok(full)
    }

    fn next_number(&mut self) -> u64 {
        let number = self.seq;
        self.seq += 1;
        number
    }
}

/// Whether a vehicle has to be resolved at the end of its segment: it has
/// passed the end, is being held there, or has stopped short of a lane
/// which leads nowhere along its route.
fn at_boundary(segment: &RoadSegment, vehicle: &Vehicle) -> bool {
    let overshoot = vehicle.pos_front() - segment.length();
    if overshoot > 0.0 || (overshoot == 0.0 && vehicle.held_steps() > 0) {
        return true;
    }
    segment.is_dead_end(vehicle.lane(), vehicle.next_segment())
        && -overshoot < DEAD_END_REACH
        && vehicle.vel() < STOPPED_SPEED
}

/// The segments reachable from the end of a segment, with the cost of
/// travelling along it in dm.
fn successors(id: SegmentId, segments: &SegmentSet) -> impl Iterator<Item = (SegmentId, usize)> + '_ {
    let segment = segments.get(id);
    let cost = segment.map_or(0, |s| (10.0 * s.length()) as usize);
    segment
        .into_iter()
        .flat_map(|s| s.connections().iter().map(|c| c.to_segment))
        .unique()
        .map(move |to| (to, cost))
}

#[cfg(test)]
mod test {
    use super::*;

    fn straight(sim: &mut Simulation, length: f64, lanes: usize) -> SegmentId {
        sim.add_segment(&SegmentAttributes::new(length, lanes)).unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let config = SimulationConfig {
            max_deceleration: -1.0,
            ..Default::default()
        };
        assert!(matches!(Simulation::new(config), Err(SimError::Configuration(_))));
    }

    #[test]
    fn placement_rejects_overlap() {
        let mut sim = Simulation::default();
        let seg = straight(&mut sim, 100.0, 1);
        let kind = Arc::new(VehicleType::default());
        sim.add_vehicle(kind.clone(), seg, 0, 50.0, 0.0).unwrap();
        assert!(matches!(
            sim.add_vehicle(kind.clone(), seg, 0, 53.0, 0.0),
            Err(SimError::PlacementBlocked { .. })
        ));
        assert!(sim.add_vehicle(kind.clone(), seg, 0, 56.0, 0.0).is_ok());
        assert!(matches!(
            sim.add_vehicle(kind, seg, 1, 10.0, 0.0),
            Err(SimError::LaneOutOfRange { lane: 1, .. })
        ));
    }

    #[test]
    fn vehicle_numbers_increase() {
        let mut sim = Simulation::default();
        let seg = straight(&mut sim, 100.0, 1);
        let kind = Arc::new(VehicleType::default());
        let a = sim.add_vehicle(kind.clone(), seg, 0, 10.0, 0.0).unwrap();
        let b = sim.add_vehicle(kind, seg, 0, 30.0, 0.0).unwrap();
        assert!(sim.get_vehicle(a).unwrap().number() < sim.get_vehicle(b).unwrap().number());
    }

    #[test]
    fn route_must_be_connected() {
        let mut sim = Simulation::default();
        let a = straight(&mut sim, 100.0, 1);
        let b = straight(&mut sim, 100.0, 1);
        let c = straight(&mut sim, 100.0, 1);
        sim.add_connection(a, 0, b, 0).unwrap();
        let veh = sim
            .add_vehicle(Arc::new(VehicleType::default()), a, 0, 10.0, 0.0)
            .unwrap();
        assert!(sim.set_vehicle_route(veh, &[b]).is_ok());
        assert_eq!(sim.get_vehicle(veh).unwrap().route(), &[a, b]);
        assert_eq!(
            sim.set_vehicle_route(veh, &[a, c]),
            Err(SimError::DisconnectedRoute { from: a, to: c })
        );
    }

    #[test]
    fn frozen_vehicle_stops() {
        let mut sim = Simulation::default();
        let seg = straight(&mut sim, 1000.0, 1);
        let veh = sim
            .add_vehicle(Arc::new(VehicleType::default()), seg, 0, 10.0, 20.0)
            .unwrap();
        sim.set_vehicle_frozen(veh, true).unwrap();
        sim.step().unwrap();
        let max_dec = sim.config().max_deceleration;
        assert_eq!(sim.get_vehicle(veh).unwrap().acc(), -max_dec);
        for _ in 0..20 {
            sim.step().unwrap();
        }
        assert_eq!(sim.get_vehicle(veh).unwrap().vel(), 0.0);
    }

    #[test]
    fn dynamics_reports_gradient() {
        let mut sim = Simulation::default();
        let seg = sim
            .add_segment(&SegmentAttributes {
                gradient: Some(0.02),
                ..SegmentAttributes::new(100.0, 1)
            })
            .unwrap();
        let veh = sim
            .add_vehicle(Arc::new(VehicleType::default()), seg, 0, 10.0, 5.0)
            .unwrap();
        let dynamics = sim.dynamics(veh).unwrap();
        assert_eq!(dynamics.speed, 5.0);
        assert_eq!(dynamics.gradient, Some(0.02));
        sim.remove_vehicle(veh).unwrap();
        assert!(sim.dynamics(veh).is_none());
    }
}
