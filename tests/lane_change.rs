//! Tests of lane changing on a multi-lane segment.

use lane_sim::{
    CarFollowingModel, Direction, LaneChangeEvent, LaneChangeParams, OvertakingRule,
    SegmentAttributes, SegmentId, Simulation, VehicleId, VehicleType,
};
use std::sync::Arc;

fn two_lanes() -> (Simulation, SegmentId) {
    let mut sim = Simulation::default();
    let segment = sim.add_segment(&SegmentAttributes::new(1000.0, 2)).unwrap();
    (sim, segment)
}

fn with_lane_change(params: LaneChangeParams) -> Arc<VehicleType> {
    Arc::new(VehicleType::new(5.0, CarFollowingModel::default(), params).unwrap())
}

/// Places a fast vehicle on lane 0 closing on a slow leader.
fn stuck_behind_slow_leader(sim: &mut Simulation, segment: SegmentId, kind: Arc<VehicleType>) -> (VehicleId, VehicleId) {
    let slow = sim
        .add_vehicle(Arc::new(VehicleType::default()), segment, 0, 70.0, 5.0)
        .unwrap();
    let fast = sim.add_vehicle(kind, segment, 0, 50.0, 20.0).unwrap();
    (fast, slow)
}

#[test]
fn changes_into_empty_left_lane() {
    let (mut sim, segment) = two_lanes();
    let kind = with_lane_change(LaneChangeParams {
        politeness: 0.0,
        ..Default::default()
    });
    let (fast, slow) = stuck_behind_slow_leader(&mut sim, segment, kind);

    let report = sim.step().unwrap();
    assert_eq!(
        report.lane_changes,
        vec![LaneChangeEvent {
            vehicle: fast,
            segment,
            from_lane: 0,
            to_lane: 1,
            direction: Direction::Left,
        }]
    );
    assert_eq!(sim.get_vehicle(fast).unwrap().lane(), 1);
    assert_eq!(sim.get_vehicle(slow).unwrap().lane(), 0);
    assert_eq!(sim.vehicles_in_range(segment, 1, 0.0, 1000.0).unwrap(), vec![fast]);
}

#[test]
fn close_follower_vetoes_change() {
    let (mut sim, segment) = two_lanes();
    let (fast, _) = stuck_behind_slow_leader(&mut sim, segment, with_lane_change(Default::default()));
    // Just behind the fast vehicle on the target lane
    sim.add_vehicle(Arc::new(VehicleType::default()), segment, 1, 44.0, 20.0)
        .unwrap();

    let report = sim.step().unwrap();
    assert!(report.lane_changes.is_empty());
    assert_eq!(sim.get_vehicle(fast).unwrap().lane(), 0);
}

#[test]
fn overtaking_rule_vetoes_slow_pass() {
    let (mut sim, segment) = two_lanes();
    let kind = with_lane_change(LaneChangeParams {
        overtaking: Some(OvertakingRule {
            speed_threshold: 25.0,
        }),
        ..Default::default()
    });
    let (fast, _) = stuck_behind_slow_leader(&mut sim, segment, kind);

    let report = sim.step().unwrap();
    assert!(report.lane_changes.is_empty());
    assert_eq!(sim.get_vehicle(fast).unwrap().lane(), 0);
}

#[test]
fn keeps_right_on_free_road() {
    let (mut sim, segment) = two_lanes();
    let kind = with_lane_change(LaneChangeParams {
        threshold: 0.05,
        ..Default::default()
    });
    let veh = sim.add_vehicle(kind, segment, 1, 50.0, 20.0).unwrap();

    let report = sim.step().unwrap();
    assert_eq!(report.lane_changes.len(), 1);
    assert_eq!(report.lane_changes[0].direction, Direction::Right);
    assert_eq!(sim.get_vehicle(veh).unwrap().lane(), 0);

    // Already on the rightmost lane, with no reason to move left
    assert!(sim.step().unwrap().lane_changes.is_empty());
}

#[test]
fn disabled_lane_changes() {
    let config = lane_sim::SimulationConfig {
        lane_changes: false,
        ..Default::default()
    };
    let mut sim = Simulation::new(config).unwrap();
    let segment = sim.add_segment(&SegmentAttributes::new(1000.0, 2)).unwrap();
    let (fast, _) = stuck_behind_slow_leader(&mut sim, segment, with_lane_change(Default::default()));
    assert!(sim.step().unwrap().lane_changes.is_empty());
    assert_eq!(sim.get_vehicle(fast).unwrap().lane(), 0);
}

#[test]
fn frozen_vehicle_stays_in_lane() {
    let (mut sim, segment) = two_lanes();
    let (fast, _) = stuck_behind_slow_leader(&mut sim, segment, with_lane_change(Default::default()));
    sim.set_vehicle_frozen(fast, true).unwrap();
    assert!(sim.step().unwrap().lane_changes.is_empty());
}

/// Three lanes with a vehicle stuck behind a stationary one on each of the
/// outer lanes, both wanting the middle lane.
fn contest_for_middle_lane(outer_pos: [f64; 2]) -> (Simulation, SegmentId, [VehicleId; 2]) {
    let mut sim = Simulation::default();
    let segment = sim.add_segment(&SegmentAttributes::new(1000.0, 3)).unwrap();
    let kind = Arc::new(VehicleType::default());
    let mut ids = vec![];
    for (lane, pos) in [0, 2].into_iter().zip(outer_pos) {
        let blocker = sim.add_vehicle(kind.clone(), segment, lane, pos + 20.0, 5.0).unwrap();
        sim.set_vehicle_frozen(blocker, true).unwrap();
        ids.push(sim.add_vehicle(kind.clone(), segment, lane, pos, 20.0).unwrap());
    }
    (sim, segment, [ids[0], ids[1]])
}

/// Level vehicles are taken from the rightmost lane first, and the first
/// change is visible to the vehicles considered after it.
#[test]
fn rightmost_lane_moves_first_when_level() {
    let (mut sim, segment, [right, left]) = contest_for_middle_lane([50.0, 50.0]);

    let report = sim.step().unwrap();
    assert_eq!(
        report.lane_changes,
        vec![LaneChangeEvent {
            vehicle: right,
            segment,
            from_lane: 0,
            to_lane: 1,
            direction: Direction::Left,
        }]
    );
    assert_eq!(sim.get_vehicle(left).unwrap().lane(), 2);
    assert_eq!(sim.vehicles_in_range(segment, 1, 0.0, 1000.0).unwrap(), vec![right]);
}

/// The order does not depend on which vehicle was added first.
#[test]
fn lane_change_order_ignores_creation_order() {
    let mut sim = Simulation::default();
    let segment = sim.add_segment(&SegmentAttributes::new(1000.0, 3)).unwrap();
    let kind = Arc::new(VehicleType::default());
    let mut ids = vec![];
    for lane in [2, 0] {
        let blocker = sim.add_vehicle(kind.clone(), segment, lane, 70.0, 5.0).unwrap();
        sim.set_vehicle_frozen(blocker, true).unwrap();
        ids.push(sim.add_vehicle(kind.clone(), segment, lane, 50.0, 20.0).unwrap());
    }

    let report = sim.step().unwrap();
    assert_eq!(report.lane_changes.len(), 1);
    assert_eq!(report.lane_changes[0].vehicle, ids[1]);
    assert_eq!(report.lane_changes[0].from_lane, 0);
    assert_eq!(sim.get_vehicle(ids[0]).unwrap().lane(), 2);
}

/// The vehicle further ahead moves first, even from the left.
#[test]
fn foremost_vehicle_moves_first() {
    let (mut sim, segment, [right, left]) = contest_for_middle_lane([50.0, 51.0]);

    let report = sim.step().unwrap();
    assert_eq!(
        report.lane_changes,
        vec![LaneChangeEvent {
            vehicle: left,
            segment,
            from_lane: 2,
            to_lane: 1,
            direction: Direction::Right,
        }]
    );
    assert_eq!(sim.get_vehicle(right).unwrap().lane(), 0);
}
