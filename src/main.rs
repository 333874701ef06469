use std::sync::Arc;
use std::time::Instant;

use lane_sim::{
    CarFollowingModel, FixedCycle, GippsParams, LaneChangeParams, LightPhase, SegmentAttributes,
    SimError, Simulation, SimulationConfig, VehicleType,
};

/// The number of segments in the ring.
const NUM_SEGMENTS: usize = 4;
/// The length of each segment, in m.
const SEGMENT_LENGTH: f64 = 250.0;
/// The number of lanes.
const NUM_LANES: usize = 2;
/// The spacing between vehicles when the ring is populated, in m.
const SPACING: f64 = 25.0;

fn main() -> Result<(), SimError> {
    env_logger::init();

    let mut sim = Simulation::new(SimulationConfig::default())?;
    let segments = (0..NUM_SEGMENTS)
        .map(|_| {
            sim.add_segment(&SegmentAttributes {
                speed_limit: Some(27.0),
                ..SegmentAttributes::new(SEGMENT_LENGTH, NUM_LANES)
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    for (idx, from) in segments.iter().enumerate() {
        let to = segments[(idx + 1) % segments.len()];
        for lane in 0..NUM_LANES {
            sim.add_connection(*from, lane, to, lane)?;
        }
    }

    let light = sim.add_traffic_light(segments[0], 200.0, LightPhase::Green)?;
    sim.set_light_cycle(
        light,
        Some(FixedCycle {
            green: 30.0,
            amber: 3.0,
            red: 27.0,
        }),
    )?;

    let car = Arc::new(VehicleType::default());
    let truck = Arc::new(VehicleType::new(
        12.0,
        CarFollowingModel::Gipps(GippsParams {
            desired_speed: 22.0,
            ..Default::default()
        }),
        LaneChangeParams::default(),
    )?);
    let mut count = 0;
    for segment in &segments {
        for lane in 0..NUM_LANES {
            let mut pos = SEGMENT_LENGTH;
            while pos > SPACING {
                let kind = if count % 5 == 0 { &truck } else { &car };
                sim.add_vehicle(kind.clone(), *segment, lane, pos, 10.0)?;
                pos -= SPACING;
                count += 1;
            }
        }
    }
    sim.randomise_speed_factors(0.1, 1)?;

    println!("Simulating {} vehicles...", sim.iter_vehicles().count());
    const NUM_FRAMES: u32 = 1000;
    let dt = sim.config().time_step;
    for _ in 0..5 {
        let start = Instant::now();
        let mut lane_changes = 0;
        for _ in 0..NUM_FRAMES {
            lane_changes += sim.step()?.lane_changes.len();
        }
        let frame = start.elapsed() / NUM_FRAMES;
        let mean_speed = sim.iter_vehicles().map(|v| v.vel()).sum::<f64>()
            / sim.iter_vehicles().count() as f64;
        println!(
            "Avg. frame: {:?} --> {:.0}x speedup ({} lane changes, mean speed {:.1} m/s)",
            frame,
            dt / frame.as_secs_f64(),
            lane_changes,
            mean_speed,
        );
    }
    Ok(())
}
