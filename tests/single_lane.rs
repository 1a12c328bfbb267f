//! Tests that involve the simulation of a single lane.

use lanesim::{
    DepartPos, DepartSpeed, EdgePurpose, LaneAttributes, LaneId, Network, RouteId, SimConfig,
    Simulation, StopParams, VehicleParams, VehicleTypeId, VehicleTypeParams,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A single 1000 m lane with a 50 km/h speed limit.
fn single_lane() -> (Simulation, LaneId, VehicleTypeId, RouteId) {
    let mut net = Network::new();
    let edge = net.add_edge("road", EdgePurpose::Normal).unwrap();
    let lane = net
        .add_lane(
            edge,
            &LaneAttributes {
                length: 1000.0,
                max_speed: 13.9,
                ..Default::default()
            },
        )
        .unwrap();
    let mut sim = Simulation::new(SimConfig::default(), net).unwrap();
    let vtype = sim.add_vehicle_type(&VehicleTypeParams::default()).unwrap();
    let route = sim.add_route("r", &[edge]).unwrap();
    (sim, lane, vtype, route)
}

/// A vehicle standing at `pos` for the rest of the simulation.
fn parked(name: &str, lane: LaneId, pos: f64, vtype: VehicleTypeId, route: RouteId) -> VehicleParams {
    VehicleParams {
        depart_pos: DepartPos::Given(pos),
        stops: vec![StopParams {
            lane,
            pos,
            duration: 10_000.0,
            until: None,
            bus_stop: None,
        }],
        ..VehicleParams::new(name, vtype, route)
    }
}

/// Test that a fast follower brakes behind a stopped leader without overlap.
#[test]
fn follower_brakes_behind_stopped_leader() {
    init();
    let (mut sim, lane, vtype, route) = single_lane();
    let leader = sim.add_vehicle(&parked("leader", lane, 900.0, vtype, route)).unwrap();
    let follower = sim
        .add_vehicle(&VehicleParams {
            depart_pos: DepartPos::Given(850.0),
            depart_speed: DepartSpeed::Given(13.9),
            ..VehicleParams::new("follower", vtype, route)
        })
        .unwrap();

    let report = sim.step().unwrap();
    assert_eq!(report.emitted, 2);
    assert_eq!(sim.vehicle(follower).unwrap().speed(), 13.9);

    sim.step().unwrap();
    let lead = sim.vehicle(leader).unwrap();
    let follow = sim.vehicle(follower).unwrap();
    assert_eq!(lead.pos(), 900.0);
    assert!(follow.speed() < 13.9);
    assert!(lead.pos() - lead.length() - follow.pos() >= 0.0);

    for _ in 0..60 {
        let report = sim.step().unwrap();
        assert_eq!(report.collisions, 0);
        let lead = sim.vehicle(leader).unwrap();
        let follow = sim.vehicle(follower).unwrap();
        assert!(lead.pos() - lead.length() - follow.pos() >= 0.0);
    }
    let follow = sim.vehicle(follower).unwrap();
    assert!(follow.speed() < 0.1);
    assert!(follow.waiting_time() > 0.0);
}

/// Test that a vehicle's position increases monotonically until it arrives.
#[test]
fn vehicle_drives_forward() {
    init();
    let (mut sim, _, vtype, route) = single_lane();
    let veh = sim.add_vehicle(&VehicleParams::new("v", vtype, route)).unwrap();
    sim.step().unwrap();

    let mut pos = sim.vehicle(veh).unwrap().pos();
    let mut steps = 0;
    while let Some(vehicle) = sim.vehicle(veh) {
        assert!(vehicle.speed() <= 13.9);
        sim.step().unwrap();
        if let Some(vehicle) = sim.vehicle(veh) {
            assert!(vehicle.pos() > pos);
            pos = vehicle.pos();
        }
        steps += 1;
        assert!(steps < 200, "vehicle never arrived");
    }
    assert_eq!(sim.vehicle_control().arrived_count(), 1);
    let arrived = &sim.arrived_vehicles()[0];
    assert!(arrived.pos() > 1000.0 - 0.1 - 1e-9);
}

/// Test that insertion waits until the lane has room.
#[test]
fn emission_waits_for_room() {
    init();
    let (mut sim, lane, vtype, route) = single_lane();
    sim.add_vehicle(&parked("blocker", lane, 5.0, vtype, route)).unwrap();
    let waiting = sim.add_vehicle(&VehicleParams::new("waiting", vtype, route)).unwrap();
    let report = sim.step().unwrap();
    assert_eq!(report.emitted, 1);
    assert_eq!(sim.vehicle_control().pending_count(), 1);
    assert!(sim.vehicle(waiting).unwrap().lane().is_none());
    for _ in 0..10 {
        sim.step().unwrap();
    }
    assert!(sim.vehicle(waiting).unwrap().lane().is_none());
}

/// Test that the lane's vehicle list is sorted by descending position.
#[test]
fn lane_lists_vehicles_front_first() {
    init();
    let (mut sim, lane, vtype, route) = single_lane();
    for (i, pos) in [300.0, 700.0, 500.0].into_iter().enumerate() {
        sim.add_vehicle(&parked(&format!("p{}", i), lane, pos, vtype, route))
            .unwrap();
    }
    sim.step().unwrap();
    let lane = sim.network().lane(lane);
    let positions = lane
        .vehicles_secure()
        .iter()
        .map(|id| sim.vehicle(*id).unwrap().pos())
        .collect::<Vec<_>>();
    assert_eq!(positions, vec![700.0, 500.0, 300.0]);
    assert_eq!(lane.vehicle_number(), 3);
    assert_eq!(lane.vehicle_length_sum(), 15.0);
}
