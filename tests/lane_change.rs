//! Tests of lane changing on a two-lane road.

use lanesim::{
    DepartLane, DepartPos, DepartSpeed, EdgeId, EdgePurpose, LaneAttributes, LaneId,
    LinkAttributes, Network, SimConfig, Simulation, StopParams, TripInfo, VehicleParams,
    VehicleTypeId, VehicleTypeParams,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn two_lane_edge(net: &mut Network, name: &str, length: f64) -> (EdgeId, [LaneId; 2]) {
    let edge = net.add_edge(name, EdgePurpose::Normal).unwrap();
    let attribs = LaneAttributes {
        length,
        max_speed: 13.9,
        ..Default::default()
    };
    let right = net.add_lane(edge, &attribs).unwrap();
    let left = net.add_lane(edge, &attribs).unwrap();
    (edge, [right, left])
}

fn setup(net: Network) -> (Simulation, VehicleTypeId) {
    let mut sim = Simulation::new(SimConfig::default(), net).unwrap();
    let vtype = sim.add_vehicle_type(&VehicleTypeParams::default()).unwrap();
    (sim, vtype)
}

/// Test that a vehicle moves to the only lane continuing its route.
#[test]
fn changes_toward_continuing_lane() {
    init();
    let mut net = Network::new();
    let (a, [a_right, a_left]) = two_lane_edge(&mut net, "a", 500.0);
    let b = net.add_edge("b", EdgePurpose::Normal).unwrap();
    let b_lane = net
        .add_lane(
            b,
            &LaneAttributes {
                length: 200.0,
                max_speed: 13.9,
                ..Default::default()
            },
        )
        .unwrap();
    net.add_link(&LinkAttributes::new(a_left, b_lane)).unwrap();
    let (mut sim, vtype) = setup(net);
    let route = sim.add_route("r", &[a, b]).unwrap();
    let veh = sim
        .add_vehicle(&VehicleParams {
            depart_lane: DepartLane::Given(0),
            ..VehicleParams::new("v", vtype, route)
        })
        .unwrap();
    sim.add_device(veh, Box::new(TripInfo::new())).unwrap();

    sim.step().unwrap();
    let vehicle = sim.vehicle(veh).unwrap();
    assert_eq!(vehicle.lane(), Some(a_right));
    let best = vehicle.best_lanes();
    assert_eq!(best.len(), 2);
    assert_eq!(best[0].best_offset, 1);
    assert_eq!(best[1].best_offset, 0);

    let mut seen_b = false;
    for _ in 0..200 {
        sim.step().unwrap();
        match sim.vehicle(veh) {
            Some(vehicle) => seen_b |= vehicle.lane() == Some(b_lane),
            None => break,
        }
    }
    assert!(seen_b);
    assert_eq!(sim.vehicle_control().arrived_count(), 1);
    let trip = sim.arrived_vehicles()[0].device::<TripInfo>().unwrap();
    assert_eq!(trip.lane_changes, 1);
    assert_eq!(trip.depart_lane, Some(a_right));
    assert_eq!(trip.arrival_lane, Some(b_lane));
}

/// Test that a vehicle overtakes a parked vehicle on the left lane without
/// running into it.
#[test]
fn overtakes_parked_vehicle() {
    init();
    let mut net = Network::new();
    let (road, [right, left]) = two_lane_edge(&mut net, "road", 1000.0);
    let (mut sim, vtype) = setup(net);
    let route = sim.add_route("r", &[road]).unwrap();
    let parked = sim
        .add_vehicle(&VehicleParams {
            depart_lane: DepartLane::Given(0),
            depart_pos: DepartPos::Given(300.0),
            stops: vec![StopParams {
                lane: right,
                pos: 300.0,
                duration: 10_000.0,
                until: None,
                bus_stop: None,
            }],
            ..VehicleParams::new("parked", vtype, route)
        })
        .unwrap();
    let fast = sim
        .add_vehicle(&VehicleParams {
            depart_lane: DepartLane::Given(0),
            depart_speed: DepartSpeed::Max,
            ..VehicleParams::new("fast", vtype, route)
        })
        .unwrap();
    sim.add_device(fast, Box::new(TripInfo::new())).unwrap();

    let mut used_left = false;
    for _ in 0..200 {
        let report = sim.step().unwrap();
        assert_eq!(report.collisions, 0);
        let stand = sim.vehicle(parked).unwrap();
        assert_eq!(stand.lane(), Some(right));
        let Some(vehicle) = sim.vehicle(fast) else {
            break;
        };
        used_left |= vehicle.lane() == Some(left);
        if vehicle.lane() == Some(right) && vehicle.pos() < stand.pos() {
            assert!(stand.rear() - vehicle.pos() >= 0.0);
        }
    }
    assert!(used_left);
    assert_eq!(sim.vehicle_control().arrived_count(), 1);
    let trip = sim.arrived_vehicles()[0].device::<TripInfo>().unwrap();
    assert!(trip.lane_changes >= 1);
    assert!(trip.arrival_time.is_some());
}

/// Test that a vehicle on an empty road keeps to the right.
#[test]
fn keeps_right() {
    init();
    let mut net = Network::new();
    let (road, [right, _]) = two_lane_edge(&mut net, "road", 1000.0);
    let (mut sim, vtype) = setup(net);
    let route = sim.add_route("r", &[road]).unwrap();
    let veh = sim
        .add_vehicle(&VehicleParams {
            depart_lane: DepartLane::Given(1),
            ..VehicleParams::new("v", vtype, route)
        })
        .unwrap();
    for _ in 0..5 {
        sim.step().unwrap();
    }
    assert_eq!(sim.vehicle(veh).unwrap().lane(), Some(right));
    let lane = sim.network().lane(right);
    assert_eq!(lane.vehicle_ids(), vec![veh]);
}
