//! Tests of vehicles halting at stops and bus stops.

use lanesim::{
    DepartPos, EdgeId, EdgePurpose, LaneAttributes, LaneId, Network, SimConfig, SimError,
    Simulation, StopParams, VehicleParams, VehicleTypeId, VehicleTypeParams,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Two consecutive 500 m edges of one lane each.
fn two_edges() -> (Network, [EdgeId; 2], [LaneId; 2]) {
    let mut net = Network::new();
    let attribs = LaneAttributes {
        length: 500.0,
        max_speed: 13.9,
        ..Default::default()
    };
    let a = net.add_edge("a", EdgePurpose::Normal).unwrap();
    let b = net.add_edge("b", EdgePurpose::Normal).unwrap();
    let la = net.add_lane(a, &attribs).unwrap();
    let lb = net.add_lane(b, &attribs).unwrap();
    net.add_link(&lanesim::LinkAttributes::new(la, lb)).unwrap();
    (net, [a, b], [la, lb])
}

fn stop_at(lane: LaneId, pos: f64, duration: f64) -> StopParams {
    StopParams {
        lane,
        pos,
        duration,
        until: None,
        bus_stop: None,
    }
}

fn setup(net: Network) -> (Simulation, VehicleTypeId) {
    let mut sim = Simulation::new(SimConfig::default(), net).unwrap();
    let vtype = sim.add_vehicle_type(&VehicleTypeParams::default()).unwrap();
    (sim, vtype)
}

/// Test that a vehicle halts at its stop for the stop's duration, then moves on.
#[test]
fn vehicle_halts_for_duration() {
    init();
    let (net, edges, lanes) = two_edges();
    let (mut sim, vtype) = setup(net);
    let route = sim.add_route("r", &edges).unwrap();
    let veh = sim
        .add_vehicle(&VehicleParams {
            stops: vec![stop_at(lanes[1], 250.0, 10.0)],
            ..VehicleParams::new("v", vtype, route)
        })
        .unwrap();

    let mut reached_at = None;
    let mut released_at = None;
    for _ in 0..300 {
        sim.step().unwrap();
        let Some(vehicle) = sim.vehicle(veh) else {
            break;
        };
        if vehicle.is_stopped() {
            reached_at.get_or_insert(sim.time());
            assert_eq!(vehicle.lane(), Some(lanes[1]));
            assert!(vehicle.pos() <= 250.0 + 1e-9);
            assert!(vehicle.pos() >= 249.0);
        }
        if reached_at.is_some() && vehicle.pending_stops() == 0 {
            released_at.get_or_insert(sim.time());
        }
    }
    let reached_at = reached_at.expect("stop never reached");
    let released_at = released_at.expect("stop never released");
    assert!(released_at - reached_at >= 10.0 - 1e-9);
    assert_eq!(sim.vehicle_control().arrived_count(), 1);
}

/// Test that a stop with `until` holds the vehicle until that time.
#[test]
fn stop_until_holds_vehicle() {
    init();
    let (net, edges, lanes) = two_edges();
    let (mut sim, vtype) = setup(net);
    let route = sim.add_route("r", &edges).unwrap();
    let veh = sim
        .add_vehicle(&VehicleParams {
            stops: vec![StopParams {
                until: Some(120.0),
                ..stop_at(lanes[0], 100.0, 0.0)
            }],
            ..VehicleParams::new("v", vtype, route)
        })
        .unwrap();
    sim.run_until(110.0).unwrap();
    let vehicle = sim.vehicle(veh).unwrap();
    assert!(vehicle.is_stopped());
    assert_eq!(vehicle.speed(), 0.0);
    sim.run_until(140.0).unwrap();
    assert!(sim.vehicle(veh).map_or(true, |v| v.pending_stops() == 0));
}

/// Test that vehicles queue one behind the other at a bus stop.
#[test]
fn bus_stop_queues_vehicles() {
    init();
    let (mut net, edges, lanes) = two_edges();
    let bus_stop = net.add_bus_stop("stop", lanes[1], 200.0, 240.0).unwrap();
    let (mut sim, vtype) = setup(net);
    let route = sim.add_route("r", &edges).unwrap();
    let params = |name: &str, depart: f64| VehicleParams {
        depart,
        stops: vec![StopParams {
            bus_stop: Some(bus_stop),
            ..stop_at(lanes[1], 0.0, 60.0)
        }],
        ..VehicleParams::new(name, vtype, route)
    };
    let first = sim.add_vehicle(&params("first", 0.0)).unwrap();
    let second = sim.add_vehicle(&params("second", 5.0)).unwrap();

    let mut both_halting = false;
    for _ in 0..120 {
        let report = sim.step().unwrap();
        assert_eq!(report.collisions, 0);
        let (Some(a), Some(b)) = (sim.vehicle(first), sim.vehicle(second)) else {
            continue;
        };
        if a.is_stopped() && b.is_stopped() {
            both_halting = true;
            assert_eq!(sim.network().bus_stop(bus_stop).vehicle_number(), 2);
            assert!(a.pos() <= 240.0 + 1e-9);
            assert!(b.pos() <= a.rear() + 1e-9);
            assert!(b.rear() >= 200.0 - 1e-9);
        }
    }
    assert!(both_halting);
}

/// Test that stops behind the vehicle or off its route are rejected.
#[test]
fn stop_must_be_downstream() {
    init();
    let (mut net, edges, lanes) = two_edges();
    let c = net.add_edge("c", EdgePurpose::Normal).unwrap();
    let lc = net
        .add_lane(
            c,
            &LaneAttributes {
                length: 100.0,
                ..Default::default()
            },
        )
        .unwrap();
    let (mut sim, vtype) = setup(net);
    let route = sim.add_route("r", &edges).unwrap();
    let veh = sim
        .add_vehicle(&VehicleParams {
            depart_pos: DepartPos::Given(300.0),
            ..VehicleParams::new("v", vtype, route)
        })
        .unwrap();
    sim.step().unwrap();

    let off_route = sim.add_stop(veh, &stop_at(lc, 50.0, 1.0));
    assert!(matches!(off_route, Err(SimError::StopNotDownstream { .. })));
    let behind = sim.add_stop(veh, &stop_at(lanes[0], 100.0, 1.0));
    assert!(matches!(behind, Err(SimError::StopNotDownstream { .. })));
    let out_of_range = sim.add_stop(veh, &stop_at(lanes[1], 600.0, 1.0));
    assert!(matches!(out_of_range, Err(SimError::InvalidParameter(_))));
    sim.add_stop(veh, &stop_at(lanes[1], 100.0, 1.0)).unwrap();
    assert_eq!(sim.vehicle(veh).unwrap().pending_stops(), 1);
}
