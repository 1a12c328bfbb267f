//! Tests of vehicles at a fixed-time traffic light.

use lanesim::{
    DepartSpeed, EdgePurpose, LaneAttributes, LinkAttributes, LinkState, Network, Phase,
    SimConfig, Simulation, TrafficLight, VehicleParams, VehicleTypeParams,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Test that a vehicle waits at a red light and leaves once it turns green.
#[test]
fn vehicle_waits_for_green() {
    init();
    let mut net = Network::new();
    let attribs = LaneAttributes {
        length: 200.0,
        max_speed: 13.9,
        ..Default::default()
    };
    let a = net.add_edge("a", EdgePurpose::Normal).unwrap();
    let b = net.add_edge("b", EdgePurpose::Normal).unwrap();
    let la = net.add_lane(a, &attribs).unwrap();
    let lb = net.add_lane(b, &attribs).unwrap();
    let link = net.add_link(&LinkAttributes::new(la, lb)).unwrap();

    let mut sim = Simulation::new(SimConfig::default(), net).unwrap();
    let phases = vec![
        Phase::new(60.0, vec![LinkState::Red]),
        Phase::new(60.0, vec![LinkState::GreenMajor]),
    ];
    let light = sim
        .add_traffic_light(TrafficLight::new("tl", vec![link], phases, 0.0).unwrap())
        .unwrap();
    let vtype = sim.add_vehicle_type(&VehicleTypeParams::default()).unwrap();
    let route = sim.add_route("r", &[a, b]).unwrap();
    let veh = sim
        .add_vehicle(&VehicleParams {
            depart_speed: DepartSpeed::Max,
            ..VehicleParams::new("v", vtype, route)
        })
        .unwrap();

    sim.run_until(45.0).unwrap();
    assert_eq!(sim.network().link(link).state(), LinkState::Red);
    assert_eq!(sim.traffic_light(light).unwrap().current_phase(), 0);
    let vehicle = sim.vehicle(veh).unwrap();
    assert_eq!(vehicle.lane(), Some(la));
    assert!(vehicle.speed() < 0.1);
    assert!(vehicle.pos() <= 200.0);
    assert!(vehicle.pos() > 190.0);

    sim.run_until(100.0).unwrap();
    assert_eq!(sim.network().link(link).state(), LinkState::GreenMajor);
    assert!(sim.vehicle(veh).map_or(true, |v| v.lane() == Some(lb)));
}

/// Test that setting a link state by hand is rejected for unknown links.
#[test]
fn link_state_needs_known_link() {
    let mut net = Network::new();
    let attribs = LaneAttributes::default();
    let a = net.add_edge("a", EdgePurpose::Normal).unwrap();
    let b = net.add_edge("b", EdgePurpose::Normal).unwrap();
    let la = net.add_lane(a, &attribs).unwrap();
    let lb = net.add_lane(b, &attribs).unwrap();
    let link = net.add_link(&LinkAttributes::new(la, lb)).unwrap();
    let mut sim = Simulation::new(SimConfig::default(), net).unwrap();
    sim.set_link_state(link, LinkState::Red).unwrap();
    assert!(sim.network().link(link).state().is_red());
    assert!(sim.set_link_state(Default::default(), LinkState::Red).is_err());
}
