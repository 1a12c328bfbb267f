//! Tests that vehicles do not enter a junction they cannot leave.

use lanesim::{
    DepartPos, DepartSpeed, EdgePurpose, JunctionId, JunctionLogic, LaneAttributes, LaneId,
    LinkAttributes, Network, SimConfig, Simulation, StopParams, VehicleId, VehicleParams,
    VehicleTypeParams,
};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct FourWay {
    sim: Simulation,
    junction: JunctionId,
    approaches: Vec<LaneId>,
    exits: Vec<LaneId>,
}

/// A junction of four approaches whose links all exclude each other. Each
/// link crosses over a 10 m internal lane onto an 8 m exit lane. The first
/// `crossing` approaches get a vehicle that wants to cross.
fn four_way(blocked_exits: bool, crossing: usize) -> FourWay {
    let mut net = Network::new();
    let internal = net.add_edge(":j", EdgePurpose::Internal).unwrap();
    let mut approaches = vec![];
    let mut exits = vec![];
    let mut links = vec![];
    let mut vias = vec![];
    for i in 0..4 {
        let approach = net.add_edge(&format!("in{}", i), EdgePurpose::Normal).unwrap();
        let exit = net.add_edge(&format!("out{}", i), EdgePurpose::Normal).unwrap();
        let from = net
            .add_lane(
                approach,
                &LaneAttributes {
                    length: 100.0,
                    max_speed: 13.9,
                    ..Default::default()
                },
            )
            .unwrap();
        let to = net
            .add_lane(
                exit,
                &LaneAttributes {
                    length: 8.0,
                    ..Default::default()
                },
            )
            .unwrap();
        let via = net
            .add_lane(
                internal,
                &LaneAttributes {
                    length: 10.0,
                    ..Default::default()
                },
            )
            .unwrap();
        links.push(
            net.add_link(&LinkAttributes {
                via: Some(via),
                ..LinkAttributes::new(from, to)
            })
            .unwrap(),
        );
        approaches.push(from);
        exits.push(to);
        vias.push(via);
    }
    let mut logic = JunctionLogic::builder(4);
    for a in 0..4 {
        for b in a + 1..4 {
            logic = logic.mutual(a, b);
        }
    }
    let junction = net
        .add_junction("j", &links, &vias, logic.build().unwrap())
        .unwrap();

    let mut sim = Simulation::new(SimConfig::default(), net).unwrap();
    let vtype = sim.add_vehicle_type(&VehicleTypeParams::default()).unwrap();
    for i in 0..4 {
        let approach = sim.network().lane(approaches[i]).edge();
        let exit = sim.network().lane(exits[i]).edge();
        if blocked_exits {
            let route = sim.add_route(&format!("park{}", i), &[exit]).unwrap();
            sim.add_vehicle(&VehicleParams {
                depart_pos: DepartPos::Given(8.0),
                stops: vec![StopParams {
                    lane: exits[i],
                    pos: 8.0,
                    duration: 10_000.0,
                    until: None,
                    bus_stop: None,
                }],
                ..VehicleParams::new(&format!("parked{}", i), vtype, route)
            })
            .unwrap();
        }
        if i >= crossing {
            continue;
        }
        let route = sim.add_route(&format!("cross{}", i), &[approach, exit]).unwrap();
        sim.add_vehicle(&VehicleParams {
            depart_speed: DepartSpeed::Max,
            ..VehicleParams::new(&format!("v{}", i), vtype, route)
        })
        .unwrap();
    }
    FourWay {
        sim,
        junction,
        approaches,
        exits,
    }
}

fn crossing_vehicles(sim: &Simulation) -> Vec<VehicleId> {
    (0..4)
        .filter_map(|i| sim.vehicle_by_name(&format!("v{}", i)))
        .map(|v| v.id())
        .collect()
}

/// Test that with every exit blocked no vehicle requests or enters the junction.
#[test]
fn blocked_exits_retract_requests() {
    init();
    let FourWay {
        mut sim,
        junction,
        approaches,
        ..
    } = four_way(true, 4);
    sim.step().unwrap();
    assert_eq!(sim.vehicle_control().running_count(), 8);

    for _ in 0..60 {
        let report = sim.step().unwrap();
        assert_eq!(report.collisions, 0);
        assert!(sim.network().junction(junction).request().none());
        for id in crossing_vehicles(&sim) {
            let veh = sim.vehicle(id).unwrap();
            let lane = veh.lane().unwrap();
            assert!(approaches.contains(&lane), "'{}' entered the junction", veh.name());
            for item in veh.drive_items() {
                let Some(link) = item.link else {
                    continue;
                };
                let gated = sim.network().link(link).request_slot().is_some();
                assert!(!(gated && item.set_request));
            }
        }
    }
    for id in crossing_vehicles(&sim) {
        let veh = sim.vehicle(id).unwrap();
        assert!(veh.speed() < 0.1);
        assert!(veh.pos() <= 100.0);
    }
}

/// Test that a vehicle alone at the junction crosses it when the exit is free.
#[test]
fn free_exit_is_entered() {
    init();
    let FourWay { mut sim, exits, .. } = four_way(false, 1);
    sim.step().unwrap();
    let first = sim.vehicle_by_name("v0").unwrap().id();
    let mut reached_exit = false;
    for _ in 0..60 {
        sim.step().unwrap();
        match sim.vehicle(first) {
            Some(veh) if veh.lane() == Some(exits[0]) => reached_exit = true,
            Some(_) => {}
            None => {
                reached_exit = true;
                break;
            }
        }
    }
    assert!(reached_exit);
}

/// Test that a vehicle alone at the junction drives onto the internal lane
/// when the exit is short, since no foe is approaching to be blocked.
#[test]
fn lone_vehicle_waits_inside_junction() {
    init();
    let FourWay {
        mut sim,
        junction,
        approaches,
        ..
    } = four_way(true, 1);
    sim.step().unwrap();
    let first = sim.vehicle_by_name("v0").unwrap().id();
    let mut requested = false;
    let mut entered = false;
    for _ in 0..40 {
        let report = sim.step().unwrap();
        assert_eq!(report.collisions, 0);
        requested |= !sim.network().junction(junction).request().none();
        let veh = sim.vehicle(first).unwrap();
        entered |= veh.lane() != Some(approaches[0]);
    }
    assert!(requested);
    assert!(entered);
    let veh = sim.vehicle(first).unwrap();
    assert!(veh.speed() < 0.1);
}
