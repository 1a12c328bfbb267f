//! Tests of right of way at a junction with a priority and a yielding link.

use lanesim::{
    DepartSpeed, EdgeId, EdgePurpose, JunctionId, JunctionLogic, LaneAttributes, LinkAttributes,
    LinkId, LinkState, Network, SimConfig, Simulation, VehicleId, VehicleParams,
    VehicleTypeParams,
};
use slotmap::SlotMap;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Crossing {
    net: Network,
    junction: JunctionId,
    /// The priority link.
    major: LinkId,
    /// The link yielding to `major`.
    minor: LinkId,
    /// Approach and exit edges of the major and the minor road.
    edges: [EdgeId; 4],
}

/// Two roads crossing at a junction, the minor road yielding to the major.
fn crossing() -> Crossing {
    let mut net = Network::new();
    let attribs = LaneAttributes {
        length: 100.0,
        max_speed: 13.9,
        ..Default::default()
    };
    let mut edges = vec![];
    let mut lanes = vec![];
    for name in ["major_in", "major_out", "minor_in", "minor_out"] {
        let edge = net.add_edge(name, EdgePurpose::Normal).unwrap();
        lanes.push(net.add_lane(edge, &attribs).unwrap());
        edges.push(edge);
    }
    let major = net
        .add_link(&LinkAttributes {
            length: 10.0,
            ..LinkAttributes::new(lanes[0], lanes[1])
        })
        .unwrap();
    let minor = net
        .add_link(&LinkAttributes {
            length: 10.0,
            priority: false,
            ..LinkAttributes::new(lanes[2], lanes[3])
        })
        .unwrap();
    let logic = JunctionLogic::builder(2).prohibits(0, 1).build().unwrap();
    let junction = net.add_junction("j", &[major, minor], &[], logic).unwrap();
    Crossing {
        net,
        junction,
        major,
        minor,
        edges: [edges[0], edges[1], edges[2], edges[3]],
    }
}

fn vehicle_ids(n: usize) -> Vec<VehicleId> {
    let mut vehicles = SlotMap::<VehicleId, ()>::with_key();
    (0..n).map(|_| vehicles.insert(())).collect()
}

/// Test that the major link is open regardless of the minor link's traffic.
#[test]
fn major_link_always_open() {
    let Crossing {
        mut net, major, minor, ..
    } = crossing();
    let ids = vehicle_ids(1);
    assert!(net.link(major).opened(10.0, 10.0, &net));
    net.link_mut(minor).set_approaching(ids[0], 10.0, 10.0, true);
    assert!(net.link(major).opened(10.0, 10.0, &net));
    assert!(net.link(major).foe_links().is_empty());
    assert_eq!(net.link(minor).foe_links(), &[major]);
}

/// Test that the minor link closes while a vehicle is expected on the
/// major link, and opens once that window has passed.
#[test]
fn minor_link_waits_for_major_window() {
    let Crossing {
        mut net, major, minor, ..
    } = crossing();
    let ids = vehicle_ids(2);
    let slack = net.lookahead_slack();
    assert!(net.link(minor).opened(10.0, 10.0, &net));

    // Passes the major link within [10, 11]
    net.link_mut(major).set_approaching(ids[0], 10.0, 10.0, true);
    assert!(!net.link(minor).opened(10.0, 10.0, &net));
    assert!(!net.link(minor).opened(11.0 + slack - 0.5, 10.0, &net));
    assert!(net.link(minor).opened(11.0 + slack + 0.5, 10.0, &net));

    // Asking twice gives the same answer
    let first = net.link(minor).opened(12.0, 5.0, &net);
    let second = net.link(minor).opened(12.0, 5.0, &net);
    assert_eq!(first, second);

    // A registration without the wish to pass does not block
    net.link_mut(major).set_approaching(ids[0], 10.0, 10.0, false);
    assert!(net.link(minor).opened(10.0, 10.0, &net));

    net.link_mut(major).set_approaching(ids[1], 10.0, 10.0, true);
    net.link_mut(major).remove_approaching(ids[1]);
    assert!(net.link(minor).opened(10.0, 10.0, &net));
}

/// Test that a red link never opens.
#[test]
fn red_links_are_closed() {
    let Crossing { mut net, major, .. } = crossing();
    net.link_mut(major).set_state(LinkState::Red);
    assert!(!net.link(major).opened(10.0, 10.0, &net));
    net.link_mut(major).set_state(LinkState::GreenMajor);
    assert!(net.link(major).opened(10.0, 10.0, &net));
}

/// Test that two vehicles arriving at the same time are served major first.
#[test]
fn minor_vehicle_yields() {
    init();
    let Crossing {
        net,
        junction,
        edges,
        ..
    } = crossing();
    let mut sim = Simulation::new(SimConfig::default(), net).unwrap();
    let vtype = sim.add_vehicle_type(&VehicleTypeParams::default()).unwrap();
    let major_route = sim.add_route("major", &[edges[0], edges[1]]).unwrap();
    let minor_route = sim.add_route("minor", &[edges[2], edges[3]]).unwrap();
    let fast = |name, route| VehicleParams {
        depart_speed: DepartSpeed::Max,
        ..VehicleParams::new(name, vtype, route)
    };
    let a = sim.add_vehicle(&fast("a", major_route)).unwrap();
    let b = sim.add_vehicle(&fast("b", minor_route)).unwrap();

    let mut b_crossed = false;
    for _ in 0..60 {
        sim.step().unwrap();
        let respond = sim.network().junction(junction).respond();
        assert!(!(respond.test(0) && respond.test(1)));
        let Some(veh_b) = sim.vehicle(b) else {
            break;
        };
        if veh_b.route_idx() == 1 && !b_crossed {
            b_crossed = true;
            // The major vehicle went first
            assert!(sim.vehicle(a).map_or(true, |veh_a| veh_a.route_idx() == 1));
        }
    }
    assert!(b_crossed);
}
