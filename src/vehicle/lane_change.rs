//! Lane changing within an edge: toward the lanes that continue the route,
//! toward faster lanes, and back to the right.

use super::Vehicle;
use crate::cfmodel::{CarFollowing, SpeedPatch};
use crate::network::Network;
use crate::{EdgeId, LaneId, VehicleId, VehicleSet};
use log::trace;
use smallvec::SmallVec;

/// The speed advantage a lane to the left must offer, in m/s.
const SPEED_GAIN_THRESHOLD: f64 = 1.0;

/// The distance per lane to cross before the end of the continuation at
/// which a blocked change starts to slow the vehicle down, in m.
const URGENT_DISTANCE_PER_LANE: f64 = 100.0;

/// Speeds this close are considered equal, in m/s.
const SPEED_EPS: f64 = 0.01;

/// The lane-change model's state of a vehicle.
#[derive(Clone, Debug, Default)]
pub(crate) struct LaneChangeState {
    /// The speed the vehicle should not exceed to let a change succeed.
    v_patch: Option<f64>,
}

impl LaneChangeState {
    /// Asks the vehicle to drive no faster than `speed` in its next move.
    pub fn set_patch(&mut self, speed: f64) {
        self.v_patch = Some(self.v_patch.map_or(speed, |v| v.min(speed)));
    }

    pub fn reset_patch(&mut self) {
        self.v_patch = None;
    }
}

impl SpeedPatch for LaneChangeState {
    fn patch_speed(&mut self, min: f64, wanted: f64, max: f64, _vsafe: f64) -> f64 {
        match self.v_patch {
            Some(v) => wanted.min(v).max(min).min(max),
            None => wanted,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Decision {
    Stay,
    Change(usize),
    /// An urgent change is blocked; slow down to this speed.
    Blocked(f64),
}

/// The vehicles directly in front of and behind a position on a lane.
struct Neighbours<'a> {
    leader: Option<&'a Vehicle>,
    follower: Option<&'a Vehicle>,
}

fn neighbours<'a>(veh: &Vehicle, list: &[VehicleId], vehicles: &'a VehicleSet) -> Neighbours<'a> {
    let others = list
        .iter()
        .filter(|id| **id != veh.id())
        .filter_map(|id| vehicles.get(*id));
    let mut leader = None;
    let mut follower = None;
    for other in others {
        if other.pos() >= veh.pos() {
            leader = Some(other);
        } else {
            follower = Some(other);
            break;
        }
    }
    Neighbours { leader, follower }
}

/// The speed `veh` could drive at on lane `index` of the edge.
fn anticipated_speed(
    veh: &Vehicle,
    lanes: &[LaneId],
    index: usize,
    lists: &[Vec<VehicleId>],
    net: &Network,
    vehicles: &VehicleSet,
) -> f64 {
    let model = veh.model();
    let lane = net.lane(lanes[index]);
    let mut v = model
        .max_next_speed(veh.speed())
        .min(lane.max_speed())
        .min(veh.max_speed());
    if let Some(leader) = neighbours(veh, &lists[index], vehicles).leader {
        let gap = leader.rear() - veh.pos();
        v = v.min(model.safe_follow_speed(veh.speed(), gap, leader.speed()));
    }
    v
}

/// Whether `veh` fits between the vehicles of lane `index`. Returns the
/// blocking leader's gap and speed if the leader is in the way.
fn check_gaps(
    veh: &Vehicle,
    lanes: &[LaneId],
    index: usize,
    lists: &[Vec<VehicleId>],
    net: &Network,
    vehicles: &VehicleSet,
) -> Result<(), Option<(f64, f64)>> {
    let lane = net.lane(lanes[index]);
    let lane_max = lane.max_speed();
    let around = neighbours(veh, &lists[index], vehicles);
    let leader = match around.leader {
        Some(leader) => Some((leader.rear() - veh.pos(), leader.speed())),
        None => lane.partial_occupator().and_then(|(occ, end)| {
            vehicles.get(occ).map(|o| (end - veh.pos(), o.speed()))
        }),
    };
    if let Some((gap, speed)) = leader {
        if !veh.model().has_safe_gap(veh.speed(), gap, speed, lane_max) {
            return Err(Some((gap, speed)));
        }
    }
    if let Some(follower) = around.follower {
        let gap = veh.rear() - follower.pos();
        if !follower
            .model()
            .has_safe_gap(follower.speed(), gap, veh.speed(), lane_max)
        {
            return Err(None);
        }
    }
    Ok(())
}

fn decide(
    veh: &Vehicle,
    index: usize,
    lanes: &[LaneId],
    lists: &[Vec<VehicleId>],
    net: &Network,
    vehicles: &VehicleSet,
) -> Decision {
    if veh.is_stopped() || veh.rear() < 0.0 {
        return Decision::Stay;
    }
    let Some(q) = veh.best_lane_q() else {
        return Decision::Stay;
    };
    let vclass = veh.vtype().vclass();
    let offset_of = |i: usize| {
        veh.best_lanes()
            .iter()
            .find(|q| q.lane == lanes[i])
            .map_or(isize::MAX, |q| q.best_offset.abs())
    };
    let usable = |i: isize| -> Option<usize> {
        let i = usize::try_from(i).ok()?;
        (i < lanes.len() && net.lane(lanes[i]).allows(vclass)).then_some(i)
    };

    if q.best_offset != 0 {
        let Some(target) = usable(index as isize + q.best_offset.signum()) else {
            return Decision::Stay;
        };
        return match check_gaps(veh, lanes, target, lists, net, vehicles) {
            Ok(()) => Decision::Change(target),
            Err(blocker) => {
                let remaining = q.length - veh.pos();
                let urgent = remaining < q.best_offset.abs() as f64 * URGENT_DISTANCE_PER_LANE;
                match blocker {
                    Some((gap, speed)) if urgent && gap > 0.0 => Decision::Blocked(
                        veh.model().safe_follow_speed(veh.speed(), gap, speed),
                    ),
                    _ => Decision::Stay,
                }
            }
        };
    }

    let own = anticipated_speed(veh, lanes, index, lists, net, vehicles);
    if let Some(left) = usable(index as isize + 1).filter(|l| offset_of(*l) == 0) {
        let gain = anticipated_speed(veh, lanes, left, lists, net, vehicles) - own;
        if gain > SPEED_GAIN_THRESHOLD && check_gaps(veh, lanes, left, lists, net, vehicles).is_ok() {
            return Decision::Change(left);
        }
    }
    if let Some(right) = usable(index as isize - 1).filter(|r| offset_of(*r) == 0) {
        let right_speed = anticipated_speed(veh, lanes, right, lists, net, vehicles);
        if right_speed >= own - SPEED_EPS
            && check_gaps(veh, lanes, right, lists, net, vehicles).is_ok()
        {
            return Decision::Change(right);
        }
    }
    Decision::Stay
}

/// Performs the lane changes on one edge. Works on snapshots of the lanes'
/// vehicle lists and hands the results back through
/// [crate::Lane::swap_after_lane_change]. Returns the lanes that were empty
/// and received vehicles.
pub(crate) fn change_lanes_on_edge(
    edge: EdgeId,
    net: &Network,
    vehicles: &mut VehicleSet,
    now: f64,
) -> SmallVec<[LaneId; 2]> {
    let lanes = net.lanes(edge);
    if lanes.len() < 2 {
        return SmallVec::new();
    }
    let mut lists = lanes
        .iter()
        .map(|l| net.lane(*l).vehicle_ids())
        .collect::<Vec<_>>();
    let was_empty = lists.iter().map(Vec::is_empty).collect::<SmallVec<[bool; 4]>>();
    let mut changes: Vec<(VehicleId, usize)> = vec![];
    let mut patches: Vec<(VehicleId, f64)> = vec![];
    let mut touched = SmallVec::<[usize; 4]>::new();

    for index in 0..lanes.len() {
        for id in lists[index].clone() {
            if changes.iter().any(|(c, _)| *c == id) {
                continue;
            }
            let Some(veh) = vehicles.get(id) else {
                continue;
            };
            match decide(veh, index, lanes, &lists, net, vehicles) {
                Decision::Stay => {}
                Decision::Blocked(speed) => patches.push((id, speed)),
                Decision::Change(target) => {
                    trace!(
                        "vehicle '{}' changes from lane '{}' to '{}'",
                        veh.name(),
                        net.lane(lanes[index]).name(),
                        net.lane(lanes[target]).name()
                    );
                    lists[index].retain(|v| *v != id);
                    let at = lists[target]
                        .iter()
                        .position(|v| vehicles.get(*v).map_or(true, |o| o.pos() < veh.pos()))
                        .unwrap_or(lists[target].len());
                    lists[target].insert(at, id);
                    changes.push((id, target));
                    for i in [index, target] {
                        if !touched.contains(&i) {
                            touched.push(i);
                        }
                    }
                }
            }
        }
    }

    for (id, speed) in patches {
        if let Some(veh) = vehicles.get_mut(id) {
            veh.lane_change_mut().set_patch(speed);
        }
    }
    for (id, target) in &changes {
        if let Some(veh) = vehicles.get_mut(*id) {
            veh.enter_lane_at_lane_change(net, lanes[*target], now);
        }
    }
    let mut activated = SmallVec::new();
    for i in touched {
        net.lane(lanes[i])
            .swap_after_lane_change(std::mem::take(&mut lists[i]), vehicles);
        if was_empty[i] && !net.lane(lanes[i]).is_empty() {
            activated.push(lanes[i]);
        }
    }
    activated
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn patch_bounds_speed() {
        let mut state = LaneChangeState::default();
        assert_approx_eq!(state.patch_speed(1.0, 10.0, 12.0, 12.0), 10.0);
        state.set_patch(5.0);
        state.set_patch(7.0);
        assert_approx_eq!(state.patch_speed(1.0, 10.0, 12.0, 12.0), 5.0);
        // Never below what braking allows
        assert_approx_eq!(state.patch_speed(6.0, 10.0, 12.0, 12.0), 6.0);
        state.reset_patch();
        assert_approx_eq!(state.patch_speed(1.0, 10.0, 12.0, 12.0), 10.0);
    }
}
