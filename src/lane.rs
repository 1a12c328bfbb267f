use crate::cfmodel::CarFollowing;
use crate::math::{Point2d, Polyline, Vector2d};
use crate::network::Network;
use crate::reminder::MoveReminder;
use crate::vtype::VehicleClass;
use crate::{EdgeId, LaneId, LinkId, Vehicle, VehicleId, VehicleSet};
use itertools::Itertools;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Overlaps below this are rounding noise, in m.
const OVERLAP_TOLERANCE: f64 = 1e-6;

/// The attributes of a lane.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LaneAttributes {
    /// The length of the lane in m.
    pub length: f64,
    /// The speed limit in m/s.
    pub max_speed: f64,
    /// The vehicle classes allowed on the lane, or `None` for all.
    pub allowed: Option<Vec<VehicleClass>>,
    /// The centre line of the lane.
    pub shape: Option<Polyline>,
}

impl Default for LaneAttributes {
    fn default() -> Self {
        Self {
            length: 100.0,
            max_speed: 13.89,
            allowed: None,
            shape: None,
        }
    }
}

/// The last vehicle on a lane as seen by a vehicle approaching the lane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LeaderInfo {
    pub vehicle: VehicleId,
    /// The position of the vehicle's rear on the lane, in m.
    pub rear: f64,
    /// The speed of the vehicle in m/s.
    pub speed: f64,
}

/// Two vehicles on a lane found to overlap.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Collision {
    pub lane: LaneId,
    pub leader: VehicleId,
    pub follower: VehicleId,
    /// The (negative) gap between the two, in m.
    pub gap: f64,
}

/// The mutable part of a lane, guarded by the lane's lock.
#[derive(Debug, Default)]
struct Occupancy {
    /// The vehicles on the lane, front (highest position) first.
    vehicles: Vec<VehicleId>,
    /// The summed lengths of `vehicles`, in m.
    length_sum: f64,
    /// Vehicles that moved onto the lane and wait to be integrated.
    incoming: Vec<(VehicleId, f64)>,
    /// A vehicle on a successor lane whose rear reaches back onto this lane,
    /// with the position its rear reaches to.
    partial: Option<(VehicleId, f64)>,
}

/// The lane's vehicle list, locked for as long as the guard lives.
pub struct VehiclesGuard<'a> {
    guard: MutexGuard<'a, Occupancy>,
}

impl<'a> Deref for VehiclesGuard<'a> {
    type Target = [VehicleId];

    fn deref(&self) -> &[VehicleId] {
        &self.guard.vehicles
    }
}

/// Vehicles removed from a lane by [Lane::move_critical].
#[derive(Debug, Default)]
pub(crate) struct MoveOutcome {
    /// Vehicles that drove onto another lane.
    pub leavers: Vec<VehicleId>,
    /// Vehicles that reached the end of their route.
    pub arrived: Vec<VehicleId>,
}

/// A lane: a one-dimensional path along which vehicles queue.
pub struct Lane {
    id: LaneId,
    name: String,
    edge: EdgeId,
    /// The index of the lane within its edge, rightmost first.
    index: usize,
    length: f64,
    max_speed: f64,
    allowed: Option<Vec<VehicleClass>>,
    shape: Option<Polyline>,
    internal: bool,
    /// The outgoing links.
    links: Vec<LinkId>,
    /// The lanes with a link onto this one.
    incoming: Vec<LaneId>,
    reminders: Vec<Arc<dyn MoveReminder>>,
    state: Mutex<Occupancy>,
}

impl Lane {
    /// Creates a new lane.
    pub(crate) fn new(
        id: LaneId,
        edge: EdgeId,
        name: String,
        index: usize,
        internal: bool,
        attribs: &LaneAttributes,
    ) -> Self {
        Self {
            id,
            name,
            edge,
            index,
            length: attribs.length,
            max_speed: attribs.max_speed,
            allowed: attribs.allowed.clone(),
            shape: attribs.shape.clone(),
            internal,
            links: vec![],
            incoming: vec![],
            reminders: vec![],
            state: Mutex::new(Occupancy::default()),
        }
    }

    pub fn id(&self) -> LaneId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn edge(&self) -> EdgeId {
        self.edge
    }

    /// The index of the lane within its edge, rightmost first.
    pub fn index(&self) -> usize {
        self.index
    }

    /// The length of the lane in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// The speed limit in m/s.
    pub fn max_speed(&self) -> f64 {
        self.max_speed
    }

    /// Whether the lane crosses a junction.
    pub fn is_internal(&self) -> bool {
        self.internal
    }

    /// Whether vehicles of the class may use the lane.
    pub fn allows(&self, vclass: VehicleClass) -> bool {
        self.allowed
            .as_ref()
            .map_or(true, |allowed| allowed.contains(&vclass))
    }

    /// The outgoing links.
    pub fn links(&self) -> &[LinkId] {
        &self.links
    }

    /// The lanes with a link leading onto this one.
    pub fn incoming_lanes(&self) -> &[LaneId] {
        &self.incoming
    }

    /// The move reminders attached to the lane.
    pub fn reminders(&self) -> &[Arc<dyn MoveReminder>] {
        &self.reminders
    }

    /// The world position and direction at `pos` m along the lane.
    pub fn position_at(&self, pos: f64) -> Option<(Point2d, Vector2d)> {
        let shape = self.shape.as_ref()?;
        shape.sample(pos / self.length * shape.length())
    }

    pub(crate) fn add_link(&mut self, link: LinkId) {
        self.links.push(link);
    }

    pub(crate) fn add_incoming(&mut self, lane: LaneId) {
        if !self.incoming.contains(&lane) {
            self.incoming.push(lane);
        }
    }

    pub(crate) fn replace_incoming(&mut self, old: LaneId, new: LaneId) {
        self.incoming.retain(|l| *l != old);
        self.add_incoming(new);
    }

    pub(crate) fn add_reminder(&mut self, reminder: Arc<dyn MoveReminder>) {
        self.reminders.push(reminder);
    }

    fn state(&self) -> MutexGuard<'_, Occupancy> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks the lane and returns its vehicles, front first.
    /// The lane stays locked until the guard is dropped.
    pub fn vehicles_secure(&self) -> VehiclesGuard<'_> {
        VehiclesGuard { guard: self.state() }
    }

    /// A snapshot of the vehicles on the lane, front first.
    pub fn vehicle_ids(&self) -> Vec<VehicleId> {
        self.state().vehicles.clone()
    }

    pub fn vehicle_number(&self) -> usize {
        self.state().vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().vehicles.is_empty()
    }

    /// Whether a vehicle is on the lane or reaches back onto it.
    pub fn is_occupied(&self) -> bool {
        let state = self.state();
        !state.vehicles.is_empty() || state.partial.is_some()
    }

    /// The summed length of the vehicles on the lane, in m.
    pub fn vehicle_length_sum(&self) -> f64 {
        self.state().length_sum
    }

    /// The share of the lane covered by vehicles.
    pub fn occupancy(&self) -> f64 {
        self.vehicle_length_sum() / self.length
    }

    /// The vehicle closest to the end of the lane.
    pub fn first_vehicle(&self) -> Option<VehicleId> {
        self.state().vehicles.first().copied()
    }

    /// The vehicle closest to the start of the lane.
    pub fn last_vehicle(&self) -> Option<VehicleId> {
        self.state().vehicles.last().copied()
    }

    /// The vehicle reaching back onto this lane from a successor, with the
    /// position its rear reaches to.
    pub fn partial_occupator(&self) -> Option<(VehicleId, f64)> {
        self.state().partial
    }

    /// The rearmost obstacle on the lane: its last vehicle, or else the
    /// vehicle reaching back onto it.
    pub fn last_vehicle_information(&self, vehicles: &VehicleSet) -> Option<LeaderInfo> {
        let (last, partial) = {
            let state = self.state();
            (state.vehicles.last().copied(), state.partial)
        };
        if let Some(veh) = last.and_then(|id| vehicles.get(id)) {
            return Some(LeaderInfo {
                vehicle: veh.id(),
                rear: veh.pos() - veh.length(),
                speed: veh.speed(),
            });
        }
        let (id, end) = partial?;
        vehicles.get(id).map(|veh| LeaderInfo {
            vehicle: id,
            rear: end,
            speed: veh.speed(),
        })
    }

    /// Inserts `candidate` at `pos` with `speed` if it keeps safe gaps to the
    /// vehicles around it. `beyond` is the last vehicle on the lane the
    /// candidate would drive onto next.
    pub fn is_emission_success(
        &self,
        candidate: &Vehicle,
        pos: f64,
        speed: f64,
        vehicles: &VehicleSet,
        beyond: Option<LeaderInfo>,
    ) -> bool {
        let model = candidate.model();
        let mut state = self.state();
        let k = state
            .vehicles
            .iter()
            .take_while(|id| vehicles.get(**id).map_or(false, |v| v.pos() >= pos))
            .count();
        let leader = k.checked_sub(1).and_then(|i| vehicles.get(state.vehicles[i]));
        let follower = state.vehicles.get(k).and_then(|id| vehicles.get(*id));

        match leader {
            Some(leader) => {
                let gap = leader.pos() - leader.length() - pos;
                if gap < 0.0 || gap < model.secure_gap(speed, leader.speed()) {
                    return false;
                }
            }
            None => {
                if let Some((occ, end)) = state.partial {
                    let occ_speed = vehicles.get(occ).map_or(0.0, |v| v.speed());
                    let gap = end - pos;
                    if gap < 0.0 || gap < model.secure_gap(speed, occ_speed) {
                        return false;
                    }
                } else if let Some(beyond) = beyond {
                    let gap = self.length - pos + beyond.rear;
                    if gap < model.secure_gap(speed, beyond.speed) {
                        return false;
                    }
                }
            }
        }
        if let Some(follower) = follower {
            let gap = pos - candidate.length() - follower.pos();
            if gap < 0.0
                || gap
                    < follower
                        .model()
                        .secure_gap(follower.speed(), speed)
            {
                return false;
            }
        }
        state.vehicles.insert(k, candidate.id());
        state.length_sum += candidate.length();
        true
    }

    /// Hands a vehicle that moved onto the lane over for integration.
    pub(crate) fn push_incoming(&self, id: VehicleId, length: f64) {
        self.state().incoming.push((id, length));
    }

    /// Takes a vehicle of the given length off the lane.
    /// Returns false if it was not on it.
    pub(crate) fn remove_vehicle(&self, id: VehicleId, length: f64) -> bool {
        let mut state = self.state();
        if let Some(idx) = state.incoming.iter().position(|(v, _)| *v == id) {
            state.incoming.remove(idx);
            return true;
        }
        match state.vehicles.iter().position(|v| *v == id) {
            Some(idx) => {
                state.vehicles.remove(idx);
                state.length_sum = f64::max(0.0, state.length_sum - length);
                true
            }
            None => false,
        }
    }

    /// Computes the drive items of the vehicles on the lane, front to back.
    ///
    /// Reads only; the result is committed by the caller.
    pub(crate) fn plan_moves(
        &self,
        net: &Network,
        vehicles: &VehicleSet,
        now: f64,
    ) -> Vec<(VehicleId, Vec<crate::DriveItem>)> {
        let ids = self.vehicle_ids();
        let mut lengths_in_front = 0.0;
        let mut plans = Vec::with_capacity(ids.len());
        let mut pred: Option<&Vehicle> = None;
        for id in ids {
            let Some(veh) = vehicles.get(id) else {
                continue;
            };
            let items = veh.plan_move(net, vehicles, pred, pred.is_none(), lengths_in_front, now);
            plans.push((id, items));
            lengths_in_front += veh.length();
            pred = Some(veh);
        }
        plans
    }

    /// Moves the vehicles on the lane according to their committed drive
    /// items. Vehicles that left the lane or arrived are taken off it.
    pub(crate) fn move_critical(
        &self,
        net: &Network,
        vehicles: &mut VehicleSet,
        now: f64,
    ) -> MoveOutcome {
        let mut outcome = MoveOutcome::default();
        let mut removed = SmallVec::<[(VehicleId, f64); 4]>::new();
        for id in self.vehicle_ids() {
            let Some(veh) = vehicles.get_mut(id) else {
                continue;
            };
            veh.move_first_checked(net, now);
            if veh.has_arrived(net) {
                outcome.arrived.push(id);
            } else if veh.lane() != Some(self.id) {
                outcome.leavers.push(id);
            } else {
                continue;
            }
            removed.push((id, veh.length()));
        }
        for (id, length) in removed {
            self.remove_vehicle(id, length);
        }
        outcome
    }

    /// Hands the vehicles which left this lane to the lanes they are on now.
    /// Returns the lanes which received vehicles.
    pub(crate) fn set_critical(
        &self,
        leavers: &[VehicleId],
        net: &Network,
        vehicles: &VehicleSet,
    ) -> SmallVec<[LaneId; 4]> {
        let mut targets = SmallVec::new();
        for veh in leavers.iter().filter_map(|id| vehicles.get(*id)) {
            if let Some(target) = veh.lane() {
                net.lane(target).push_incoming(veh.id(), veh.length());
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }
        targets
    }

    /// Sorts the vehicles which moved onto the lane into its vehicle list.
    /// Returns true if the lane was empty before.
    pub(crate) fn integrate_new_vehicle(&self, vehicles: &VehicleSet) -> bool {
        let mut state = self.state();
        if state.incoming.is_empty() {
            return false;
        }
        let was_empty = state.vehicles.is_empty();
        let incoming = std::mem::take(&mut state.incoming);
        for (id, length) in incoming {
            state.vehicles.push(id);
            state.length_sum += length;
        }
        sort_by_position(&mut state.vehicles, vehicles);
        was_empty
    }

    /// Replaces the vehicle list with the result of a lane-change pass.
    pub(crate) fn swap_after_lane_change(&self, mut list: Vec<VehicleId>, vehicles: &VehicleSet) {
        sort_by_position(&mut list, vehicles);
        let mut state = self.state();
        state.length_sum = list
            .iter()
            .filter_map(|id| vehicles.get(*id))
            .map(|v| v.length())
            .sum();
        state.vehicles = list;
    }

    /// Records that `vehicle` reaches back `left_length` m onto this lane.
    /// Returns the length of lane it covers.
    pub(crate) fn set_partial_occupation(&self, vehicle: VehicleId, left_length: f64) -> f64 {
        let end = f64::max(0.0, self.length - left_length);
        self.state().partial = Some((vehicle, end));
        self.length
    }

    /// Forgets the partial occupation of `vehicle`.
    pub(crate) fn reset_partial_occupation(&self, vehicle: VehicleId) {
        let mut state = self.state();
        if matches!(state.partial, Some((v, _)) if v == vehicle) {
            state.partial = None;
        }
    }

    /// Looks for consecutive vehicles whose extents overlap.
    pub fn detect_collisions(&self, vehicles: &VehicleSet) -> Vec<Collision> {
        let state = self.state();
        state
            .vehicles
            .iter()
            .filter_map(|id| vehicles.get(*id))
            .tuple_windows()
            .filter_map(|(leader, follower)| {
                let gap = leader.pos() - leader.length() - follower.pos();
                (gap < -OVERLAP_TOLERANCE).then(|| Collision {
                    lane: self.id,
                    leader: leader.id(),
                    follower: follower.id(),
                    gap,
                })
            })
            .collect()
    }
}

/// Sorts vehicles front (highest position) first.
fn sort_by_position(list: &mut [VehicleId], vehicles: &VehicleSet) {
    let pos = |id: &VehicleId| vehicles.get(*id).map_or(0.0, |v| v.pos());
    list.sort_by(|a, b| pos(b).total_cmp(&pos(a)));
}
