//! Iterates the lanes that carry vehicles through the phases of a step.

use crate::lane::Collision;
use crate::network::Network;
use crate::vehicle::{change_lanes_on_edge, DriveItem};
use crate::{EdgeId, LaneId, VehicleId, VehicleSet};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use slotmap::SparseSecondaryMap;
use smallvec::SmallVec;

/// Keeps the set of active lanes, the lanes with vehicles on them.
#[derive(Debug, Default)]
pub struct EdgeControl {
    /// Lanes of multi-lane edges come first.
    active: Vec<LaneId>,
    is_active: SparseSecondaryMap<LaneId, ()>,
    /// Lanes which got vehicles since the last patch.
    activated: Vec<LaneId>,
}

impl EdgeControl {
    pub fn new() -> Self {
        Default::default()
    }

    /// The lanes currently iterated each step.
    pub fn active_lanes(&self) -> &[LaneId] {
        &self.active
    }

    pub fn is_active(&self, lane: LaneId) -> bool {
        self.is_active.contains_key(lane)
    }

    /// Notes that `lane` received its first vehicle.
    pub(crate) fn got_active(&mut self, lane: LaneId) {
        if self.is_active.insert(lane, ()).is_none() {
            self.activated.push(lane);
        }
    }

    /// Drops lanes that ran empty and adds the newly activated ones.
    pub(crate) fn patch_active_lanes(&mut self, net: &Network) {
        let is_active = &mut self.is_active;
        self.active.retain(|lane| {
            let keep = !net.lane(*lane).is_empty();
            if !keep {
                is_active.remove(*lane);
            }
            keep
        });
        for lane in self.activated.drain(..) {
            if net.lane(lane).is_empty() {
                self.is_active.remove(lane);
            } else {
                self.active.push(lane);
            }
        }
        let neighbours = |lane: &LaneId| net.lanes(net.lane(*lane).edge()).len() > 1;
        self.active.sort_by_key(|lane| !neighbours(lane));
    }

    /// Computes the drive items of every vehicle on an active lane. Reads
    /// only, so lanes may be planned in parallel.
    pub(crate) fn plan_moves(
        &self,
        net: &Network,
        vehicles: &VehicleSet,
        now: f64,
    ) -> Vec<(VehicleId, Vec<DriveItem>)> {
        #[cfg(feature = "parallel")]
        let plans = self
            .active
            .par_iter()
            .map(|lane| net.lane(*lane).plan_moves(net, vehicles, now))
            .collect::<Vec<_>>();
        #[cfg(not(feature = "parallel"))]
        let plans = self
            .active
            .iter()
            .map(|lane| net.lane(*lane).plan_moves(net, vehicles, now))
            .collect::<Vec<_>>();
        plans.into_iter().flatten().collect()
    }

    /// Moves the vehicles of all active lanes, then hands the vehicles which
    /// changed lanes over to their new lanes. Returns the vehicles which
    /// reached the end of their route.
    pub(crate) fn move_vehicles(
        &mut self,
        net: &Network,
        vehicles: &mut VehicleSet,
        now: f64,
    ) -> Vec<VehicleId> {
        let mut arrived = vec![];
        let mut leavers = Vec::with_capacity(self.active.len());
        for lane in &self.active {
            let outcome = net.lane(*lane).move_critical(net, vehicles, now);
            arrived.extend(outcome.arrived);
            if !outcome.leavers.is_empty() {
                leavers.push((*lane, outcome.leavers));
            }
        }

        let mut targets = SmallVec::<[LaneId; 8]>::new();
        for (lane, ids) in &leavers {
            for target in net.lane(*lane).set_critical(ids, net, vehicles) {
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }
        for target in targets {
            if net.lane(target).integrate_new_vehicle(vehicles) {
                self.got_active(target);
            }
        }
        self.patch_active_lanes(net);
        arrived
    }

    /// Runs the lane-change model on every edge with more than one lane
    /// that has vehicles.
    pub(crate) fn change_lanes(&mut self, net: &Network, vehicles: &mut VehicleSet, now: f64) {
        let mut edges = SmallVec::<[EdgeId; 16]>::new();
        for lane in &self.active {
            let lane = net.lane(*lane);
            let edge = lane.edge();
            if !lane.is_internal() && net.lanes(edge).len() > 1 && !edges.contains(&edge) {
                edges.push(edge);
            }
        }
        for edge in edges {
            for lane in change_lanes_on_edge(edge, net, vehicles, now) {
                self.got_active(lane);
            }
        }
        self.patch_active_lanes(net);
    }

    /// Looks for overlapping vehicles on all active lanes.
    pub(crate) fn detect_collisions(&self, net: &Network, vehicles: &VehicleSet) -> Vec<Collision> {
        self.active
            .iter()
            .flat_map(|lane| net.lane(*lane).detect_collisions(vehicles))
            .collect()
    }
}
