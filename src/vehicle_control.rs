//! The registry owning all vehicles: loading, emission, arrival and removal.

use crate::edge_control::EdgeControl;
use crate::network::Network;
use crate::reminder::LeaveReason;
use crate::route::Route;
use crate::vehicle::{DepartLane, DepartPos, DepartSpeed, Vehicle, VehicleParams};
use crate::vtype::VehicleType;
use crate::{LaneId, SimError, SimResult, VehicleId, VehicleSet};
use log::{debug, warn};
use slotmap::SparseSecondaryMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Emission failures of one vehicle are reported every this many steps.
const EMIT_RETRY_REPORT: usize = 100;

/// Owns the vehicles and keeps their lifecycle counts.
#[derive(Default)]
pub struct VehicleControl {
    vehicles: VehicleSet,
    names: HashMap<String, VehicleId>,
    /// Loaded vehicles waiting for insertion, by depart time.
    pending: Vec<VehicleId>,
    /// The failed insertion attempts of pending vehicles.
    retries: SparseSecondaryMap<VehicleId, usize>,
    loaded: usize,
    emitted: usize,
    arrived: usize,
    collided: usize,
}

impl VehicleControl {
    pub fn new() -> Self {
        Default::default()
    }

    /// Gets a vehicle, loaded or running.
    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(id)
    }

    pub fn vehicle_by_name(&self, name: &str) -> Option<&Vehicle> {
        self.names.get(name).and_then(|id| self.vehicles.get(*id))
    }

    /// Iterates the vehicles in the network.
    pub fn iter_running(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.values().filter(|v| v.lane().is_some())
    }

    /// The number of vehicles ever loaded.
    pub fn loaded_count(&self) -> usize {
        self.loaded
    }

    /// The number of vehicles inserted into the network.
    pub fn emitted_count(&self) -> usize {
        self.emitted
    }

    /// The number of vehicles currently in the network.
    pub fn running_count(&self) -> usize {
        self.emitted - self.arrived - self.collided
    }

    /// The number of vehicles which reached the end of their route.
    pub fn arrived_count(&self) -> usize {
        self.arrived
    }

    /// The number of vehicles removed after a collision.
    pub fn collided_count(&self) -> usize {
        self.collided
    }

    /// The number of loaded vehicles waiting for insertion.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn vehicles(&self) -> &VehicleSet {
        &self.vehicles
    }

    pub(crate) fn vehicles_mut(&mut self) -> &mut VehicleSet {
        &mut self.vehicles
    }

    pub(crate) fn get_mut(&mut self, id: VehicleId) -> Option<&mut Vehicle> {
        self.vehicles.get_mut(id)
    }

    /// Loads a vehicle and queues it for insertion. Its type and route must
    /// have been checked by the caller.
    pub(crate) fn add(
        &mut self,
        net: &Network,
        params: &VehicleParams,
        vtype: Arc<VehicleType>,
        route: Arc<Route>,
        seed: u64,
    ) -> SimResult<VehicleId> {
        if self.names.contains_key(&params.name) {
            return Err(SimError::DuplicateId(params.name.clone()));
        }
        let id = self
            .vehicles
            .insert_with_key(|id| Vehicle::new(id, params, vtype, route, seed));
        for stop in &params.stops {
            if let Err(err) = self.vehicles[id].add_stop(net, stop) {
                self.vehicles.remove(id);
                return Err(err);
            }
        }
        self.names.insert(params.name.clone(), id);
        let at = self
            .pending
            .iter()
            .position(|p| self.vehicles[*p].depart() > params.depart)
            .unwrap_or(self.pending.len());
        self.pending.insert(at, id);
        self.loaded += 1;
        Ok(id)
    }

    /// Tries to insert every pending vehicle whose depart time has come.
    /// Vehicles which do not fit are retried in the next step.
    /// Returns the number of inserted vehicles.
    pub(crate) fn emit_pending(&mut self, net: &Network, edges: &mut EdgeControl, now: f64) -> usize {
        let due = self
            .pending
            .iter()
            .take_while(|id| self.vehicles[**id].depart() <= now)
            .count();
        let mut emitted = 0;
        let mut waiting = Vec::with_capacity(due);
        for id in self.pending.drain(..due).collect::<Vec<_>>() {
            match self.try_emit(net, id, now) {
                Some((lane, was_empty)) => {
                    emitted += 1;
                    self.retries.remove(id);
                    if was_empty {
                        edges.got_active(lane);
                    }
                }
                None => {
                    let retries = self.retries.entry(id).map(|e| e.or_insert(0));
                    if let Some(retries) = retries {
                        *retries += 1;
                        if *retries % EMIT_RETRY_REPORT == 0 {
                            warn!(
                                "vehicle '{}' could not be inserted for {} steps",
                                self.vehicles[id].name(),
                                retries
                            );
                        }
                    }
                    waiting.push(id);
                }
            }
        }
        waiting.append(&mut self.pending);
        self.pending = waiting;
        self.emitted += emitted;
        edges.patch_active_lanes(net);
        emitted
    }

    /// Inserts one vehicle if its depart lane has room for it.
    /// Returns the lane and whether it was empty before.
    fn try_emit(&mut self, net: &Network, id: VehicleId, now: f64) -> Option<(LaneId, bool)> {
        let veh = self.vehicles.get(id)?;
        let lane_id = self.depart_lane(net, veh)?;
        let lane = net.lane(lane_id);
        let (_, depart_pos, depart_speed) = veh.depart_params();
        let pos = match depart_pos {
            DepartPos::Given(pos) => pos.min(lane.length()),
            DepartPos::Base => veh.length().min(lane.length()),
        };
        let max = lane.max_speed().min(veh.max_speed());
        let speed = match depart_speed {
            DepartSpeed::Given(speed) => speed.min(max),
            DepartSpeed::Max => max,
            DepartSpeed::Zero => 0.0,
        };
        let beyond = veh.route().edge(1).and_then(|next| {
            lane.links()
                .iter()
                .map(|l| net.link(*l))
                .find(|l| net.lane(l.to()).edge() == next)
                .and_then(|l| net.lane(l.lane_after()).last_vehicle_information(&self.vehicles))
        });
        let was_empty = lane.is_empty();
        if !lane.is_emission_success(veh, pos, speed, &self.vehicles, beyond) {
            return None;
        }
        self.vehicles[id].enter_lane_at_emit(net, lane_id, pos, speed, now);
        Some((lane_id, was_empty))
    }

    /// Picks the lane of the first route edge to insert `veh` on.
    fn depart_lane(&self, net: &Network, veh: &Vehicle) -> Option<LaneId> {
        let edge = veh.route().edge(0)?;
        let lanes = net.lanes(edge);
        let vclass = veh.vtype().vclass();
        let (depart_lane, _, _) = veh.depart_params();
        let freest = |candidates: &mut dyn Iterator<Item = LaneId>| {
            candidates.min_by(|a, b| {
                let a = net.lane(*a).vehicle_length_sum();
                let b = net.lane(*b).vehicle_length_sum();
                a.total_cmp(&b)
            })
        };
        match depart_lane {
            DepartLane::Given(index) => lanes.get(index).copied(),
            DepartLane::Free => freest(
                &mut lanes
                    .iter()
                    .copied()
                    .filter(|l| net.lane(*l).allows(vclass)),
            ),
            DepartLane::Best => {
                let best = veh.compute_best_lanes(net);
                freest(
                    &mut best
                        .iter()
                        .filter(|q| q.best_offset == 0 && net.lane(q.lane).allows(vclass))
                        .map(|q| q.lane),
                )
            }
        }
    }

    /// Takes a vehicle out of the network and the registry.
    pub(crate) fn remove_vehicle(
        &mut self,
        net: &mut Network,
        id: VehicleId,
        reason: LeaveReason,
        now: f64,
    ) -> Option<Vehicle> {
        let veh = self.vehicles.get_mut(id)?;
        if let Some(lane) = veh.lane() {
            net.lane(lane).remove_vehicle(id, veh.length());
        }
        veh.leave_lane(net, reason, now);
        veh.unregister_links(net);
        match reason {
            LeaveReason::Arrival => {
                debug!("vehicle '{}' arrived at t={}s", veh.name(), now);
                self.arrived += 1;
            }
            _ => {
                debug!("vehicle '{}' removed at t={}s", veh.name(), now);
                self.collided += 1;
            }
        }
        self.names.remove(veh.name());
        self.vehicles.remove(id)
    }
}
