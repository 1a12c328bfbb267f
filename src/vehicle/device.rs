use super::{Vehicle, HALTING_SPEED};
use crate::cfmodel::CarFollowing;
use crate::reminder::{EnterReason, LeaveReason};
use crate::LaneId;
use std::any::Any;

/// Something carried by a vehicle that follows its trip, such as a trip
/// logger. All hooks default to doing nothing.
pub trait Device: Send + Sync {
    /// Called when the vehicle is inserted into the network.
    fn on_emit(&mut self, vehicle: &Vehicle, now: f64) {
        let _ = (vehicle, now);
    }

    /// Called after the vehicle moved onto or changed onto a lane.
    fn on_enter_lane(&mut self, vehicle: &Vehicle, reason: EnterReason, now: f64) {
        let _ = (vehicle, reason, now);
    }

    /// Called when the vehicle leaves a lane, including its arrival.
    fn on_leave_lane(&mut self, vehicle: &Vehicle, reason: LeaveReason, now: f64) {
        let _ = (vehicle, reason, now);
    }

    /// Called after every move of the vehicle.
    fn on_move(&mut self, vehicle: &Vehicle, now: f64) {
        let _ = (vehicle, now);
    }

    fn as_any(&self) -> &dyn Any;
}

/// Records the depart and arrival of a vehicle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TripInfo {
    pub depart_time: Option<f64>,
    pub depart_lane: Option<LaneId>,
    pub depart_pos: f64,
    pub depart_speed: f64,
    pub arrival_time: Option<f64>,
    pub arrival_lane: Option<LaneId>,
    pub arrival_pos: f64,
    pub arrival_speed: f64,
    /// The total time spent halting, in s.
    pub waiting_time: f64,
    /// The driven distance in m.
    pub route_length: f64,
    /// The number of lane changes.
    pub lane_changes: usize,
}

impl TripInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// The trip duration in s, once the vehicle has arrived.
    pub fn duration(&self) -> Option<f64> {
        Some(self.arrival_time? - self.depart_time?)
    }
}

impl Device for TripInfo {
    fn on_emit(&mut self, vehicle: &Vehicle, now: f64) {
        self.depart_time = Some(now);
        self.depart_lane = vehicle.lane();
        self.depart_pos = vehicle.pos();
        self.depart_speed = vehicle.speed();
    }

    fn on_enter_lane(&mut self, _vehicle: &Vehicle, reason: EnterReason, _now: f64) {
        if reason == EnterReason::LaneChange {
            self.lane_changes += 1;
        }
    }

    fn on_leave_lane(&mut self, vehicle: &Vehicle, reason: LeaveReason, now: f64) {
        if matches!(reason, LeaveReason::Arrival | LeaveReason::Removal) {
            self.arrival_time = Some(now);
            self.arrival_lane = vehicle.lane();
            self.arrival_pos = vehicle.pos();
            self.arrival_speed = vehicle.speed();
            self.route_length = vehicle.odometer();
        }
    }

    fn on_move(&mut self, vehicle: &Vehicle, _now: f64) {
        if vehicle.speed() <= HALTING_SPEED {
            self.waiting_time += vehicle.model().kinematics().dt();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
