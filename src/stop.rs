use crate::{BusStopId, LaneId, VehicleId};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// Vehicles stop this far in front of their stopping position, in m.
pub(crate) const BUS_STOP_OFFSET: f64 = 0.5;

/// The minimal room a bus stop must have left for another vehicle, in m.
const BUS_STOP_MIN_ROOM: f64 = 5.0;

/// A request for a vehicle to halt.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StopParams {
    /// The lane to stop on.
    pub lane: LaneId,
    /// The position the vehicle's front should halt at, in m.
    pub pos: f64,
    /// How long to stay, in s.
    pub duration: f64,
    /// The earliest time to leave, in s.
    pub until: Option<f64>,
    /// The bus stop to use, which overrides `pos`.
    pub bus_stop: Option<BusStopId>,
}

/// A pending stop of a vehicle.
#[derive(Clone, Debug)]
pub(crate) struct Stop {
    pub lane: LaneId,
    /// The index of the stop's edge within the vehicle's route.
    pub route_idx: usize,
    pub pos: f64,
    /// The remaining time to stay, in s.
    pub duration: f64,
    pub until: Option<f64>,
    pub bus_stop: Option<BusStopId>,
    pub reached: bool,
}

impl Stop {
    pub fn new(params: &StopParams, route_idx: usize) -> Self {
        Self {
            lane: params.lane,
            route_idx,
            pos: params.pos,
            duration: params.duration,
            until: params.until,
            bus_stop: params.bus_stop,
            reached: false,
        }
    }
}

/// A stretch of a lane where vehicles queue to stop, front to back.
#[derive(Debug)]
pub struct BusStop {
    id: BusStopId,
    name: String,
    lane: LaneId,
    begin: f64,
    end: f64,
    /// The halting vehicles with their front and rear positions.
    occupants: Mutex<Vec<(VehicleId, f64, f64)>>,
}

impl BusStop {
    pub(crate) fn new(id: BusStopId, name: &str, lane: LaneId, begin: f64, end: f64) -> Self {
        Self {
            id,
            name: name.to_owned(),
            lane,
            begin,
            end,
            occupants: Mutex::new(vec![]),
        }
    }

    pub fn id(&self) -> BusStopId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lane(&self) -> LaneId {
        self.lane
    }

    /// The first position of the stop on its lane, in m.
    pub fn begin(&self) -> f64 {
        self.begin
    }

    /// The last position of the stop on its lane, in m.
    pub fn end(&self) -> f64 {
        self.end
    }

    /// The position up to which the next vehicle may drive.
    pub fn last_free_pos(&self) -> f64 {
        let occupants = self.occupants.lock().unwrap_or_else(PoisonError::into_inner);
        occupants
            .iter()
            .map(|(_, _, rear)| *rear)
            .fold(self.end, f64::min)
    }

    /// Whether a vehicle would still fit in front of `end_pos`.
    pub(crate) fn has_room(&self, end_pos: f64) -> bool {
        end_pos - BUS_STOP_MIN_ROOM >= self.begin
    }

    /// The number of vehicles halting at the stop.
    pub fn vehicle_number(&self) -> usize {
        self.occupants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn enter(&self, vehicle: VehicleId, front: f64, rear: f64) {
        let mut occupants = self.occupants.lock().unwrap_or_else(PoisonError::into_inner);
        occupants.retain(|(v, _, _)| *v != vehicle);
        occupants.push((vehicle, front, rear));
    }

    pub(crate) fn leave(&self, vehicle: VehicleId) {
        self.occupants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(v, _, _)| *v != vehicle);
    }
}
