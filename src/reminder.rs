//! Hooks notified while vehicles move over lanes.

use crate::util::ratio_or_sentinel;
use crate::{LaneId, Vehicle, VehicleId};
use std::sync::{Mutex, PoisonError};

/// Why a vehicle entered a lane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnterReason {
    /// The vehicle was inserted into the network.
    Emit,
    /// The vehicle drove onto the lane.
    Move,
    /// The vehicle changed onto the lane from a neighbour.
    LaneChange,
}

/// Why a vehicle stops being tracked by a reminder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaveReason {
    /// The vehicle drove onto the next lane.
    Move,
    /// The vehicle reached the end of its route.
    Arrival,
    /// The vehicle changed to a neighbouring lane.
    LaneChange,
    /// The vehicle was taken out of the network.
    Removal,
}

/// Something attached to a lane that wants to follow the vehicles on it,
/// such as a detector.
///
/// Positions passed to a reminder are relative to the start of the
/// reminder's own lane, even after the vehicle has moved on.
pub trait MoveReminder: Send + Sync {
    /// The lane the reminder is attached to.
    fn lane(&self) -> LaneId;

    /// Called when a vehicle enters the lane. Returning false means the
    /// reminder is not interested in the vehicle.
    fn notify_enter(&self, vehicle: &Vehicle, reason: EnterReason, now: f64) -> bool {
        let _ = (vehicle, reason, now);
        true
    }

    /// Called after every move of a tracked vehicle from `old_pos` to
    /// `new_pos`. Returning false stops the tracking.
    fn is_still_active(
        &self,
        vehicle: &Vehicle,
        old_pos: f64,
        new_pos: f64,
        new_speed: f64,
        now: f64,
    ) -> bool;

    /// Called when a tracked vehicle leaves the lane.
    fn notify_leave(&self, vehicle: &Vehicle, reason: LeaveReason, now: f64) {
        let _ = (vehicle, reason, now);
    }
}

/// A vehicle that has fully passed an induction loop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Passage {
    pub vehicle: VehicleId,
    /// When the front reached the loop, in s.
    pub entry_time: f64,
    /// When the rear left the loop, in s.
    pub leave_time: f64,
    /// The speed at the time of leaving, in m/s.
    pub speed: f64,
    /// The vehicle length in m.
    pub length: f64,
}

#[derive(Debug, Default)]
struct LoopState {
    /// The vehicles currently over the loop, with their entry times.
    on_detector: Vec<(VehicleId, f64)>,
    passages: Vec<Passage>,
    /// Vehicles that left the loop sideways.
    dismissed: usize,
}

/// A point detector counting the vehicles passing a position on a lane.
#[derive(Debug)]
pub struct InductionLoop {
    name: String,
    lane: LaneId,
    position: f64,
    state: Mutex<LoopState>,
}

/// The moment a vehicle moving from `from` at `speed` reaches `to`.
fn crossing_time(now: f64, from: f64, to: f64, speed: f64) -> f64 {
    if speed > 0.0 {
        now + f64::max(0.0, to - from) / speed
    } else {
        now
    }
}

impl InductionLoop {
    /// Creates a loop at `position` m along `lane`.
    pub fn new(name: &str, lane: LaneId, position: f64) -> Self {
        Self {
            name: name.to_owned(),
            lane,
            position,
            state: Mutex::new(LoopState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The position of the loop on its lane, in m.
    pub fn position(&self) -> f64 {
        self.position
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The number of vehicles that fully passed the loop.
    pub fn passed_vehicles(&self) -> usize {
        self.state().passages.len()
    }

    /// The recorded passages, oldest first.
    pub fn passages(&self) -> Vec<Passage> {
        self.state().passages.clone()
    }

    /// The most recent passage.
    pub fn last_passage(&self) -> Option<Passage> {
        self.state().passages.last().copied()
    }

    /// Whether a vehicle is over the loop right now.
    pub fn is_occupied(&self) -> bool {
        !self.state().on_detector.is_empty()
    }

    /// The number of vehicles that left the loop by changing lanes.
    pub fn dismissed(&self) -> usize {
        self.state().dismissed
    }

    /// The mean speed of the passed vehicles, or -1 if there were none.
    pub fn mean_speed(&self) -> f64 {
        let state = self.state();
        let sum = state.passages.iter().map(|p| p.speed).sum::<f64>();
        ratio_or_sentinel(sum, state.passages.len() as f64)
    }

    /// The share of the interval `[since, now]` during which the loop was
    /// covered by passing vehicles, in percent, or -1 for an empty interval.
    pub fn occupancy(&self, since: f64, now: f64) -> f64 {
        let covered = self
            .state()
            .passages
            .iter()
            .map(|p| f64::max(0.0, p.leave_time.min(now) - p.entry_time.max(since)))
            .sum::<f64>();
        ratio_or_sentinel(covered * 100.0, now - since)
    }

    /// Forgets all recorded passages.
    pub fn reset(&self) {
        let mut state = self.state();
        state.passages.clear();
        state.dismissed = 0;
    }
}

impl MoveReminder for InductionLoop {
    fn lane(&self) -> LaneId {
        self.lane
    }

    fn notify_enter(&self, vehicle: &Vehicle, _reason: EnterReason, _now: f64) -> bool {
        vehicle.pos() - vehicle.length() <= self.position
    }

    fn is_still_active(
        &self,
        vehicle: &Vehicle,
        old_pos: f64,
        new_pos: f64,
        new_speed: f64,
        now: f64,
    ) -> bool {
        if new_pos < self.position {
            return true;
        }
        let length = vehicle.length();
        let mut state = self.state();
        let known = state
            .on_detector
            .iter()
            .find(|(v, _)| *v == vehicle.id())
            .map(|(_, entry)| *entry);
        let entry_time = match known {
            Some(entry) => entry,
            None => {
                let entry = crossing_time(now, old_pos, self.position, new_speed);
                state.on_detector.push((vehicle.id(), entry));
                entry
            }
        };
        if new_pos - length <= self.position {
            return true;
        }
        let leave_time = crossing_time(now, old_pos - length, self.position, new_speed);
        state.on_detector.retain(|(v, _)| *v != vehicle.id());
        state.passages.push(Passage {
            vehicle: vehicle.id(),
            entry_time,
            leave_time: leave_time.max(entry_time),
            speed: new_speed,
            length,
        });
        false
    }

    fn notify_leave(&self, vehicle: &Vehicle, reason: LeaveReason, _now: f64) {
        if reason == LeaveReason::Move {
            return;
        }
        let mut state = self.state();
        let before = state.on_detector.len();
        state.on_detector.retain(|(v, _)| *v != vehicle.id());
        if state.on_detector.len() < before {
            state.dismissed += 1;
        }
    }
}
