pub use self::best_lanes::LaneQ;
pub use self::device::{Device, TripInfo};
pub(crate) use self::lane_change::{change_lanes_on_edge, LaneChangeState};

use crate::cfmodel::{CarFollowModel, CarFollowing};
use crate::math::{Point2d, Vector2d};
use crate::network::Network;
use crate::reminder::{EnterReason, LeaveReason, MoveReminder};
use crate::route::Route;
use crate::stop::Stop;
use crate::util::POSITION_EPS;
use crate::vtype::VehicleType;
use crate::{LaneId, LinkId, LinkState, RouteId, StopParams, VehicleId, VehicleTypeId};
use log::{debug, error, warn};
use rand::rngs::SmallRng;
use rand::SeedableRng;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use slotmap::Key;
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::sync::Arc;

mod best_lanes;
mod device;
mod lane_change;
mod lookahead;
mod stops;

/// Vehicles slower than this are considered to be halting, in m/s.
pub(crate) const HALTING_SPEED: f64 = 0.1;

/// Where on its first edge a vehicle is inserted.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DepartLane {
    /// The lane with the given index, rightmost first.
    Given(usize),
    /// The least occupied lane allowing the vehicle's class.
    Free,
    /// The least occupied of the lanes that need no lane change.
    #[default]
    Best,
}

/// The position a vehicle is inserted at.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DepartPos {
    /// The front at the given position in m.
    Given(f64),
    /// The rear at the start of the lane.
    #[default]
    Base,
}

/// The speed a vehicle is inserted with.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DepartSpeed {
    /// The given speed in m/s, capped by the lane's speed limit.
    Given(f64),
    /// The highest speed the lane and the vehicle allow.
    Max,
    #[default]
    Zero,
}

/// The attributes of a vehicle to be loaded.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VehicleParams {
    /// The unique name of the vehicle.
    pub name: String,
    pub vtype: VehicleTypeId,
    pub route: RouteId,
    /// The earliest time of insertion in s.
    pub depart: f64,
    pub depart_lane: DepartLane,
    pub depart_pos: DepartPos,
    pub depart_speed: DepartSpeed,
    /// The position on the last edge at which the vehicle leaves the network,
    /// the end of the lane if not set.
    pub arrival_pos: Option<f64>,
    /// The stops to make, in driving order.
    pub stops: Vec<StopParams>,
}

impl VehicleParams {
    /// Parameters for a vehicle departing at time 0 with default insertion rules.
    pub fn new(name: &str, vtype: VehicleTypeId, route: RouteId) -> Self {
        Self {
            name: name.to_owned(),
            vtype,
            route,
            depart: 0.0,
            depart_lane: DepartLane::default(),
            depart_pos: DepartPos::default(),
            depart_speed: DepartSpeed::default(),
            arrival_pos: None,
            stops: vec![],
        }
    }
}

/// One step of a vehicle's lookahead: a link to pass (or none for staying
/// on the lane) with the speeds to use if the link opens or stays closed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DriveItem {
    /// The link ahead, `None` if the vehicle stays on its lane.
    pub link: Option<LinkId>,
    /// The speed to adopt if the link opens, in m/s.
    pub v_pass: f64,
    /// The speed to adopt if it does not, in m/s.
    pub v_wait: f64,
    /// Whether the vehicle asks to pass the link.
    pub set_request: bool,
    /// When the vehicle expects to reach the link, in s.
    pub arrival_time: f64,
    /// The speed it expects to reach the link with, in m/s.
    pub arrival_speed: f64,
    /// The distance to the link in m.
    pub distance: f64,
}

impl DriveItem {
    /// An item without a link, bounding the speed to `v`.
    pub(crate) fn stay(v: f64, distance: f64, now: f64) -> Self {
        Self {
            link: None,
            v_pass: v,
            v_wait: v,
            set_request: false,
            arrival_time: now,
            arrival_speed: v,
            distance,
        }
    }
}

/// Where a vehicle is within the plan, commit and move sequence of a step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MovePhase {
    #[default]
    Idle,
    /// The drive items are computed but not yet registered at the links.
    LookaheadDone,
    /// The drive items are registered; the vehicle may move.
    Committed,
}

/// A simulated vehicle.
pub struct Vehicle {
    id: VehicleId,
    name: String,
    vtype: Arc<VehicleType>,
    route: Arc<Route>,
    /// The index of the route edge the vehicle is on, or last was on when
    /// crossing a junction.
    route_idx: usize,
    lane: Option<LaneId>,
    /// The position of the front on the lane, in m.
    pos: f64,
    /// The speed in m/s.
    speed: f64,
    /// The individual factor applied to the type's maximum speed.
    speed_factor: f64,
    /// The lanes behind the current one the vehicle still reaches onto.
    further_lanes: SmallVec<[LaneId; 2]>,
    /// The continuation quality of each lane of the current edge.
    best_lanes: Vec<LaneQ>,
    stops: VecDeque<Stop>,
    drive_items: Vec<DriveItem>,
    phase: MovePhase,
    /// The links the vehicle is registered at as approaching.
    registered_links: SmallVec<[LinkId; 4]>,
    /// The tracking reminders, with the distance from the start of the
    /// reminder's lane to the start of the current lane.
    reminders: Vec<(Arc<dyn MoveReminder>, f64)>,
    devices: Vec<Box<dyn Device>>,
    lane_change: LaneChangeState,
    rng: SmallRng,
    depart: f64,
    depart_lane: DepartLane,
    depart_pos: DepartPos,
    depart_speed: DepartSpeed,
    arrival_pos: Option<f64>,
    /// The time spent halting since the vehicle last drove, in s.
    waiting_time: f64,
    was_braking: bool,
    /// The distance driven in m.
    odometer: f64,
    departed_at: Option<f64>,
}

impl Vehicle {
    /// Creates a vehicle which is not yet in the network.
    pub(crate) fn new(
        id: VehicleId,
        params: &VehicleParams,
        vtype: Arc<VehicleType>,
        route: Arc<Route>,
        seed: u64,
    ) -> Self {
        let mixed = id.data().as_ffi().wrapping_mul(0x9e37_79b9_7f4a_7c15);
        let mut rng = SmallRng::seed_from_u64(seed ^ mixed);
        let speed_factor = vtype.sample_speed_factor(&mut rng);
        Self {
            id,
            name: params.name.clone(),
            vtype,
            route,
            route_idx: 0,
            lane: None,
            pos: 0.0,
            speed: 0.0,
            speed_factor,
            further_lanes: SmallVec::new(),
            best_lanes: vec![],
            stops: VecDeque::new(),
            drive_items: vec![],
            phase: MovePhase::Idle,
            registered_links: SmallVec::new(),
            reminders: vec![],
            devices: vec![],
            lane_change: LaneChangeState::default(),
            rng,
            depart: params.depart,
            depart_lane: params.depart_lane,
            depart_pos: params.depart_pos,
            depart_speed: params.depart_speed,
            arrival_pos: params.arrival_pos,
            waiting_time: 0.0,
            was_braking: false,
            odometer: 0.0,
            departed_at: None,
        }
    }

    /// Gets the vehicle's ID.
    pub fn id(&self) -> VehicleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vtype(&self) -> &VehicleType {
        &self.vtype
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    /// The index of the route edge the vehicle is on.
    pub fn route_idx(&self) -> usize {
        self.route_idx
    }

    /// The lane the vehicle is on, `None` before insertion.
    pub fn lane(&self) -> Option<LaneId> {
        self.lane
    }

    /// The position of the vehicle's front on its lane, in m.
    pub fn pos(&self) -> f64 {
        self.pos
    }

    /// The position of the vehicle's rear on its lane, in m.
    /// Negative while the vehicle still reaches back onto earlier lanes.
    pub fn rear(&self) -> f64 {
        self.pos - self.length()
    }

    /// The speed in m/s.
    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// The vehicle length in m.
    pub fn length(&self) -> f64 {
        self.vtype.length()
    }

    /// The vehicle's own maximum speed in m/s.
    pub fn max_speed(&self) -> f64 {
        self.vtype.max_speed() * self.speed_factor
    }

    pub fn speed_factor(&self) -> f64 {
        self.speed_factor
    }

    /// The car-following model of the vehicle's type.
    pub fn model(&self) -> &CarFollowModel {
        self.vtype.model()
    }

    /// Whether the vehicle slowed down or halted in its last move.
    pub fn was_braking(&self) -> bool {
        self.was_braking
    }

    /// The time spent halting since the vehicle last drove, in s.
    pub fn waiting_time(&self) -> f64 {
        self.waiting_time
    }

    /// The distance driven since insertion, in m.
    pub fn odometer(&self) -> f64 {
        self.odometer
    }

    /// The earliest insertion time in s.
    pub fn depart(&self) -> f64 {
        self.depart
    }

    /// The time the vehicle was inserted at.
    pub fn departed_at(&self) -> Option<f64> {
        self.departed_at
    }

    /// The drive items of the last lookahead.
    pub fn drive_items(&self) -> &[DriveItem] {
        &self.drive_items
    }

    pub fn phase(&self) -> MovePhase {
        self.phase
    }

    /// The continuation quality of the lanes of the current edge.
    pub fn best_lanes(&self) -> &[LaneQ] {
        &self.best_lanes
    }

    /// The lanes behind the current one the vehicle still reaches onto.
    pub fn further_lanes(&self) -> &[LaneId] {
        &self.further_lanes
    }

    /// The links the vehicle is registered at.
    pub fn registered_links(&self) -> &[LinkId] {
        &self.registered_links
    }

    /// The number of stops still to make.
    pub fn pending_stops(&self) -> usize {
        self.stops.len()
    }

    /// Whether the vehicle is halting at a stop.
    pub fn is_stopped(&self) -> bool {
        self.stops.front().map_or(false, |stop| stop.reached)
    }

    /// The world position and heading of the vehicle's front, if its lane
    /// has a shape.
    pub fn world_position(&self, net: &Network) -> Option<(Point2d, Vector2d)> {
        net.lane(self.lane?).position_at(self.pos)
    }

    /// Attaches a device.
    pub fn add_device(&mut self, device: Box<dyn Device>) {
        self.devices.push(device);
    }

    /// Gets the first attached device of type `T`.
    pub fn device<T: Device + 'static>(&self) -> Option<&T> {
        self.devices
            .iter()
            .find_map(|d| d.as_any().downcast_ref::<T>())
    }

    pub(crate) fn depart_params(&self) -> (DepartLane, DepartPos, DepartSpeed) {
        (self.depart_lane, self.depart_pos, self.depart_speed)
    }

    pub(crate) fn lane_change_mut(&mut self) -> &mut LaneChangeState {
        &mut self.lane_change
    }

    /// Stores freshly computed drive items.
    pub(crate) fn set_drive_items(&mut self, items: Vec<DriveItem>) {
        self.drive_items = items;
        self.phase = MovePhase::LookaheadDone;
    }

    /// Replaces the vehicle's link registrations with those of its drive items.
    pub(crate) fn commit(&mut self, net: &mut Network) {
        if self.phase != MovePhase::LookaheadDone {
            return;
        }
        self.unregister_links(net);
        for item in &self.drive_items {
            if let Some(link) = item.link {
                net.link_mut(link).set_approaching(
                    self.id,
                    item.arrival_time,
                    item.arrival_speed,
                    item.set_request,
                );
                self.registered_links.push(link);
            }
        }
        self.phase = MovePhase::Committed;
    }

    /// Removes the vehicle from the approaching registries of all links.
    pub(crate) fn unregister_links(&mut self, net: &mut Network) {
        for link in self.registered_links.drain(..) {
            net.link_mut(link).remove_approaching(self.id);
        }
    }

    /// Whether the vehicle has reached the end of its route.
    pub(crate) fn has_arrived(&self, net: &Network) -> bool {
        let Some(lane) = self.lane.map(|l| net.lane(l)) else {
            return false;
        };
        if !self.stops.is_empty() || lane.is_internal() || self.route_idx + 1 < self.route.len() {
            return false;
        }
        let arrival_pos = self.arrival_pos.unwrap_or(lane.length()).min(lane.length());
        self.pos > arrival_pos - POSITION_EPS
    }

    /// Moves the vehicle according to its committed drive items, crossing
    /// onto the next lanes if it drives past the end of its lane.
    pub(crate) fn move_first_checked(&mut self, net: &Network, now: f64) {
        if self.phase != MovePhase::Committed {
            error!(
                "vehicle '{}' asked to move before its lookahead was committed",
                self.name
            );
            self.phase = MovePhase::Idle;
            return;
        }
        let Some(lane_id) = self.lane else {
            return;
        };
        let vtype = Arc::clone(&self.vtype);
        let model = vtype.model();
        let dt = model.kinematics().dt();

        // Pick the binding speed: the first item whose link does not open
        let mut v_safe = f64::INFINITY;
        let mut braking = false;
        let mut last_green_cont = false;
        let mut passable = 0;
        for item in &self.drive_items {
            let Some(link) = item.link.filter(|_| item.set_request).map(|l| net.link(l)) else {
                v_safe = item.v_wait;
                braking = true;
                break;
            };
            let yellow = link.state().is_yellow();
            if yellow
                && (item.distance > model.brake_gap(self.speed)
                    || self.speed < model.decel() * dt)
            {
                v_safe = item.v_wait;
                braking = true;
                break;
            }
            let opened = yellow || link.opened(item.arrival_time, item.arrival_speed, net);
            if opened && !last_green_cont && !link.has_priority() && item.distance > model.decel()
            {
                v_safe = item.v_wait;
                braking = true;
                break;
            }
            if !opened {
                v_safe = item.v_wait;
                braking = true;
                break;
            }
            v_safe = item.v_pass;
            last_green_cont = link.is_cont() && link.state() == LinkState::GreenMajor;
            passable += 1;
        }
        v_safe = v_safe.min(self.process_next_stop(net, now));

        let lane_max = net.lane(lane_id).max_speed().min(self.max_speed());
        let v_next = model
            .move_helper(self.speed, lane_max, v_safe, &mut self.lane_change, &mut self.rng)
            .max(0.0);
        if v_next <= HALTING_SPEED {
            self.waiting_time += dt;
            braking = true;
        } else {
            self.waiting_time = 0.0;
        }
        if v_next >= self.speed && v_next > HALTING_SPEED {
            braking = false;
        }
        self.was_braking = braking;
        self.speed = v_next;
        self.pos += v_next * dt;
        self.odometer += v_next * dt;

        // Walk onto the lanes passed within this step
        let mut passed: SmallVec<[LaneId; 4]> = SmallVec::new();
        let mut item_idx = 0;
        loop {
            let Some(current) = self.lane else {
                break;
            };
            let length = net.lane(current).length();
            if self.pos <= length {
                break;
            }
            let next = self
                .drive_items
                .get(item_idx)
                .filter(|_| item_idx < passable)
                .and_then(|item| item.link);
            let Some(link) = next else {
                if self.drive_items.iter().all(|item| item.link.is_none()) {
                    warn!(
                        "vehicle '{}' has no link to leave lane '{}'",
                        self.name,
                        net.lane(current).name()
                    );
                }
                self.pos = length;
                break;
            };
            item_idx += 1;
            self.pos -= length;
            self.leave_lane_at_move(now);
            passed.push(current);
            self.enter_lane_at_move(net, net.link(link).lane_after(), now);
        }

        let new_pos = self.pos;
        let mut reminders = std::mem::take(&mut self.reminders);
        reminders.retain(|(reminder, offset)| {
            reminder.is_still_active(
                self,
                new_pos - v_next * dt + offset,
                new_pos + offset,
                v_next,
                now,
            )
        });
        self.reminders = reminders;

        self.update_further_lanes(net, &passed);
        self.notify_devices_move(now);
        self.lane_change.reset_patch();
        self.phase = MovePhase::Idle;
    }

    /// Records the lanes behind the current one the vehicle still covers.
    /// `passed` are the lanes left in this step, oldest first.
    fn update_further_lanes(&mut self, net: &Network, passed: &[LaneId]) {
        let candidates = passed
            .iter()
            .rev()
            .chain(self.further_lanes.iter())
            .copied()
            .collect::<SmallVec<[LaneId; 6]>>();
        for lane in &self.further_lanes {
            net.lane(*lane).reset_partial_occupation(self.id);
        }
        self.further_lanes.clear();
        let mut left = self.length() - self.pos;
        for lane in candidates {
            if left <= 0.0 {
                break;
            }
            if Some(lane) == self.lane || self.further_lanes.contains(&lane) {
                continue;
            }
            left -= net.lane(lane).set_partial_occupation(self.id, left);
            self.further_lanes.push(lane);
        }
    }

    /// Releases all partial occupations.
    fn reset_further_lanes(&mut self, net: &Network) {
        for lane in self.further_lanes.drain(..) {
            net.lane(lane).reset_partial_occupation(self.id);
        }
    }

    /// Rebuilds the partial occupations after the vehicle was put onto a
    /// lane other than by driving, reaching back over incoming lanes.
    fn rebuild_further_lanes_from_incoming(&mut self, net: &Network) {
        self.reset_further_lanes(net);
        let Some(mut lane) = self.lane else {
            return;
        };
        let mut left = self.length() - self.pos;
        let previous_edge = self
            .route_idx
            .checked_sub(1)
            .and_then(|idx| self.route.edge(idx));
        while left > 0.0 {
            let incoming = net.lane(lane).incoming_lanes();
            let prev = incoming
                .iter()
                .copied()
                .find(|l| Some(net.lane(*l).edge()) == previous_edge)
                .or_else(|| {
                    incoming
                        .iter()
                        .copied()
                        .find(|l| net.lane(*l).is_internal())
                })
                .or_else(|| incoming.first().copied());
            let Some(prev) = prev else {
                break;
            };
            if Some(prev) == self.lane || self.further_lanes.contains(&prev) {
                break;
            }
            left -= net.lane(prev).set_partial_occupation(self.id, left);
            self.further_lanes.push(prev);
            lane = prev;
        }
    }

    /// Called when the vehicle drives off its lane.
    fn leave_lane_at_move(&mut self, now: f64) {
        if let Some(lane) = self.lane {
            for (reminder, _) in &self.reminders {
                if reminder.lane() == lane {
                    reminder.notify_leave(self, LeaveReason::Move, now);
                }
            }
        }
        self.notify_devices_leave(LeaveReason::Move, now);
    }

    /// Called when the vehicle drives onto `lane`.
    fn enter_lane_at_move(&mut self, net: &Network, lane: LaneId, now: f64) {
        if let Some(old) = self.lane {
            let old_length = net.lane(old).length();
            for (_, offset) in &mut self.reminders {
                *offset += old_length;
            }
        }
        self.lane = Some(lane);
        let lane_ref = net.lane(lane);
        if !lane_ref.is_internal() {
            match self.route.position_of(lane_ref.edge(), self.route_idx + 1) {
                Some(idx) => self.route_idx = idx,
                None => warn!(
                    "vehicle '{}' entered lane '{}' which is not on its route",
                    self.name,
                    lane_ref.name()
                ),
            }
            self.drop_missed_stops();
            self.update_best_lanes(net);
        }
        self.activate_reminders(net, EnterReason::Move, now);
        self.notify_devices_enter(EnterReason::Move, now);
    }

    /// Called after the vehicle changed onto the neighbouring `lane`.
    pub(crate) fn enter_lane_at_lane_change(&mut self, net: &Network, lane: LaneId, now: f64) {
        let reminders = std::mem::take(&mut self.reminders);
        for (reminder, _) in &reminders {
            reminder.notify_leave(self, LeaveReason::LaneChange, now);
        }
        self.lane = Some(lane);
        self.rebuild_further_lanes_from_incoming(net);
        self.activate_reminders(net, EnterReason::LaneChange, now);
        self.notify_devices_enter(EnterReason::LaneChange, now);
    }

    /// Called once the vehicle was inserted onto `lane`.
    pub(crate) fn enter_lane_at_emit(
        &mut self,
        net: &Network,
        lane: LaneId,
        pos: f64,
        speed: f64,
        now: f64,
    ) {
        self.lane = Some(lane);
        self.pos = pos;
        self.speed = speed;
        self.was_braking = speed <= HALTING_SPEED;
        self.departed_at = Some(now);
        self.activate_reminders(net, EnterReason::Emit, now);
        self.rebuild_further_lanes_from_incoming(net);
        let mut devices = std::mem::take(&mut self.devices);
        for device in &mut devices {
            device.on_emit(self, now);
        }
        self.devices = devices;
        self.update_best_lanes(net);
        debug!(
            "vehicle '{}' inserted on lane '{}' at {:.2}m with {:.2}m/s",
            self.name,
            net.lane(lane).name(),
            pos,
            speed
        );
    }

    /// Called when the vehicle leaves the network for good.
    pub(crate) fn leave_lane(&mut self, net: &Network, reason: LeaveReason, now: f64) {
        let reminders = std::mem::take(&mut self.reminders);
        for (reminder, _) in &reminders {
            reminder.notify_leave(self, reason, now);
        }
        self.reset_further_lanes(net);
        self.notify_devices_leave(reason, now);
        if let Some(stop) = self.stops.front() {
            if let Some(bus_stop) = stop.bus_stop {
                net.bus_stop(bus_stop).leave(self.id);
            }
        }
    }

    /// Starts tracking the reminders of the current lane that are interested.
    fn activate_reminders(&mut self, net: &Network, reason: EnterReason, now: f64) {
        let Some(lane) = self.lane else {
            return;
        };
        let interested = net
            .lane(lane)
            .reminders()
            .iter()
            .filter(|r| r.notify_enter(self, reason, now))
            .cloned()
            .collect::<Vec<_>>();
        self.reminders
            .extend(interested.into_iter().map(|r| (r, 0.0)));
    }

    fn notify_devices_enter(&mut self, reason: EnterReason, now: f64) {
        let mut devices = std::mem::take(&mut self.devices);
        for device in &mut devices {
            device.on_enter_lane(self, reason, now);
        }
        self.devices = devices;
    }

    fn notify_devices_leave(&mut self, reason: LeaveReason, now: f64) {
        let mut devices = std::mem::take(&mut self.devices);
        for device in &mut devices {
            device.on_leave_lane(self, reason, now);
        }
        self.devices = devices;
    }

    fn notify_devices_move(&mut self, now: f64) {
        let mut devices = std::mem::take(&mut self.devices);
        for device in &mut devices {
            device.on_move(self, now);
        }
        self.devices = devices;
    }
}
