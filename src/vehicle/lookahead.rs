//! The per-step lookahead: which links lie ahead, how fast the vehicle may
//! drive if they open or stay closed, and whether to request them.

use super::{DriveItem, Vehicle, HALTING_SPEED};
use crate::cfmodel::CarFollowing;
use crate::network::Network;
use crate::util::travel_time;
use crate::{Lane, LaneId, LinkId, VehicleSet};
use log::trace;
use smallvec::SmallVec;

/// The length of non-internal lanes that must be seen before the lookahead
/// may end, in m.
const MIN_LOOKAHEAD_NON_INTERNAL: f64 = 50.0;

/// The speed assumed when asking whether a link will be free, in m/s.
const PASS_CHECK_SPEED: f64 = 0.1;

impl Vehicle {
    /// Computes the drive items of this step.
    ///
    /// `pred` is the vehicle in front on the same lane, `lengths_in_front`
    /// the summed length of all vehicles in front on the lane.
    pub(crate) fn plan_move(
        &self,
        net: &Network,
        vehicles: &VehicleSet,
        pred: Option<&Vehicle>,
        is_first: bool,
        lengths_in_front: f64,
        now: f64,
    ) -> Vec<DriveItem> {
        let Some(lane_id) = self.lane else {
            return vec![];
        };
        let lane = net.lane(lane_id);
        let model = self.model();
        let seen = lane.length() - self.pos;

        let mut v_beg = model
            .max_next_speed(self.speed)
            .min(lane.max_speed())
            .min(self.max_speed());
        if let Some(pred) = pred {
            let gap = pred.pos - pred.length() - self.pos;
            v_beg = v_beg.min(model.safe_follow_speed(self.speed, gap, pred.speed));
        } else if let Some((occupator, end)) = lane.partial_occupator() {
            if is_first && occupator != self.id {
                let occ_speed = vehicles.get(occupator).map_or(0.0, |v| v.speed);
                v_beg = v_beg.min(model.safe_follow_speed(self.speed, end - self.pos, occ_speed));
            }
        }
        if let Some(stop_pos) = self.stop_target_on(net, lane_id) {
            v_beg = v_beg.min(model.safe_approach_speed(self.speed, stop_pos - self.pos));
        }

        if !self.lane_continues_route(net, lane) {
            let v = v_beg.min(model.safe_approach_speed(self.speed, seen));
            return vec![DriveItem::stay(v, seen, now)];
        }

        let mut items = self.vsafe_critical_cont(net, vehicles, v_beg, pred.is_none(), now);
        self.check_rewind_link_lanes(&mut items, lengths_in_front, net, vehicles, now);
        items
    }

    /// Whether the vehicle can leave `lane` toward the next edge of its route.
    fn lane_continues_route(&self, net: &Network, lane: &Lane) -> bool {
        if lane.is_internal() {
            return true;
        }
        let Some(next_edge) = self.route.edge(self.route_idx + 1) else {
            return true;
        };
        lane.links()
            .iter()
            .any(|link| net.lane(net.link(*link).to()).edge() == next_edge)
    }

    /// Finds the link leaving `lane` the vehicle takes next.
    fn next_link(
        &self,
        net: &Network,
        lane: &Lane,
        conts: &[LaneId],
        view: usize,
        route_view: usize,
    ) -> Option<LinkId> {
        if lane.is_internal() {
            return lane.links().first().copied();
        }
        if let Some(target) = conts.get(view) {
            if let Some(link) = lane.links().iter().find(|l| net.link(**l).to() == *target) {
                return Some(*link);
            }
        }
        let next_edge = self.route.edge(route_view)?;
        let vclass = self.vtype.vclass();
        let candidates = lane
            .links()
            .iter()
            .copied()
            .filter(|l| net.lane(net.link(*l).to()).edge() == next_edge)
            .collect::<SmallVec<[LinkId; 4]>>();
        candidates
            .iter()
            .copied()
            .find(|l| net.lane(net.link(*l).to()).allows(vclass))
            .or_else(|| candidates.first().copied())
    }

    /// Walks the lanes ahead, producing one drive item per link until the
    /// vehicle has seen enough road to brake safely.
    fn vsafe_critical_cont(
        &self,
        net: &Network,
        vehicles: &VehicleSet,
        bound: f64,
        is_first: bool,
        now: f64,
    ) -> Vec<DriveItem> {
        let Some(start) = self.lane else {
            return vec![];
        };
        let model = self.model();
        let dt = model.kinematics().dt();
        let mut lane = net.lane(start);
        let mut seen = lane.length() - self.pos;

        if !is_first && seen - model.brake_gap(bound) > 0.0 {
            return vec![DriveItem::stay(bound, seen, now)];
        }

        let max_v = model.max_next_speed(self.speed);
        let dist = max_v * dt + model.brake_gap(max_v);
        let conts = self.best_lanes_continuation(start);
        let mut view = 0;
        let mut route_view = self.route_idx + 1;
        let mut seen_non_internal = 0.0;
        let mut had_non_internal = false;
        let mut v_pass = bound;
        let mut items = vec![];

        loop {
            let Some(link_id) = self.next_link(net, lane, conts, view, route_view) else {
                let v = v_pass.min(model.safe_approach_speed(self.speed, seen));
                items.push(DriveItem::stay(v, seen, now));
                return items;
            };
            let link = net.link(link_id);
            let mut v_wait = v_pass;
            let next = net.lane(link.lane_after());
            if link.via().is_none() {
                had_non_internal = true;
            }

            let vmax_next = model
                .safe_follow_speed(self.speed, seen, next.max_speed())
                .max(next.max_speed());
            let mut v_pred = f64::INFINITY;
            if let Some(last) = next.last_vehicle_information(vehicles) {
                if last.vehicle != self.id && seen + last.rear > 0.0 {
                    v_pred = model.safe_follow_speed(self.speed, seen + last.rear, last.speed);
                }
            }
            v_pass = v_pass.min(vmax_next).min(v_pred);
            v_wait = v_pass
                .min(v_wait)
                .min(model.safe_approach_speed(self.speed, seen));
            if let Some(stop_pos) = self.stop_target_on(net, next.id()) {
                v_pass = v_pass.min(model.safe_approach_speed(self.speed, seen + stop_pos));
            }

            let state = link.state();
            let set_request = !state.is_red() && v_pass > 0.0 && dist - seen > 0.0;
            let arrival_time = if seen > 0.0 {
                now + travel_time(seen, v_pass)
            } else {
                now
            };
            if (state.is_yellow() || state.is_red())
                && seen > model.brake_gap(self.speed) - self.speed * dt
            {
                items.push(DriveItem {
                    link: Some(link_id),
                    v_pass: v_wait,
                    v_wait,
                    set_request: false,
                    arrival_time,
                    arrival_speed: v_wait,
                    distance: seen,
                });
                return items;
            }
            items.push(DriveItem {
                link: Some(link_id),
                v_pass,
                v_wait,
                set_request,
                arrival_time,
                arrival_speed: v_pass,
                distance: seen,
            });

            seen += next.length();
            if !next.is_internal() {
                seen_non_internal += next.length();
            }
            if (v_pass <= 0.0 || seen > dist)
                && had_non_internal
                && seen_non_internal > MIN_LOOKAHEAD_NON_INTERNAL
            {
                return items;
            }
            if !next.is_internal() {
                view += 1;
                route_view += 1;
            }
            lane = next;
        }
    }

    /// Retracts the requests for links the vehicle could not clear because
    /// the road behind them is blocked, so it never stops inside a junction.
    fn check_rewind_link_lanes(
        &self,
        items: &mut [DriveItem],
        lengths_in_front: f64,
        net: &Network,
        vehicles: &VehicleSet,
        now: f64,
    ) {
        let links = net.links_set();
        let mut seen_space = -lengths_in_front;
        let mut had_vehicle = false;
        let mut available = SmallVec::<[f64; 8]>::new();
        let mut had_vehicles = SmallVec::<[bool; 8]>::new();

        for item in items.iter() {
            let Some(link) = item.link.map(|l| net.link(l)) else {
                available.push(seen_space);
                had_vehicles.push(had_vehicle);
                continue;
            };
            if let Some(via) = link.via().map(|v| net.lane(v)) {
                seen_space -= via.vehicle_length_sum();
                // A via lane crossed by approaching foes is no place to wait
                if !(link.is_crossing() && link.will_have_blocked_foe(links)) {
                    seen_space += via.length();
                }
                had_vehicle |= !via.is_empty();
                available.push(seen_space);
                had_vehicles.push(had_vehicle);
                continue;
            }
            let approached = net.lane(link.to());
            let rest = seen_space + approached.length() - approached.vehicle_length_sum();
            let last = approached
                .last_vehicle()
                .filter(|id| *id != self.id)
                .and_then(|id| vehicles.get(id));
            match last {
                Some(last) => {
                    if last.was_braking || last.speed <= HALTING_SPEED {
                        let model = last.model();
                        let last_gap = last.pos - last.length() + model.brake_gap(last.speed)
                            - last.speed * model.kinematics().tau();
                        available.push(f64::max(seen_space, seen_space + last_gap));
                    } else {
                        available.push(rest);
                    }
                    had_vehicle = true;
                }
                None => match approached
                    .partial_occupator()
                    .filter(|(id, _)| *id != self.id)
                    .and_then(|(id, end)| vehicles.get(id).map(|v| (v, end)))
                {
                    Some((occupator, end)) => {
                        let reach = end - approached.length()
                            + occupator.model().brake_gap(occupator.speed);
                        available.push(f64::max(seen_space, seen_space + reach));
                        had_vehicle = true;
                    }
                    None => available.push(rest),
                },
            }
            seen_space = rest;
            had_vehicles.push(had_vehicle);
        }

        // Space behind a link the vehicle may pass anyway counts for the link before
        for i in (1..items.len()).rev() {
            let item = &items[i - 1];
            let keep = match item.link.map(|l| net.link(l)) {
                None => true,
                Some(link) => {
                    link.is_cont()
                        || !had_vehicles[i]
                        || link.opened(now, PASS_CHECK_SPEED, net)
                }
            };
            if keep {
                available[i - 1] = available[i];
            }
        }

        if !had_vehicle {
            return;
        }
        let removal_begin = items.iter().enumerate().position(|(i, item)| {
            item.link.map(|l| net.link(l)).map_or(false, |link| {
                !link.is_cont()
                    && available[i] - self.length() < 0.0
                    && link.will_have_blocked_foe(links)
            })
        });
        let Some(begin) = removal_begin else {
            return;
        };
        let on_internal = self.lane.map_or(false, |l| net.lane(l).is_internal());
        if begin == 0 && on_internal {
            return;
        }
        trace!(
            "vehicle '{}' retracts its requests from link {} on, {:.2}m available",
            self.name,
            begin,
            available[begin]
        );
        for item in &mut items[begin..] {
            item.v_pass = item.v_wait;
            item.set_request = false;
        }
    }
}
