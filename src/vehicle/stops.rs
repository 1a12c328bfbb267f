use super::Vehicle;
use crate::cfmodel::CarFollowing;
use crate::network::Network;
use crate::stop::{Stop, BUS_STOP_OFFSET};
use crate::{LaneId, SimError, SimResult, StopParams};
use log::{debug, warn};

impl Vehicle {
    /// Adds a stop, which must lie ahead of the vehicle on its route.
    pub(crate) fn add_stop(&mut self, net: &Network, params: &StopParams) -> SimResult<()> {
        let mut params = params.clone();
        if let Some(bus_stop) = params.bus_stop {
            if !net.has_bus_stop(bus_stop) {
                return Err(SimError::InvalidParameter(format!(
                    "vehicle '{}': unknown bus stop {:?}",
                    self.name, bus_stop
                )));
            }
            let bus_stop = net.bus_stop(bus_stop);
            params.lane = bus_stop.lane();
            params.pos = bus_stop.end();
        }
        let lane = net
            .try_lane(params.lane)
            .ok_or_else(|| SimError::UnknownLane(format!("{:?}", params.lane)))?;
        if !(0.0..=lane.length()).contains(&params.pos) || !(params.duration >= 0.0) {
            return Err(SimError::InvalidParameter(format!(
                "vehicle '{}': stop at {} on lane '{}' is out of range",
                self.name,
                params.pos,
                lane.name()
            )));
        }
        let not_downstream = || SimError::StopNotDownstream {
            vehicle: self.name.clone(),
            lane: lane.name().to_owned(),
            pos: params.pos,
        };
        let route_idx = self
            .route
            .position_of(lane.edge(), self.route_idx)
            .ok_or_else(not_downstream)?;
        let on_stop_edge = self
            .lane
            .map_or(false, |l| net.lane(l).edge() == lane.edge());
        if on_stop_edge
            && route_idx == self.route_idx
            && self.pos > params.pos - self.model().brake_gap(self.speed)
        {
            return Err(not_downstream());
        }

        let stop = Stop::new(&params, route_idx);
        let at = self
            .stops
            .iter()
            .position(|s| (s.route_idx, s.pos) > (stop.route_idx, stop.pos))
            .unwrap_or(self.stops.len());
        self.stops.insert(at, stop);
        if self.lane.is_some() {
            self.update_best_lanes(net);
        }
        Ok(())
    }

    /// The position on `lane` the vehicle has to halt at for its next stop,
    /// if that stop is on `lane` and not yet reached.
    pub(crate) fn stop_target_on(&self, net: &Network, lane: LaneId) -> Option<f64> {
        let stop = self.stops.front().filter(|s| !s.reached && s.lane == lane)?;
        Some(match stop.bus_stop {
            Some(bus_stop) => net.bus_stop(bus_stop).last_free_pos(),
            None => stop.pos,
        })
    }

    /// Handles the next stop: marks it reached, counts down its duration and
    /// releases it. Returns the speed bound the stop imposes.
    pub(crate) fn process_next_stop(&mut self, net: &Network, now: f64) -> f64 {
        let dt = self.model().kinematics().dt();
        let Some(stop) = self.stops.front_mut() else {
            return f64::INFINITY;
        };
        if stop.reached {
            if stop.duration <= 0.0 {
                if let Some(bus_stop) = stop.bus_stop {
                    net.bus_stop(bus_stop).leave(self.id);
                }
                self.stops.pop_front();
                debug!("vehicle '{}' resumes its trip at t={}s", self.name, now);
                self.update_best_lanes(net);
                return f64::INFINITY;
            }
            stop.duration -= dt;
            return 0.0;
        }
        if self.lane != Some(stop.lane) {
            return f64::INFINITY;
        }
        let (end_pos, fits) = match stop.bus_stop.map(|b| net.bus_stop(b)) {
            Some(bus_stop) => {
                let free = bus_stop.last_free_pos();
                (free, bus_stop.has_room(free))
            }
            None => (stop.pos, true),
        };
        if self.pos >= end_pos - BUS_STOP_OFFSET && fits {
            stop.reached = true;
            if let Some(until) = stop.until {
                stop.duration = stop.duration.max(until - now);
            }
            if let Some(bus_stop) = stop.bus_stop {
                net.bus_stop(bus_stop)
                    .enter(self.id, self.pos, self.pos - self.vtype.length());
            }
            debug!(
                "vehicle '{}' reached its stop on lane '{}' at t={}s",
                self.name,
                net.lane(stop.lane).name(),
                now
            );
        }
        let distance = end_pos - self.pos;
        self.model().safe_approach_speed(self.speed, distance.max(0.0))
    }

    /// Drops stops on edges the vehicle has already left.
    pub(crate) fn drop_missed_stops(&mut self) {
        while let Some(stop) = self.stops.front() {
            if stop.route_idx >= self.route_idx {
                break;
            }
            warn!(
                "vehicle '{}' drove past its stop at {:.2}m and skips it",
                self.name, stop.pos
            );
            self.stops.pop_front();
        }
    }
}
