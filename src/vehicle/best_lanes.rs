use super::Vehicle;
use crate::network::Network;
use crate::LaneId;
use smallvec::SmallVec;

/// Foresight ends after this many edges once [FAR_FORESIGHT_LENGTH] is seen.
const NEAR_FORESIGHT_EDGES: usize = 4;

/// The route length after which foresight may end early, in m.
const FAR_FORESIGHT_LENGTH: f64 = 3000.0;

/// Foresight never covers more edges than this.
const MAX_FORESIGHT_EDGES: usize = 8;

/// Lengths this close are considered equal, in m.
const LENGTH_EPS: f64 = 0.1;

/// How well a lane of the current edge lets a vehicle follow its route.
#[derive(Clone, Debug, PartialEq)]
pub struct LaneQ {
    pub lane: LaneId,
    /// The length of the best uninterrupted continuation, including the lane.
    pub length: f64,
    /// The summed length of the vehicles along the continuation, in m.
    pub occupied: f64,
    /// How many lanes to the left (positive) or right (negative) the
    /// nearest lane with the longest continuation is.
    pub best_offset: isize,
    /// Whether the lane has a link to the next edge of the route.
    pub allows_continuation: bool,
    /// The lanes of the continuation, starting with `lane`.
    pub joined: SmallVec<[LaneId; 8]>,
}

impl Vehicle {
    /// Rebuilds the continuation quality of the lanes of the current edge.
    pub(crate) fn update_best_lanes(&mut self, net: &Network) {
        self.best_lanes = self.compute_best_lanes(net);
    }

    /// Computes, back to front over the edges ahead, the longest continuation
    /// each lane of the route's current edge offers.
    pub(crate) fn compute_best_lanes(&self, net: &Network) -> Vec<LaneQ> {
        let edges = self.route.edges();
        let Some(first) = edges.get(self.route_idx) else {
            return vec![];
        };
        if net.try_edge(*first).is_none() {
            return vec![];
        }
        let vclass = self.vtype.vclass();
        let stop = self
            .stops
            .front()
            .filter(|stop| !stop.reached)
            .map(|stop| (stop.route_idx, stop.lane, stop.pos));

        // Collect the edges within foresight
        let mut last = self.route_idx;
        let mut seen_length = 0.0;
        while last + 1 < edges.len() {
            let seen_edges = last - self.route_idx + 1;
            if stop.map_or(false, |(idx, _, _)| idx == last)
                || seen_edges > MAX_FORESIGHT_EDGES
                || (seen_edges > NEAR_FORESIGHT_EDGES && seen_length > FAR_FORESIGHT_LENGTH)
            {
                break;
            }
            seen_length += net
                .lanes(edges[last])
                .first()
                .map_or(0.0, |l| net.lane(*l).length());
            last += 1;
        }

        let mut next: Vec<LaneQ> = vec![];
        for idx in (self.route_idx..=last).rev() {
            let edge = edges[idx];
            let allowed = edges
                .get(idx + 1)
                .filter(|_| idx < last)
                .and_then(|to| net.allowed_lanes(edge, *to, vclass));
            let mut qs = net
                .lanes(edge)
                .iter()
                .map(|lane_id| {
                    let lane = net.lane(*lane_id);
                    let mut q = LaneQ {
                        lane: *lane_id,
                        length: lane.length(),
                        occupied: lane.vehicle_length_sum(),
                        best_offset: 0,
                        allows_continuation: idx == last && lane.allows(vclass),
                        joined: SmallVec::from_elem(*lane_id, 1),
                    };
                    if let Some((stop_idx, stop_lane, stop_pos)) = stop {
                        if stop_idx == idx {
                            if stop_lane == *lane_id {
                                q.length = stop_pos;
                            } else {
                                q.length = 0.0;
                                q.allows_continuation = false;
                            }
                            return q;
                        }
                    }
                    if allowed.as_ref().map_or(false, |a| a.contains(lane_id)) {
                        q.allows_continuation = true;
                        let succ = lane
                            .links()
                            .iter()
                            .map(|l| net.link(*l).to())
                            .filter_map(|to| next.iter().find(|n| n.lane == to))
                            .max_by(|a, b| {
                                a.length
                                    .total_cmp(&b.length)
                                    .then(b.occupied.total_cmp(&a.occupied))
                            });
                        if let Some(succ) = succ {
                            q.length += succ.length;
                            q.occupied += succ.occupied;
                            q.joined.extend(succ.joined.iter().copied());
                        }
                    }
                    q
                })
                .collect::<Vec<_>>();
            set_best_offsets(&mut qs);
            next = qs;
        }
        next
    }

    /// The lanes of the best continuation after `lane`, which must be on the
    /// current edge. Empty if `lane` is not.
    pub(crate) fn best_lanes_continuation(&self, lane: LaneId) -> &[LaneId] {
        self.best_lanes
            .iter()
            .find(|q| q.lane == lane)
            .map(|q| &q.joined[1..])
            .unwrap_or_default()
    }

    /// The entry for the vehicle's current lane.
    pub(crate) fn best_lane_q(&self) -> Option<&LaneQ> {
        let lane = self.lane?;
        self.best_lanes.iter().find(|q| q.lane == lane)
    }
}

/// Points every lane at the nearest lane with the longest continuation.
fn set_best_offsets(qs: &mut [LaneQ]) {
    let best = qs
        .iter()
        .filter(|q| q.allows_continuation)
        .map(|q| q.length)
        .fold(f64::NEG_INFINITY, f64::max);
    if best == f64::NEG_INFINITY {
        return;
    }
    let targets = qs
        .iter()
        .enumerate()
        .filter(|(_, q)| q.allows_continuation && q.length >= best - LENGTH_EPS)
        .map(|(i, _)| i as isize)
        .collect::<SmallVec<[isize; 4]>>();
    for (i, q) in qs.iter_mut().enumerate() {
        let i = i as isize;
        q.best_offset = targets
            .iter()
            .map(|t| t - i)
            .min_by_key(|offset| offset.abs())
            .unwrap_or(0);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn q(lane: LaneId, length: f64, allows: bool) -> LaneQ {
        LaneQ {
            lane,
            length,
            occupied: 0.0,
            best_offset: 0,
            allows_continuation: allows,
            joined: SmallVec::from_elem(lane, 1),
        }
    }

    #[test]
    fn offsets_point_to_nearest_best() {
        let mut lanes = slotmap::SlotMap::<LaneId, ()>::with_key();
        let ids = (0..4).map(|_| lanes.insert(())).collect::<Vec<_>>();
        let mut qs = vec![
            q(ids[0], 100.0, false),
            q(ids[1], 500.0, true),
            q(ids[2], 500.0, true),
            q(ids[3], 200.0, true),
        ];
        set_best_offsets(&mut qs);
        let offsets = qs.iter().map(|q| q.best_offset).collect::<Vec<_>>();
        assert_eq!(offsets, vec![1, 0, 0, -1]);
    }

    #[test]
    fn no_continuation_keeps_lanes() {
        let mut lanes = slotmap::SlotMap::<LaneId, ()>::with_key();
        let mut qs = vec![q(lanes.insert(()), 100.0, false)];
        set_best_offsets(&mut qs);
        assert_eq!(qs[0].best_offset, 0);
    }
}
