use crate::junction::{Junction, JunctionLogic};
use crate::lane::{Lane, LaneAttributes};
use crate::link::{Link, LinkAttributes};
use crate::reminder::MoveReminder;
use crate::stop::BusStop;
use crate::vtype::VehicleClass;
use crate::{
    BusStopId, Edge, EdgeId, EdgePurpose, EdgeSet, JunctionId, JunctionSet, LaneId, LaneSet,
    LinkId, LinkSet, SimError, SimResult,
};
use slotmap::SlotMap;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;

/// The default slack around link occupation windows, in s.
const DEFAULT_LOOKAHEAD_SLACK: f64 = 3.0;

/// The road network: edges, lanes, the links between lanes and the
/// junctions arbitrating conflicting links.
pub struct Network {
    edges: EdgeSet,
    lanes: LaneSet,
    links: LinkSet,
    junctions: JunctionSet,
    bus_stops: SlotMap<BusStopId, BusStop>,
    edge_names: HashMap<String, EdgeId>,
    lane_names: HashMap<String, LaneId>,
    /// The slack around link occupation windows, in s.
    lookahead_slack: f64,
}

impl Default for Network {
    fn default() -> Self {
        Self {
            edges: Default::default(),
            lanes: Default::default(),
            links: Default::default(),
            junctions: Default::default(),
            bus_stops: Default::default(),
            edge_names: Default::default(),
            lane_names: Default::default(),
            lookahead_slack: DEFAULT_LOOKAHEAD_SLACK,
        }
    }
}

impl Network {
    /// Creates an empty network.
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds an edge without lanes.
    pub fn add_edge(&mut self, name: &str, purpose: EdgePurpose) -> SimResult<EdgeId> {
        if self.edge_names.contains_key(name) {
            return Err(SimError::DuplicateId(name.to_owned()));
        }
        let id = self
            .edges
            .insert_with_key(|id| Edge::new(id, name, purpose));
        self.edge_names.insert(name.to_owned(), id);
        Ok(id)
    }

    /// Adds a lane to the left of the edge's existing lanes.
    /// The lane is named after the edge and its index, e.g. `e1_0`.
    pub fn add_lane(&mut self, edge: EdgeId, attribs: &LaneAttributes) -> SimResult<LaneId> {
        let edge_ref = self
            .edges
            .get(edge)
            .ok_or_else(|| SimError::UnknownEdge(format!("{:?}", edge)))?;
        if !(attribs.length > 0.0) || !(attribs.max_speed > 0.0) {
            return Err(SimError::InvalidParameter(format!(
                "lanes of edge '{}' need a positive length and speed limit",
                edge_ref.name()
            )));
        }
        let index = edge_ref.lanes().len();
        let name = format!("{}_{}", edge_ref.name(), index);
        let internal = edge_ref.is_internal();
        let id = self
            .lanes
            .insert_with_key(|id| Lane::new(id, edge, name.clone(), index, internal, attribs));
        self.edges[edge].push_lane(id);
        self.lane_names.insert(name, id);
        Ok(id)
    }

    /// Adds a link between two lanes. If the link crosses the junction over
    /// a via lane, the link from the via lane to the target is added too.
    pub fn add_link(&mut self, attribs: &LinkAttributes) -> SimResult<LinkId> {
        for lane in [Some(attribs.from), Some(attribs.to), attribs.via]
            .into_iter()
            .flatten()
        {
            if !self.lanes.contains_key(lane) {
                return Err(SimError::UnknownLane(format!("{:?}", lane)));
            }
        }
        let length = match attribs.via {
            Some(via) => self.lanes[via].length(),
            None => attribs.length,
        };
        let id = self
            .links
            .insert_with_key(|id| Link::new(id, attribs, length));
        self.lanes[attribs.from].add_link(id);
        match attribs.via {
            Some(via) => {
                self.lanes[via].add_incoming(attribs.from);
                let exit = LinkAttributes {
                    from: via,
                    via: None,
                    length: 0.0,
                    ..attribs.clone()
                };
                let exit_id = self
                    .links
                    .insert_with_key(|id| Link::new(id, &exit, 0.0));
                self.lanes[via].add_link(exit_id);
                self.lanes[attribs.to].add_incoming(via);
            }
            None => self.lanes[attribs.to].add_incoming(attribs.from),
        }
        Ok(id)
    }

    /// Adds a junction arbitrating `links` (in table order) with the given
    /// internal lanes (in the order the table refers to them).
    pub fn add_junction(
        &mut self,
        name: &str,
        links: &[LinkId],
        internal_lanes: &[LaneId],
        logic: JunctionLogic,
    ) -> SimResult<JunctionId> {
        if logic.size() != links.len() {
            return Err(SimError::JunctionSize {
                junction: name.to_owned(),
                logic: logic.size(),
                given: links.len(),
            });
        }
        if let Some(link) = links.iter().find(|l| !self.links.contains_key(**l)) {
            return Err(SimError::InvalidParameter(format!(
                "junction '{}' refers to unknown link {:?}",
                name, link
            )));
        }
        if let Some(lane) = internal_lanes.iter().find(|l| !self.lanes.contains_key(**l)) {
            return Err(SimError::UnknownLane(format!("{:?}", lane)));
        }
        let crossing = logic.is_crossing();
        let id = self.junctions.insert_with_key(|id| {
            Junction::new(id, name, links.to_vec(), internal_lanes.to_vec(), logic)
        });
        let junction = &self.junctions[id];
        for (i, link) in links.iter().enumerate() {
            let logic = junction.logic();
            let foe_links = logic.foes_for(i).ones().map(|j| links[j]).collect();
            let foe_lanes = logic
                .internal_foes_for(i)
                .ones()
                .filter_map(|j| internal_lanes.get(j).copied())
                .collect();
            self.links[*link].set_request(
                junction.slot(i),
                foe_links,
                foe_lanes,
                logic.is_cont(i),
                crossing,
            );
            for j in 0..links.len() {
                if logic.conflicts(i, j) {
                    self.links[*link].add_blocked_foe(links[j]);
                }
            }
        }
        Ok(id)
    }

    /// Adds a bus stop covering `[begin, end]` on a lane.
    pub fn add_bus_stop(
        &mut self,
        name: &str,
        lane: LaneId,
        begin: f64,
        end: f64,
    ) -> SimResult<BusStopId> {
        let lane_ref = self
            .lanes
            .get(lane)
            .ok_or_else(|| SimError::UnknownLane(format!("{:?}", lane)))?;
        if !(0.0 <= begin && begin < end && end <= lane_ref.length()) {
            return Err(SimError::InvalidParameter(format!(
                "bus stop '{}' does not fit on lane '{}'",
                name,
                lane_ref.name()
            )));
        }
        Ok(self
            .bus_stops
            .insert_with_key(|id| BusStop::new(id, name, lane, begin, end)))
    }

    /// Attaches a move reminder to its lane.
    pub fn add_reminder(&mut self, reminder: Arc<dyn MoveReminder>) -> SimResult<()> {
        let lane = reminder.lane();
        self.lanes
            .get_mut(lane)
            .ok_or_else(|| SimError::UnknownLane(format!("{:?}", lane)))?
            .add_reminder(reminder);
        Ok(())
    }

    /// Makes links skip their via lanes, so junctions are crossed directly.
    pub(crate) fn disable_internal_lanes(&mut self) {
        let vias = self
            .links
            .values()
            .filter_map(|link| link.via().map(|via| (link.id(), link.from(), via, link.to())))
            .collect::<Vec<_>>();
        for (link, from, via, to) in vias {
            let length = self.lanes[via].length();
            self.links[link].drop_via(length);
            self.lanes[to].replace_incoming(via, from);
        }
    }

    pub(crate) fn set_lookahead_slack(&mut self, slack: f64) {
        self.lookahead_slack = slack;
    }

    /// The slack around link occupation windows, in s.
    pub fn lookahead_slack(&self) -> f64 {
        self.lookahead_slack
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id]
    }

    pub fn lane(&self, id: LaneId) -> &Lane {
        &self.lanes[id]
    }

    pub fn link(&self, id: LinkId) -> &Link {
        &self.links[id]
    }

    pub fn junction(&self, id: JunctionId) -> &Junction {
        &self.junctions[id]
    }

    pub fn bus_stop(&self, id: BusStopId) -> &BusStop {
        &self.bus_stops[id]
    }

    /// Gets a link for changing its state or registrations.
    pub fn link_mut(&mut self, id: LinkId) -> &mut Link {
        &mut self.links[id]
    }

    pub(crate) fn try_edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub(crate) fn try_lane(&self, id: LaneId) -> Option<&Lane> {
        self.lanes.get(id)
    }

    pub(crate) fn has_link(&self, id: LinkId) -> bool {
        self.links.contains_key(id)
    }

    pub(crate) fn has_bus_stop(&self, id: BusStopId) -> bool {
        self.bus_stops.contains_key(id)
    }

    /// Finds an edge by name.
    pub fn edge_by_name(&self, name: &str) -> SimResult<EdgeId> {
        self.edge_names
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownEdge(name.to_owned()))
    }

    /// Finds a lane by name.
    pub fn lane_by_name(&self, name: &str) -> SimResult<LaneId> {
        self.lane_names
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownLane(name.to_owned()))
    }

    /// The lanes of an edge, rightmost first.
    pub fn lanes(&self, edge: EdgeId) -> &[LaneId] {
        self.edges[edge].lanes()
    }

    pub fn iter_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn iter_lanes(&self) -> impl Iterator<Item = &Lane> {
        self.lanes.values()
    }

    pub fn iter_links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    pub fn iter_junctions(&self) -> impl Iterator<Item = &Junction> {
        self.junctions.values()
    }

    pub(crate) fn links_set(&self) -> &LinkSet {
        &self.links
    }

    /// The lanes of `from` that vehicles of `vclass` may use to continue
    /// onto `to`, rightmost first, or `None` if there are none.
    pub fn allowed_lanes(
        &self,
        from: EdgeId,
        to: EdgeId,
        vclass: VehicleClass,
    ) -> Option<SmallVec<[LaneId; 4]>> {
        let lanes = self
            .edges
            .get(from)?
            .lanes()
            .iter()
            .copied()
            .filter(|lane| {
                let lane = &self.lanes[*lane];
                lane.allows(vclass)
                    && lane.links().iter().any(|link| {
                        let target = &self.lanes[self.links[*link].to()];
                        target.edge() == to && target.allows(vclass)
                    })
            })
            .collect::<SmallVec<_>>();
        (!lanes.is_empty()).then_some(lanes)
    }

    /// Recomputes the request, inner state and respond masks of all junctions.
    pub(crate) fn update_junctions(&mut self) {
        for junction in self.junctions.values_mut() {
            junction.update(&self.links, &self.lanes);
        }
    }
}
