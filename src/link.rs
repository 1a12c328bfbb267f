use crate::network::Network;
use crate::util::{travel_time, Interval};
use crate::{JunctionId, LaneId, LinkId, LinkSet, VehicleId};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The right-of-way state of a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LinkState {
    GreenMajor,
    GreenMinor,
    YellowMajor,
    YellowMinor,
    Red,
    /// Not signalised, right of way follows the static priority.
    #[default]
    Off,
}

impl LinkState {
    pub fn is_yellow(self) -> bool {
        matches!(self, LinkState::YellowMajor | LinkState::YellowMinor)
    }

    pub fn is_red(self) -> bool {
        self == LinkState::Red
    }
}

/// A vehicle registered as approaching a link.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ApproachingVehicle {
    pub vehicle: VehicleId,
    /// When the vehicle expects to reach the link, in s.
    pub arrival_time: f64,
    /// When the vehicle expects to have cleared the link, in s.
    pub leaving_time: f64,
    /// Whether the vehicle requests to pass the link.
    pub will_pass: bool,
}

/// The attributes of a link.
#[derive(Clone, Debug)]
pub struct LinkAttributes {
    /// The lane the link starts at.
    pub from: LaneId,
    /// The lane the link leads to.
    pub to: LaneId,
    /// The internal lane crossing the junction, if modelled.
    pub via: Option<LaneId>,
    /// The length of the connection in m, used when there is no via lane.
    pub length: f64,
    /// Whether the link has priority over crossing streams.
    pub priority: bool,
    /// The initial right-of-way state.
    pub state: LinkState,
}

impl LinkAttributes {
    /// A direct, prioritised, unsignalised connection between two lanes.
    pub fn new(from: LaneId, to: LaneId) -> Self {
        Self {
            from,
            to,
            via: None,
            length: 0.0,
            priority: true,
            state: LinkState::Off,
        }
    }
}

/// The position of a link in its junction's request table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RequestSlot {
    pub junction: JunctionId,
    pub index: usize,
}

/// A directed connection from one lane to a successor lane.
#[derive(Clone, Debug)]
pub struct Link {
    /// The link ID.
    id: LinkId,
    from: LaneId,
    to: LaneId,
    via: Option<LaneId>,
    /// The length of the traversal, the via lane's length if there is one.
    length: f64,
    priority: bool,
    state: LinkState,
    /// The junction slot; links without one are always open.
    request: Option<RequestSlot>,
    /// Whether the link continues an already committed junction traversal.
    cont: bool,
    /// Whether the link's junction has any conflicts at all.
    crossing: bool,
    /// Links which must be clear before this one may be used.
    foe_links: Vec<LinkId>,
    /// Internal lanes which must be empty before this one may be used.
    foe_lanes: Vec<LaneId>,
    /// Links conflicting with this one in either direction.
    blocked_foes: Vec<LinkId>,
    /// The vehicles registered as approaching.
    approaching: Vec<ApproachingVehicle>,
}

impl Link {
    /// Creates a new link.
    pub(crate) fn new(id: LinkId, attribs: &LinkAttributes, length: f64) -> Self {
        Self {
            id,
            from: attribs.from,
            to: attribs.to,
            via: attribs.via,
            length,
            priority: attribs.priority,
            state: attribs.state,
            request: None,
            cont: false,
            crossing: false,
            foe_links: vec![],
            foe_lanes: vec![],
            blocked_foes: vec![],
            approaching: vec![],
        }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    /// The lane the link starts at.
    pub fn from(&self) -> LaneId {
        self.from
    }

    /// The lane the link finally leads to.
    pub fn to(&self) -> LaneId {
        self.to
    }

    /// The internal lane of the link, if any.
    pub fn via(&self) -> Option<LaneId> {
        self.via
    }

    /// The lane a vehicle is on right after passing the link.
    pub fn lane_after(&self) -> LaneId {
        self.via.unwrap_or(self.to)
    }

    /// The length of the traversal in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn has_priority(&self) -> bool {
        self.priority
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_cont(&self) -> bool {
        self.cont
    }

    /// Whether the link belongs to a junction with conflicting streams.
    pub fn is_crossing(&self) -> bool {
        self.crossing
    }

    pub fn foe_links(&self) -> &[LinkId] {
        &self.foe_links
    }

    pub fn foe_lanes(&self) -> &[LaneId] {
        &self.foe_lanes
    }

    /// The junction and index of the link, if it takes part in a junction.
    pub fn request_slot(&self) -> Option<(JunctionId, usize)> {
        self.request.map(|slot| (slot.junction, slot.index))
    }

    /// The vehicles currently registered as approaching.
    pub fn approaching(&self) -> &[ApproachingVehicle] {
        &self.approaching
    }

    /// Sets the right-of-way state.
    pub fn set_state(&mut self, state: LinkState) {
        self.state = state;
    }

    pub(crate) fn set_request(
        &mut self,
        slot: RequestSlot,
        foe_links: Vec<LinkId>,
        foe_lanes: Vec<LaneId>,
        cont: bool,
        crossing: bool,
    ) {
        self.request = Some(slot);
        self.foe_links = foe_links;
        self.foe_lanes = foe_lanes;
        self.cont = cont;
        self.crossing = crossing;
    }

    pub(crate) fn add_blocked_foe(&mut self, link: LinkId) {
        if link != self.id && !self.blocked_foes.contains(&link) {
            self.blocked_foes.push(link);
        }
    }

    pub(crate) fn drop_via(&mut self, length: f64) {
        self.via = None;
        self.length = length;
    }

    /// Registers a vehicle as approaching, replacing an earlier registration.
    pub fn set_approaching(
        &mut self,
        vehicle: VehicleId,
        arrival_time: f64,
        arrival_speed: f64,
        will_pass: bool,
    ) {
        if self.request.is_none() {
            return;
        }
        let leaving_time = arrival_time + travel_time(self.length, arrival_speed);
        let entry = ApproachingVehicle {
            vehicle,
            arrival_time,
            leaving_time,
            will_pass,
        };
        match self.approaching.iter_mut().find(|a| a.vehicle == vehicle) {
            Some(existing) => *existing = entry,
            None => self.approaching.push(entry),
        }
    }

    /// Removes the vehicle's registration, if any.
    pub fn remove_approaching(&mut self, vehicle: VehicleId) {
        self.approaching.retain(|a| a.vehicle != vehicle);
    }

    /// Whether any vehicle is registered as approaching.
    pub fn is_blocking_anyone(&self) -> bool {
        !self.approaching.is_empty()
    }

    /// Whether a vehicle that wants to pass is expected on the link
    /// within `[arrival_time, leave_time]`, widened by `slack` seconds.
    pub fn blocked_at_time(&self, arrival_time: f64, leave_time: f64, slack: f64) -> bool {
        let window = Interval::new(arrival_time, leave_time);
        self.approaching
            .iter()
            .filter(|a| a.will_pass)
            .any(|a| Interval::new(a.arrival_time, a.leaving_time).widen(slack).intersects(&window))
    }

    /// Whether a vehicle reaching the link at `arrival_time` with `arrival_speed`
    /// may pass it.
    ///
    /// Only reads the link states, the foes' registries and the occupancy of
    /// foe lanes, so repeated queries within a step agree.
    pub fn opened(&self, arrival_time: f64, arrival_speed: f64, net: &Network) -> bool {
        if self.request.is_none() {
            return true;
        }
        if self.state.is_red() {
            return false;
        }
        if self.cont {
            return true;
        }
        let leave_time = arrival_time + travel_time(self.length, arrival_speed);
        let slack = net.lookahead_slack();
        let foe_link_blocked = self
            .foe_links
            .iter()
            .any(|foe| net.link(*foe).blocked_at_time(arrival_time, leave_time, slack));
        if foe_link_blocked {
            return false;
        }
        !self.foe_lanes.iter().any(|lane| net.lane(*lane).is_occupied())
    }

    /// Whether a conflicting link has vehicles approaching it.
    pub fn will_have_blocked_foe(&self, links: &LinkSet) -> bool {
        self.blocked_foes
            .iter()
            .any(|foe| links[*foe].is_blocking_anyone())
    }

    /// Whether a vehicle wanting to pass is registered at a foe link.
    pub fn has_approaching_foe(&self, links: &LinkSet) -> bool {
        self.foe_links
            .iter()
            .any(|foe| links[*foe].approaching.iter().any(|a| a.will_pass))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use slotmap::SlotMap;

    fn link_in_junction() -> Link {
        let mut lanes = SlotMap::<LaneId, ()>::with_key();
        let mut junctions = SlotMap::<JunctionId, ()>::with_key();
        let attribs = LinkAttributes::new(lanes.insert(()), lanes.insert(()));
        let mut ids = SlotMap::<LinkId, ()>::with_key();
        let mut link = Link::new(ids.insert(()), &attribs, 10.0);
        let slot = RequestSlot {
            junction: junctions.insert(()),
            index: 0,
        };
        link.set_request(slot, vec![], vec![], false, true);
        link
    }

    #[test]
    fn set_approaching_replaces() {
        let mut link = link_in_junction();
        let mut vehs = SlotMap::<VehicleId, ()>::with_key();
        let veh = vehs.insert(());
        link.set_approaching(veh, 5.0, 10.0, true);
        link.set_approaching(veh, 6.0, 5.0, false);
        assert_eq!(link.approaching().len(), 1);
        assert_eq!(link.approaching()[0].leaving_time, 8.0);
        assert!(!link.approaching()[0].will_pass);
        link.remove_approaching(veh);
        assert!(!link.is_blocking_anyone());
    }

    #[test]
    fn blocked_windows() {
        let mut link = link_in_junction();
        let mut vehs = SlotMap::<VehicleId, ()>::with_key();
        // Occupies [10, 11]
        link.set_approaching(vehs.insert(()), 10.0, 10.0, true);
        assert!(link.blocked_at_time(11.5, 12.0, 3.0));
        assert!(link.blocked_at_time(13.5, 14.0, 3.0));
        assert!(!link.blocked_at_time(14.5, 15.0, 3.0));
        assert!(!link.blocked_at_time(0.0, 6.5, 3.0));
        assert!(link.blocked_at_time(0.0, 7.0, 3.0));
        // Registrations without request never block
        let mut link = link_in_junction();
        link.set_approaching(vehs.insert(()), 10.0, 10.0, false);
        assert!(!link.blocked_at_time(10.0, 11.0, 3.0));
    }

    #[test]
    fn foes_block_only_while_approached() {
        let mut lanes = SlotMap::<LaneId, ()>::with_key();
        let mut junctions = SlotMap::<JunctionId, ()>::with_key();
        let junction = junctions.insert(());
        let mut links = LinkSet::with_key();
        let ids = [0, 1].map(|index| {
            let attribs = LinkAttributes::new(lanes.insert(()), lanes.insert(()));
            let id = links.insert_with_key(|id| Link::new(id, &attribs, 10.0));
            links[id].set_request(RequestSlot { junction, index }, vec![], vec![], false, true);
            id
        });
        links[ids[0]].set_request(
            RequestSlot { junction, index: 0 },
            vec![ids[1]],
            vec![],
            false,
            true,
        );
        links[ids[0]].add_blocked_foe(ids[1]);
        links[ids[1]].add_blocked_foe(ids[0]);
        assert!(!links[ids[0]].will_have_blocked_foe(&links));
        assert!(!links[ids[0]].has_approaching_foe(&links));

        let mut vehs = SlotMap::<VehicleId, ()>::with_key();
        let veh = vehs.insert(());
        links[ids[1]].set_approaching(veh, 5.0, 10.0, false);
        assert!(links[ids[0]].will_have_blocked_foe(&links));
        assert!(!links[ids[0]].has_approaching_foe(&links));
        links[ids[1]].set_approaching(veh, 5.0, 10.0, true);
        assert!(links[ids[0]].has_approaching_foe(&links));
        // Approaching oneself never blocks
        assert!(!links[ids[1]].has_approaching_foe(&links));

        links[ids[1]].remove_approaching(veh);
        assert!(!links[ids[0]].will_have_blocked_foe(&links));
    }

    #[test]
    fn stationary_arrival_never_leaves() {
        let mut link = link_in_junction();
        let mut vehs = SlotMap::<VehicleId, ()>::with_key();
        link.set_approaching(vehs.insert(()), 10.0, 0.0, true);
        assert!(link.approaching()[0].leaving_time.is_infinite());
        assert!(link.blocked_at_time(1000.0, 1001.0, 3.0));
    }
}
