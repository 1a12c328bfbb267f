//! Right-of-way arbitration at junctions.
//!
//! Each junction owns a static table over its incoming links. For every
//! link it lists the links which must not be requested at the same time
//! (the link yields to them) and the internal lanes which must be empty.
//! Every step the requests of the approaching vehicles are gathered and a
//! single pass over the table decides which links are granted.

use crate::link::RequestSlot;
use crate::{JunctionId, LaneId, LaneSet, LinkId, LinkSet, SimError, SimResult};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt::{Debug, Formatter};

/// A set of link (or internal lane) indices at a junction, of any width.
#[derive(Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LinkMask(SmallVec<[u64; 1]>);

impl LinkMask {
    /// Creates an empty mask.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `index` to the set.
    pub fn set(&mut self, index: usize) {
        let (word, bit) = (index / 64, index % 64);
        if self.0.len() <= word {
            self.0.resize(word + 1, 0);
        }
        self.0[word] |= 1 << bit;
    }

    /// Removes `index` from the set.
    pub fn clear(&mut self, index: usize) {
        let (word, bit) = (index / 64, index % 64);
        if let Some(w) = self.0.get_mut(word) {
            *w &= !(1 << bit);
        }
    }

    pub fn test(&self, index: usize) -> bool {
        let (word, bit) = (index / 64, index % 64);
        self.0.get(word).map_or(false, |w| w & (1 << bit) != 0)
    }

    /// Whether no index is set.
    pub fn none(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    /// Whether both sets share an index.
    pub fn intersects(&self, other: &Self) -> bool {
        self.0.iter().zip(other.0.iter()).any(|(a, b)| a & b != 0)
    }

    /// Iterates over the set indices in increasing order.
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().flat_map(|(word, w)| {
            (0..64)
                .filter(move |bit| w & (1 << bit) != 0)
                .map(move |bit| word * 64 + bit)
        })
    }

    /// The number of set indices.
    pub fn count(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }
}

impl Debug for LinkMask {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.ones()).finish()
    }
}

/// The static conflict table of a junction.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct JunctionLogic {
    size: usize,
    /// For each link, the links it must yield to.
    response: Vec<LinkMask>,
    /// For each link, the internal lanes which must be empty.
    internal_foes: Vec<LinkMask>,
    /// The links which continue an already committed traversal.
    conts: LinkMask,
}

impl JunctionLogic {
    /// Starts building the table of a junction with `size` incoming links.
    pub fn builder(size: usize) -> JunctionLogicBuilder {
        JunctionLogicBuilder {
            logic: JunctionLogic {
                size,
                response: vec![LinkMask::new(); size],
                internal_foes: vec![LinkMask::new(); size],
                conts: LinkMask::new(),
            },
            error: None,
        }
    }

    /// The number of links covered by the table.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The links which must not be requested for `link` to be granted.
    pub fn foes_for(&self, link: usize) -> &LinkMask {
        &self.response[link]
    }

    /// The internal lanes which must be empty for `link` to be granted.
    pub fn internal_foes_for(&self, link: usize) -> &LinkMask {
        &self.internal_foes[link]
    }

    pub fn is_cont(&self, link: usize) -> bool {
        self.conts.test(link)
    }

    /// Whether `a` and `b` conflict in either direction.
    pub fn conflicts(&self, a: usize, b: usize) -> bool {
        self.response[a].test(b) || self.response[b].test(a)
    }

    /// Whether any two links of the junction conflict.
    pub fn is_crossing(&self) -> bool {
        self.response.iter().any(|r| !r.none())
    }

    /// Decides which of the requested links are granted.
    ///
    /// A link is granted if it is requested, and it is either a continuation
    /// or none of the links it yields to is requested, and none of its
    /// internal foe lanes is occupied.
    pub fn respond(&self, request: &LinkMask, inner_state: &LinkMask) -> LinkMask {
        let mut respond = LinkMask::new();
        for i in request.ones().filter(|i| *i < self.size) {
            let free = self.is_cont(i) || !request.intersects(&self.response[i]);
            if free && !inner_state.intersects(&self.internal_foes[i]) {
                respond.set(i);
            }
        }
        respond
    }
}

/// Builds a [JunctionLogic].
pub struct JunctionLogicBuilder {
    logic: JunctionLogic,
    error: Option<usize>,
}

impl JunctionLogicBuilder {
    fn check(&mut self, index: usize) -> bool {
        if index < self.logic.size {
            true
        } else {
            self.error.get_or_insert(index);
            false
        }
    }

    /// Link `minor` must yield to link `major`.
    pub fn prohibits(mut self, major: usize, minor: usize) -> Self {
        if self.check(major) && self.check(minor) && major != minor {
            self.logic.response[minor].set(major);
        }
        self
    }

    /// Links `a` and `b` exclude each other.
    pub fn mutual(self, a: usize, b: usize) -> Self {
        self.prohibits(a, b).prohibits(b, a)
    }

    /// Link `link` must wait while internal lane number `lane` is occupied.
    pub fn internal_foe(mut self, link: usize, lane: usize) -> Self {
        if self.check(link) {
            self.logic.internal_foes[link].set(lane);
        }
        self
    }

    /// Link `link` continues a committed traversal and is always granted.
    pub fn cont(mut self, link: usize) -> Self {
        if self.check(link) {
            self.logic.conts.set(link);
        }
        self
    }

    pub fn build(self) -> SimResult<JunctionLogic> {
        match self.error {
            Some(index) => Err(SimError::InvalidParameter(format!(
                "link index {} out of range for a junction of {} links",
                index, self.logic.size
            ))),
            None => Ok(self.logic),
        }
    }
}

/// A junction: a set of incoming links sharing one conflict table.
#[derive(Clone, Debug)]
pub struct Junction {
    id: JunctionId,
    name: String,
    /// The incoming links, in table order.
    links: Vec<LinkId>,
    /// The internal lanes, in the order used by the table.
    internal_lanes: Vec<LaneId>,
    logic: JunctionLogic,
    request: LinkMask,
    inner_state: LinkMask,
    respond: LinkMask,
}

impl Junction {
    pub(crate) fn new(
        id: JunctionId,
        name: &str,
        links: Vec<LinkId>,
        internal_lanes: Vec<LaneId>,
        logic: JunctionLogic,
    ) -> Self {
        Self {
            id,
            name: name.to_owned(),
            links,
            internal_lanes,
            logic,
            request: LinkMask::new(),
            inner_state: LinkMask::new(),
            respond: LinkMask::new(),
        }
    }

    pub fn id(&self) -> JunctionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn links(&self) -> &[LinkId] {
        &self.links
    }

    pub fn internal_lanes(&self) -> &[LaneId] {
        &self.internal_lanes
    }

    pub fn logic(&self) -> &JunctionLogic {
        &self.logic
    }

    /// The links requested in the last step.
    pub fn request(&self) -> &LinkMask {
        &self.request
    }

    /// The internal lanes occupied in the last step.
    pub fn inner_state(&self) -> &LinkMask {
        &self.inner_state
    }

    /// The links granted in the last step.
    pub fn respond(&self) -> &LinkMask {
        &self.respond
    }

    /// Whether the link at `index` was granted in the last step.
    pub fn granted(&self, index: usize) -> bool {
        self.respond.test(index)
    }

    /// The request slot of the link at `index`.
    pub(crate) fn slot(&self, index: usize) -> RequestSlot {
        RequestSlot {
            junction: self.id,
            index,
        }
    }

    /// Gathers the requests of the approaching vehicles and the occupancy of
    /// the internal lanes, then evaluates the table.
    pub(crate) fn update(&mut self, links: &LinkSet, lanes: &LaneSet) {
        let mut request = LinkMask::new();
        for (i, link) in self.links.iter().enumerate() {
            if links[*link].approaching().iter().any(|a| a.will_pass) {
                request.set(i);
            }
        }
        let mut inner_state = LinkMask::new();
        for (i, lane) in self.internal_lanes.iter().enumerate() {
            if lanes[*lane].is_occupied() {
                inner_state.set(i);
            }
        }
        self.respond = self.logic.respond(&request, &inner_state);
        self.request = request;
        self.inner_state = inner_state;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn mask(indices: &[usize]) -> LinkMask {
        let mut m = LinkMask::new();
        for i in indices {
            m.set(*i);
        }
        m
    }

    #[test]
    fn wide_masks() {
        let mut m = mask(&[0, 63, 64, 200]);
        assert_eq!(m.count(), 4);
        assert!(m.test(200));
        assert!(!m.test(199));
        m.clear(64);
        assert_eq!(m.ones().collect::<Vec<_>>(), vec![0, 63, 200]);
        assert!(m.intersects(&mask(&[200])));
        assert!(!m.intersects(&mask(&[1, 2])));
        assert!(LinkMask::new().none());
    }

    #[test]
    fn priority_and_yield() {
        // Link 0 is the major road, link 1 yields to it
        let logic = JunctionLogic::builder(2).prohibits(0, 1).build().unwrap();
        let none = LinkMask::new();
        assert_eq!(logic.respond(&mask(&[0, 1]), &none), mask(&[0]));
        assert_eq!(logic.respond(&mask(&[1]), &none), mask(&[1]));
        assert!(logic.conflicts(1, 0));
    }

    #[test]
    fn cont_links_are_granted() {
        let logic = JunctionLogic::builder(2)
            .mutual(0, 1)
            .cont(1)
            .build()
            .unwrap();
        assert_eq!(
            logic.respond(&mask(&[0, 1]), &LinkMask::new()),
            mask(&[1])
        );
    }

    #[test]
    fn occupied_internal_lanes_block() {
        let logic = JunctionLogic::builder(2)
            .internal_foe(0, 1)
            .build()
            .unwrap();
        assert_eq!(logic.respond(&mask(&[0, 1]), &mask(&[1])), mask(&[1]));
        assert_eq!(logic.respond(&mask(&[0, 1]), &mask(&[0])), mask(&[0, 1]));
    }

    #[test]
    fn more_than_64_links() {
        let mut builder = JunctionLogic::builder(130);
        for i in 1..130 {
            builder = builder.prohibits(0, i);
        }
        let logic = builder.build().unwrap();
        let all = mask(&(0..130).collect::<Vec<_>>());
        assert_eq!(logic.respond(&all, &LinkMask::new()), mask(&[0]));
        assert_eq!(logic.respond(&mask(&[129]), &LinkMask::new()), mask(&[129]));
    }

    #[test]
    fn out_of_range_fails() {
        assert!(JunctionLogic::builder(2).prohibits(0, 2).build().is_err());
    }
}
