use crate::{EdgeId, LaneId};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// What an edge is used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EdgePurpose {
    /// A road between two junctions.
    #[default]
    Normal,
    /// A path across a junction, made up of via lanes. Never part of a route.
    Internal,
    /// Where vehicles enter the network.
    Source,
    /// Where vehicles leave the network.
    Sink,
}

/// A road segment made up of parallel lanes.
#[derive(Clone, Debug)]
pub struct Edge {
    id: EdgeId,
    name: String,
    purpose: EdgePurpose,
    /// The lanes, ordered right to left.
    lanes: Vec<LaneId>,
}

impl Edge {
    pub(crate) fn new(id: EdgeId, name: &str, purpose: EdgePurpose) -> Self {
        Self {
            id,
            name: name.to_owned(),
            purpose,
            lanes: vec![],
        }
    }

    pub fn id(&self) -> EdgeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn purpose(&self) -> EdgePurpose {
        self.purpose
    }

    pub fn is_internal(&self) -> bool {
        self.purpose == EdgePurpose::Internal
    }

    /// The lanes of the edge, rightmost first.
    pub fn lanes(&self) -> &[LaneId] {
        &self.lanes
    }

    pub(crate) fn push_lane(&mut self, lane: LaneId) {
        self.lanes.push(lane);
    }
}
