use crate::{EdgeId, RouteId};

/// A fixed sequence of edges a vehicle drives along.
#[derive(Clone, Debug)]
pub struct Route {
    id: RouteId,
    name: String,
    edges: Vec<EdgeId>,
}

impl Route {
    pub(crate) fn new(id: RouteId, name: &str, edges: Vec<EdgeId>) -> Self {
        Self {
            id,
            name: name.to_owned(),
            edges,
        }
    }

    pub fn id(&self) -> RouteId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The edges of the route, in driving order.
    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    /// The number of edges.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// The edge at `index`, if the route is that long.
    pub fn edge(&self, index: usize) -> Option<EdgeId> {
        self.edges.get(index).copied()
    }

    /// The first position at or after `from` at which the route visits `edge`.
    pub fn position_of(&self, edge: EdgeId, from: usize) -> Option<usize> {
        self.edges
            .iter()
            .skip(from)
            .position(|e| *e == edge)
            .map(|idx| idx + from)
    }
}
