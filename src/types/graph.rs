use super::TypeId;

/// Kind of a direct supertype edge.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EdgeKind {
    Class,
    Interface,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Edge {
    pub target: TypeId,
    pub kind: EdgeKind,
}

/// Direct subtype -> supertype edges, stored as adjacency lists indexed by
/// [`TypeId`].
#[derive(Clone, Debug, Default)]
pub struct InheritanceGraph {
    edges: Vec<Vec<Edge>>,
}

impl InheritanceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node; ids are handed out densely by the repository.
    pub(crate) fn add_node(&mut self, id: TypeId) {
        let index = id.index();
        if self.edges.len() <= index {
            self.edges.resize_with(index + 1, Vec::new);
        }
    }

    pub fn node_count(&self) -> usize {
        self.edges.len()
    }

    /// Add an edge unless an identical one exists. A `Class` edge replaces the
    /// previous `Class` edge so a node keeps a single superclass.
    pub(crate) fn add_edge(&mut self, from: TypeId, to: TypeId, kind: EdgeKind) {
        self.add_node(from);
        let edges = &mut self.edges[from.index()];
        if kind == EdgeKind::Class {
            edges.retain(|edge| edge.kind != EdgeKind::Class);
        }
        let edge = Edge { target: to, kind };
        if !edges.contains(&edge) {
            edges.push(edge);
        }
    }

    pub fn edges(&self, from: TypeId) -> &[Edge] {
        self.edges
            .get(from.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Target of the single `Class` edge.
    pub fn superclass(&self, from: TypeId) -> Option<TypeId> {
        self.edges(from)
            .iter()
            .find(|edge| edge.kind == EdgeKind::Class)
            .map(|edge| edge.target)
    }

    pub fn interfaces(&self, from: TypeId) -> impl Iterator<Item = TypeId> + '_ {
        self.edges(from)
            .iter()
            .filter(|edge| edge.kind == EdgeKind::Interface)
            .map(|edge| edge.target)
    }
}
