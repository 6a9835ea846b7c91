use serde::{Deserialize, Serialize};

use crate::types::{Edge, EdgeId, PropertyValue, Vertex, VertexId};

/// One step of a traversal. Label and key lists that are empty match everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Step {
    /// Start from the given vertices, or all of them.
    V(Vec<VertexId>),
    /// Start from the given edges, or all of them.
    E(Vec<EdgeId>),
    HasLabel(Vec<String>),
    Has { key: String, value: PropertyValue },
    Out(Vec<String>),
    In(Vec<String>),
    Both(Vec<String>),
    OutE(Vec<String>),
    InE(Vec<String>),
    BothE(Vec<String>),
    OutV,
    InV,
    /// The endpoint of an edge opposite the vertex it was reached from.
    OtherV,
    Values(Vec<String>),
    Properties(Vec<String>),
    Limit(usize),
    Dedup,
    Count,
}

/// What flows out of a traversal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TraversalItem {
    Vertex(Vertex),
    Edge(Edge),
    Value { value: PropertyValue },
    Property { key: String, value: PropertyValue },
    Count { count: u64 },
}

impl TraversalItem {
    pub fn as_vertex(&self) -> Option<&Vertex> {
        match self {
            TraversalItem::Vertex(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_edge(&self) -> Option<&Edge> {
        match self {
            TraversalItem::Edge(e) => Some(e),
            _ => None,
        }
    }
}

/// A traverser in flight. Edges remember the vertex they were reached from so
/// `otherV` can answer.
#[derive(Debug, Clone)]
pub(crate) enum Traverser {
    Vertex(Vertex),
    Edge { edge: Edge, from: Option<VertexId> },
    Value(PropertyValue),
    Property { key: String, value: PropertyValue },
    Count(u64),
}

impl From<Traverser> for TraversalItem {
    fn from(traverser: Traverser) -> Self {
        match traverser {
            Traverser::Vertex(v) => TraversalItem::Vertex(v),
            Traverser::Edge { edge, .. } => TraversalItem::Edge(edge),
            Traverser::Value(value) => TraversalItem::Value { value },
            Traverser::Property { key, value } => TraversalItem::Property { key, value },
            Traverser::Count(count) => TraversalItem::Count { count },
        }
    }
}
