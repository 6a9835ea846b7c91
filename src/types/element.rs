use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::value::PropertyValue;

pub type VertexId = Uuid;
pub type EdgeId = Uuid;
pub type TransactionId = Uuid;

/// Position of a commit in the global commit order. Also names a snapshot:
/// a reader at `n` sees every commit with a sequence number `<= n`.
pub type CommitSeq = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Out,
    In,
    Both,
}

impl Direction {
    /// True when `self` (an index's direction) serves a step walking in `other`.
    pub fn covers(&self, other: Direction) -> bool {
        *self == Direction::Both || *self == other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    Vertex,
    Edge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ElementId {
    Vertex(VertexId),
    Edge(EdgeId),
}

impl ElementId {
    pub fn uuid(&self) -> Uuid {
        match self {
            ElementId::Vertex(id) | ElementId::Edge(id) => *id,
        }
    }
}

/// A vertex. Every key maps to its values; SINGLE keys hold exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub id: VertexId,
    pub label: String,
    pub properties: BTreeMap<String, Vec<PropertyValue>>,
}

impl Vertex {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            properties: BTreeMap::new(),
        }
    }

    /// First value of `key`, the only one for SINGLE keys.
    pub fn value(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key).and_then(|values| values.first())
    }

    pub fn values(&self, key: &str) -> &[PropertyValue] {
        self.properties
            .get(key)
            .map(|values| values.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_value(&self, key: &str, value: &PropertyValue) -> bool {
        self.values(key).contains(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub label: String,
    /// The tail: `out_vertex -label-> in_vertex`.
    pub out_vertex: VertexId,
    pub in_vertex: VertexId,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl Edge {
    pub fn new(out_vertex: VertexId, label: impl Into<String>, in_vertex: VertexId) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            out_vertex,
            in_vertex,
            properties: BTreeMap::new(),
        }
    }

    pub fn value(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// The endpoint opposite `vertex`. For self-loops this is `vertex` again.
    pub fn other_vertex(&self, vertex: VertexId) -> VertexId {
        if self.out_vertex == vertex {
            self.in_vertex
        } else {
            self.out_vertex
        }
    }

    /// Whether walking from `vertex` in `direction` traverses this edge.
    pub fn leaves(&self, vertex: VertexId, direction: Direction) -> bool {
        self.direction_from(vertex)
            .is_some_and(|d| d == Direction::Both || direction.covers(d))
    }

    /// Direction in which this edge leaves `vertex`, if it touches it at all.
    pub fn direction_from(&self, vertex: VertexId) -> Option<Direction> {
        match (self.out_vertex == vertex, self.in_vertex == vertex) {
            (true, true) => Some(Direction::Both),
            (true, false) => Some(Direction::Out),
            (false, true) => Some(Direction::In),
            (false, false) => None,
        }
    }
}

/// Either kind of graph element, as yielded by full scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Element {
    Vertex(Vertex),
    Edge(Edge),
}

impl Element {
    pub fn id(&self) -> ElementId {
        match self {
            Element::Vertex(v) => ElementId::Vertex(v.id),
            Element::Edge(e) => ElementId::Edge(e.id),
        }
    }
}

/// A committed version of a vertex for MVCC. `data == None` is a tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexVersion {
    pub vertex_id: VertexId,
    pub version: u64,
    pub commit_seq: CommitSeq,
    pub committed_at: DateTime<Utc>,
    pub created_by: TransactionId,
    pub data: Option<Vertex>,
}

/// A committed version of an edge for MVCC. `data == None` is a tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeVersion {
    pub edge_id: EdgeId,
    pub version: u64,
    pub commit_seq: CommitSeq,
    pub committed_at: DateTime<Utc>,
    pub created_by: TransactionId,
    pub data: Option<Edge>,
}
