use serde::{Deserialize, Serialize};

use super::element::{CommitSeq, Direction, Edge, ElementId, Vertex, VertexId};
use super::value::PropertyValue;
use crate::error::Result;

/// Lifecycle state of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexStatus {
    Installed,
    Registered,
    Enabled,
    Reindexing,
    Disabled,
    Removed,
}

impl IndexStatus {
    /// Position in the lifecycle. `await_status` waits for `rank >= target.rank()`.
    pub fn rank(&self) -> u8 {
        match self {
            IndexStatus::Installed => 0,
            IndexStatus::Registered => 1,
            IndexStatus::Reindexing => 2,
            IndexStatus::Enabled => 3,
            IndexStatus::Disabled => 4,
            IndexStatus::Removed => 5,
        }
    }

    pub fn is_at_or_past(&self, target: IndexStatus) -> bool {
        self.rank() >= target.rank()
    }

    /// Whether commits maintain entries for an index in this state.
    pub fn maintains_entries(&self) -> bool {
        matches!(
            self,
            IndexStatus::Registered | IndexStatus::Reindexing | IndexStatus::Enabled
        )
    }
}

/// What an index is built over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    /// Global exact-match index over vertex properties, optionally restricted to one label.
    VertexComposite { label: Option<String> },
    /// Vertex-centric index over the edges of one label, keyed by edge properties.
    EdgeRelation {
        edge_label: String,
        direction: Direction,
    },
    /// Vertex-centric index over the values of a multi-valued property.
    PropertyRelation { property_key: String },
}

/// Requested change to an existing index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaAction {
    EnableIndex,
    Reindex,
    DisableIndex,
    RemoveIndex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub kind: IndexKind,
    /// Covered property keys, in order.
    pub keys: Vec<String>,
    pub unique: bool,
    pub status: IndexStatus,
}

/// A physical index key: the covered values, plus the anchor vertex and
/// walking direction for vertex-centric indexes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexKey {
    pub anchor: Option<VertexId>,
    pub direction: Option<Direction>,
    pub values: Vec<PropertyValue>,
}

impl IndexKey {
    pub fn composite(values: Vec<PropertyValue>) -> Self {
        Self {
            anchor: None,
            direction: None,
            values,
        }
    }

    pub fn anchored(anchor: VertexId, direction: Option<Direction>, values: Vec<PropertyValue>) -> Self {
        Self {
            anchor: Some(anchor),
            direction,
            values,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn describe(&self) -> String {
        let values: Vec<String> = self.values.iter().map(|v| v.to_string()).collect();
        format!("({})", values.join(", "))
    }
}

/// Visibility of one index entry: present for snapshots in `[added, removed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySpan {
    pub added: CommitSeq,
    pub removed: Option<CommitSeq>,
}

impl EntrySpan {
    pub fn is_visible_at(&self, snapshot: CommitSeq) -> bool {
        self.added <= snapshot && self.removed.is_none_or(|removed| removed > snapshot)
    }

    pub fn is_live(&self) -> bool {
        self.removed.is_none()
    }
}

/// The persisted form of one (index, key, element) entry and its history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntryRecord {
    pub index: String,
    pub key: IndexKey,
    pub element: ElementId,
    pub spans: Vec<EntrySpan>,
}

impl IndexDefinition {
    pub fn is_composite(&self) -> bool {
        matches!(self.kind, IndexKind::VertexComposite { .. })
    }

    pub fn is_usable(&self) -> bool {
        self.status == IndexStatus::Enabled
    }

    /// Keys a vertex contributes to this index. Empty when the vertex is not covered.
    pub fn keys_for_vertex(&self, vertex: &Vertex) -> Vec<IndexKey> {
        match &self.kind {
            IndexKind::VertexComposite { label } => {
                if label.as_ref().is_some_and(|l| *l != vertex.label) {
                    return Vec::new();
                }
                value_product(&self.keys, |key| vertex.values(key).to_vec())
                    .into_iter()
                    .map(IndexKey::composite)
                    .collect()
            }
            IndexKind::PropertyRelation { .. } => {
                value_product(&self.keys, |key| vertex.values(key).to_vec())
                    .into_iter()
                    .map(|values| IndexKey::anchored(vertex.id, None, values))
                    .collect()
            }
            IndexKind::EdgeRelation { .. } => Vec::new(),
        }
    }

    /// Keys an edge contributes to this index: one per anchoring endpoint.
    pub fn keys_for_edge(&self, edge: &Edge) -> Vec<IndexKey> {
        let IndexKind::EdgeRelation {
            edge_label,
            direction,
        } = &self.kind
        else {
            return Vec::new();
        };
        if *edge_label != edge.label {
            return Vec::new();
        }
        let mut values = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            match edge.value(key) {
                Some(value) => values.push(value.clone()),
                None => return Vec::new(),
            }
        }

        let mut keys = Vec::new();
        if direction.covers(Direction::Out) {
            keys.push(IndexKey::anchored(
                edge.out_vertex,
                Some(Direction::Out),
                values.clone(),
            ));
        }
        if direction.covers(Direction::In) {
            keys.push(IndexKey::anchored(
                edge.in_vertex,
                Some(Direction::In),
                values,
            ));
        }
        keys
    }
}

/// Cartesian product of the values of each key. Empty if any key has no value.
fn value_product<F>(keys: &[String], values_of: F) -> Vec<Vec<PropertyValue>>
where
    F: Fn(&str) -> Vec<PropertyValue>,
{
    let mut tuples: Vec<Vec<PropertyValue>> = vec![Vec::new()];
    for key in keys {
        let values = values_of(key);
        if values.is_empty() {
            return Vec::new();
        }
        tuples = tuples
            .into_iter()
            .flat_map(|prefix| {
                values.iter().map(move |v| {
                    let mut tuple = prefix.clone();
                    tuple.push(v.clone());
                    tuple
                })
            })
            .collect();
    }
    tuples
}
