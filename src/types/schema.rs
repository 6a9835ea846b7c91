use serde::{Deserialize, Serialize};

use super::value::DataType;

/// How many values a property key admits on one vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Cardinality {
    /// One value; a new write replaces the old one.
    #[default]
    Single,
    /// Distinct values.
    Set,
    /// Values in insertion order, duplicates allowed.
    List,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyKey {
    pub name: String,
    pub data_type: DataType,
    pub cardinality: Cardinality,
}

impl PropertyKey {
    pub fn new(name: impl Into<String>, data_type: DataType, cardinality: Cardinality) -> Self {
        Self {
            name: name.into(),
            data_type,
            cardinality,
        }
    }
}

/// Structural constraint on the edges of one label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Multiplicity {
    /// No constraint.
    #[default]
    Multi,
    /// At most one edge of the label between an ordered pair of vertices.
    Simple,
    /// At most one outgoing edge of the label per vertex.
    Many2One,
    /// At most one incoming edge of the label per vertex.
    One2Many,
    /// At most one outgoing and one incoming edge of the label per vertex.
    One2One,
}

impl Multiplicity {
    pub fn unique_out(&self) -> bool {
        matches!(self, Multiplicity::Many2One | Multiplicity::One2One)
    }

    pub fn unique_in(&self) -> bool {
        matches!(self, Multiplicity::One2Many | Multiplicity::One2One)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexLabel {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeLabel {
    pub name: String,
    pub multiplicity: Multiplicity,
}

/// Everything the registry holds, in one serializable record per element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SchemaElement {
    PropertyKey(PropertyKey),
    VertexLabel(VertexLabel),
    EdgeLabel(EdgeLabel),
}

impl SchemaElement {
    /// Storage key, namespaced by kind.
    pub fn storage_key(&self) -> String {
        match self {
            SchemaElement::PropertyKey(k) => format!("pk:{}", k.name),
            SchemaElement::VertexLabel(l) => format!("vl:{}", l.name),
            SchemaElement::EdgeLabel(l) => format!("el:{}", l.name),
        }
    }
}
