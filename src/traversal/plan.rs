//! Index-aware planning.
//!
//! The planner only swaps where candidates come from. Every filter step stays in
//! the pipeline, so a candidate produced by an index is always checked again
//! against the view and a stale entry can never change a result.

use std::collections::BTreeMap;

use super::step::Step;
use crate::error::{GraphError, Result};
use crate::types::{
    Direction, EdgeId, IndexDefinition, IndexKey, IndexKind, PropertyValue, VertexId,
};

/// What a step receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shape {
    Vertex,
    Edge,
    Value,
    Property,
    Count,
}

#[derive(Debug, Clone)]
pub(crate) enum Source {
    AllVertices,
    Vertices(Vec<VertexId>),
    AllEdges,
    Edges(Vec<EdgeId>),
    Composite { index: String, key: IndexKey },
}

#[derive(Debug, Clone)]
pub(crate) enum Stage {
    Step(Step),
    /// `outE/inE/bothE(label)` answered by a vertex-centric edge index.
    IncidentByIndex {
        index: String,
        direction: Direction,
        label: String,
        values: Vec<PropertyValue>,
    },
    /// `has(key, value)` on vertices answered by a vertex-centric property index.
    HasByIndex {
        index: String,
        key: String,
        value: PropertyValue,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Plan {
    pub source: Source,
    pub stages: Vec<Stage>,
}

impl Plan {
    pub fn build(steps: &[Step], indexes: &[IndexDefinition]) -> Result<Self> {
        let shapes = shapes(steps)?;
        let Some((first, rest)) = steps.split_first() else {
            return Err(GraphError::InvalidTraversal("no source step".to_string()));
        };

        let mut covered = 0;
        let source = match first {
            Step::V(ids) if ids.is_empty() => match composite_source(rest, indexes) {
                Some((source, block)) => {
                    covered = block;
                    source
                }
                None => Source::AllVertices,
            },
            Step::V(ids) => Source::Vertices(ids.clone()),
            Step::E(ids) if ids.is_empty() => Source::AllEdges,
            Step::E(ids) => Source::Edges(ids.clone()),
            other => {
                return Err(GraphError::InvalidTraversal(format!(
                    "{:?} cannot start a traversal",
                    other
                )));
            }
        };

        let mut stages = Vec::with_capacity(rest.len());
        for (i, step) in rest.iter().enumerate() {
            let input = shapes[i];
            let indexed = match step {
                Step::OutE(labels) => edge_index_stage(Direction::Out, labels, &rest[i + 1..], indexes),
                Step::InE(labels) => edge_index_stage(Direction::In, labels, &rest[i + 1..], indexes),
                Step::BothE(labels) => edge_index_stage(Direction::Both, labels, &rest[i + 1..], indexes),
                Step::Has { key, value } if input == Shape::Vertex && i >= covered => {
                    property_index_stage(key, value, indexes)
                }
                _ => None,
            };
            stages.push(indexed.unwrap_or_else(|| Stage::Step(step.clone())));
        }

        Ok(Self { source, stages })
    }

    /// One line per stage naming the access path it uses.
    pub fn describe(&self) -> Vec<String> {
        let mut lines = vec![match &self.source {
            Source::AllVertices => "scan vertices".to_string(),
            Source::Vertices(ids) => format!("vertices by id ({})", ids.len()),
            Source::AllEdges => "scan edges".to_string(),
            Source::Edges(ids) => format!("edges by id ({})", ids.len()),
            Source::Composite { index, key } => {
                format!("composite index {} {}", index, key.describe())
            }
        }];
        for stage in &self.stages {
            lines.push(match stage {
                Stage::Step(step) => format!("{:?}", step),
                Stage::IncidentByIndex { index, direction, label, .. } => {
                    format!("edge index {} ({:?} {})", index, direction, label)
                }
                Stage::HasByIndex { index, key, .. } => format!("property index {} ({})", index, key),
            });
        }
        lines
    }
}

/// The shape flowing into each step after the first, checked up front.
fn shapes(steps: &[Step]) -> Result<Vec<Shape>> {
    let mut current = match steps.first() {
        Some(Step::V(_)) => Shape::Vertex,
        Some(Step::E(_)) => Shape::Edge,
        Some(other) => {
            return Err(GraphError::InvalidTraversal(format!(
                "{:?} cannot start a traversal",
                other
            )));
        }
        None => return Err(GraphError::InvalidTraversal("no source step".to_string())),
    };

    let mut shapes = Vec::with_capacity(steps.len());
    for step in &steps[1..] {
        shapes.push(current);
        let element = matches!(current, Shape::Vertex | Shape::Edge);
        current = match step {
            Step::HasLabel(_) | Step::Has { .. } if element => current,
            Step::Out(_) | Step::In(_) | Step::Both(_) if current == Shape::Vertex => Shape::Vertex,
            Step::OutE(_) | Step::InE(_) | Step::BothE(_) if current == Shape::Vertex => Shape::Edge,
            Step::OutV | Step::InV | Step::OtherV if current == Shape::Edge => Shape::Vertex,
            Step::Values(_) if element => Shape::Value,
            Step::Properties(_) if element => Shape::Property,
            Step::Limit(_) | Step::Dedup => current,
            Step::Count => Shape::Count,
            other => {
                return Err(GraphError::InvalidTraversal(format!(
                    "{:?} cannot follow a {:?}",
                    other, current
                )));
            }
        };
    }
    Ok(shapes)
}

/// Leading filters after `V()`: has values by key, hasLabel lists, and how many
/// steps the block spans.
fn filter_block(steps: &[Step]) -> (BTreeMap<&str, &PropertyValue>, Vec<&[String]>, usize) {
    let mut has = BTreeMap::new();
    let mut labels = Vec::new();
    let mut len = 0;
    for step in steps {
        match step {
            Step::Has { key, value } => {
                has.entry(key.as_str()).or_insert(value);
            }
            Step::HasLabel(l) => labels.push(l.as_slice()),
            _ => break,
        }
        len += 1;
    }
    (has, labels, len)
}

fn composite_source(rest: &[Step], indexes: &[IndexDefinition]) -> Option<(Source, usize)> {
    let (has, labels, len) = filter_block(rest);
    if has.is_empty() {
        return None;
    }
    let index = indexes.iter().filter(|i| i.is_usable()).find(|index| {
        let IndexKind::VertexComposite { label } = &index.kind else {
            return false;
        };
        let label_implied = match label {
            None => true,
            Some(l) => labels.iter().any(|ls| ls.len() == 1 && ls[0] == *l),
        };
        label_implied && index.keys.len() == has.len() && index.keys.iter().all(|k| has.contains_key(k.as_str()))
    })?;

    let values = index.keys.iter().map(|k| has[k.as_str()].clone()).collect();
    Some((
        Source::Composite {
            index: index.name.clone(),
            key: IndexKey::composite(values),
        },
        len,
    ))
}

fn edge_index_stage(
    direction: Direction,
    labels: &[String],
    following: &[Step],
    indexes: &[IndexDefinition],
) -> Option<Stage> {
    let [label] = labels else { return None };
    let (has, _, _) = filter_block(following);
    if has.is_empty() {
        return None;
    }
    let index = indexes.iter().filter(|i| i.is_usable()).find(|index| {
        let IndexKind::EdgeRelation { edge_label, direction: covered } = &index.kind else {
            return false;
        };
        edge_label == label
            && covered.covers(direction)
            && index.keys.len() == has.len()
            && index.keys.iter().all(|k| has.contains_key(k.as_str()))
    })?;

    Some(Stage::IncidentByIndex {
        index: index.name.clone(),
        direction,
        label: label.clone(),
        values: index.keys.iter().map(|k| has[k.as_str()].clone()).collect(),
    })
}

fn property_index_stage(key: &str, value: &PropertyValue, indexes: &[IndexDefinition]) -> Option<Stage> {
    let index = indexes.iter().filter(|i| i.is_usable()).find(|index| {
        matches!(&index.kind, IndexKind::PropertyRelation { .. }) && index.keys.len() == 1 && index.keys[0] == key
    })?;
    Some(Stage::HasByIndex {
        index: index.name.clone(),
        key: key.to_string(),
        value: value.clone(),
    })
}
