use std::collections::HashSet;

use super::GraphView;
use super::plan::{Plan, Source, Stage};
use super::step::{Step, Traverser};
use crate::error::Result;
use crate::types::{Direction, Element, ElementId, ElementKind, IndexKey, PropertyValue, Vertex, VertexId};

pub(crate) type Stream<'a> = Box<dyn Iterator<Item = Result<Traverser>> + 'a>;

/// Wires the plan into a chain of lazy iterators. Nothing is read until the
/// first item is pulled.
pub(crate) fn execute<'a>(view: &'a dyn GraphView, plan: Plan) -> Result<Stream<'a>> {
    let mut stream = source(view, plan.source)?;
    for stage in plan.stages {
        stream = apply(view, stage, stream);
    }
    Ok(stream)
}

fn source<'a>(view: &'a dyn GraphView, source: Source) -> Result<Stream<'a>> {
    Ok(match source {
        Source::AllVertices => Box::new(view.scan(ElementKind::Vertex)?.filter_map(|element| match element {
            Ok(Element::Vertex(v)) => Some(Ok(Traverser::Vertex(v))),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })),
        Source::AllEdges => Box::new(view.scan(ElementKind::Edge)?.filter_map(|element| match element {
            Ok(Element::Edge(edge)) => Some(Ok(Traverser::Edge { edge, from: None })),
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        })),
        Source::Vertices(ids) => Box::new(
            ids.into_iter()
                .filter_map(move |id| view.vertex(&id).transpose().map(|r| r.map(Traverser::Vertex))),
        ),
        Source::Edges(ids) => Box::new(ids.into_iter().filter_map(move |id| {
            view.edge(&id)
                .transpose()
                .map(|r| r.map(|edge| Traverser::Edge { edge, from: None }))
        })),
        Source::Composite { index, key } => {
            let candidates = view.index_candidates(&index, &key, ElementKind::Vertex)?;
            Box::new(candidates.into_iter().filter_map(move |id| match id {
                ElementId::Vertex(id) => view.vertex(&id).transpose().map(|r| r.map(Traverser::Vertex)),
                ElementId::Edge(_) => None,
            }))
        }
    })
}

fn apply<'a>(view: &'a dyn GraphView, stage: Stage, input: Stream<'a>) -> Stream<'a> {
    match stage {
        Stage::Step(Step::Limit(n)) => Box::new(input.take(n)),
        Stage::Step(Step::Dedup) => {
            let mut seen = HashSet::new();
            Box::new(input.filter_map(move |t| match t.and_then(|t| identity(&t).map(|id| (id, t))) {
                Ok((id, t)) => seen.insert(id).then_some(Ok(t)),
                Err(e) => Some(Err(e)),
            }))
        }
        Stage::Step(Step::Count) => Box::new(std::iter::once_with(move || -> Result<Traverser> {
            let mut count = 0;
            for traverser in input {
                traverser?;
                count += 1;
            }
            Ok(Traverser::Count(count))
        })),
        Stage::Step(Step::HasLabel(labels)) => filter(input, move |t| Ok(label_matches(&labels, label_of(t)))),
        Stage::Step(Step::Has { key, value }) => filter(input, move |t| Ok(has_value(t, &key, &value))),
        Stage::HasByIndex { index, key, value } => filter(input, move |t| {
            let Traverser::Vertex(vertex) = t else { return Ok(false) };
            let entry = IndexKey::anchored(vertex.id, None, vec![value.clone()]);
            let listed = view
                .index_candidates(&index, &entry, ElementKind::Vertex)?
                .contains(&ElementId::Vertex(vertex.id));
            Ok(listed && vertex.has_value(&key, &value))
        }),
        Stage::IncidentByIndex {
            index,
            direction,
            label,
            values,
        } => expand(input, move |t| {
            let Traverser::Vertex(vertex) = t else { return Ok(Vec::new()) };
            let anchors: &[Direction] = match direction {
                Direction::Both => &[Direction::Out, Direction::In],
                Direction::Out => &[Direction::Out],
                Direction::In => &[Direction::In],
            };
            let mut seen = HashSet::new();
            let mut edges = Vec::new();
            for anchor in anchors {
                let entry = IndexKey::anchored(vertex.id, Some(*anchor), values.clone());
                for id in view.index_candidates(&index, &entry, ElementKind::Edge)? {
                    let ElementId::Edge(id) = id else { continue };
                    if !seen.insert(id) {
                        continue;
                    }
                    if let Some(edge) = view.edge(&id)? {
                        if edge.label == label && edge.leaves(vertex.id, *anchor) {
                            edges.push(Traverser::Edge {
                                edge,
                                from: Some(vertex.id),
                            });
                        }
                    }
                }
            }
            Ok(edges)
        }),
        Stage::Step(step) => expand(input, move |t| step_out(view, &step, t)),
    }
}

/// Steps that turn one traverser into zero or more.
fn step_out(view: &dyn GraphView, step: &Step, traverser: Traverser) -> Result<Vec<Traverser>> {
    Ok(match (step, traverser) {
        (Step::Out(labels), Traverser::Vertex(v)) => adjacent(view, &v, Direction::Out, labels)?,
        (Step::In(labels), Traverser::Vertex(v)) => adjacent(view, &v, Direction::In, labels)?,
        (Step::Both(labels), Traverser::Vertex(v)) => adjacent(view, &v, Direction::Both, labels)?,
        (Step::OutE(labels), Traverser::Vertex(v)) => incident(view, &v, Direction::Out, labels)?,
        (Step::InE(labels), Traverser::Vertex(v)) => incident(view, &v, Direction::In, labels)?,
        (Step::BothE(labels), Traverser::Vertex(v)) => incident(view, &v, Direction::Both, labels)?,
        (Step::OutV, Traverser::Edge { edge, .. }) => endpoint(view, edge.out_vertex)?,
        (Step::InV, Traverser::Edge { edge, .. }) => endpoint(view, edge.in_vertex)?,
        (Step::OtherV, Traverser::Edge { edge, from }) => match from {
            Some(from) => endpoint(view, edge.other_vertex(from))?,
            // Without an origin both endpoints are "other".
            None => {
                let mut both = endpoint(view, edge.out_vertex)?;
                both.extend(endpoint(view, edge.in_vertex)?);
                both
            }
        },
        (Step::Values(keys), traverser) => properties(&traverser, keys)
            .into_iter()
            .map(|(_, value)| Traverser::Value(value))
            .collect(),
        (Step::Properties(keys), traverser) => properties(&traverser, keys)
            .into_iter()
            .map(|(key, value)| Traverser::Property { key, value })
            .collect(),
        _ => Vec::new(),
    })
}

fn filter<'a, F>(input: Stream<'a>, mut keep: F) -> Stream<'a>
where
    F: FnMut(&Traverser) -> Result<bool> + 'a,
{
    Box::new(input.filter_map(move |t| match t {
        Ok(t) => match keep(&t) {
            Ok(true) => Some(Ok(t)),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        },
        Err(e) => Some(Err(e)),
    }))
}

fn expand<'a, F>(input: Stream<'a>, mut step: F) -> Stream<'a>
where
    F: FnMut(Traverser) -> Result<Vec<Traverser>> + 'a,
{
    Box::new(input.flat_map(move |t| match t.and_then(&mut step) {
        Ok(out) => out.into_iter().map(Ok).collect::<Vec<_>>(),
        Err(e) => vec![Err(e)],
    }))
}

fn adjacent(view: &dyn GraphView, vertex: &Vertex, direction: Direction, labels: &[String]) -> Result<Vec<Traverser>> {
    let mut out = Vec::new();
    for edge in view.incident_edges(&vertex.id, direction)? {
        if !label_matches(labels, Some(&edge.label)) {
            continue;
        }
        let far = match direction {
            Direction::Out => edge.in_vertex,
            Direction::In => edge.out_vertex,
            Direction::Both => edge.other_vertex(vertex.id),
        };
        out.extend(endpoint(view, far)?);
    }
    Ok(out)
}

fn incident(view: &dyn GraphView, vertex: &Vertex, direction: Direction, labels: &[String]) -> Result<Vec<Traverser>> {
    Ok(view
        .incident_edges(&vertex.id, direction)?
        .into_iter()
        .filter(|edge| label_matches(labels, Some(&edge.label)))
        .map(|edge| Traverser::Edge {
            edge,
            from: Some(vertex.id),
        })
        .collect())
}

fn endpoint(view: &dyn GraphView, id: VertexId) -> Result<Vec<Traverser>> {
    Ok(view.vertex(&id)?.map(Traverser::Vertex).into_iter().collect())
}

fn label_of(traverser: &Traverser) -> Option<&String> {
    match traverser {
        Traverser::Vertex(v) => Some(&v.label),
        Traverser::Edge { edge, .. } => Some(&edge.label),
        _ => None,
    }
}

fn label_matches(labels: &[String], label: Option<&String>) -> bool {
    match label {
        Some(label) => labels.is_empty() || labels.contains(label),
        None => false,
    }
}

fn has_value(traverser: &Traverser, key: &str, value: &PropertyValue) -> bool {
    match traverser {
        Traverser::Vertex(v) => v.has_value(key, value),
        Traverser::Edge { edge, .. } => edge.value(key) == Some(value),
        _ => false,
    }
}

/// `(key, value)` pairs of an element, restricted to `keys` unless empty.
fn properties(traverser: &Traverser, keys: &[String]) -> Vec<(String, PropertyValue)> {
    let wanted = |key: &String| keys.is_empty() || keys.contains(key);
    match traverser {
        Traverser::Vertex(v) => v
            .properties
            .iter()
            .filter(|(key, _)| wanted(key))
            .flat_map(|(key, values)| values.iter().map(move |value| (key.clone(), value.clone())))
            .collect(),
        Traverser::Edge { edge, .. } => edge
            .properties
            .iter()
            .filter(|(key, _)| wanted(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

fn identity(traverser: &Traverser) -> Result<Vec<u8>> {
    Ok(match traverser {
        Traverser::Vertex(v) => bincode::serialize(&ElementId::Vertex(v.id))?,
        Traverser::Edge { edge, .. } => bincode::serialize(&ElementId::Edge(edge.id))?,
        Traverser::Value(value) => bincode::serialize(&(0u8, value))?,
        Traverser::Property { key, value } => bincode::serialize(&(1u8, key, value))?,
        Traverser::Count(count) => bincode::serialize(&(2u8, count))?,
    })
}
