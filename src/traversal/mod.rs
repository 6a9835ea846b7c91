//! Read-only, lazy traversals over a consistent view of the graph.

mod exec;
mod plan;
pub mod step;

use std::sync::Arc;

pub use step::{Step, TraversalItem};

use crate::error::Result;
use crate::graph::store::GraphStore;
use crate::types::{
    CommitSeq, Direction, Edge, EdgeId, Element, ElementId, ElementKind, IndexDefinition, IndexKey,
    PropertyValue, Vertex, VertexId,
};
use exec::Stream;
use plan::Plan;

/// A consistent read view: either a committed snapshot or a transaction's
/// snapshot overlaid with its pending changes.
pub trait GraphView {
    fn vertex(&self, id: &VertexId) -> Result<Option<Vertex>>;

    fn edge(&self, id: &EdgeId) -> Result<Option<Edge>>;

    fn scan(&self, kind: ElementKind) -> Result<Box<dyn Iterator<Item = Result<Element>> + '_>>;

    fn incident_edges(&self, vertex: &VertexId, direction: Direction) -> Result<Vec<Edge>>;

    /// Elements an index lists under `key`. May contain false positives, never
    /// false negatives for committed data; callers re-check every candidate.
    fn index_candidates(&self, index: &str, key: &IndexKey, kind: ElementKind) -> Result<Vec<ElementId>>;
}

impl<T: GraphView + ?Sized> GraphView for &T {
    fn vertex(&self, id: &VertexId) -> Result<Option<Vertex>> {
        GraphView::vertex(*self, id)
    }

    fn edge(&self, id: &EdgeId) -> Result<Option<Edge>> {
        GraphView::edge(*self, id)
    }

    fn scan(&self, kind: ElementKind) -> Result<Box<dyn Iterator<Item = Result<Element>> + '_>> {
        GraphView::scan(*self, kind)
    }

    fn incident_edges(&self, vertex: &VertexId, direction: Direction) -> Result<Vec<Edge>> {
        GraphView::incident_edges(*self, vertex, direction)
    }

    fn index_candidates(&self, index: &str, key: &IndexKey, kind: ElementKind) -> Result<Vec<ElementId>> {
        GraphView::index_candidates(*self, index, key, kind)
    }
}

/// The committed graph as of one commit sequence number.
#[derive(Debug, Clone)]
pub struct Snapshot {
    store: Arc<GraphStore>,
    seq: CommitSeq,
}

impl Snapshot {
    pub(crate) fn new(store: Arc<GraphStore>, seq: CommitSeq) -> Self {
        Self { store, seq }
    }

    pub fn seq(&self) -> CommitSeq {
        self.seq
    }
}

impl GraphView for Snapshot {
    fn vertex(&self, id: &VertexId) -> Result<Option<Vertex>> {
        self.store.vertex_at(id, self.seq)
    }

    fn edge(&self, id: &EdgeId) -> Result<Option<Edge>> {
        self.store.edge_at(id, self.seq)
    }

    fn scan(&self, kind: ElementKind) -> Result<Box<dyn Iterator<Item = Result<Element>> + '_>> {
        self.store.scan_all(kind, self.seq)
    }

    fn incident_edges(&self, vertex: &VertexId, direction: Direction) -> Result<Vec<Edge>> {
        self.store.incident_edges(vertex, direction, self.seq)
    }

    fn index_candidates(&self, index: &str, key: &IndexKey, _kind: ElementKind) -> Result<Vec<ElementId>> {
        let mut candidates: Vec<ElementId> = self.store.lookup_by_index(index, key, self.seq)?.into_iter().collect();
        candidates.sort();
        Ok(candidates)
    }
}

/// A traversal under construction. Steps are appended with the builder methods
/// and nothing runs until [`Traversal::iter`] or [`Traversal::to_list`].
///
/// ```ignore
/// let tx = engine.begin()?;
/// let users = tx.traversal()?.v().has_label(&["user_id"]).in_(&["related"]).to_list()?;
/// ```
#[derive(Debug)]
pub struct Traversal<V: GraphView> {
    view: V,
    indexes: Vec<IndexDefinition>,
    steps: Vec<Step>,
}

impl<V: GraphView> Traversal<V> {
    /// `indexes` are the ones the planner may use; only ENABLED ones are considered.
    pub fn new(view: V, indexes: Vec<IndexDefinition>) -> Self {
        Self {
            view,
            indexes,
            steps: Vec::new(),
        }
    }

    pub fn with_steps(mut self, steps: Vec<Step>) -> Self {
        self.steps.extend(steps);
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn v(self) -> Self {
        self.step(Step::V(Vec::new()))
    }

    pub fn v_ids(self, ids: Vec<VertexId>) -> Self {
        self.step(Step::V(ids))
    }

    pub fn e(self) -> Self {
        self.step(Step::E(Vec::new()))
    }

    pub fn e_ids(self, ids: Vec<EdgeId>) -> Self {
        self.step(Step::E(ids))
    }

    pub fn has_label(self, labels: &[&str]) -> Self {
        self.step(Step::HasLabel(owned(labels)))
    }

    pub fn has(self, key: &str, value: impl Into<PropertyValue>) -> Self {
        self.step(Step::Has {
            key: key.to_string(),
            value: value.into(),
        })
    }

    pub fn out(self, labels: &[&str]) -> Self {
        self.step(Step::Out(owned(labels)))
    }

    pub fn in_(self, labels: &[&str]) -> Self {
        self.step(Step::In(owned(labels)))
    }

    pub fn both(self, labels: &[&str]) -> Self {
        self.step(Step::Both(owned(labels)))
    }

    pub fn out_e(self, labels: &[&str]) -> Self {
        self.step(Step::OutE(owned(labels)))
    }

    pub fn in_e(self, labels: &[&str]) -> Self {
        self.step(Step::InE(owned(labels)))
    }

    pub fn both_e(self, labels: &[&str]) -> Self {
        self.step(Step::BothE(owned(labels)))
    }

    pub fn out_v(self) -> Self {
        self.step(Step::OutV)
    }

    pub fn in_v(self) -> Self {
        self.step(Step::InV)
    }

    pub fn other_v(self) -> Self {
        self.step(Step::OtherV)
    }

    pub fn values(self, keys: &[&str]) -> Self {
        self.step(Step::Values(owned(keys)))
    }

    pub fn properties(self, keys: &[&str]) -> Self {
        self.step(Step::Properties(owned(keys)))
    }

    pub fn limit(self, n: usize) -> Self {
        self.step(Step::Limit(n))
    }

    pub fn dedup(self) -> Self {
        self.step(Step::Dedup)
    }

    pub fn count(self) -> Self {
        self.step(Step::Count)
    }

    /// The access path of every stage, for inspecting which indexes get used.
    pub fn explain(&self) -> Result<Vec<String>> {
        Ok(Plan::build(&self.steps, &self.indexes)?.describe())
    }

    /// Plans the traversal and returns a lazy, single-pass iterator over its results.
    pub fn iter(&self) -> Result<TraversalIter<'_>> {
        let plan = Plan::build(&self.steps, &self.indexes)?;
        Ok(TraversalIter {
            stream: exec::execute(&self.view, plan)?,
        })
    }

    pub fn to_list(&self) -> Result<Vec<TraversalItem>> {
        self.iter()?.collect()
    }
}

/// Lazy results of a traversal. Each item is read from the view only when pulled.
pub struct TraversalIter<'a> {
    stream: Stream<'a>,
}

impl Iterator for TraversalIter<'_> {
    type Item = Result<TraversalItem>;

    fn next(&mut self) -> Option<Self::Item> {
        self.stream.next().map(|t| t.map(TraversalItem::from))
    }
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
