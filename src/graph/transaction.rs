use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::schema::SchemaRegistry;
use super::store::{GraphStore, MutationBatch};
use crate::error::{GraphError, Result, lock_err};
use crate::index::IndexManager;
use crate::traversal::{GraphView, Traversal};
use crate::types::{
    Cardinality, CommitSeq, Direction, Edge, EdgeId, Element, ElementId, ElementKind,
    IndexDefinition, IndexKey, Multiplicity, PropertyKey, PropertyValue, SchemaElement, TransactionId, Vertex,
    VertexId,
};

type ActiveSet = Arc<RwLock<HashSet<TransactionId>>>;

/// A workspace for a set of atomic changes to the graph.
///
/// Reads see the committed state at the transaction's snapshot overlaid with its
/// own pending changes. Nothing is visible to anyone else until
/// [`TransactionManager::commit`] succeeds. Dropping an uncommitted transaction
/// rolls it back.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    snapshot: CommitSeq,
    started_at: DateTime<Utc>,
    store: Arc<GraphStore>,
    schema: Arc<SchemaRegistry>,
    indexes: Arc<IndexManager>,
    active: ActiveSet,
    /// Net new state per touched vertex; `None` removes it.
    vertices: HashMap<VertexId, Option<Vertex>>,
    edges: HashMap<EdgeId, Option<Edge>>,
    /// Schema elements this transaction will create on commit, by storage key.
    pending_schema: BTreeMap<String, SchemaElement>,
}

impl Transaction {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// The commit sequence this transaction reads at.
    pub fn snapshot(&self) -> CommitSeq {
        self.snapshot
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_read_only(&self) -> bool {
        self.vertices.is_empty() && self.edges.is_empty() && self.pending_schema.is_empty()
    }

    pub fn vertex(&self, id: &VertexId) -> Result<Option<Vertex>> {
        match self.vertices.get(id) {
            Some(state) => Ok(state.clone()),
            None => self.store.vertex_at(id, self.snapshot),
        }
    }

    pub fn edge(&self, id: &EdgeId) -> Result<Option<Edge>> {
        match self.edges.get(id) {
            Some(state) => Ok(state.clone()),
            None => self.store.edge_at(id, self.snapshot),
        }
    }

    /// Edges visible to this transaction that leave `vertex` in `direction`.
    pub fn incident_edges(&self, vertex: &VertexId, direction: Direction) -> Result<Vec<Edge>> {
        let mut seen = HashSet::new();
        let mut edges = Vec::new();
        for edge in self.store.incident_edges(vertex, direction, self.snapshot)? {
            seen.insert(edge.id);
            match self.edges.get(&edge.id) {
                Some(Some(pending)) => edges.push(pending.clone()),
                Some(None) => {}
                None => edges.push(edge),
            }
        }
        for (id, state) in &self.edges {
            if let Some(edge) = state {
                if !seen.contains(id) && edge.leaves(*vertex, direction) {
                    edges.push(edge.clone());
                }
            }
        }
        Ok(edges)
    }

    pub fn add_vertex(&mut self, label: &str) -> Result<VertexId> {
        let label = self.schema.resolve_vertex_label(label)?;
        self.track(SchemaElement::VertexLabel(label.clone()))?;
        let vertex = Vertex::new(label.name);
        let id = vertex.id;
        self.vertices.insert(id, Some(vertex));
        debug!(tx = %self.id, vertex = %id, "vertex added");
        Ok(id)
    }

    /// Writes `value` under `key` following the key's cardinality:
    /// SINGLE replaces, SET adds if absent, LIST appends.
    pub fn set_vertex_property(
        &mut self,
        id: VertexId,
        key: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<()> {
        let value = value.into();
        let mut vertex = self.vertex(&id)?.ok_or(GraphError::VertexNotFound(id))?;
        let key = self.property_key(key, &value)?;
        let values = vertex.properties.entry(key.name).or_default();
        match key.cardinality {
            Cardinality::Single => *values = vec![value],
            Cardinality::Set => {
                if !values.contains(&value) {
                    values.push(value);
                }
            }
            Cardinality::List => values.push(value),
        }
        self.vertices.insert(id, Some(vertex));
        Ok(())
    }

    /// Removes every value of `key`. A missing key is not an error.
    pub fn remove_vertex_property(&mut self, id: VertexId, key: &str) -> Result<()> {
        let mut vertex = self.vertex(&id)?.ok_or(GraphError::VertexNotFound(id))?;
        if vertex.properties.remove(key).is_some() {
            self.vertices.insert(id, Some(vertex));
        }
        Ok(())
    }

    /// Removes the vertex and every edge incident to it.
    pub fn remove_vertex(&mut self, id: VertexId) -> Result<()> {
        if self.vertex(&id)?.is_none() {
            return Err(GraphError::VertexNotFound(id));
        }
        for edge in self.incident_edges(&id, Direction::Both)? {
            self.edges.insert(edge.id, None);
        }
        self.vertices.insert(id, None);
        Ok(())
    }

    pub fn add_edge(&mut self, out_vertex: VertexId, label: &str, in_vertex: VertexId) -> Result<EdgeId> {
        for endpoint in [out_vertex, in_vertex] {
            if self.vertex(&endpoint)?.is_none() {
                return Err(GraphError::VertexNotFound(endpoint));
            }
        }
        let label = self.schema.resolve_edge_label(label)?;
        self.track(SchemaElement::EdgeLabel(label.clone()))?;
        let edge = Edge::new(out_vertex, label.name, in_vertex);
        let id = edge.id;
        self.edges.insert(id, Some(edge));
        debug!(tx = %self.id, edge = %id, "edge added");
        Ok(id)
    }

    /// Edge properties are single-valued, so only SINGLE keys are accepted.
    pub fn set_edge_property(&mut self, id: EdgeId, key: &str, value: impl Into<PropertyValue>) -> Result<()> {
        let value = value.into();
        let mut edge = self.edge(&id)?.ok_or(GraphError::EdgeNotFound(id))?;
        let key = self.property_key(key, &value)?;
        if key.cardinality != Cardinality::Single {
            return Err(GraphError::Schema(format!(
                "Property key '{}' has {:?} cardinality and cannot be used on edges",
                key.name, key.cardinality
            )));
        }
        edge.properties.insert(key.name, value);
        self.edges.insert(id, Some(edge));
        Ok(())
    }

    pub fn remove_edge(&mut self, id: EdgeId) -> Result<()> {
        if self.edge(&id)?.is_none() {
            return Err(GraphError::EdgeNotFound(id));
        }
        self.edges.insert(id, None);
        Ok(())
    }

    /// A traversal over this transaction's view, planned against the indexes
    /// already enabled at its snapshot.
    pub fn traversal(&self) -> Result<Traversal<&Transaction>> {
        Ok(Traversal::new(self, self.indexes.usable_indexes(self.snapshot)?))
    }

    fn property_key(&mut self, name: &str, value: &PropertyValue) -> Result<PropertyKey> {
        let pending = self.pending_schema.values().find_map(|e| match e {
            SchemaElement::PropertyKey(k) if k.name == name => Some(k.clone()),
            _ => None,
        });
        if let Some(key) = pending {
            if key.data_type != value.data_type() {
                return Err(GraphError::Schema(format!(
                    "Property key '{}' expects {:?}, got {:?}",
                    name,
                    key.data_type,
                    value.data_type()
                )));
            }
            return Ok(key);
        }
        let key = self.schema.resolve_property_key(name, value)?;
        self.track(SchemaElement::PropertyKey(key.clone()))?;
        Ok(key)
    }

    /// Remembers a resolved definition that does not exist yet.
    fn track(&mut self, element: SchemaElement) -> Result<()> {
        let storage_key = element.storage_key();
        if !self.pending_schema.contains_key(&storage_key) && self.schema.is_missing(&element)? {
            self.pending_schema.insert(storage_key, element);
        }
        Ok(())
    }

    /// Vertices and edges visible at the snapshot that this transaction has not touched,
    /// plus the touched ones in their pending state.
    fn overlay_scan(&self, kind: ElementKind) -> Result<Box<dyn Iterator<Item = Result<Element>> + '_>> {
        let committed = self.store.scan_all(kind, self.snapshot)?.filter_map(move |element| {
            let element = match element {
                Ok(element) => element,
                Err(e) => return Some(Err(e)),
            };
            match &element {
                Element::Vertex(v) => match self.vertices.get(&v.id) {
                    Some(state) => state.clone().map(|v| Ok(Element::Vertex(v))),
                    None => Some(Ok(element)),
                },
                Element::Edge(e) => match self.edges.get(&e.id) {
                    Some(state) => state.clone().map(|e| Ok(Element::Edge(e))),
                    None => Some(Ok(element)),
                },
            }
        });

        let mut fresh = Vec::new();
        match kind {
            ElementKind::Vertex => {
                for (id, state) in &self.vertices {
                    if let Some(v) = state {
                        if self.store.vertex_at(id, self.snapshot)?.is_none() {
                            fresh.push(Ok(Element::Vertex(v.clone())));
                        }
                    }
                }
            }
            ElementKind::Edge => {
                for (id, state) in &self.edges {
                    if let Some(e) = state {
                        if self.store.edge_at(id, self.snapshot)?.is_none() {
                            fresh.push(Ok(Element::Edge(e.clone())));
                        }
                    }
                }
            }
        }
        Ok(Box::new(committed.chain(fresh)))
    }
}

impl GraphView for Transaction {
    fn vertex(&self, id: &VertexId) -> Result<Option<Vertex>> {
        Transaction::vertex(self, id)
    }

    fn edge(&self, id: &EdgeId) -> Result<Option<Edge>> {
        Transaction::edge(self, id)
    }

    fn scan(&self, kind: ElementKind) -> Result<Box<dyn Iterator<Item = Result<Element>> + '_>> {
        self.overlay_scan(kind)
    }

    fn incident_edges(&self, vertex: &VertexId, direction: Direction) -> Result<Vec<Edge>> {
        Transaction::incident_edges(self, vertex, direction)
    }

    /// Committed candidates plus everything this transaction touched; the caller
    /// re-verifies each one against the view.
    fn index_candidates(&self, index: &str, key: &IndexKey, kind: ElementKind) -> Result<Vec<ElementId>> {
        let mut candidates: Vec<ElementId> = self
            .store
            .lookup_by_index(index, key, self.snapshot)?
            .into_iter()
            .collect();
        match kind {
            ElementKind::Vertex => candidates.extend(self.vertices.keys().map(|id| ElementId::Vertex(*id))),
            ElementKind::Edge => candidates.extend(self.edges.keys().map(|id| ElementId::Edge(*id))),
        }
        candidates.sort();
        candidates.dedup();
        Ok(candidates)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        match self.active.write() {
            Ok(mut active) => {
                active.remove(&self.id);
            }
            Err(e) => warn!(tx = %self.id, error = %e, "could not unregister transaction"),
        }
    }
}

/// Hands out transactions and runs the commit protocol.
///
/// Commits validate and apply inside the store's commit critical section, so every
/// commit gets its own position in a total order. Conflicts are resolved
/// first-committer-wins.
#[derive(Debug)]
pub struct TransactionManager {
    store: Arc<GraphStore>,
    schema: Arc<SchemaRegistry>,
    indexes: Arc<IndexManager>,
    active: ActiveSet,
}

impl TransactionManager {
    pub fn new(store: Arc<GraphStore>, schema: Arc<SchemaRegistry>, indexes: Arc<IndexManager>) -> Self {
        Self {
            store,
            schema,
            indexes,
            active: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Begins a new transaction reading at the latest committed snapshot.
    pub fn begin(&self) -> Result<Transaction> {
        let transaction = Transaction {
            id: Uuid::new_v4(),
            snapshot: self.store.snapshot(),
            started_at: Utc::now(),
            store: Arc::clone(&self.store),
            schema: Arc::clone(&self.schema),
            indexes: Arc::clone(&self.indexes),
            active: Arc::clone(&self.active),
            vertices: HashMap::new(),
            edges: HashMap::new(),
            pending_schema: BTreeMap::new(),
        };
        let mut active = self.active.write().map_err(lock_err)?;
        active.insert(transaction.id);
        debug!(tx = %transaction.id, snapshot = transaction.snapshot, "transaction started");
        Ok(transaction)
    }

    /// Discards every pending change.
    pub fn rollback(&self, transaction: Transaction) -> Result<()> {
        debug!(tx = %transaction.id, "transaction rolled back");
        drop(transaction);
        Ok(())
    }

    pub fn active_count(&self) -> Result<usize> {
        Ok(self.active.read().map_err(lock_err)?.len())
    }

    /// Validates and applies the transaction. Returns the commit's sequence number,
    /// or the snapshot for a transaction that changed nothing.
    ///
    /// On any error nothing is written and the transaction is gone.
    pub fn commit(&self, mut transaction: Transaction) -> Result<CommitSeq> {
        if transaction.is_read_only() {
            return Ok(transaction.snapshot);
        }

        let guard = self.store.lock_commits()?;
        let now = self.store.snapshot();

        // --- PHASE 1: VALIDATION ---
        let mut new_schema = Vec::new();
        for element in transaction.pending_schema.values() {
            if self.schema.is_missing(element)? {
                new_schema.push(element.clone());
            }
        }
        self.check_conflicts(&transaction)?;
        self.cascade_removals(&mut transaction, now)?;
        self.check_endpoints(&transaction, now)?;
        self.check_multiplicity(&transaction, now)?;
        let maintained = self.indexes.maintained_indexes()?;
        self.check_uniqueness(&transaction, &self.indexes.enforced_unique_indexes()?)?;

        // --- PHASE 2: APPLY ---
        let batch = MutationBatch {
            tx_id: transaction.id,
            vertices: transaction.vertices.drain().collect(),
            edges: transaction.edges.drain().collect(),
            schema: new_schema.clone(),
        };
        let (vertex_count, edge_count) = (batch.vertices.len(), batch.edges.len());
        let seq = self.store.apply_mutations(&guard, batch, &maintained)?;
        for element in &new_schema {
            self.schema.ensure(element)?;
        }
        drop(guard);

        info!(
            tx = %transaction.id,
            seq,
            vertices = vertex_count,
            edges = edge_count,
            schema = new_schema.len(),
            "transaction committed"
        );
        Ok(seq)
    }

    /// First committer wins: anything in the write set that changed after our
    /// snapshot aborts the commit.
    fn check_conflicts(&self, transaction: &Transaction) -> Result<()> {
        for id in transaction.vertices.keys() {
            if let Some(seq) = self.store.vertex_modified_at(id)? {
                if seq > transaction.snapshot {
                    return Err(GraphError::Conflict(format!(
                        "vertex {} was modified at {} after snapshot {}",
                        id, seq, transaction.snapshot
                    )));
                }
            }
        }
        for id in transaction.edges.keys() {
            if let Some(seq) = self.store.edge_modified_at(id)? {
                if seq > transaction.snapshot {
                    return Err(GraphError::Conflict(format!(
                        "edge {} was modified at {} after snapshot {}",
                        id, seq, transaction.snapshot
                    )));
                }
            }
        }
        Ok(())
    }

    /// Edges committed by others onto a vertex we remove go with it.
    fn cascade_removals(&self, transaction: &mut Transaction, now: CommitSeq) -> Result<()> {
        let removed: Vec<VertexId> = transaction
            .vertices
            .iter()
            .filter(|(_, state)| state.is_none())
            .map(|(id, _)| *id)
            .collect();
        for vertex in removed {
            for edge in self.store.incident_edges(&vertex, Direction::Both, now)? {
                transaction.edges.entry(edge.id).or_insert(None);
            }
        }
        Ok(())
    }

    fn check_endpoints(&self, transaction: &Transaction, now: CommitSeq) -> Result<()> {
        for edge in transaction.edges.values().flatten() {
            for endpoint in [edge.out_vertex, edge.in_vertex] {
                let exists = match transaction.vertices.get(&endpoint) {
                    Some(state) => state.is_some(),
                    None => self.store.vertex_at(&endpoint, now)?.is_some(),
                };
                if !exists {
                    return Err(GraphError::Conflict(format!(
                        "endpoint {} of edge {} no longer exists",
                        endpoint, edge.id
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_multiplicity(&self, transaction: &Transaction, now: CommitSeq) -> Result<()> {
        for edge in transaction.edges.values().flatten() {
            if self.store.edge_at(&edge.id, now)?.is_some() {
                // Endpoints and label never change after creation.
                continue;
            }
            let multiplicity = match self.schema.edge_label(&edge.label)? {
                Some(label) => label.multiplicity,
                None => continue,
            };
            let outgoing = self.edges_after_commit(transaction, edge.out_vertex, Direction::Out, &edge.label, now)?;
            let simple_violated = multiplicity == Multiplicity::Simple
                && outgoing.iter().filter(|e| e.in_vertex == edge.in_vertex).count() > 1;
            let out_violated = multiplicity.unique_out() && outgoing.len() > 1;
            let in_violated = multiplicity.unique_in()
                && self
                    .edges_after_commit(transaction, edge.in_vertex, Direction::In, &edge.label, now)?
                    .len()
                    > 1;
            if simple_violated || out_violated || in_violated {
                return Err(GraphError::Schema(format!(
                    "{:?} multiplicity of edge label '{}' violated by edge {}",
                    multiplicity, edge.label, edge.id
                )));
            }
        }
        Ok(())
    }

    /// Edges with `label` leaving `vertex` once this transaction is applied.
    fn edges_after_commit(
        &self,
        transaction: &Transaction,
        vertex: VertexId,
        direction: Direction,
        label: &str,
        now: CommitSeq,
    ) -> Result<Vec<Edge>> {
        let mut edges: Vec<Edge> = self
            .store
            .incident_edges(&vertex, direction, now)?
            .into_iter()
            .filter(|e| !transaction.edges.contains_key(&e.id))
            .collect();
        edges.extend(transaction.edges.values().flatten().cloned());
        edges.retain(|e| e.label == label && e.leaves(vertex, direction));
        Ok(edges)
    }

    /// Every key a pending vertex claims on an enforced unique index must be free,
    /// both in the committed entries and within the batch itself.
    fn check_uniqueness(&self, transaction: &Transaction, indexes: &[IndexDefinition]) -> Result<()> {
        for index in indexes {
            let mut claimed: HashMap<Vec<u8>, VertexId> = HashMap::new();
            for (id, state) in &transaction.vertices {
                let Some(vertex) = state else { continue };
                for key in index.keys_for_vertex(vertex) {
                    if let Some(other) = claimed.insert(key.encode()?, *id) {
                        if other != *id {
                            return Err(violation(index, &key));
                        }
                    }
                    for holder in self.store.live_index_elements(&index.name, &key)? {
                        let ElementId::Vertex(holder) = holder else { continue };
                        if holder == *id {
                            continue;
                        }
                        let released = match transaction.vertices.get(&holder) {
                            Some(None) => true,
                            Some(Some(v)) => !index.keys_for_vertex(v).contains(&key),
                            None => false,
                        };
                        if !released {
                            return Err(violation(index, &key));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

fn violation(index: &IndexDefinition, key: &IndexKey) -> GraphError {
    GraphError::UniquenessViolation {
        index: index.name.clone(),
        key: key.describe(),
    }
}
