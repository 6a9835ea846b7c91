use chrono::Utc;
use rocksdb::WriteBatch;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::debug;

use super::versioning::VersionStore;
use crate::error::{Result, lock_err};
use crate::index::entries::IndexEntries;
use crate::storage::RocksBackend;
use crate::types::{
    ChangeLogEntry, CommitSeq, Direction, Edge, EdgeId, EdgeVersion, Element, ElementId,
    ElementKind, IndexDefinition, IndexEntryRecord, IndexKey, SchemaElement, TransactionId,
    Vertex, VertexId, VertexVersion,
};

/// The net effect of one transaction, ready to be applied.
/// `None` as the new state removes the element.
#[derive(Debug, Clone, Default)]
pub struct MutationBatch {
    pub tx_id: TransactionId,
    pub vertices: Vec<(VertexId, Option<Vertex>)>,
    pub edges: Vec<(EdgeId, Option<Edge>)>,
    /// Schema elements created on first use by this transaction.
    pub schema: Vec<SchemaElement>,
}

impl MutationBatch {
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() && self.edges.is_empty() && self.schema.is_empty()
    }
}

/// Proof that the caller holds the commit critical section.
pub struct CommitGuard<'a>(#[allow(dead_code)] MutexGuard<'a, ()>);

/// Authoritative vertex/edge data, physical index entries and the change log.
///
/// Reads go to memory; every mutation is also staged into one RocksDB
/// `WriteBatch` per commit. A commit becomes visible when `last_seq` moves past
/// it, which happens only after all of its versions and entries are in place.
#[derive(Debug)]
pub struct GraphStore {
    backend: Arc<RocksBackend>,
    versions: VersionStore,
    entries: IndexEntries,
    changelog: RwLock<Vec<ChangeLogEntry>>,
    last_seq: AtomicU64,
    commit_lock: Mutex<()>,
}

impl GraphStore {
    /// Opens the store over `backend`, hydrating memory from disk.
    pub fn open(backend: Arc<RocksBackend>) -> Result<Self> {
        let versions = VersionStore::new();
        for version in backend.load_vertex_versions()? {
            versions.add_vertex_version(version)?;
        }
        for version in backend.load_edge_versions()? {
            versions.add_edge_version(version)?;
        }

        let entries = IndexEntries::new();
        entries.hydrate(backend.load_index_entries()?)?;

        let changelog = backend.load_changelog()?;
        let last_seq = changelog
            .last()
            .map(|c| c.seq)
            .unwrap_or(0)
            .max(versions.max_commit_seq()?);

        debug!(last_seq, changes = changelog.len(), "graph store hydrated");
        Ok(Self {
            backend,
            versions,
            entries,
            changelog: RwLock::new(changelog),
            last_seq: AtomicU64::new(last_seq),
            commit_lock: Mutex::new(()),
        })
    }

    pub fn backend(&self) -> &Arc<RocksBackend> {
        &self.backend
    }

    /// The newest committed sequence number. Readers use it as their snapshot.
    pub fn snapshot(&self) -> CommitSeq {
        self.last_seq.load(Ordering::SeqCst)
    }

    /// Enters the commit critical section. Commits, schema installs and index
    /// entry rewrites all serialize here.
    pub fn lock_commits(&self) -> Result<CommitGuard<'_>> {
        Ok(CommitGuard(self.commit_lock.lock().map_err(lock_err)?))
    }

    /// Applies one transaction's net mutations atomically and returns its sequence number.
    ///
    /// `indexes` are the definitions whose entries commits currently maintain.
    pub fn apply_mutations(
        &self,
        _guard: &CommitGuard<'_>,
        batch: MutationBatch,
        indexes: &[IndexDefinition],
    ) -> Result<CommitSeq> {
        let prev = self.snapshot();
        let seq = prev + 1;
        let committed_at = Utc::now();
        let mut write_batch = WriteBatch::default();

        for element in &batch.schema {
            self.backend.store_schema_element(element, &mut write_batch)?;
        }

        // --- Index maintenance: diff old and new keys per element ---
        let mut records = Vec::new();
        for index in indexes {
            for (id, new_state) in &batch.vertices {
                let old_state = self.versions.vertex_at(id, prev)?;
                let old_keys = old_state
                    .map(|v| index.keys_for_vertex(&v))
                    .unwrap_or_default();
                let new_keys = new_state
                    .as_ref()
                    .map(|v| index.keys_for_vertex(v))
                    .unwrap_or_default();
                self.diff_entries(index, ElementId::Vertex(*id), &old_keys, &new_keys, seq, &mut records)?;
            }
            for (id, new_state) in &batch.edges {
                let old_state = self.versions.edge_at(id, prev)?;
                let old_keys = old_state
                    .map(|e| index.keys_for_edge(&e))
                    .unwrap_or_default();
                let new_keys = new_state
                    .as_ref()
                    .map(|e| index.keys_for_edge(e))
                    .unwrap_or_default();
                self.diff_entries(index, ElementId::Edge(*id), &old_keys, &new_keys, seq, &mut records)?;
            }
        }
        for record in &records {
            self.backend.store_index_entry(record, &mut write_batch)?;
        }

        // --- New versions ---
        let mut vertex_versions = Vec::with_capacity(batch.vertices.len());
        for (id, data) in batch.vertices {
            let next = self.versions.vertex_last_modified(&id)?.map_or(1, |(_, v)| v + 1);
            let version = VertexVersion {
                vertex_id: id,
                version: next,
                commit_seq: seq,
                committed_at,
                created_by: batch.tx_id,
                data,
            };
            self.backend.store_vertex_version(&version, &mut write_batch)?;
            vertex_versions.push(version);
        }
        let mut edge_versions = Vec::with_capacity(batch.edges.len());
        for (id, data) in batch.edges {
            let next = self.versions.edge_last_modified(&id)?.map_or(1, |(_, v)| v + 1);
            let version = EdgeVersion {
                edge_id: id,
                version: next,
                commit_seq: seq,
                committed_at,
                created_by: batch.tx_id,
                data,
            };
            self.backend.store_edge_version(&version, &mut write_batch)?;
            edge_versions.push(version);
        }

        let change = ChangeLogEntry {
            seq,
            tx_id: batch.tx_id,
            committed_at,
            vertices: vertex_versions.iter().map(|v| v.vertex_id).collect(),
            edges: edge_versions.iter().map(|e| e.edge_id).collect(),
        };
        self.backend.store_change(&change, &mut write_batch)?;

        // Durable first. If this fails, memory is untouched.
        self.backend.write(write_batch)?;

        for version in vertex_versions {
            self.versions.add_vertex_version(version)?;
        }
        for version in edge_versions {
            self.versions.add_edge_version(version)?;
        }
        self.entries.install(records)?;
        self.changelog.write().map_err(lock_err)?.push(change);
        self.last_seq.store(seq, Ordering::SeqCst);

        Ok(seq)
    }

    fn diff_entries(
        &self,
        index: &IndexDefinition,
        element: ElementId,
        old_keys: &[IndexKey],
        new_keys: &[IndexKey],
        seq: CommitSeq,
        records: &mut Vec<IndexEntryRecord>,
    ) -> Result<()> {
        for key in old_keys.iter().filter(|k| !new_keys.contains(k)) {
            if let Some(record) = self.entries.prepare_remove(&index.name, key, element, seq)? {
                records.push(record);
            }
        }
        for key in new_keys.iter().filter(|k| !old_keys.contains(k)) {
            if let Some(record) = self.entries.prepare_add(&index.name, key, element, seq)? {
                records.push(record);
            }
        }
        Ok(())
    }

    pub fn vertex_at(&self, id: &VertexId, snapshot: CommitSeq) -> Result<Option<Vertex>> {
        self.versions.vertex_at(id, snapshot)
    }

    pub fn edge_at(&self, id: &EdgeId, snapshot: CommitSeq) -> Result<Option<Edge>> {
        self.versions.edge_at(id, snapshot)
    }

    /// Commit sequence of the newest version of a vertex.
    pub fn vertex_modified_at(&self, id: &VertexId) -> Result<Option<CommitSeq>> {
        Ok(self.versions.vertex_last_modified(id)?.map(|(seq, _)| seq))
    }

    pub fn edge_modified_at(&self, id: &EdgeId) -> Result<Option<CommitSeq>> {
        Ok(self.versions.edge_last_modified(id)?.map(|(seq, _)| seq))
    }

    /// Every element of `kind` alive at `snapshot`.
    ///
    /// The id set is fixed up front; elements are materialized lazily. Because
    /// versions are never discarded, later commits do not disturb the scan.
    pub fn scan_all(
        &self,
        kind: ElementKind,
        snapshot: CommitSeq,
    ) -> Result<Box<dyn Iterator<Item = Result<Element>> + '_>> {
        Ok(match kind {
            ElementKind::Vertex => {
                let ids = self.versions.vertex_ids_at(snapshot)?;
                Box::new(ids.into_iter().filter_map(move |id| {
                    self.versions
                        .vertex_at(&id, snapshot)
                        .transpose()
                        .map(|r| r.map(Element::Vertex))
                }))
            }
            ElementKind::Edge => {
                let ids = self.versions.edge_ids_at(snapshot)?;
                Box::new(ids.into_iter().filter_map(move |id| {
                    self.versions
                        .edge_at(&id, snapshot)
                        .transpose()
                        .map(|r| r.map(Element::Edge))
                }))
            }
        })
    }

    /// Edges alive at `snapshot` that leave `vertex` in `direction`.
    pub fn incident_edges(
        &self,
        vertex: &VertexId,
        direction: Direction,
        snapshot: CommitSeq,
    ) -> Result<Vec<Edge>> {
        let mut edges = Vec::new();
        for edge_id in self.versions.incident_edge_ids(vertex)? {
            if let Some(edge) = self.versions.edge_at(&edge_id, snapshot)? {
                if edge.leaves(*vertex, direction) {
                    edges.push(edge);
                }
            }
        }
        Ok(edges)
    }

    pub fn lookup_by_index(
        &self,
        index: &str,
        key: &IndexKey,
        snapshot: CommitSeq,
    ) -> Result<HashSet<ElementId>> {
        self.entries.lookup(index, key, snapshot)
    }

    /// Elements holding a live entry under `key`. Call under the commit guard
    /// for a stable answer.
    pub fn live_index_elements(&self, index: &str, key: &IndexKey) -> Result<Vec<ElementId>> {
        self.entries.live_elements(index, key)
    }

    pub fn live_index_records(&self, index: &str) -> Result<Vec<IndexEntryRecord>> {
        self.entries.live_records(index)
    }

    pub fn index_entry_count(&self, index: &str, snapshot: CommitSeq) -> Result<usize> {
        self.entries.count_visible(index, snapshot)
    }

    pub fn prepare_index_add(
        &self,
        index: &str,
        key: &IndexKey,
        element: ElementId,
        seq: CommitSeq,
    ) -> Result<Option<IndexEntryRecord>> {
        self.entries.prepare_add(index, key, element, seq)
    }

    pub fn prepare_index_remove(
        &self,
        index: &str,
        key: &IndexKey,
        element: ElementId,
        seq: CommitSeq,
    ) -> Result<Option<IndexEntryRecord>> {
        self.entries.prepare_remove(index, key, element, seq)
    }

    /// Persists and installs entry records produced outside a commit (reindex).
    pub fn write_index_records(
        &self,
        _guard: &CommitGuard<'_>,
        records: Vec<IndexEntryRecord>,
    ) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut write_batch = WriteBatch::default();
        for record in &records {
            self.backend.store_index_entry(record, &mut write_batch)?;
        }
        self.backend.write(write_batch)?;
        self.entries.install(records)
    }

    /// Releases all physical entries of an index.
    pub fn drop_index_entries(&self, _guard: &CommitGuard<'_>, index: &str) -> Result<()> {
        let mut write_batch = WriteBatch::default();
        self.backend.delete_index_entries(index, &mut write_batch)?;
        self.backend.write(write_batch)?;
        self.entries.drop_index(index)
    }

    /// Change-log entries committed after `seq`, oldest first.
    pub fn changes_since(&self, seq: CommitSeq) -> Result<Vec<ChangeLogEntry>> {
        let changelog = self.changelog.read().map_err(lock_err)?;
        // The log is ordered by sequence number.
        let start = changelog.partition_point(|c| c.seq <= seq);
        Ok(changelog[start..].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IndexKind, IndexStatus, PropertyValue};
    use tempfile::tempdir;
    use uuid::Uuid;

    fn open_store(dir: &std::path::Path) -> GraphStore {
        let backend = Arc::new(RocksBackend::new(dir).unwrap());
        GraphStore::open(backend).unwrap()
    }

    fn ident_index() -> IndexDefinition {
        IndexDefinition {
            name: "vertexByIdent".into(),
            kind: IndexKind::VertexComposite { label: None },
            keys: vec!["ident".into()],
            unique: true,
            status: IndexStatus::Enabled,
        }
    }

    fn vertex_with_ident(label: &str, ident: &str) -> Vertex {
        let mut vertex = Vertex::new(label);
        vertex
            .properties
            .insert("ident".into(), vec![PropertyValue::from(ident)]);
        vertex
    }

    #[test]
    fn test_apply_mutations_is_visible_only_to_later_snapshots() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let vertex = vertex_with_ident("uuid", "u1");

        let before = store.snapshot();
        let seq = {
            let guard = store.lock_commits().unwrap();
            let batch = MutationBatch {
                tx_id: Uuid::new_v4(),
                vertices: vec![(vertex.id, Some(vertex.clone()))],
                ..Default::default()
            };
            store.apply_mutations(&guard, batch, &[ident_index()]).unwrap()
        };

        assert_eq!(seq, before + 1);
        assert!(store.vertex_at(&vertex.id, before).unwrap().is_none());
        assert_eq!(store.vertex_at(&vertex.id, seq).unwrap(), Some(vertex.clone()));

        let key = IndexKey::composite(vec![PropertyValue::from("u1")]);
        let hits = store.lookup_by_index("vertexByIdent", &key, seq).unwrap();
        assert!(hits.contains(&ElementId::Vertex(vertex.id)));
        assert!(store.lookup_by_index("vertexByIdent", &key, before).unwrap().is_empty());

        let changes = store.changes_since(before).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].vertices, vec![vertex.id]);
    }

    #[test]
    fn test_scan_is_stable_while_commits_continue() {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path());
        let first = vertex_with_ident("uuid", "u1");
        {
            let guard = store.lock_commits().unwrap();
            let batch = MutationBatch {
                tx_id: Uuid::new_v4(),
                vertices: vec![(first.id, Some(first.clone()))],
                ..Default::default()
            };
            store.apply_mutations(&guard, batch, &[]).unwrap();
        }

        let snapshot = store.snapshot();
        let mut scan = store.scan_all(ElementKind::Vertex, snapshot).unwrap();

        let second = vertex_with_ident("user_id", "user1");
        {
            let guard = store.lock_commits().unwrap();
            let batch = MutationBatch {
                tx_id: Uuid::new_v4(),
                vertices: vec![(second.id, Some(second)), (first.id, None)],
                ..Default::default()
            };
            store.apply_mutations(&guard, batch, &[]).unwrap();
        }

        // The scan still sees exactly the world at its snapshot.
        let seen = scan.next().unwrap().unwrap();
        assert_eq!(seen, Element::Vertex(first));
        assert!(scan.next().is_none());
    }

    #[test]
    fn test_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let vertex = vertex_with_ident("uuid", "u1");
        let (a, b) = (vertex.id, Uuid::new_v4());
        let edge = Edge::new(a, "related", b);
        {
            let store = open_store(dir.path());
            let guard = store.lock_commits().unwrap();
            let batch = MutationBatch {
                tx_id: Uuid::new_v4(),
                vertices: vec![(vertex.id, Some(vertex.clone()))],
                edges: vec![(edge.id, Some(edge.clone()))],
                ..Default::default()
            };
            store.apply_mutations(&guard, batch, &[ident_index()]).unwrap();
        }

        let store = open_store(dir.path());
        assert_eq!(store.snapshot(), 1);
        assert_eq!(store.vertex_at(&a, 1).unwrap(), Some(vertex));
        assert_eq!(store.incident_edges(&b, Direction::In, 1).unwrap(), vec![edge]);
        assert!(store.incident_edges(&b, Direction::Out, 1).unwrap().is_empty());
        assert_eq!(store.index_entry_count("vertexByIdent", 1).unwrap(), 1);
    }
}
