//! Index lifecycle management.
//!
//! Every index moves through
//!
//! ```text
//! INSTALLED -> REGISTERED -> ENABLED -> DISABLED -> REMOVED
//!                  \            ^  \
//!                   +-> REINDEXING  +-> REINDEXING -> ENABLED
//! ```
//!
//! The authoritative status lives in the definition. Each simulated partition
//! holds its own copy, updated by a background propagation task, and
//! `await_status` waits until every partition has caught up.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::job::{IndexJob, JobReport, JobState};
use crate::config::GraphConfig;
use crate::error::{GraphError, Result, lock_err};
use crate::graph::schema::SchemaRegistry;
use crate::graph::store::GraphStore;
use crate::types::{
    Cardinality, CommitSeq, Element, ElementId, ElementKind, IndexDefinition, IndexKey, IndexKind,
    IndexStatus, SchemaAction,
};

const PROGRESS_EVERY: usize = 256;

#[derive(Debug)]
struct Slot {
    definition: IndexDefinition,
    /// Status to fall back to when a running reindex fails.
    prior: Option<IndexStatus>,
    /// Snapshot from which the entries are complete; set while ENABLED.
    enabled_at: Option<CommitSeq>,
}

impl Slot {
    fn is_usable_at(&self, snapshot: CommitSeq) -> bool {
        self.definition.is_usable() && self.enabled_at.is_some_and(|seq| seq <= snapshot)
    }

    /// A unique index keeps rejecting duplicates while an enabled copy is rebuilt.
    fn enforces_uniqueness(&self) -> bool {
        self.definition.unique
            && match self.definition.status {
                IndexStatus::Enabled => true,
                IndexStatus::Reindexing => self.prior == Some(IndexStatus::Enabled),
                _ => false,
            }
    }
}

#[derive(Debug)]
struct IndexState {
    slot: RwLock<Slot>,
    partitions: watch::Sender<Vec<IndexStatus>>,
}

impl IndexState {
    fn new(definition: IndexDefinition, partitions: Vec<IndexStatus>, enabled_at: Option<CommitSeq>) -> Self {
        let (partitions, _) = watch::channel(partitions);
        Self {
            slot: RwLock::new(Slot {
                definition,
                prior: None,
                enabled_at,
            }),
            partitions,
        }
    }

    fn status(&self) -> Result<IndexStatus> {
        Ok(self.slot.read().map_err(lock_err)?.definition.status)
    }

    fn definition(&self) -> Result<IndexDefinition> {
        Ok(self.slot.read().map_err(lock_err)?.definition.clone())
    }
}

#[derive(Debug)]
pub struct IndexManager {
    store: Arc<GraphStore>,
    schema: Arc<SchemaRegistry>,
    indexes: RwLock<HashMap<String, Arc<IndexState>>>,
    partitions: usize,
    propagation_delay: Duration,
    await_timeout: Duration,
    /// Propagation and job tasks, so shutdown can wait for them.
    tasks: TaskTracker,
}

impl IndexManager {
    /// Creates the manager and reloads persisted definitions.
    ///
    /// On reopen every partition has already seen every definition, so an index
    /// persisted as INSTALLED comes back REGISTERED.
    pub fn new(
        store: Arc<GraphStore>,
        schema: Arc<SchemaRegistry>,
        config: &GraphConfig,
    ) -> Result<Self> {
        let mut indexes = HashMap::new();
        for mut definition in store.backend().load_index_definitions()? {
            if definition.status == IndexStatus::Installed {
                definition.status = IndexStatus::Registered;
                store.backend().put_index_definition(&definition)?;
            }
            let partitions = vec![definition.status; config.index.partitions];
            let enabled_at = definition.is_usable().then(|| store.snapshot());
            indexes.insert(
                definition.name.clone(),
                Arc::new(IndexState::new(definition, partitions, enabled_at)),
            );
        }
        debug!(count = indexes.len(), "index definitions loaded");

        Ok(Self {
            store,
            schema,
            indexes: RwLock::new(indexes),
            partitions: config.index.partitions,
            propagation_delay: config.propagation_delay(),
            await_timeout: config.await_timeout(),
            tasks: TaskTracker::new(),
        })
    }

    /// Waits for every propagation task and job to finish.
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        debug!("index tasks drained");
    }

    pub fn definition(&self, name: &str) -> Result<IndexDefinition> {
        self.state(name)?.definition()
    }

    pub fn definitions(&self) -> Result<Vec<IndexDefinition>> {
        let indexes = self.indexes.read().map_err(lock_err)?;
        let mut definitions = indexes
            .values()
            .map(|state| state.definition())
            .collect::<Result<Vec<_>>>()?;
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(definitions)
    }

    /// Indexes whose entries commits must keep current.
    pub fn maintained_indexes(&self) -> Result<Vec<IndexDefinition>> {
        Ok(self
            .definitions()?
            .into_iter()
            .filter(|d| d.status.maintains_entries())
            .collect())
    }

    /// Indexes the traversal planner may use for a reader at `snapshot`: ENABLED,
    /// and enabled no later than the snapshot, so every entry the reader needs is
    /// already visible to it.
    pub fn usable_indexes(&self, snapshot: CommitSeq) -> Result<Vec<IndexDefinition>> {
        self.definitions_where(|slot| slot.is_usable_at(snapshot))
    }

    /// Unique indexes a commit must check its claims against.
    pub fn enforced_unique_indexes(&self) -> Result<Vec<IndexDefinition>> {
        self.definitions_where(Slot::enforces_uniqueness)
    }

    fn definitions_where(&self, keep: impl Fn(&Slot) -> bool) -> Result<Vec<IndexDefinition>> {
        let indexes = self.indexes.read().map_err(lock_err)?;
        let mut definitions = Vec::new();
        for state in indexes.values() {
            let slot = state.slot.read().map_err(lock_err)?;
            if keep(&slot) {
                definitions.push(slot.definition.clone());
            }
        }
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(definitions)
    }

    pub fn partition_statuses(&self, name: &str) -> Result<Vec<IndexStatus>> {
        Ok(self.state(name)?.partitions.borrow().clone())
    }

    /// Entries of `name` visible at the latest snapshot.
    pub fn entry_count(&self, name: &str) -> Result<usize> {
        self.state(name)?;
        self.store.index_entry_count(name, self.store.snapshot())
    }

    /// Creates an index in INSTALLED and starts registering it on every partition.
    pub fn build_index(self: &Arc<Self>, mut definition: IndexDefinition) -> Result<IndexDefinition> {
        self.validate(&definition)?;
        definition.status = IndexStatus::Installed;

        let state = {
            let mut indexes = self.indexes.write().map_err(lock_err)?;
            if indexes.contains_key(&definition.name) {
                return Err(GraphError::DuplicateIndex(definition.name));
            }
            self.store.backend().put_index_definition(&definition)?;
            let state = Arc::new(IndexState::new(
                definition.clone(),
                vec![IndexStatus::Installed; self.partitions],
                None,
            ));
            indexes.insert(definition.name.clone(), Arc::clone(&state));
            state
        };

        info!(index = %definition.name, kind = ?definition.kind, keys = ?definition.keys, "index installed");
        self.propagate(&definition.name, state)?;
        Ok(definition)
    }

    /// Waits until every partition reports `name` at or past `target`.
    ///
    /// A timeout leaves the index untouched; the caller may simply wait again.
    pub async fn await_status(
        &self,
        name: &str,
        target: IndexStatus,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let mut partitions = self.state(name)?.partitions.subscribe();
        let deadline = timeout.unwrap_or(self.await_timeout);
        let reached = tokio::time::timeout(
            deadline,
            partitions.wait_for(|statuses| statuses.iter().all(|s| s.is_at_or_past(target))),
        )
        .await;

        match reached {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(GraphError::Index(format!(
                "status channel of index {} closed",
                name
            ))),
            Err(_) => Err(GraphError::Timeout {
                index: name.to_string(),
                status: target,
            }),
        }
    }

    pub fn update_index(self: &Arc<Self>, name: &str, action: SchemaAction) -> Result<IndexJob> {
        match action {
            SchemaAction::EnableIndex => self.enable_index(name),
            SchemaAction::Reindex => self.reindex(name),
            SchemaAction::DisableIndex => self.disable_index(name),
            SchemaAction::RemoveIndex => self.remove_index(name),
        }
    }

    /// REGISTERED -> ENABLED without scanning existing data.
    pub fn enable_index(self: &Arc<Self>, name: &str) -> Result<IndexJob> {
        let state = self.state(name)?;
        // No commit may be halfway through validation when uniqueness switches on.
        let _guard = self.store.lock_commits()?;
        match state.status()? {
            IndexStatus::Enabled => {}
            IndexStatus::Registered => self.set_status(name, &state, IndexStatus::Enabled)?,
            status => {
                return Err(GraphError::Index(format!(
                    "cannot enable index {} in status {:?}",
                    name, status
                )));
            }
        }
        Ok(IndexJob::completed(name, SchemaAction::EnableIndex))
    }

    /// Idempotent: disabling a DISABLED or REMOVED index does nothing.
    pub fn disable_index(self: &Arc<Self>, name: &str) -> Result<IndexJob> {
        let state = self.state(name)?;
        match state.status()? {
            IndexStatus::Disabled | IndexStatus::Removed => {}
            IndexStatus::Reindexing => {
                return Err(GraphError::Index(format!(
                    "cannot disable index {} while it is reindexing",
                    name
                )));
            }
            _ => self.set_status(name, &state, IndexStatus::Disabled)?,
        }
        Ok(IndexJob::completed(name, SchemaAction::DisableIndex))
    }

    /// Releases the entries of a DISABLED index once every partition agrees it is
    /// disabled. Idempotent on REMOVED.
    pub fn remove_index(self: &Arc<Self>, name: &str) -> Result<IndexJob> {
        let state = self.state(name)?;
        match state.status()? {
            IndexStatus::Removed => return Ok(IndexJob::completed(name, SchemaAction::RemoveIndex)),
            IndexStatus::Disabled => {}
            status => {
                return Err(GraphError::Index(format!(
                    "index {} must be disabled before removal (status {:?})",
                    name, status
                )));
            }
        }

        let handle = runtime()?;
        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = watch::channel(JobState::Running { scanned: 0 });
        let manager = Arc::clone(self);
        let job_cancel = cancel.clone();
        let index = name.to_string();

        let join = self.tasks.spawn_on(async move {
            let result = tokio::select! {
                _ = job_cancel.cancelled() => Err(GraphError::Cancelled(format!("removal of {}", index))),
                waited = manager.await_status(&index, IndexStatus::Disabled, None) => waited,
            };
            let result = match result {
                Ok(()) => {
                    let releasing = Arc::clone(&manager);
                    let name = index.clone();
                    tokio::task::spawn_blocking(move || releasing.release(&name))
                        .await
                        .map_err(GraphError::from)
                        .and_then(|r| r)
                }
                Err(e) => Err(e),
            };
            progress_tx.send_replace(final_state(&result));
            result
        }, &handle);

        Ok(IndexJob::spawned(name, SchemaAction::RemoveIndex, progress_rx, cancel, join))
    }

    /// Rebuilds the entries of `name` from a full scan, then enables it.
    ///
    /// Runs on the blocking pool. Commits keep maintaining the index while it is
    /// REINDEXING, and the change log covers everything committed between the
    /// scan snapshot and the final write, so no element is missed.
    pub fn reindex(self: &Arc<Self>, name: &str) -> Result<IndexJob> {
        let handle = runtime()?;
        let state = self.state(name)?;
        let (definition, prior) = {
            let mut slot = state.slot.write().map_err(lock_err)?;
            let prior = slot.definition.status;
            if !matches!(prior, IndexStatus::Registered | IndexStatus::Enabled) {
                return Err(GraphError::Index(format!(
                    "cannot reindex index {} in status {:?}",
                    name, prior
                )));
            }
            slot.prior = Some(prior);
            slot.definition.status = IndexStatus::Reindexing;
            (slot.definition.clone(), prior)
        };
        info!(index = name, ?prior, "reindex started");
        self.propagate(name, Arc::clone(&state))?;

        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = watch::channel(JobState::Running { scanned: 0 });
        let manager = Arc::clone(self);
        let job_cancel = cancel.clone();

        let work = handle.spawn_blocking(move || {
            let result = manager.run_reindex(&definition, &state, &job_cancel, &progress_tx);
            if let Err(e) = &result {
                warn!(index = %definition.name, error = %e, ?prior, "reindex failed, reverting status");
                if let Err(e) = manager.set_status(&definition.name, &state, prior) {
                    warn!(index = %definition.name, error = %e, "could not restore index status");
                }
            }
            progress_tx.send_replace(final_state(&result));
            result
        });
        let join = self.tasks.spawn_on(
            async move { work.await.map_err(GraphError::from).and_then(|r| r) },
            &handle,
        );

        Ok(IndexJob::spawned(name, SchemaAction::Reindex, progress_rx, cancel, join))
    }

    fn run_reindex(
        self: &Arc<Self>,
        definition: &IndexDefinition,
        state: &Arc<IndexState>,
        cancel: &CancellationToken,
        progress: &watch::Sender<JobState>,
    ) -> Result<JobReport> {
        let name = definition.name.as_str();
        let kind = match definition.kind {
            IndexKind::EdgeRelation { .. } => ElementKind::Edge,
            _ => ElementKind::Vertex,
        };

        // Taking the snapshot inside the critical section orders it after every
        // commit that could still have missed the REINDEXING status.
        let snapshot = {
            let _guard = self.store.lock_commits()?;
            self.store.snapshot()
        };

        let mut expected: Vec<(IndexKey, ElementId)> = Vec::new();
        let mut scanned = 0;
        for element in self.store.scan_all(kind, snapshot)? {
            if cancel.is_cancelled() {
                return Err(GraphError::Cancelled(format!("reindex of {}", name)));
            }
            let element = element?;
            let id = element.id();
            expected.extend(keys_for_element(definition, &element).into_iter().map(|k| (k, id)));
            scanned += 1;
            if scanned % PROGRESS_EVERY == 0 {
                progress.send_replace(JobState::Running { scanned });
            }
        }
        if cancel.is_cancelled() {
            return Err(GraphError::Cancelled(format!("reindex of {}", name)));
        }

        let guard = self.store.lock_commits()?;
        let now = self.store.snapshot();

        // Elements touched after the scan snapshot are re-derived from their current state.
        let mut touched = HashSet::new();
        for change in self.store.changes_since(snapshot)? {
            match kind {
                ElementKind::Vertex => touched.extend(change.vertices.into_iter().map(ElementId::Vertex)),
                ElementKind::Edge => touched.extend(change.edges.into_iter().map(ElementId::Edge)),
            }
        }
        expected.retain(|(_, id)| !touched.contains(id));
        for id in &touched {
            if let Some(element) = self.element_at(id, now)? {
                expected.extend(keys_for_element(definition, &element).into_iter().map(|k| (k, *id)));
            }
        }

        if definition.unique {
            check_unique(name, &expected)?;
        }

        let mut wanted = HashSet::with_capacity(expected.len());
        for (key, id) in &expected {
            wanted.insert((key.encode()?, *id));
        }

        let mut records = Vec::new();
        // Repair: close live entries the data no longer produces.
        for record in self.store.live_index_records(name)? {
            if !wanted.contains(&(record.key.encode()?, record.element)) {
                if let Some(r) = self.store.prepare_index_remove(name, &record.key, record.element, now)? {
                    records.push(r);
                }
            }
        }
        for (key, id) in &expected {
            if let Some(r) = self.store.prepare_index_add(name, key, *id, now)? {
                records.push(r);
            }
        }
        let entries_written = records.len();
        self.store.write_index_records(&guard, records)?;
        // Still under the commit guard, so no commit lands between the final
        // write and the switch to ENABLED.
        self.set_status(name, state, IndexStatus::Enabled)?;
        drop(guard);

        info!(index = name, scanned, caught_up = touched.len(), entries_written, "reindex finished");
        Ok(JobReport {
            index: name.to_string(),
            action: SchemaAction::Reindex,
            elements_scanned: scanned,
            entries_written,
        })
    }

    fn element_at(&self, id: &ElementId, snapshot: CommitSeq) -> Result<Option<Element>> {
        Ok(match id {
            ElementId::Vertex(v) => self.store.vertex_at(v, snapshot)?.map(Element::Vertex),
            ElementId::Edge(e) => self.store.edge_at(e, snapshot)?.map(Element::Edge),
        })
    }

    fn release(self: &Arc<Self>, name: &str) -> Result<JobReport> {
        let state = self.state(name)?;
        let guard = self.store.lock_commits()?;
        match state.status()? {
            IndexStatus::Removed => return Ok(JobReport::empty(name, SchemaAction::RemoveIndex)),
            IndexStatus::Disabled => {}
            status => {
                return Err(GraphError::Index(format!(
                    "index {} left DISABLED before removal (status {:?})",
                    name, status
                )));
            }
        }
        self.store.drop_index_entries(&guard, name)?;
        self.set_status(name, &state, IndexStatus::Removed)?;
        drop(guard);
        info!(index = name, "index removed, entries released");
        Ok(JobReport::empty(name, SchemaAction::RemoveIndex))
    }

    fn validate(&self, definition: &IndexDefinition) -> Result<()> {
        if definition.keys.is_empty() {
            return Err(GraphError::Index(format!(
                "index {} covers no keys",
                definition.name
            )));
        }
        if definition.unique && !definition.is_composite() {
            return Err(GraphError::Index(format!(
                "index {}: only composite indexes can be unique",
                definition.name
            )));
        }
        let mut keys = Vec::with_capacity(definition.keys.len());
        for name in &definition.keys {
            let key = self.schema.property_key(name)?.ok_or_else(|| {
                GraphError::Schema(format!("index key '{}' is not defined", name))
            })?;
            keys.push(key);
        }

        match &definition.kind {
            IndexKind::VertexComposite { label: Some(label) } => {
                if self.schema.vertex_label(label)?.is_none() {
                    return Err(GraphError::Schema(format!(
                        "vertex label '{}' is not defined",
                        label
                    )));
                }
            }
            IndexKind::VertexComposite { label: None } => {}
            IndexKind::EdgeRelation { edge_label, .. } => {
                if self.schema.edge_label(edge_label)?.is_none() {
                    return Err(GraphError::Schema(format!(
                        "edge label '{}' is not defined",
                        edge_label
                    )));
                }
                if let Some(key) = keys.iter().find(|k| k.cardinality != Cardinality::Single) {
                    return Err(GraphError::Schema(format!(
                        "edge index key '{}' must have SINGLE cardinality",
                        key.name
                    )));
                }
            }
            IndexKind::PropertyRelation { property_key } => {
                if definition.keys.first() != Some(property_key) {
                    return Err(GraphError::Index(format!(
                        "index {}: first key must be the indexed property '{}'",
                        definition.name, property_key
                    )));
                }
            }
        }
        Ok(())
    }

    fn state(&self, name: &str) -> Result<Arc<IndexState>> {
        let indexes = self.indexes.read().map_err(lock_err)?;
        indexes
            .get(name)
            .cloned()
            .ok_or_else(|| GraphError::IndexNotFound(name.to_string()))
    }

    fn set_status(self: &Arc<Self>, name: &str, state: &Arc<IndexState>, to: IndexStatus) -> Result<()> {
        {
            let mut slot = state.slot.write().map_err(lock_err)?;
            let from = slot.definition.status;
            slot.definition.status = to;
            slot.prior = None;
            slot.enabled_at = (to == IndexStatus::Enabled).then(|| self.store.snapshot());
            self.store.backend().put_index_definition(&slot.definition)?;
            info!(index = name, ?from, ?to, "index status changed");
        }
        self.propagate(name, Arc::clone(state))
    }

    /// Walks the current status out to every partition, one acknowledgement at a time.
    /// An INSTALLED index becomes REGISTERED once all partitions have acknowledged it.
    fn propagate(self: &Arc<Self>, name: &str, state: Arc<IndexState>) -> Result<()> {
        let handle = runtime()?;
        let manager = Arc::clone(self);
        let name = name.to_string();

        self.tasks.spawn_on(async move {
            for partition in 0..manager.partitions {
                tokio::time::sleep(manager.propagation_delay).await;
                let Ok(current) = state.status() else { return };
                state.partitions.send_modify(|statuses| statuses[partition] = current);
                debug!(index = %name, partition, status = ?current, "partition acknowledged");
            }

            let registered = state.status().ok() == Some(IndexStatus::Installed)
                && state
                    .partitions
                    .borrow()
                    .iter()
                    .all(|s| *s == IndexStatus::Installed);
            if registered {
                if let Err(e) = manager.set_status(&name, &state, IndexStatus::Registered) {
                    warn!(index = %name, error = %e, "could not register index");
                }
            }
        }, &handle);
        Ok(())
    }
}

fn runtime() -> Result<Handle> {
    Handle::try_current().map_err(|e| GraphError::Task(format!("index jobs need a tokio runtime: {}", e)))
}

fn final_state(result: &Result<JobReport>) -> JobState {
    match result {
        Ok(_) => JobState::Completed,
        Err(GraphError::Cancelled(_)) => JobState::Cancelled,
        Err(e) => JobState::Failed(e.to_string()),
    }
}

fn keys_for_element(definition: &IndexDefinition, element: &Element) -> Vec<IndexKey> {
    match element {
        Element::Vertex(v) => definition.keys_for_vertex(v),
        Element::Edge(e) => definition.keys_for_edge(e),
    }
}

fn check_unique(index: &str, expected: &[(IndexKey, ElementId)]) -> Result<()> {
    let mut owners: HashMap<Vec<u8>, ElementId> = HashMap::new();
    for (key, id) in expected {
        match owners.insert(key.encode()?, *id) {
            Some(other) if other != *id => {
                return Err(GraphError::UniquenessViolation {
                    index: index.to_string(),
                    key: key.describe(),
                });
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RocksBackend;
    use crate::types::{DataType, PropertyKey, SchemaElement};
    use tempfile::{TempDir, tempdir};

    fn setup() -> (TempDir, Arc<IndexManager>) {
        let dir = tempdir().unwrap();
        let mut config = GraphConfig::with_path(dir.path());
        config.index.propagation_delay_ms = 1;
        let backend = Arc::new(RocksBackend::new(dir.path()).unwrap());
        let store = Arc::new(GraphStore::open(backend).unwrap());
        let schema = Arc::new(SchemaRegistry::new(true));
        schema
            .define(SchemaElement::PropertyKey(PropertyKey::new(
                "ident",
                DataType::String,
                Cardinality::Single,
            )))
            .unwrap();
        let manager = Arc::new(IndexManager::new(store, schema, &config).unwrap());
        (dir, manager)
    }

    fn by_ident() -> IndexDefinition {
        IndexDefinition {
            name: "vertexByIdent".into(),
            kind: IndexKind::VertexComposite { label: None },
            keys: vec!["ident".into()],
            unique: true,
            status: IndexStatus::Enabled,
        }
    }

    #[tokio::test]
    async fn test_build_registers_on_all_partitions() {
        let (_dir, manager) = setup();
        let installed = manager.build_index(by_ident()).unwrap();
        // Whatever status the caller asked for, a new index starts INSTALLED.
        assert_eq!(installed.status, IndexStatus::Installed);

        manager
            .await_status("vertexByIdent", IndexStatus::Registered, None)
            .await
            .unwrap();
        assert_eq!(
            manager.definition("vertexByIdent").unwrap().status,
            IndexStatus::Registered
        );
        assert!(manager.usable_indexes(manager.store.snapshot()).unwrap().is_empty());
        assert_eq!(manager.maintained_indexes().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected() {
        let (_dir, manager) = setup();
        manager.build_index(by_ident()).unwrap();
        let again = manager.build_index(by_ident());
        assert!(matches!(again, Err(GraphError::DuplicateIndex(name)) if name == "vertexByIdent"));
    }

    #[tokio::test]
    async fn test_unknown_key_is_schema_error() {
        let (_dir, manager) = setup();
        let mut definition = by_ident();
        definition.keys = vec!["missing".into()];
        assert!(matches!(
            manager.build_index(definition),
            Err(GraphError::Schema(_))
        ));
    }

    #[tokio::test]
    async fn test_await_times_out_without_changing_status() {
        let (_dir, manager) = setup();
        manager.build_index(by_ident()).unwrap();
        let result = manager
            .await_status(
                "vertexByIdent",
                IndexStatus::Enabled,
                Some(Duration::from_millis(30)),
            )
            .await;
        assert!(matches!(result, Err(GraphError::Timeout { .. })));
        assert!(result.unwrap_err().is_retryable());
        assert_ne!(
            manager.definition("vertexByIdent").unwrap().status,
            IndexStatus::Enabled
        );
    }

    #[tokio::test]
    async fn test_two_phase_drop_is_idempotent() {
        let (_dir, manager) = setup();
        manager.build_index(by_ident()).unwrap();
        manager
            .await_status("vertexByIdent", IndexStatus::Registered, None)
            .await
            .unwrap();
        manager.enable_index("vertexByIdent").unwrap();

        // Removal before disabling is refused.
        assert!(matches!(
            manager.remove_index("vertexByIdent"),
            Err(GraphError::Index(_))
        ));

        manager.disable_index("vertexByIdent").unwrap();
        manager.disable_index("vertexByIdent").unwrap();
        manager
            .await_status("vertexByIdent", IndexStatus::Disabled, None)
            .await
            .unwrap();

        manager.remove_index("vertexByIdent").unwrap().wait().await.unwrap();
        manager
            .remove_index("vertexByIdent")
            .unwrap()
            .wait()
            .await
            .unwrap();
        manager.disable_index("vertexByIdent").unwrap();
        assert_eq!(
            manager.definition("vertexByIdent").unwrap().status,
            IndexStatus::Removed
        );
    }

    #[tokio::test]
    async fn test_reindex_requires_registration() {
        let (_dir, manager) = setup();
        manager.build_index(by_ident()).unwrap();
        // Still INSTALLED right after the build.
        assert!(matches!(
            manager.reindex("vertexByIdent"),
            Err(GraphError::Index(_))
        ));
    }

    #[test]
    fn test_slot_keeps_uniqueness_while_an_enabled_index_is_rebuilt() {
        let mut slot = Slot {
            definition: by_ident(),
            prior: None,
            enabled_at: Some(3),
        };
        assert!(slot.enforces_uniqueness());
        assert!(slot.is_usable_at(3));
        assert!(!slot.is_usable_at(2));

        slot.definition.status = IndexStatus::Reindexing;
        slot.prior = Some(IndexStatus::Enabled);
        assert!(slot.enforces_uniqueness());
        assert!(!slot.is_usable_at(3));

        // A first build from REGISTERED has incomplete entries to check against.
        slot.prior = Some(IndexStatus::Registered);
        assert!(!slot.enforces_uniqueness());
    }

    #[tokio::test]
    async fn test_enable_makes_a_unique_index_usable_and_enforced() {
        let (_dir, manager) = setup();
        manager.build_index(by_ident()).unwrap();
        manager
            .await_status("vertexByIdent", IndexStatus::Registered, None)
            .await
            .unwrap();
        assert!(manager.enforced_unique_indexes().unwrap().is_empty());

        manager.enable_index("vertexByIdent").unwrap();
        let enabled_at = manager.store.snapshot();
        assert_eq!(manager.usable_indexes(enabled_at).unwrap().len(), 1);
        assert_eq!(manager.enforced_unique_indexes().unwrap().len(), 1);
    }

    #[test]
    fn test_check_unique_spots_shared_keys() {
        let key = IndexKey::composite(vec!["u1".into()]);
        let a = ElementId::Vertex(uuid::Uuid::new_v4());
        let b = ElementId::Vertex(uuid::Uuid::new_v4());
        assert!(check_unique("byIdent", &[(key.clone(), a), (key.clone(), a)]).is_ok());
        assert!(matches!(
            check_unique("byIdent", &[(key.clone(), a), (key, b)]),
            Err(GraphError::UniquenessViolation { .. })
        ));
    }
}
