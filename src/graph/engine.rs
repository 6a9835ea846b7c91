use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task;
use tracing::info;

use super::management::ManagementSession;
use super::schema::SchemaRegistry;
use super::store::GraphStore;
use super::transaction::{Transaction, TransactionManager};
use crate::config::GraphConfig;
use crate::error::Result;
use crate::index::IndexManager;
use crate::storage::RocksBackend;
use crate::traversal::{Snapshot, Step, Traversal, TraversalItem};
use crate::types::{CommitSeq, IndexDefinition, IndexStatus, SchemaElement};

/// The single entry point to a graph: one RocksDB instance and every component
/// wired around it.
#[derive(Debug)]
pub struct GraphEngine {
    config: GraphConfig,
    store: Arc<GraphStore>,
    schema: Arc<SchemaRegistry>,
    indexes: Arc<IndexManager>,
    transactions: TransactionManager,
}

impl GraphEngine {
    /// Opens (or creates) the graph under `config.storage.path` and reloads its
    /// schema, index definitions, data and change log.
    pub fn open(config: GraphConfig) -> Result<Self> {
        config.validate()?;
        let backend = Arc::new(RocksBackend::new(&config.storage.path)?);

        let schema = Arc::new(SchemaRegistry::new(config.schema.auto_create));
        schema.hydrate(backend.load_schema()?)?;

        let store = Arc::new(GraphStore::open(backend)?);
        let indexes = Arc::new(IndexManager::new(Arc::clone(&store), Arc::clone(&schema), &config)?);
        let transactions = TransactionManager::new(Arc::clone(&store), Arc::clone(&schema), Arc::clone(&indexes));

        info!(
            path = %config.storage.path.display(),
            last_seq = store.snapshot(),
            "graph engine opened"
        );
        Ok(Self {
            config,
            store,
            schema,
            indexes,
            transactions,
        })
    }

    /// Opens the graph at `path` with default settings.
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(GraphConfig::with_path(path))
    }

    /// Waits for background index work, then flushes RocksDB.
    pub async fn close(self) -> Result<()> {
        self.indexes.shutdown().await;
        self.store.backend().db.flush()?;
        info!(last_seq = self.store.snapshot(), "graph engine closed");
        Ok(())
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    // --- Data API ---

    pub fn begin(&self) -> Result<Transaction> {
        self.transactions.begin()
    }

    pub fn commit(&self, transaction: Transaction) -> Result<CommitSeq> {
        self.transactions.commit(transaction)
    }

    pub fn rollback(&self, transaction: Transaction) -> Result<()> {
        self.transactions.rollback(transaction)
    }

    /// Commits on the blocking pool so RocksDB writes stay off the async workers.
    pub async fn commit_async(self: &Arc<Self>, transaction: Transaction) -> Result<CommitSeq> {
        let engine = Arc::clone(self);
        task::spawn_blocking(move || engine.commit(transaction)).await?
    }

    /// The latest committed state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::new(Arc::clone(&self.store), self.store.snapshot())
    }

    /// A read-only traversal over the latest committed snapshot.
    pub fn traversal(&self) -> Result<Traversal<Snapshot>> {
        let snapshot = self.snapshot();
        let indexes = self.indexes.usable_indexes(snapshot.seq())?;
        Ok(Traversal::new(snapshot, indexes))
    }

    /// Runs `steps` against the latest snapshot on the blocking pool and collects
    /// the results.
    pub async fn traverse(self: &Arc<Self>, steps: Vec<Step>) -> Result<Vec<TraversalItem>> {
        let engine = Arc::clone(self);
        task::spawn_blocking(move || engine.traversal()?.with_steps(steps).to_list()).await?
    }

    // --- Management API ---

    pub fn open_management(&self) -> ManagementSession {
        ManagementSession::new(Arc::clone(&self.store), Arc::clone(&self.schema), Arc::clone(&self.indexes))
    }

    /// Resolves once every partition reports `name` at or past `status`.
    /// `None` uses the configured timeout.
    pub async fn await_index_status(&self, name: &str, status: IndexStatus, timeout: Option<Duration>) -> Result<()> {
        self.indexes.await_status(name, status, timeout).await
    }

    pub fn index(&self, name: &str) -> Result<IndexDefinition> {
        self.indexes.definition(name)
    }

    pub fn indexes(&self) -> Result<Vec<IndexDefinition>> {
        self.indexes.definitions()
    }

    /// Physical entries of `name` visible at the latest snapshot.
    pub fn index_entry_count(&self, name: &str) -> Result<usize> {
        self.indexes.entry_count(name)
    }

    pub fn schema_elements(&self) -> Result<Vec<SchemaElement>> {
        self.schema.all()
    }

    pub fn active_transactions(&self) -> Result<usize> {
        self.transactions.active_count()
    }
}
