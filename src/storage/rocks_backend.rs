use crate::error::{GraphError, Result};
use crate::types::{
    ChangeLogEntry, EdgeVersion, IndexDefinition, IndexEntryRecord, SchemaElement, VertexVersion,
};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

// Column families. Each kind of record lives in its own family.
const CF_SCHEMA: &str = "schema";
const CF_INDEXES: &str = "indexes";
const CF_VERSIONS: &str = "versions";
const CF_INDEX_ENTRIES: &str = "index_entries";
const CF_CHANGELOG: &str = "changelog";

/// RocksDB-based durable storage for the graph store.
///
/// The in-memory store is authoritative for reads; everything here exists so the
/// engine can be reopened. Writes are staged into a `WriteBatch` by the caller and
/// flushed with [`RocksBackend::write`], so one commit lands atomically.
#[derive(Debug)]
pub struct RocksBackend {
    pub db: Arc<DB>,
}

impl RocksBackend {
    /// Create a new or open an existing database with all column families.
    pub fn new(path: &Path) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.increase_parallelism(num_cpus::get() as i32);

        let cfs = [CF_SCHEMA, CF_INDEXES, CF_VERSIONS, CF_INDEX_ENTRIES, CF_CHANGELOG]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;
        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| GraphError::ColumnFamily(name.to_string()))
    }

    /// Writes a staged batch atomically.
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db.write(batch)?;
        Ok(())
    }

    pub fn store_schema_element(&self, element: &SchemaElement, batch: &mut WriteBatch) -> Result<()> {
        let cf = self.cf(CF_SCHEMA)?;
        batch.put_cf(cf, element.storage_key(), bincode::serialize(element)?);
        Ok(())
    }

    pub fn load_schema(&self) -> Result<Vec<SchemaElement>> {
        self.load_all(CF_SCHEMA)
    }

    pub fn store_index_definition(
        &self,
        definition: &IndexDefinition,
        batch: &mut WriteBatch,
    ) -> Result<()> {
        let cf = self.cf(CF_INDEXES)?;
        batch.put_cf(cf, &definition.name, bincode::serialize(definition)?);
        Ok(())
    }

    /// Persists a single definition outside of any larger batch.
    pub fn put_index_definition(&self, definition: &IndexDefinition) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.store_index_definition(definition, &mut batch)?;
        self.write(batch)
    }

    pub fn load_index_definitions(&self) -> Result<Vec<IndexDefinition>> {
        self.load_all(CF_INDEXES)
    }

    /// Key: "vv:{vertex_id}:{version}".
    pub fn store_vertex_version(&self, version: &VertexVersion, batch: &mut WriteBatch) -> Result<()> {
        let cf = self.cf(CF_VERSIONS)?;
        let key = format!("vv:{}:{:020}", version.vertex_id, version.version);
        batch.put_cf(cf, key, bincode::serialize(version)?);
        Ok(())
    }

    /// Key: "ev:{edge_id}:{version}".
    pub fn store_edge_version(&self, version: &EdgeVersion, batch: &mut WriteBatch) -> Result<()> {
        let cf = self.cf(CF_VERSIONS)?;
        let key = format!("ev:{}:{:020}", version.edge_id, version.version);
        batch.put_cf(cf, key, bincode::serialize(version)?);
        Ok(())
    }

    pub fn load_vertex_versions(&self) -> Result<Vec<VertexVersion>> {
        self.load_prefixed(CF_VERSIONS, b"vv:")
    }

    pub fn load_edge_versions(&self) -> Result<Vec<EdgeVersion>> {
        self.load_prefixed(CF_VERSIONS, b"ev:")
    }

    /// Key: index name, a NUL separator, the encoded index key, then the element id.
    pub fn store_index_entry(&self, record: &IndexEntryRecord, batch: &mut WriteBatch) -> Result<()> {
        let cf = self.cf(CF_INDEX_ENTRIES)?;
        let mut key = index_prefix(&record.index);
        key.extend(record.key.encode()?);
        key.extend(record.element.uuid().as_bytes());
        batch.put_cf(cf, key, bincode::serialize(record)?);
        Ok(())
    }

    /// Drops every entry of `index` as part of `batch`.
    pub fn delete_index_entries(&self, index: &str, batch: &mut WriteBatch) -> Result<()> {
        let cf = self.cf(CF_INDEX_ENTRIES)?;
        let from = index_prefix(index);
        let mut to = index.as_bytes().to_vec();
        to.push(1);
        batch.delete_range_cf(cf, from, to);
        Ok(())
    }

    pub fn load_index_entries(&self) -> Result<Vec<IndexEntryRecord>> {
        self.load_all(CF_INDEX_ENTRIES)
    }

    /// Big-endian sequence keys keep the log in commit order.
    pub fn store_change(&self, entry: &ChangeLogEntry, batch: &mut WriteBatch) -> Result<()> {
        let cf = self.cf(CF_CHANGELOG)?;
        batch.put_cf(cf, entry.seq.to_be_bytes(), bincode::serialize(entry)?);
        Ok(())
    }

    pub fn load_changelog(&self) -> Result<Vec<ChangeLogEntry>> {
        self.load_all(CF_CHANGELOG)
    }

    fn load_all<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            match bincode::deserialize(&value) {
                Ok(record) => records.push(record),
                Err(e) => warn!(cf = cf_name, key = ?key, error = %e, "skipping undecodable record"),
            }
        }
        Ok(records)
    }

    fn load_prefixed<T: DeserializeOwned>(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut records = Vec::new();
        let iter = self.db.iterator_cf(
            cf,
            IteratorMode::From(prefix, rocksdb::Direction::Forward),
        );
        for item in iter {
            let (key, value) = item?;
            // Keys are sorted, so the first key outside the prefix ends the range.
            if !key.starts_with(prefix) {
                break;
            }
            match bincode::deserialize(&value) {
                Ok(record) => records.push(record),
                Err(e) => warn!(cf = cf_name, key = ?key, error = %e, "skipping undecodable record"),
            }
        }
        Ok(records)
    }
}

fn index_prefix(index: &str) -> Vec<u8> {
    let mut prefix = index.as_bytes().to_vec();
    prefix.push(0);
    prefix
}
