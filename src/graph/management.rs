use rocksdb::WriteBatch;
use std::sync::Arc;
use tracing::info;

use super::schema::SchemaRegistry;
use super::store::GraphStore;
use crate::error::{GraphError, Result};
use crate::index::{IndexJob, IndexManager};
use crate::types::{
    Cardinality, DataType, Direction, EdgeLabel, IndexDefinition, IndexKind, IndexStatus,
    Multiplicity, PropertyKey, SchemaAction, SchemaElement, VertexLabel,
};

/// Buffered schema and index changes, applied together by [`ManagementSession::commit`].
///
/// Schema definitions are installed first, then new indexes are built, then the
/// requested index actions run in the order they were made.
#[derive(Debug)]
pub struct ManagementSession {
    store: Arc<GraphStore>,
    schema: Arc<SchemaRegistry>,
    indexes: Arc<IndexManager>,
    pending_schema: Vec<SchemaElement>,
    pending_indexes: Vec<IndexDefinition>,
    pending_actions: Vec<(String, SchemaAction)>,
}

impl ManagementSession {
    pub(crate) fn new(store: Arc<GraphStore>, schema: Arc<SchemaRegistry>, indexes: Arc<IndexManager>) -> Self {
        Self {
            store,
            schema,
            indexes,
            pending_schema: Vec::new(),
            pending_indexes: Vec::new(),
            pending_actions: Vec::new(),
        }
    }

    pub fn make_property_key(&mut self, name: &str, data_type: DataType, cardinality: Cardinality) -> Result<PropertyKey> {
        let key = PropertyKey::new(name, data_type, cardinality);
        self.stage(SchemaElement::PropertyKey(key.clone()))?;
        Ok(key)
    }

    pub fn make_vertex_label(&mut self, name: &str) -> Result<VertexLabel> {
        let label = VertexLabel { name: name.to_string() };
        self.stage(SchemaElement::VertexLabel(label.clone()))?;
        Ok(label)
    }

    pub fn make_edge_label(&mut self, name: &str, multiplicity: Multiplicity) -> Result<EdgeLabel> {
        let label = EdgeLabel {
            name: name.to_string(),
            multiplicity,
        };
        self.stage(SchemaElement::EdgeLabel(label.clone()))?;
        Ok(label)
    }

    /// The key as this session sees it: staged here or already defined.
    pub fn property_key(&self, name: &str) -> Result<Option<PropertyKey>> {
        let staged = self.pending_schema.iter().find_map(|e| match e {
            SchemaElement::PropertyKey(k) if k.name == name => Some(k.clone()),
            _ => None,
        });
        match staged {
            Some(key) => Ok(Some(key)),
            None => self.schema.property_key(name),
        }
    }

    /// A global exact-match index over vertex properties, optionally limited to one label.
    pub fn build_composite_index(&mut self, name: &str, keys: &[&str], label: Option<&str>, unique: bool) -> Result<()> {
        self.stage_index(IndexDefinition {
            name: name.to_string(),
            kind: IndexKind::VertexComposite {
                label: label.map(String::from),
            },
            keys: owned(keys),
            unique,
            status: IndexStatus::Installed,
        })
    }

    /// A vertex-centric index over the edges of `edge_label`, sorted by `keys`.
    pub fn build_edge_index(&mut self, name: &str, edge_label: &str, direction: Direction, keys: &[&str]) -> Result<()> {
        self.stage_index(IndexDefinition {
            name: name.to_string(),
            kind: IndexKind::EdgeRelation {
                edge_label: edge_label.to_string(),
                direction,
            },
            keys: owned(keys),
            unique: false,
            status: IndexStatus::Installed,
        })
    }

    /// A vertex-centric index over the values of a multi-valued property.
    pub fn build_property_index(&mut self, name: &str, property_key: &str, sort_keys: &[&str]) -> Result<()> {
        let mut keys = vec![property_key.to_string()];
        keys.extend(owned(sort_keys));
        self.stage_index(IndexDefinition {
            name: name.to_string(),
            kind: IndexKind::PropertyRelation {
                property_key: property_key.to_string(),
            },
            keys,
            unique: false,
            status: IndexStatus::Installed,
        })
    }

    pub fn update_index(&mut self, name: &str, action: SchemaAction) -> Result<()> {
        let known = self.pending_indexes.iter().any(|d| d.name == name) || self.indexes.definition(name).is_ok();
        if !known {
            return Err(GraphError::IndexNotFound(name.to_string()));
        }
        self.pending_actions.push((name.to_string(), action));
        Ok(())
    }

    pub fn index_status(&self, name: &str) -> Result<IndexStatus> {
        Ok(self.indexes.definition(name)?.status)
    }

    /// Applies everything staged and returns one job per requested index action.
    ///
    /// Must run inside a tokio runtime; status propagation and jobs run on it.
    pub fn commit(self) -> Result<Vec<IndexJob>> {
        if !self.pending_schema.is_empty() {
            let guard = self.store.lock_commits()?;
            let mut batch = WriteBatch::default();
            let mut installed = Vec::new();
            for element in &self.pending_schema {
                if self.schema.is_missing(element)? {
                    self.store.backend().store_schema_element(element, &mut batch)?;
                    installed.push(element);
                }
            }
            self.store.backend().write(batch)?;
            for element in installed {
                self.schema.ensure(element)?;
            }
            drop(guard);
        }

        for definition in &self.pending_indexes {
            self.indexes.build_index(definition.clone())?;
        }

        let mut jobs = Vec::with_capacity(self.pending_actions.len());
        for (name, action) in &self.pending_actions {
            jobs.push(self.indexes.update_index(name, *action)?);
        }

        info!(
            schema = self.pending_schema.len(),
            indexes = self.pending_indexes.len(),
            actions = self.pending_actions.len(),
            "management session committed"
        );
        Ok(jobs)
    }

    /// Discards everything staged.
    pub fn rollback(self) {
        info!(staged = self.pending_schema.len() + self.pending_indexes.len(), "management session rolled back");
    }

    fn stage(&mut self, element: SchemaElement) -> Result<()> {
        let storage_key = element.storage_key();
        if self.pending_schema.iter().any(|e| e.storage_key() == storage_key) {
            return Err(GraphError::Schema(format!("Schema element '{}' is already staged", storage_key)));
        }
        match self.schema.is_missing(&element) {
            Ok(true) => {}
            Ok(false) | Err(GraphError::Schema(_)) => {
                return Err(GraphError::Schema(format!("Schema element '{}' is already defined", storage_key)));
            }
            Err(e) => return Err(e),
        }
        self.pending_schema.push(element);
        Ok(())
    }

    fn stage_index(&mut self, definition: IndexDefinition) -> Result<()> {
        if self.pending_indexes.iter().any(|d| d.name == definition.name) || self.indexes.definition(&definition.name).is_ok() {
            return Err(GraphError::DuplicateIndex(definition.name));
        }
        self.pending_indexes.push(definition);
        Ok(())
    }
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
