use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{GraphError, Result, lock_err};
use crate::types::{
    Cardinality, EdgeLabel, Multiplicity, PropertyKey, PropertyValue, SchemaElement, VertexLabel,
};

/// Holds property-key and label definitions.
///
/// Definitions are immutable once created and never deleted. With `auto_create`
/// set, unknown names resolve to a default definition (SINGLE cardinality, type
/// inferred from the first value) that is installed when the first commit using
/// it succeeds.
#[derive(Debug)]
pub struct SchemaRegistry {
    property_keys: RwLock<HashMap<String, PropertyKey>>,
    vertex_labels: RwLock<HashMap<String, VertexLabel>>,
    edge_labels: RwLock<HashMap<String, EdgeLabel>>,
    auto_create: bool,
}

impl SchemaRegistry {
    pub fn new(auto_create: bool) -> Self {
        Self {
            property_keys: RwLock::new(HashMap::new()),
            vertex_labels: RwLock::new(HashMap::new()),
            edge_labels: RwLock::new(HashMap::new()),
            auto_create,
        }
    }

    /// Rebuilds the registry from persisted definitions.
    pub fn hydrate(&self, elements: Vec<SchemaElement>) -> Result<()> {
        for element in elements {
            self.insert(element)?;
        }
        Ok(())
    }

    pub fn auto_create(&self) -> bool {
        self.auto_create
    }

    pub fn property_key(&self, name: &str) -> Result<Option<PropertyKey>> {
        let keys = self.property_keys.read().map_err(lock_err)?;
        Ok(keys.get(name).cloned())
    }

    pub fn vertex_label(&self, name: &str) -> Result<Option<VertexLabel>> {
        let labels = self.vertex_labels.read().map_err(lock_err)?;
        Ok(labels.get(name).cloned())
    }

    pub fn edge_label(&self, name: &str) -> Result<Option<EdgeLabel>> {
        let labels = self.edge_labels.read().map_err(lock_err)?;
        Ok(labels.get(name).cloned())
    }

    /// Looks up `name` for a write of `value`, falling back to an inferred default.
    pub fn resolve_property_key(&self, name: &str, value: &PropertyValue) -> Result<PropertyKey> {
        let key = match self.property_key(name)? {
            Some(key) => key,
            None if self.auto_create => {
                PropertyKey::new(name, value.data_type(), Cardinality::Single)
            }
            None => {
                return Err(GraphError::Schema(format!(
                    "Property key '{}' is not defined",
                    name
                )));
            }
        };
        if key.data_type != value.data_type() {
            return Err(GraphError::Schema(format!(
                "Property key '{}' expects {:?}, got {:?}",
                name,
                key.data_type,
                value.data_type()
            )));
        }
        Ok(key)
    }

    pub fn resolve_vertex_label(&self, name: &str) -> Result<VertexLabel> {
        match self.vertex_label(name)? {
            Some(label) => Ok(label),
            None if self.auto_create => Ok(VertexLabel {
                name: name.to_string(),
            }),
            None => Err(GraphError::Schema(format!(
                "Vertex label '{}' is not defined",
                name
            ))),
        }
    }

    pub fn resolve_edge_label(&self, name: &str) -> Result<EdgeLabel> {
        match self.edge_label(name)? {
            Some(label) => Ok(label),
            None if self.auto_create => Ok(EdgeLabel {
                name: name.to_string(),
                multiplicity: Multiplicity::Multi,
            }),
            None => Err(GraphError::Schema(format!(
                "Edge label '{}' is not defined",
                name
            ))),
        }
    }

    /// Explicit definition from a management session. Fails if the name is taken.
    pub fn define(&self, element: SchemaElement) -> Result<()> {
        if self.lookup(&element)?.is_some() {
            return Err(GraphError::Schema(format!(
                "Schema element '{}' is already defined",
                element.storage_key()
            )));
        }
        self.insert(element)
    }

    /// Whether a definition a transaction resolved earlier still has to be installed.
    ///
    /// An existing definition that differs from the resolved one means someone else
    /// defined the name in between; the transaction's view is stale.
    pub fn is_missing(&self, element: &SchemaElement) -> Result<bool> {
        match self.lookup(element)? {
            Some(existing) if existing == *element => Ok(false),
            Some(existing) => Err(GraphError::Schema(format!(
                "Schema element '{}' changed concurrently: now {:?}",
                element.storage_key(),
                existing
            ))),
            None => Ok(true),
        }
    }

    /// Installs a definition a transaction resolved earlier, if still missing.
    ///
    /// Returns the element when it was newly installed so the caller can persist it.
    pub fn ensure(&self, element: &SchemaElement) -> Result<Option<SchemaElement>> {
        if !self.is_missing(element)? {
            return Ok(None);
        }
        self.insert(element.clone())?;
        Ok(Some(element.clone()))
    }

    pub fn all(&self) -> Result<Vec<SchemaElement>> {
        let mut elements = Vec::new();
        let keys = self.property_keys.read().map_err(lock_err)?;
        elements.extend(keys.values().cloned().map(SchemaElement::PropertyKey));
        let vertex_labels = self.vertex_labels.read().map_err(lock_err)?;
        elements.extend(vertex_labels.values().cloned().map(SchemaElement::VertexLabel));
        let edge_labels = self.edge_labels.read().map_err(lock_err)?;
        elements.extend(edge_labels.values().cloned().map(SchemaElement::EdgeLabel));
        Ok(elements)
    }

    fn lookup(&self, element: &SchemaElement) -> Result<Option<SchemaElement>> {
        Ok(match element {
            SchemaElement::PropertyKey(k) => {
                self.property_key(&k.name)?.map(SchemaElement::PropertyKey)
            }
            SchemaElement::VertexLabel(l) => {
                self.vertex_label(&l.name)?.map(SchemaElement::VertexLabel)
            }
            SchemaElement::EdgeLabel(l) => self.edge_label(&l.name)?.map(SchemaElement::EdgeLabel),
        })
    }

    fn insert(&self, element: SchemaElement) -> Result<()> {
        match element {
            SchemaElement::PropertyKey(k) => {
                let mut keys = self.property_keys.write().map_err(lock_err)?;
                keys.insert(k.name.clone(), k);
            }
            SchemaElement::VertexLabel(l) => {
                let mut labels = self.vertex_labels.write().map_err(lock_err)?;
                labels.insert(l.name.clone(), l);
            }
            SchemaElement::EdgeLabel(l) => {
                let mut labels = self.edge_labels.write().map_err(lock_err)?;
                labels.insert(l.name.clone(), l);
            }
        }
        Ok(())
    }
}
