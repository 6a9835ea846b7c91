pub mod element;
pub mod index;
pub mod log;
pub mod schema;
pub mod value;

pub use element::{
    CommitSeq, Direction, Edge, EdgeId, EdgeVersion, Element, ElementId, ElementKind, TransactionId,
    Vertex, VertexId, VertexVersion,
};
pub use index::{EntrySpan, IndexDefinition, IndexEntryRecord, IndexKey, IndexKind, IndexStatus, SchemaAction};
pub use log::ChangeLogEntry;
pub use schema::{Cardinality, EdgeLabel, Multiplicity, PropertyKey, SchemaElement, VertexLabel};
pub use value::{DataType, PropertyValue};
