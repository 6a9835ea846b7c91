//! A transactional property-graph store on RocksDB with online index lifecycle
//! management and lazy, index-aware traversals.

pub mod api;
pub mod config;
pub mod error;
pub mod graph;
pub mod index;
pub mod storage;
pub mod traversal;
pub mod types;

pub use config::GraphConfig;
pub use error::{GraphError, Result};
pub use graph::{GraphEngine, ManagementSession, Transaction};
pub use index::{IndexJob, JobReport, JobState};
pub use traversal::{Step, Traversal, TraversalItem};
