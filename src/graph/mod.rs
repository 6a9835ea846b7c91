// Graph engine module

pub mod engine;
pub mod management;
pub mod schema;
pub mod store;
pub mod transaction;
pub mod versioning;

pub use engine::GraphEngine;
pub use management::ManagementSession;
pub use transaction::{Transaction, TransactionManager};
