pub mod rocks_backend;

pub use rocks_backend::RocksBackend;
