// Index lifecycle and physical entries

pub mod entries;
pub mod job;
pub mod manager;

pub use job::{IndexJob, JobReport, JobState};
pub use manager::IndexManager;
