use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{GraphError, Result};
use crate::types::SchemaAction;

/// Where a background index job currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum JobState {
    Running { scanned: usize },
    Completed,
    Cancelled,
    Failed(String),
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobState::Running { .. })
    }
}

/// Outcome of a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub index: String,
    pub action: SchemaAction,
    pub elements_scanned: usize,
    pub entries_written: usize,
}

impl JobReport {
    pub fn empty(index: &str, action: SchemaAction) -> Self {
        Self {
            index: index.to_string(),
            action,
            elements_scanned: 0,
            entries_written: 0,
        }
    }
}

/// Handle to an index action. Await it with [`IndexJob::wait`], stop it with
/// [`IndexJob::cancel`]. Dropping the handle does not stop the job.
#[derive(Debug)]
pub struct IndexJob {
    index: String,
    action: SchemaAction,
    state: watch::Receiver<JobState>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<Result<JobReport>>>,
}

impl IndexJob {
    pub(crate) fn spawned(
        index: &str,
        action: SchemaAction,
        state: watch::Receiver<JobState>,
        cancel: CancellationToken,
        handle: JoinHandle<Result<JobReport>>,
    ) -> Self {
        Self {
            index: index.to_string(),
            action,
            state,
            cancel,
            handle: Some(handle),
        }
    }

    /// A job whose work was done synchronously.
    pub(crate) fn completed(index: &str, action: SchemaAction) -> Self {
        let (_tx, state) = watch::channel(JobState::Completed);
        Self {
            index: index.to_string(),
            action,
            state,
            cancel: CancellationToken::new(),
            handle: None,
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn action(&self) -> SchemaAction {
        self.action
    }

    pub fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    /// Asks the job to stop. A reindex stops at the next element and reverts the
    /// index to the status it had before.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(mut self) -> Result<JobReport> {
        match self.handle.take() {
            Some(handle) => handle.await.map_err(GraphError::from)?,
            None => Ok(JobReport::empty(&self.index, self.action)),
        }
    }
}
