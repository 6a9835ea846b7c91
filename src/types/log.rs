use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::element::{CommitSeq, EdgeId, TransactionId, VertexId};

/// One committed transaction, as recorded in the store's change log.
/// Reindex jobs replay these to catch elements committed after their scan snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub seq: CommitSeq,
    pub tx_id: TransactionId,
    pub committed_at: DateTime<Utc>,
    pub vertices: Vec<VertexId>,
    pub edges: Vec<EdgeId>,
}
