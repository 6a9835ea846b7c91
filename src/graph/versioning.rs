use std::collections::HashMap;
use std::sync::RwLock; // Read-Write Lock: many readers or one writer at a time.

use crate::error::{Result, lock_err};
use crate::types::{CommitSeq, Edge, EdgeId, EdgeVersion, Vertex, VertexId, VertexVersion};

/// VersionStore keeps every committed version of every vertex and edge for MVCC.
///
/// Version chains are appended in commit order, so the newest version sits last.
/// Nothing is ever garbage-collected: any snapshot taken since the store was opened
/// stays readable.
#[derive(Debug, Default)]
pub struct VersionStore {
    vertex_versions: RwLock<HashMap<VertexId, Vec<VertexVersion>>>,
    edge_versions: RwLock<HashMap<EdgeId, Vec<EdgeVersion>>>,
    // Every edge that has ever touched a vertex. Filtered by snapshot on read.
    adjacency: RwLock<HashMap<VertexId, Vec<EdgeId>>>,
}

impl VersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The vertex as seen by a reader at `snapshot`, or `None` if it did not
    /// exist (or was already removed) at that point.
    pub fn vertex_at(&self, vertex_id: &VertexId, snapshot: CommitSeq) -> Result<Option<Vertex>> {
        let versions_map = self.vertex_versions.read().map_err(lock_err)?;

        // Search backwards from the newest version to the oldest.
        Ok(versions_map.get(vertex_id).and_then(|versions| {
            versions
                .iter()
                .rev()
                .find(|v| v.commit_seq <= snapshot)
                .and_then(|v| v.data.clone())
        }))
    }

    pub fn edge_at(&self, edge_id: &EdgeId, snapshot: CommitSeq) -> Result<Option<Edge>> {
        let versions_map = self.edge_versions.read().map_err(lock_err)?;

        Ok(versions_map.get(edge_id).and_then(|versions| {
            versions
                .iter()
                .rev()
                .find(|v| v.commit_seq <= snapshot)
                .and_then(|v| v.data.clone())
        }))
    }

    /// Appends a new version to a vertex's history chain.
    pub fn add_vertex_version(&self, version: VertexVersion) -> Result<()> {
        let mut versions_map = self.vertex_versions.write().map_err(lock_err)?;
        versions_map
            .entry(version.vertex_id)
            .or_default()
            .push(version);
        Ok(())
    }

    /// Appends a new version to an edge's history chain and records its endpoints.
    pub fn add_edge_version(&self, version: EdgeVersion) -> Result<()> {
        let mut versions_map = self.edge_versions.write().map_err(lock_err)?;
        let chain = versions_map.entry(version.edge_id).or_default();

        // Endpoints never change, so only the first version feeds the adjacency map.
        if chain.is_empty() {
            if let Some(edge) = &version.data {
                let mut adjacency = self.adjacency.write().map_err(lock_err)?;
                adjacency.entry(edge.out_vertex).or_default().push(edge.id);
                if edge.in_vertex != edge.out_vertex {
                    adjacency.entry(edge.in_vertex).or_default().push(edge.id);
                }
            }
        }
        chain.push(version);
        Ok(())
    }

    /// Sequence number of the newest version of a vertex, if it was ever written.
    pub fn vertex_last_modified(&self, vertex_id: &VertexId) -> Result<Option<(CommitSeq, u64)>> {
        let versions_map = self.vertex_versions.read().map_err(lock_err)?;
        Ok(versions_map
            .get(vertex_id)
            .and_then(|versions| versions.last())
            .map(|v| (v.commit_seq, v.version)))
    }

    pub fn edge_last_modified(&self, edge_id: &EdgeId) -> Result<Option<(CommitSeq, u64)>> {
        let versions_map = self.edge_versions.read().map_err(lock_err)?;
        Ok(versions_map
            .get(edge_id)
            .and_then(|versions| versions.last())
            .map(|v| (v.commit_seq, v.version)))
    }

    /// Ids of vertices alive at `snapshot`.
    pub fn vertex_ids_at(&self, snapshot: CommitSeq) -> Result<Vec<VertexId>> {
        let versions_map = self.vertex_versions.read().map_err(lock_err)?;
        Ok(versions_map
            .iter()
            .filter(|(_, versions)| {
                versions
                    .iter()
                    .rev()
                    .find(|v| v.commit_seq <= snapshot)
                    .is_some_and(|v| v.data.is_some())
            })
            .map(|(id, _)| *id)
            .collect())
    }

    /// Ids of edges alive at `snapshot`.
    pub fn edge_ids_at(&self, snapshot: CommitSeq) -> Result<Vec<EdgeId>> {
        let versions_map = self.edge_versions.read().map_err(lock_err)?;
        Ok(versions_map
            .iter()
            .filter(|(_, versions)| {
                versions
                    .iter()
                    .rev()
                    .find(|v| v.commit_seq <= snapshot)
                    .is_some_and(|v| v.data.is_some())
            })
            .map(|(id, _)| *id)
            .collect())
    }

    /// Every edge that ever touched `vertex_id`, alive or not.
    pub fn incident_edge_ids(&self, vertex_id: &VertexId) -> Result<Vec<EdgeId>> {
        let adjacency = self.adjacency.read().map_err(lock_err)?;
        Ok(adjacency.get(vertex_id).cloned().unwrap_or_default())
    }

    /// Highest commit sequence found in any chain. Used when hydrating from disk.
    pub fn max_commit_seq(&self) -> Result<CommitSeq> {
        let vertices = self.vertex_versions.read().map_err(lock_err)?;
        let edges = self.edge_versions.read().map_err(lock_err)?;
        let v_max = vertices
            .values()
            .filter_map(|chain| chain.last())
            .map(|v| v.commit_seq)
            .max()
            .unwrap_or(0);
        let e_max = edges
            .values()
            .filter_map(|chain| chain.last())
            .map(|v| v.commit_seq)
            .max()
            .unwrap_or(0);
        Ok(v_max.max(e_max))
    }
}
