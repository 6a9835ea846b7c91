//! Walks the whole engine in-process: schema, data, the three index kinds with
//! reindex, traversals, a uniqueness failure, removal of all vertices and the
//! two-phase drop of an index.
//!
//! Usage: `build-inside [DATA_DIR]`. Without an argument a fresh directory under
//! the system temp dir is used, so the walkthrough can be repeated.

use chrono::Utc;
use graphwright::index::IndexJob;
use graphwright::types::{Cardinality, DataType, Direction, IndexStatus, Multiplicity, PropertyValue, SchemaAction};
use graphwright::{GraphConfig, GraphEngine, GraphError, Result};
use std::path::PathBuf;
use tracing::{info, warn};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join(format!("graphwright-demo-{}", Uuid::new_v4())));
    let mut config = GraphConfig::load()?;
    config.storage.path = path;
    let engine = GraphEngine::open(config)?;

    banner("create schema");
    create_schema(&engine)?;

    banner("add vertices and edges");
    add_elements(&engine)?;

    banner("traversal: V().hasLabel(user_id).in(related)");
    let found = engine
        .traversal()?
        .v()
        .has_label(&["user_id"])
        .in_(&["related"])
        .values(&["ident"])
        .to_list()?;
    info!(?found, "users related to a user_id vertex");

    banner("composite index vertexByIdent");
    build_and_enable(&engine, "vertexByIdent", |mgmt| {
        mgmt.build_composite_index("vertexByIdent", &["ident"], None, true)
    })
    .await?;
    let plan = engine.traversal()?.v().has("ident", "u1").explain()?;
    info!(?plan, "lookup by ident");

    banner("uniqueness");
    let mut tx = engine.begin()?;
    let duplicate = tx.add_vertex("uuid")?;
    tx.set_vertex_property(duplicate, "ident", "u1")?;
    match engine.commit(tx) {
        Err(e @ GraphError::UniquenessViolation { .. }) => warn!(error = %e, "duplicate ident rejected"),
        Err(e) => return Err(e),
        Ok(_) => warn!("duplicate ident was accepted"),
    }

    banner("edge index relatedByCreateAt");
    build_and_enable(&engine, "relatedByCreateAt", |mgmt| {
        mgmt.build_edge_index("relatedByCreateAt", "related", Direction::Both, &["create_at"])
    })
    .await?;

    banner("property index referByCreateAt");
    build_and_enable(&engine, "referByCreateAt", |mgmt| {
        mgmt.build_property_index("referByCreateAt", "refer", &["create_at"])
    })
    .await?;
    let referred = engine.traversal()?.v().has("refer", "u1").values(&["ident"]).to_list()?;
    info!(?referred, "vertices referring to u1");
    for index in engine.indexes()? {
        info!(
            index = %index.name,
            status = ?index.status,
            entries = engine.index_entry_count(&index.name)?,
            "index ready"
        );
    }

    banner("remove all vertices");
    let mut tx = engine.begin()?;
    let all = tx.traversal()?.v().to_list()?;
    for item in &all {
        if let Some(vertex) = item.as_vertex() {
            tx.remove_vertex(vertex.id)?;
        }
    }
    engine.commit(tx)?;
    let left = engine.traversal()?.v().count().to_list()?;
    info!(?left, "vertices after removal");

    banner("disable and remove vertexByIdent");
    let mut mgmt = engine.open_management();
    mgmt.update_index("vertexByIdent", SchemaAction::DisableIndex)?;
    wait_all(mgmt.commit()?).await?;
    engine
        .await_index_status("vertexByIdent", IndexStatus::Disabled, None)
        .await?;
    let mut mgmt = engine.open_management();
    mgmt.update_index("vertexByIdent", SchemaAction::RemoveIndex)?;
    wait_all(mgmt.commit()?).await?;
    info!(status = ?engine.index("vertexByIdent")?.status, "index dropped");

    engine.close().await?;
    banner("done");
    Ok(())
}

fn banner(stage: &str) {
    info!("========== {} ==========", stage);
}

fn create_schema(engine: &GraphEngine) -> Result<()> {
    let mut mgmt = engine.open_management();
    mgmt.make_property_key("ident", DataType::String, Cardinality::Single)?;
    mgmt.make_property_key("create_at", DataType::DateTime, Cardinality::Single)?;
    mgmt.make_property_key("refer", DataType::String, Cardinality::Set)?;
    mgmt.make_vertex_label("uuid")?;
    mgmt.make_vertex_label("user_id")?;
    mgmt.make_edge_label("related", Multiplicity::Multi)?;
    mgmt.commit()?;
    Ok(())
}

fn add_elements(engine: &GraphEngine) -> Result<()> {
    let now = PropertyValue::DateTime(Utc::now().timestamp_millis());
    let mut tx = engine.begin()?;

    let uuid = tx.add_vertex("uuid")?;
    tx.set_vertex_property(uuid, "ident", "u1")?;
    tx.set_vertex_property(uuid, "create_at", now.clone())?;

    let user = tx.add_vertex("user_id")?;
    tx.set_vertex_property(user, "ident", "user1")?;
    tx.set_vertex_property(user, "create_at", now.clone())?;
    tx.set_vertex_property(user, "refer", "u1")?;
    tx.set_vertex_property(user, "refer", "u2")?;
    // SET cardinality: a repeated value is stored once.
    tx.set_vertex_property(user, "refer", "u1")?;

    let related = tx.add_edge(uuid, "related", user)?;
    tx.set_edge_property(related, "create_at", now)?;

    let seq = engine.commit(tx)?;
    info!(seq, %uuid, %user, %related, "elements committed");
    Ok(())
}

/// Builds an index, waits for REGISTERED, reindexes existing data and waits for
/// ENABLED.
async fn build_and_enable<F>(engine: &GraphEngine, name: &str, build: F) -> Result<()>
where
    F: FnOnce(&mut graphwright::ManagementSession) -> Result<()>,
{
    let mut mgmt = engine.open_management();
    build(&mut mgmt)?;
    mgmt.commit()?;
    engine.await_index_status(name, IndexStatus::Registered, None).await?;

    let mut mgmt = engine.open_management();
    mgmt.update_index(name, SchemaAction::Reindex)?;
    wait_all(mgmt.commit()?).await?;
    engine.await_index_status(name, IndexStatus::Enabled, None).await?;
    info!(index = name, "index enabled");
    Ok(())
}

async fn wait_all(jobs: Vec<IndexJob>) -> Result<()> {
    for job in jobs {
        let report = job.wait().await?;
        info!(
            index = %report.index,
            action = ?report.action,
            scanned = report.elements_scanned,
            written = report.entries_written,
            "job finished"
        );
    }
    Ok(())
}
