use graphwright::types::{
    Cardinality, DataType, Direction, IndexStatus, Multiplicity, PropertyValue, SchemaAction, VertexId,
};
use graphwright::{GraphConfig, GraphEngine, GraphError, TraversalItem};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

// Fast partition propagation keeps the lifecycle tests quick.
fn open(path: &Path) -> GraphEngine {
    let mut config = GraphConfig::with_path(path);
    config.index.propagation_delay_ms = 1;
    GraphEngine::open(config).unwrap()
}

fn define_ident(engine: &GraphEngine) {
    let mut mgmt = engine.open_management();
    mgmt.make_property_key("ident", DataType::String, Cardinality::Single)
        .unwrap();
    mgmt.commit().unwrap();
}

fn add_user(engine: &GraphEngine, label: &str, ident: &str) -> VertexId {
    let mut tx = engine.begin().unwrap();
    let id = tx.add_vertex(label).unwrap();
    tx.set_vertex_property(id, "ident", ident).unwrap();
    engine.commit(tx).unwrap();
    id
}

fn count(items: &[TraversalItem]) -> u64 {
    match items {
        [TraversalItem::Count { count }] => *count,
        other => panic!("expected a single count, got {:?}", other),
    }
}

/// Builds `vertexByIdent`, waits for REGISTERED and reindexes into ENABLED.
async fn enable_ident_index(engine: &GraphEngine, unique: bool) {
    let mut mgmt = engine.open_management();
    mgmt.build_composite_index("vertexByIdent", &["ident"], None, unique)
        .unwrap();
    mgmt.commit().unwrap();
    engine
        .await_index_status("vertexByIdent", IndexStatus::Registered, None)
        .await
        .unwrap();

    let mut mgmt = engine.open_management();
    mgmt.update_index("vertexByIdent", SchemaAction::Reindex).unwrap();
    for job in mgmt.commit().unwrap() {
        job.wait().await.unwrap();
    }
    engine
        .await_index_status("vertexByIdent", IndexStatus::Enabled, None)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_in_step_finds_the_related_vertex() {
    // --- 1. SETUP ---
    let dir = tempdir().unwrap();
    let engine = open(dir.path());
    define_ident(&engine);

    // --- 2. ACTION ---
    let mut tx = engine.begin().unwrap();
    let uuid = tx.add_vertex("uuid").unwrap();
    tx.set_vertex_property(uuid, "ident", "u1").unwrap();
    let user = tx.add_vertex("user_id").unwrap();
    tx.set_vertex_property(user, "ident", "user1").unwrap();
    tx.add_edge(uuid, "related", user).unwrap();
    engine.commit(tx).unwrap();

    // --- 3. VERIFICATION ---
    let found = engine
        .traversal()
        .unwrap()
        .v()
        .has_label(&["user_id"])
        .in_(&["related"])
        .to_list()
        .unwrap();
    assert_eq!(found.len(), 1);
    let vertex = found[0].as_vertex().unwrap();
    assert_eq!(vertex.id, uuid);
    assert_eq!(vertex.label, "uuid");

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_unique_composite_rejects_second_owner() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());
    define_ident(&engine);
    let original = add_user(&engine, "uuid", "u1");
    enable_ident_index(&engine, true).await;

    let mut tx = engine.begin().unwrap();
    let dup = tx.add_vertex("uuid").unwrap();
    tx.set_vertex_property(dup, "ident", "u1").unwrap();
    let result = engine.commit(tx);
    assert!(matches!(result, Err(GraphError::UniquenessViolation { ref index, .. }) if index == "vertexByIdent"));

    // Nothing of the failed transaction is left behind.
    let owners = engine
        .traversal()
        .unwrap()
        .v()
        .has("ident", "u1")
        .to_list()
        .unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].as_vertex().unwrap().id, original);
    assert_eq!(count(&engine.traversal().unwrap().v().count().to_list().unwrap()), 1);

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_unique_key_is_free_again_after_its_owner_moves() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());
    define_ident(&engine);
    let first = add_user(&engine, "uuid", "u1");
    enable_ident_index(&engine, true).await;

    // Releasing and claiming the same key in one transaction is allowed.
    let mut tx = engine.begin().unwrap();
    tx.set_vertex_property(first, "ident", "u1-renamed").unwrap();
    let second = tx.add_vertex("uuid").unwrap();
    tx.set_vertex_property(second, "ident", "u1").unwrap();
    engine.commit(tx).unwrap();

    let owner = engine.traversal().unwrap().v().has("ident", "u1").to_list().unwrap();
    assert_eq!(owner.len(), 1);
    assert_eq!(owner[0].as_vertex().unwrap().id, second);

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_remove_all_vertices() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());
    let a = add_user(&engine, "uuid", "u1");
    let b = add_user(&engine, "user_id", "user1");
    let mut tx = engine.begin().unwrap();
    tx.add_edge(a, "related", b).unwrap();
    engine.commit(tx).unwrap();

    let mut tx = engine.begin().unwrap();
    let all = tx.traversal().unwrap().v().to_list().unwrap();
    for item in &all {
        tx.remove_vertex(item.as_vertex().unwrap().id).unwrap();
    }
    engine.commit(tx).unwrap();

    assert!(engine.traversal().unwrap().v().to_list().unwrap().is_empty());
    assert!(engine.traversal().unwrap().e().to_list().unwrap().is_empty());

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_index_is_only_planned_once_enabled() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());
    define_ident(&engine);
    add_user(&engine, "uuid", "u1");

    let mut mgmt = engine.open_management();
    mgmt.build_composite_index("vertexByIdent", &["ident"], None, false)
        .unwrap();
    mgmt.commit().unwrap();
    engine
        .await_index_status("vertexByIdent", IndexStatus::Registered, None)
        .await
        .unwrap();

    let plan = engine.traversal().unwrap().v().has("ident", "u1").explain().unwrap();
    assert_eq!(plan[0], "scan vertices");

    let mut mgmt = engine.open_management();
    mgmt.update_index("vertexByIdent", SchemaAction::Reindex).unwrap();
    for job in mgmt.commit().unwrap() {
        let report = job.wait().await.unwrap();
        assert_eq!(report.elements_scanned, 1);
        assert_eq!(report.entries_written, 1);
    }

    let plan = engine.traversal().unwrap().v().has("ident", "u1").explain().unwrap();
    assert!(plan[0].starts_with("composite index vertexByIdent"));
    assert_eq!(
        engine.traversal().unwrap().v().has("ident", "u1").to_list().unwrap().len(),
        1
    );

    engine.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reindex_catches_commits_made_while_it_runs() {
    let dir = tempdir().unwrap();
    let engine = Arc::new(open(dir.path()));
    define_ident(&engine);

    let mut tx = engine.begin().unwrap();
    for i in 0..2_000 {
        let id = tx.add_vertex("uuid").unwrap();
        tx.set_vertex_property(id, "ident", format!("before-{}", i)).unwrap();
    }
    engine.commit(tx).unwrap();

    let mut mgmt = engine.open_management();
    mgmt.build_composite_index("vertexByIdent", &["ident"], None, false)
        .unwrap();
    mgmt.commit().unwrap();
    engine
        .await_index_status("vertexByIdent", IndexStatus::Registered, None)
        .await
        .unwrap();

    let mut mgmt = engine.open_management();
    mgmt.update_index("vertexByIdent", SchemaAction::Reindex).unwrap();
    let jobs = mgmt.commit().unwrap();

    // A writer races the reindex.
    let writer = {
        let engine = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || {
            for i in 0..50 {
                let mut tx = engine.begin().unwrap();
                let id = tx.add_vertex("uuid").unwrap();
                tx.set_vertex_property(id, "ident", format!("during-{}", i)).unwrap();
                engine.commit(tx).unwrap();
            }
        })
    };
    for job in jobs {
        job.wait().await.unwrap();
    }
    writer.await.unwrap();

    engine
        .await_index_status("vertexByIdent", IndexStatus::Enabled, None)
        .await
        .unwrap();
    assert_eq!(engine.index_entry_count("vertexByIdent").unwrap(), 2_050);

    // Every vertex is reachable through the index, old or new.
    for ident in ["before-0", "before-1999", "during-0", "during-49"] {
        let found = engine.traversal().unwrap().v().has("ident", ident).to_list().unwrap();
        assert_eq!(found.len(), 1, "{} not found through the index", ident);
    }

    Arc::try_unwrap(engine).unwrap().close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unique_index_rejects_duplicates_while_it_is_rebuilt() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());
    define_ident(&engine);
    let mut tx = engine.begin().unwrap();
    for i in 0..20_000 {
        let id = tx.add_vertex("uuid").unwrap();
        tx.set_vertex_property(id, "ident", format!("v{}", i)).unwrap();
    }
    engine.commit(tx).unwrap();
    enable_ident_index(&engine, true).await;

    // The rebuild flips the index to REINDEXING before the scan starts.
    let mut mgmt = engine.open_management();
    mgmt.update_index("vertexByIdent", SchemaAction::Reindex).unwrap();
    let jobs = mgmt.commit().unwrap();

    let mut tx = engine.begin().unwrap();
    let dup = tx.add_vertex("uuid").unwrap();
    tx.set_vertex_property(dup, "ident", "v0").unwrap();
    assert!(matches!(
        engine.commit(tx),
        Err(GraphError::UniquenessViolation { ref index, .. }) if index == "vertexByIdent"
    ));

    for job in jobs {
        job.wait().await.unwrap();
    }
    assert_eq!(engine.index("vertexByIdent").unwrap().status, IndexStatus::Enabled);
    assert_eq!(
        engine.traversal().unwrap().v().has("ident", "v0").to_list().unwrap().len(),
        1
    );

    engine.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_on_a_unique_key_admit_one_owner() {
    let dir = tempdir().unwrap();
    let engine = Arc::new(open(dir.path()));
    define_ident(&engine);
    enable_ident_index(&engine, true).await;

    // Every transaction starts from the same snapshot.
    let mut pending = Vec::new();
    for _ in 0..8 {
        let mut tx = engine.begin().unwrap();
        let id = tx.add_vertex("uuid").unwrap();
        tx.set_vertex_property(id, "ident", "shared").unwrap();
        pending.push(tx);
    }

    let commits: Vec<_> = pending
        .into_iter()
        .map(|tx| {
            let engine = Arc::clone(&engine);
            tokio::task::spawn_blocking(move || engine.commit(tx))
        })
        .collect();
    let mut committed = 0;
    for commit in commits {
        match commit.await.unwrap() {
            Ok(_) => committed += 1,
            Err(GraphError::UniquenessViolation { index, .. }) => assert_eq!(index, "vertexByIdent"),
            Err(e) => panic!("unexpected commit failure: {}", e),
        }
    }
    assert_eq!(committed, 1);
    assert_eq!(
        engine.traversal().unwrap().v().has("ident", "shared").to_list().unwrap().len(),
        1
    );

    Arc::try_unwrap(engine).unwrap().close().await.unwrap();
}

#[tokio::test]
async fn test_open_transaction_keeps_its_view_across_a_reindex() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());
    define_ident(&engine);
    add_user(&engine, "uuid", "u1");

    let mut mgmt = engine.open_management();
    mgmt.build_composite_index("vertexByIdent", &["ident"], None, false)
        .unwrap();
    mgmt.commit().unwrap();
    engine
        .await_index_status("vertexByIdent", IndexStatus::Registered, None)
        .await
        .unwrap();

    let reader = engine.begin().unwrap();
    assert_eq!(reader.traversal().unwrap().v().has("ident", "u1").to_list().unwrap().len(), 1);

    // Later commits push the reindex past the reader's snapshot.
    add_user(&engine, "uuid", "u2");
    let mut mgmt = engine.open_management();
    mgmt.update_index("vertexByIdent", SchemaAction::Reindex).unwrap();
    for job in mgmt.commit().unwrap() {
        job.wait().await.unwrap();
    }
    assert_eq!(engine.index("vertexByIdent").unwrap().status, IndexStatus::Enabled);

    // The reader still plans a scan and still sees its vertex; new readers use the index.
    let again = reader.traversal().unwrap().v().has("ident", "u1");
    assert_eq!(again.explain().unwrap()[0], "scan vertices");
    assert_eq!(again.to_list().unwrap().len(), 1);
    assert!(reader.traversal().unwrap().v().has("ident", "u2").to_list().unwrap().is_empty());
    let plan = engine.traversal().unwrap().v().has("ident", "u1").explain().unwrap();
    assert!(plan[0].starts_with("composite index vertexByIdent"));
    engine.rollback(reader).unwrap();

    engine.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_reindex_reverts_status() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());
    define_ident(&engine);

    let mut tx = engine.begin().unwrap();
    for i in 0..5_000 {
        let id = tx.add_vertex("uuid").unwrap();
        tx.set_vertex_property(id, "ident", format!("v{}", i)).unwrap();
    }
    engine.commit(tx).unwrap();

    let mut mgmt = engine.open_management();
    mgmt.build_composite_index("vertexByIdent", &["ident"], None, false)
        .unwrap();
    mgmt.commit().unwrap();
    engine
        .await_index_status("vertexByIdent", IndexStatus::Registered, None)
        .await
        .unwrap();

    let mut mgmt = engine.open_management();
    mgmt.update_index("vertexByIdent", SchemaAction::Reindex).unwrap();
    let job = mgmt.commit().unwrap().pop().unwrap();
    job.cancel();

    match job.wait().await {
        Err(GraphError::Cancelled(_)) => {
            assert_eq!(engine.index("vertexByIdent").unwrap().status, IndexStatus::Registered);
            // Commits kept maintaining it; the planner still ignores it.
            let plan = engine.traversal().unwrap().v().has("ident", "v1").explain().unwrap();
            assert_eq!(plan[0], "scan vertices");
        }
        // The scan can win the race against the cancel.
        Ok(_) => assert_eq!(engine.index("vertexByIdent").unwrap().status, IndexStatus::Enabled),
        Err(e) => panic!("unexpected reindex failure: {}", e),
    }

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_await_timeout_leaves_index_untouched() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());
    define_ident(&engine);

    let mut mgmt = engine.open_management();
    mgmt.build_composite_index("vertexByIdent", &["ident"], None, false)
        .unwrap();
    mgmt.commit().unwrap();
    engine
        .await_index_status("vertexByIdent", IndexStatus::Registered, None)
        .await
        .unwrap();

    let result = engine
        .await_index_status("vertexByIdent", IndexStatus::Enabled, Some(Duration::from_millis(20)))
        .await;
    let err = result.unwrap_err();
    assert!(matches!(err, GraphError::Timeout { status: IndexStatus::Enabled, .. }));
    assert!(err.is_retryable());
    assert_eq!(engine.index("vertexByIdent").unwrap().status, IndexStatus::Registered);

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_disable_then_remove_is_idempotent() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());
    define_ident(&engine);
    add_user(&engine, "uuid", "u1");
    enable_ident_index(&engine, true).await;
    assert_eq!(engine.index_entry_count("vertexByIdent").unwrap(), 1);

    // Removal needs DISABLED first.
    let mut mgmt = engine.open_management();
    mgmt.update_index("vertexByIdent", SchemaAction::RemoveIndex).unwrap();
    assert!(matches!(mgmt.commit(), Err(GraphError::Index(_))));

    for _ in 0..2 {
        let mut mgmt = engine.open_management();
        mgmt.update_index("vertexByIdent", SchemaAction::DisableIndex).unwrap();
        for job in mgmt.commit().unwrap() {
            job.wait().await.unwrap();
        }
    }
    engine
        .await_index_status("vertexByIdent", IndexStatus::Disabled, None)
        .await
        .unwrap();

    // A disabled unique index no longer guards its key.
    add_user(&engine, "uuid", "u1");

    for _ in 0..2 {
        let mut mgmt = engine.open_management();
        mgmt.update_index("vertexByIdent", SchemaAction::RemoveIndex).unwrap();
        for job in mgmt.commit().unwrap() {
            job.wait().await.unwrap();
        }
    }
    assert_eq!(engine.index("vertexByIdent").unwrap().status, IndexStatus::Removed);
    assert_eq!(engine.index_entry_count("vertexByIdent").unwrap(), 0);

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_edge_and_property_indexes_answer_traversals() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());

    let mut mgmt = engine.open_management();
    mgmt.make_property_key("ident", DataType::String, Cardinality::Single)
        .unwrap();
    mgmt.make_property_key("create_at", DataType::Integer, Cardinality::Single)
        .unwrap();
    mgmt.make_property_key("refer", DataType::String, Cardinality::Set)
        .unwrap();
    mgmt.make_edge_label("related", Multiplicity::Multi).unwrap();
    mgmt.commit().unwrap();

    let mut tx = engine.begin().unwrap();
    let hub = tx.add_vertex("uuid").unwrap();
    tx.set_vertex_property(hub, "refer", "u1").unwrap();
    tx.set_vertex_property(hub, "refer", "u2").unwrap();
    tx.set_vertex_property(hub, "refer", "u1").unwrap();
    let mut targets = Vec::new();
    for at in 0..5i64 {
        let target = tx.add_vertex("user_id").unwrap();
        let edge = tx.add_edge(hub, "related", target).unwrap();
        tx.set_edge_property(edge, "create_at", at).unwrap();
        targets.push(target);
    }
    engine.commit(tx).unwrap();

    let mut mgmt = engine.open_management();
    mgmt.build_edge_index("relatedByCreateAt", "related", Direction::Both, &["create_at"])
        .unwrap();
    mgmt.build_property_index("referIndex", "refer", &[]).unwrap();
    mgmt.commit().unwrap();
    for name in ["relatedByCreateAt", "referIndex"] {
        engine
            .await_index_status(name, IndexStatus::Registered, None)
            .await
            .unwrap();
    }
    let mut mgmt = engine.open_management();
    mgmt.update_index("relatedByCreateAt", SchemaAction::Reindex).unwrap();
    mgmt.update_index("referIndex", SchemaAction::Reindex).unwrap();
    for job in mgmt.commit().unwrap() {
        job.wait().await.unwrap();
    }

    // Both endpoints anchor an entry.
    assert_eq!(engine.index_entry_count("relatedByCreateAt").unwrap(), 10);
    // SET cardinality stored "u1" once.
    assert_eq!(engine.index_entry_count("referIndex").unwrap(), 2);

    let by_time = engine
        .traversal()
        .unwrap()
        .v_ids(vec![hub])
        .out_e(&["related"])
        .has("create_at", 3i64)
        .in_v();
    assert!(by_time.explain().unwrap()[1].starts_with("edge index relatedByCreateAt"));
    let found = by_time.to_list().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].as_vertex().unwrap().id, targets[3]);

    // The same index serves the other direction.
    let back = engine
        .traversal()
        .unwrap()
        .v_ids(vec![targets[0]])
        .in_e(&["related"])
        .has("create_at", 0i64)
        .other_v()
        .to_list()
        .unwrap();
    assert_eq!(back[0].as_vertex().unwrap().id, hub);

    let referring = engine.traversal().unwrap().v().has("refer", "u2");
    assert!(referring.explain().unwrap()[1].starts_with("property index referIndex"));
    assert_eq!(referring.to_list().unwrap().len(), 1);

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_transaction_traversal_sees_pending_writes() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());
    define_ident(&engine);
    add_user(&engine, "uuid", "u1");
    enable_ident_index(&engine, false).await;

    let mut writer = engine.begin().unwrap();
    let pending = writer.add_vertex("uuid").unwrap();
    writer.set_vertex_property(pending, "ident", "u2").unwrap();

    // Index lookups inside the transaction include its own uncommitted vertices.
    let own = writer.traversal().unwrap().v().has("ident", "u2").to_list().unwrap();
    assert_eq!(own.len(), 1);
    assert!(engine.traversal().unwrap().v().has("ident", "u2").to_list().unwrap().is_empty());

    let values = writer
        .traversal()
        .unwrap()
        .v()
        .values(&["ident"])
        .dedup()
        .to_list()
        .unwrap();
    assert_eq!(values.len(), 2);

    engine.commit(writer).unwrap();
    assert_eq!(
        engine.traversal().unwrap().v().has("ident", "u2").to_list().unwrap().len(),
        1
    );

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_reopen_restores_data_schema_and_indexes() {
    let dir = tempdir().unwrap();
    let (uuid, user) = {
        let engine = open(dir.path());
        define_ident(&engine);
        let uuid = add_user(&engine, "uuid", "u1");
        let user = add_user(&engine, "user_id", "user1");
        let mut tx = engine.begin().unwrap();
        tx.add_edge(uuid, "related", user).unwrap();
        engine.commit(tx).unwrap();
        enable_ident_index(&engine, true).await;
        engine.close().await.unwrap();
        (uuid, user)
    };

    let engine = open(dir.path());
    assert_eq!(engine.index("vertexByIdent").unwrap().status, IndexStatus::Enabled);
    assert!(
        engine
            .schema_elements()
            .unwrap()
            .iter()
            .any(|e| e.storage_key().contains("ident"))
    );

    let found = engine.traversal().unwrap().v().has("ident", "user1").in_(&["related"]).to_list().unwrap();
    assert_eq!(found[0].as_vertex().unwrap().id, uuid);
    assert_eq!(
        engine.traversal().unwrap().v_ids(vec![user]).values(&["ident"]).to_list().unwrap(),
        vec![TraversalItem::Value {
            value: PropertyValue::from("user1")
        }]
    );

    // The unique constraint survived the restart too.
    let mut tx = engine.begin().unwrap();
    let dup = tx.add_vertex("uuid").unwrap();
    tx.set_vertex_property(dup, "ident", "u1").unwrap();
    assert!(matches!(engine.commit(tx), Err(GraphError::UniquenessViolation { .. })));

    engine.close().await.unwrap();
}

#[tokio::test]
async fn test_traverse_runs_step_lists() {
    let dir = tempdir().unwrap();
    let engine = Arc::new(open(dir.path()));
    add_user(&engine, "uuid", "u1");
    add_user(&engine, "uuid", "u2");

    let items = engine
        .traverse(vec![
            graphwright::Step::V(vec![]),
            graphwright::Step::HasLabel(vec!["uuid".into()]),
            graphwright::Step::Limit(1),
            graphwright::Step::Count,
        ])
        .await
        .unwrap();
    assert_eq!(count(&items), 1);
}
