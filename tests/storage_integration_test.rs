use chrono::Utc;
use graphwright::storage::RocksBackend;
use graphwright::types::{
    Cardinality, ChangeLogEntry, DataType, EntrySpan, IndexDefinition, IndexEntryRecord, IndexKey,
    IndexKind, IndexStatus, PropertyKey, PropertyValue, SchemaElement, Vertex, VertexVersion,
};
use rocksdb::WriteBatch;
use tempfile::tempdir;
use uuid::Uuid;

fn version_of(vertex: &Vertex, version: u64, seq: u64) -> VertexVersion {
    VertexVersion {
        vertex_id: vertex.id,
        version,
        commit_seq: seq,
        committed_at: Utc::now(),
        created_by: Uuid::new_v4(),
        data: Some(vertex.clone()),
    }
}

#[test]
fn test_batch_lands_atomically_and_reloads() {
    // --- 1. SETUP ---
    let dir = tempdir().unwrap();
    let backend = RocksBackend::new(dir.path()).unwrap();

    let mut vertex = Vertex::new("uuid");
    vertex
        .properties
        .insert("ident".into(), vec![PropertyValue::from("u1")]);

    // --- 2. ACTION: one batch carries schema, data and the change log ---
    let mut batch = WriteBatch::default();
    backend
        .store_schema_element(
            &SchemaElement::PropertyKey(PropertyKey::new("ident", DataType::String, Cardinality::Single)),
            &mut batch,
        )
        .unwrap();
    backend
        .store_vertex_version(&version_of(&vertex, 1, 1), &mut batch)
        .unwrap();
    backend
        .store_change(
            &ChangeLogEntry {
                seq: 1,
                tx_id: Uuid::new_v4(),
                committed_at: Utc::now(),
                vertices: vec![vertex.id],
                edges: vec![],
            },
            &mut batch,
        )
        .unwrap();

    // Nothing is visible before the batch is written.
    assert!(backend.load_vertex_versions().unwrap().is_empty());
    backend.write(batch).unwrap();

    // --- 3. VERIFICATION ---
    let versions = backend.load_vertex_versions().unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].data.as_ref(), Some(&vertex));
    assert_eq!(backend.load_schema().unwrap().len(), 1);
    assert_eq!(backend.load_changelog().unwrap()[0].vertices, vec![vertex.id]);
}

#[test]
fn test_versions_and_changelog_come_back_in_order() {
    let dir = tempdir().unwrap();
    let vertex = Vertex::new("user_id");

    {
        let backend = RocksBackend::new(dir.path()).unwrap();
        let mut batch = WriteBatch::default();
        // Written out of order on purpose.
        for (version, seq) in [(3, 12), (1, 2), (2, 7)] {
            backend
                .store_vertex_version(&version_of(&vertex, version, seq), &mut batch)
                .unwrap();
        }
        for seq in [300u64, 2, 40] {
            backend
                .store_change(
                    &ChangeLogEntry {
                        seq,
                        tx_id: Uuid::new_v4(),
                        committed_at: Utc::now(),
                        vertices: vec![],
                        edges: vec![],
                    },
                    &mut batch,
                )
                .unwrap();
        }
        backend.write(batch).unwrap();
    }

    // Reopen: the first instance released the RocksDB lock when it was dropped.
    let backend = RocksBackend::new(dir.path()).unwrap();
    let versions: Vec<u64> = backend
        .load_vertex_versions()
        .unwrap()
        .iter()
        .map(|v| v.version)
        .collect();
    assert_eq!(versions, vec![1, 2, 3]);

    let seqs: Vec<u64> = backend
        .load_changelog()
        .unwrap()
        .iter()
        .map(|c| c.seq)
        .collect();
    assert_eq!(seqs, vec![2, 40, 300]);
}

#[test]
fn test_index_entries_are_dropped_per_index() {
    let dir = tempdir().unwrap();
    let backend = RocksBackend::new(dir.path()).unwrap();
    let vertex = Vertex::new("uuid");

    let record = |index: &str, value: &str| IndexEntryRecord {
        index: index.to_string(),
        key: IndexKey::composite(vec![PropertyValue::from(value)]),
        element: graphwright::types::ElementId::Vertex(vertex.id),
        spans: vec![EntrySpan {
            added: 1,
            removed: None,
        }],
    };

    let mut batch = WriteBatch::default();
    backend.store_index_entry(&record("byIdent", "u1"), &mut batch).unwrap();
    backend.store_index_entry(&record("byIdent", "u2"), &mut batch).unwrap();
    // A name sharing the prefix must survive dropping "byIdent".
    backend.store_index_entry(&record("byIdentity", "u1"), &mut batch).unwrap();
    backend.write(batch).unwrap();
    assert_eq!(backend.load_index_entries().unwrap().len(), 3);

    let mut batch = WriteBatch::default();
    backend.delete_index_entries("byIdent", &mut batch).unwrap();
    backend.write(batch).unwrap();

    let left = backend.load_index_entries().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].index, "byIdentity");
}

#[test]
fn test_index_definition_overwrites_by_name() {
    let dir = tempdir().unwrap();
    let backend = RocksBackend::new(dir.path()).unwrap();

    let mut definition = IndexDefinition {
        name: "vertexByIdent".into(),
        kind: IndexKind::VertexComposite { label: None },
        keys: vec!["ident".into()],
        unique: true,
        status: IndexStatus::Installed,
    };
    backend.put_index_definition(&definition).unwrap();
    definition.status = IndexStatus::Enabled;
    backend.put_index_definition(&definition).unwrap();

    let loaded = backend.load_index_definitions().unwrap();
    assert_eq!(loaded, vec![definition]);
}
