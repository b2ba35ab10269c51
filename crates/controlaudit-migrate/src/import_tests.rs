//! Tests for the importer.

use super::*;
use crate::document::FieldValue;
use crate::snapshot::SnapshotWriter;
use crate::store::MemoryStore;
use serde_json::json;
use std::fs;
use tempfile::TempDir;

const OWNER: &str = "apps/auditoria/owners/u1";

fn config_in(dir: &TempDir) -> MigrationConfig {
    let mut config = MigrationConfig::default();
    config.paths.snapshot_dir = dir.path().to_path_buf();
    config
}

fn write_rows(dir: &TempDir, collection: &str, rows: serde_json::Value) {
    let user_dir = dir.path().join("u1");
    fs::create_dir_all(&user_dir).unwrap();
    fs::write(
        user_dir.join(format!("{collection}.json")),
        serde_json::to_string_pretty(&rows).unwrap(),
    )
    .unwrap();
}

fn seed_snapshot(dir: &TempDir) {
    write_rows(
        dir,
        "empresas",
        json!([
            {"id": "e1", "nombre": "Alfa", "clienteAdminId": "u1", "createdAt": {"_seconds": 1_700_000_000, "_nanoseconds": 0}},
            {"id": "e2", "nombre": "Beta", "propietarioId": "u1"}
        ]),
    );
    write_rows(dir, "sucursales", json!([{"sucursalId": "s1", "empresaId": "e1"}]));
}

fn text(store: &MemoryStore, path: &str, field: &str) -> Option<String> {
    store
        .get(path)
        .and_then(|f| f.get(field).and_then(FieldValue::as_str).map(String::from))
}

#[tokio::test]
async fn test_import_maps_and_stamps() {
    let dir = TempDir::new().unwrap();
    seed_snapshot(&dir);
    let store = Arc::new(MemoryStore::new());

    let report = Importer::new(store.clone(), config_in(&dir))
        .unwrap()
        .run("u1", None)
        .await
        .unwrap();

    assert!(report.snapshot_found);
    assert!(report.owner_created);
    assert_eq!(report.total_written(), 3);
    assert!(report.failures.is_empty());

    let e1 = store.get(&format!("{OWNER}/empresas/e1")).unwrap();
    assert!(!e1.contains_key("clienteAdminId"));
    assert_eq!(e1["ownerId"].as_str(), Some("u1"));
    assert_eq!(e1["appId"].as_str(), Some("auditoria"));
    assert_eq!(e1["migratedFrom"].as_str(), Some("legacy"));
    assert!(matches!(e1["createdAt"], FieldValue::Timestamp(_)));
    assert!(!store
        .get(&format!("{OWNER}/empresas/e2"))
        .unwrap()
        .contains_key("propietarioId"));
    assert_eq!(
        text(&store, &format!("{OWNER}/sucursales/s1"), "empresaId").as_deref(),
        Some("e1")
    );
}

#[tokio::test]
async fn test_owner_root_document_created_with_migration_marker() {
    let dir = TempDir::new().unwrap();
    seed_snapshot(&dir);
    let store = Arc::new(MemoryStore::new());

    Importer::new(store.clone(), config_in(&dir))
        .unwrap()
        .run("u1", None)
        .await
        .unwrap();

    let owner = store.get(OWNER).unwrap();
    assert_eq!(owner["role"].as_str(), Some("admin"));
    assert_eq!(owner["status"].as_str(), Some("active"));
    let FieldValue::Map(marker) = &owner["migration"] else {
        panic!("expected migration map");
    };
    assert_eq!(marker["status"].as_str(), Some("complete"));
    assert_eq!(marker["legacyUserId"].as_str(), Some("u1"));
}

#[tokio::test]
async fn test_existing_owner_document_is_kept() {
    let dir = TempDir::new().unwrap();
    seed_snapshot(&dir);
    let store = Arc::new(MemoryStore::new());
    let mut existing = Fields::new();
    existing.insert("role".into(), FieldValue::String("superdev".into()));
    store.insert(OWNER, existing);

    let report = Importer::new(store.clone(), config_in(&dir))
        .unwrap()
        .run("u1", None)
        .await
        .unwrap();

    assert!(!report.owner_created);
    let owner = store.get(OWNER).unwrap();
    assert_eq!(owner["role"].as_str(), Some("superdev"));
    assert!(owner.contains_key("migration"));
}

#[tokio::test]
async fn test_import_twice_is_idempotent() {
    let dir = TempDir::new().unwrap();
    seed_snapshot(&dir);
    let store = Arc::new(MemoryStore::new());
    let importer = Importer::new(store.clone(), config_in(&dir)).unwrap();

    importer.run("u1", None).await.unwrap();
    let first = store.dump();
    importer.run("u1", None).await.unwrap();

    assert_eq!(store.dump(), first);
    assert_eq!(store.paths_under(OWNER).len(), 3);
}

#[tokio::test]
async fn test_skip_existing_leaves_documents_alone() {
    let dir = TempDir::new().unwrap();
    seed_snapshot(&dir);
    let store = Arc::new(MemoryStore::new());
    let mut edited = Fields::new();
    edited.insert("nombre".into(), FieldValue::String("Alfa editada".into()));
    store.insert(&format!("{OWNER}/empresas/e1"), edited);

    let mut config = config_in(&dir);
    config.options.write_mode = WriteMode::SkipExisting;
    let report = Importer::new(store.clone(), config)
        .unwrap()
        .run("u1", None)
        .await
        .unwrap();

    assert_eq!(report.total_skipped(), 1);
    assert_eq!(report.total_written(), 2);
    assert_eq!(
        text(&store, &format!("{OWNER}/empresas/e1"), "nombre").as_deref(),
        Some("Alfa editada")
    );
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    seed_snapshot(&dir);
    let store = Arc::new(MemoryStore::new());
    let mut config = config_in(&dir);
    config.options.dry_run = true;

    let report = Importer::new(store.clone(), config)
        .unwrap()
        .run("u1", None)
        .await
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.total_written(), 3);
    assert_eq!(store.write_count(), 0);
    assert!(store.dump().is_empty());
}

#[tokio::test]
async fn test_missing_snapshot_is_empty_import() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());

    let report = Importer::new(store.clone(), config_in(&dir))
        .unwrap()
        .run("u1", None)
        .await
        .unwrap();

    assert!(!report.snapshot_found);
    assert!(report.collections.is_empty());
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_missing_collection_file_is_empty_collection() {
    let dir = TempDir::new().unwrap();
    write_rows(&dir, "empresas", json!([{"id": "e1"}]));
    let store = Arc::new(MemoryStore::new());

    let report = Importer::new(store, config_in(&dir))
        .unwrap()
        .run("u1", None)
        .await
        .unwrap();

    let branches = report
        .collections
        .iter()
        .find(|c| c.legacy == "sucursales")
        .unwrap();
    assert!(!branches.file_present);
    assert_eq!(branches.read, 0);
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn test_unmapped_collections_are_reported() {
    let dir = TempDir::new().unwrap();
    seed_snapshot(&dir);
    write_rows(&dir, "usuarios", json!([{"id": "x"}]));
    let store = Arc::new(MemoryStore::new());

    let report = Importer::new(store.clone(), config_in(&dir))
        .unwrap()
        .run("u1", None)
        .await
        .unwrap();

    assert_eq!(report.unmapped, vec!["usuarios".to_string()]);
    assert!(store.get(&format!("{OWNER}/usuarios/x")).is_none());
}

#[tokio::test]
async fn test_failed_write_is_collected_and_run_continues() {
    let dir = TempDir::new().unwrap();
    seed_snapshot(&dir);
    let store = Arc::new(MemoryStore::new());
    store.fail_writes_to(&format!("{OWNER}/empresas/e1"));

    let report = Importer::new(store.clone(), config_in(&dir))
        .unwrap()
        .run("u1", None)
        .await
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, format!("{OWNER}/empresas/e1"));
    assert!(store.get(&format!("{OWNER}/empresas/e2")).is_some());
    assert!(matches!(
        report.ensure_complete(),
        Err(Error::PartialWrite { failed: 1, attempted: 3 })
    ));

    let owner = store.get(OWNER).unwrap();
    let FieldValue::Map(marker) = &owner["migration"] else {
        panic!("expected migration map");
    };
    assert_eq!(marker["status"].as_str(), Some("partial"));
}

#[tokio::test]
async fn test_row_without_id_is_entity_failure() {
    let dir = TempDir::new().unwrap();
    write_rows(&dir, "empresas", json!([{"nombre": "sin id"}, {"empresaId": "e9"}]));
    let store = Arc::new(MemoryStore::new());

    let report = Importer::new(store.clone(), config_in(&dir))
        .unwrap()
        .run("u1", None)
        .await
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, "empresas[0]");
    assert!(store.get(&format!("{OWNER}/empresas/e9")).is_some());
}

#[tokio::test]
async fn test_duplicate_row_id_is_entity_failure() {
    let dir = TempDir::new().unwrap();
    write_rows(
        &dir,
        "empresas",
        json!([{"id": "e1", "nombre": "Alfa"}, {"id": "e1", "nombre": "Beta"}]),
    );
    let store = Arc::new(MemoryStore::new());

    let report = Importer::new(store.clone(), config_in(&dir))
        .unwrap()
        .run("u1", None)
        .await
        .unwrap();

    let companies = &report.collections[0];
    assert_eq!(companies.read, 2);
    assert_eq!(companies.written, 1);
    assert_eq!(companies.failed, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, "empresas[1]");
    assert!(report.failures[0].error.contains("duplicate document id 'e1'"));
    assert_eq!(
        text(&store, &format!("{OWNER}/empresas/e1"), "nombre").as_deref(),
        Some("Alfa")
    );
    assert!(report.ensure_complete().is_err());
}

#[tokio::test]
async fn test_out_of_range_timestamp_is_entity_failure() {
    let dir = TempDir::new().unwrap();
    write_rows(
        &dir,
        "empresas",
        json!([
            {"id": "e1", "createdAt": {"_seconds": 9_000_000_000_000_000_i64, "_nanoseconds": 0}},
            {"id": "e2", "nombre": "Beta"}
        ]),
    );
    let store = Arc::new(MemoryStore::new());

    let report = Importer::new(store.clone(), config_in(&dir))
        .unwrap()
        .run("u1", None)
        .await
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, "empresas[0]");
    assert!(report.failures[0].error.contains("out of range"));
    assert!(store.get(&format!("{OWNER}/empresas/e1")).is_none());
    assert!(store.get(&format!("{OWNER}/empresas/e2")).is_some());
}

#[tokio::test]
async fn test_explicit_owner_id() {
    let dir = TempDir::new().unwrap();
    seed_snapshot(&dir);
    let store = Arc::new(MemoryStore::new());

    let report = Importer::new(store.clone(), config_in(&dir))
        .unwrap()
        .run("u1", Some("o7"))
        .await
        .unwrap();

    assert_eq!(report.owner_path, "apps/auditoria/owners/o7");
    assert_eq!(
        text(&store, "apps/auditoria/owners/o7/empresas/e1", "ownerId").as_deref(),
        Some("o7")
    );
}

#[tokio::test]
async fn test_destination_inside_legacy_tree_is_refused() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(&dir);
    config.paths.owner_root = "apps/auditoria/users/u1/owners".to_string();

    let result = Importer::new(Arc::new(MemoryStore::new()), config);
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn test_snapshot_written_by_exporter_imports() {
    let dir = TempDir::new().unwrap();
    let writer = SnapshotWriter::begin(dir.path(), "u1").unwrap();
    let mut fields = Fields::new();
    fields.insert("id".into(), FieldValue::String("legacy-id".into()));
    fields.insert("nombre".into(), FieldValue::String("Gamma".into()));
    writer
        .write_collection("empresas", &[Document::new("e3", fields)])
        .unwrap();
    writer.commit().unwrap();
    let store = Arc::new(MemoryStore::new());

    Importer::new(store.clone(), config_in(&dir))
        .unwrap()
        .run("u1", None)
        .await
        .unwrap();

    assert_eq!(
        text(&store, &format!("{OWNER}/empresas/e3"), "id").as_deref(),
        Some("legacy-id")
    );
}
