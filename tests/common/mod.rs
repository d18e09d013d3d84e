#![allow(dead_code)]

use rvstore::config::TableConfig;
use rvstore::model::Object;
use rvstore::storage::SqliteStore;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Once;
use std::time::Duration;
use tempfile::TempDir;

pub mod cli;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        rvstore::logging::init_test_logging();
    });
}

/// The `widgets` table used throughout: one extra field, `spec.color`.
pub fn widgets_table() -> TableConfig {
    TableConfig::new("widgets").with_fields(["spec.color"])
}

pub fn widget(namespace: &str, name: &str, color: Option<&str>) -> Object {
    let value = color.map_or_else(
        || json!({"metadata": {"name": name}, "spec": {}}),
        |c| json!({"metadata": {"name": name}, "spec": {"color": c}}),
    );
    Object::new(namespace, name, value)
}

pub fn test_store(table: &TableConfig) -> SqliteStore {
    init_test_logging();
    SqliteStore::open_memory(table).expect("Failed to create test store")
}

pub fn test_store_with_dir(table: &TableConfig) -> (SqliteStore, TempDir, PathBuf) {
    init_test_logging();
    let dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = dir.path().join("rvstore.db");
    let store = SqliteStore::open(&db_path, table, Duration::from_secs(10))
        .expect("Failed to create test store");
    (store, dir, db_path)
}

pub fn names(rows: &[rvstore::model::Row]) -> Vec<String> {
    rows.iter().map(|r| r.name.clone()).collect()
}

pub fn versions(rows: &[rvstore::model::Row]) -> Vec<u64> {
    rows.iter().map(|r| r.resource_version).collect()
}
