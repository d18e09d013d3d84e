//! Capability interfaces consumed by a resource-API layer.
//!
//! Each capability is its own trait so adapters can depend on only what
//! they use (a read-only endpoint takes `&dyn Getter`, a status subresource
//! takes `Getter + Updater`, and so on). [`CompleteCrud`] names the full set.

use crate::error::Result;
use crate::model::{ListOptions, Object, Row, RowList};
use crate::storage::SqliteStore;
use crate::watch::{ChangeFeed, WatchOptions};

pub trait Creator {
    /// # Errors
    ///
    /// `AlreadyExists` on a duplicate live name.
    fn create(&mut self, object: &Object) -> Result<Row>;
}

pub trait Getter {
    /// # Errors
    ///
    /// `NotFound` when no live object matches.
    fn get(&self, namespace: &str, name: &str) -> Result<Row>;
}

pub trait Lister {
    /// # Errors
    ///
    /// Invalid filters or continue tokens.
    fn list(&self, namespace: Option<&str>, options: &ListOptions) -> Result<RowList>;

    /// # Errors
    ///
    /// `Compacted` when `after` is below the watermark.
    fn list_after(&self, namespace: Option<&str>, after: u64, options: &ListOptions)
    -> Result<RowList>;
}

pub trait Updater {
    /// # Errors
    ///
    /// `NotFound` or `Conflict`.
    fn update(&mut self, object: &Object, expected: Option<u64>) -> Result<Row>;
}

pub trait Deleter {
    /// # Errors
    ///
    /// `NotFound` or `Conflict`.
    fn delete(&mut self, namespace: &str, name: &str, expected: Option<u64>) -> Result<Row>;
}

pub trait Watcher {
    /// Start a change feed. The feed is driven by polling a [`Lister`].
    ///
    /// # Errors
    ///
    /// Invalid filters.
    fn watch(&self, namespace: Option<&str>, options: WatchOptions) -> Result<ChangeFeed>;
}

/// Every capability at once.
pub trait CompleteCrud: Creator + Getter + Lister + Updater + Deleter + Watcher {}

impl<T> CompleteCrud for T where T: Creator + Getter + Lister + Updater + Deleter + Watcher {}

impl Creator for SqliteStore {
    fn create(&mut self, object: &Object) -> Result<Row> {
        Self::create(self, object)
    }
}

impl Getter for SqliteStore {
    fn get(&self, namespace: &str, name: &str) -> Result<Row> {
        Self::get(self, namespace, name)
    }
}

impl Lister for SqliteStore {
    fn list(&self, namespace: Option<&str>, options: &ListOptions) -> Result<RowList> {
        Self::list(self, namespace, options)
    }

    fn list_after(
        &self,
        namespace: Option<&str>,
        after: u64,
        options: &ListOptions,
    ) -> Result<RowList> {
        Self::list_after(self, namespace, after, options)
    }
}

impl Updater for SqliteStore {
    fn update(&mut self, object: &Object, expected: Option<u64>) -> Result<Row> {
        Self::update(self, object, expected)
    }
}

impl Deleter for SqliteStore {
    fn delete(&mut self, namespace: &str, name: &str, expected: Option<u64>) -> Result<Row> {
        Self::delete(self, namespace, name, expected)
    }
}

impl Watcher for SqliteStore {
    fn watch(&self, namespace: Option<&str>, options: WatchOptions) -> Result<ChangeFeed> {
        // Surface bad filters now rather than on the first poll.
        let check = ListOptions::default()
            .with_filters(options.filters.clone())
            .with_limit(1);
        Self::list(self, namespace, &check)?;
        Ok(ChangeFeed::new(namespace.map(str::to_string), options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableConfig;
    use crate::model::FieldFilter;
    use serde_json::json;

    fn store() -> SqliteStore {
        SqliteStore::open_memory(&TableConfig::new("widgets").with_fields(["spec.color"])).unwrap()
    }

    fn read_only_names(getter: &dyn Getter, names: &[&str]) -> Vec<u64> {
        names
            .iter()
            .filter_map(|n| getter.get("", n).ok())
            .map(|r| r.resource_version)
            .collect()
    }

    fn exercise<S: CompleteCrud>(store: &mut S) {
        let created = Creator::create(store, &Object::new("", "a", json!({"spec": {"color": "red"}})))
            .unwrap();
        let updated = Updater::update(
            store,
            &Object::new("", "a", json!({"spec": {"color": "blue"}})),
            Some(created.resource_version),
        )
        .unwrap();
        assert!(updated.resource_version > created.resource_version);
        let listed = Lister::list(store, None, &ListOptions::default()).unwrap();
        assert_eq!(listed.rows.len(), 1);
        Deleter::delete(store, "", "a", None).unwrap();
        assert!(Getter::get(store, "", "a").unwrap_err().is_not_found());
    }

    #[test]
    fn sqlite_store_satisfies_every_capability() {
        let mut store = store();
        exercise(&mut store);
    }

    #[test]
    fn capabilities_work_as_trait_objects() {
        let mut store = store();
        Creator::create(&mut store, &Object::new("", "x", json!({}))).unwrap();
        assert_eq!(read_only_names(&store, &["x", "missing"]), vec![1]);
    }

    #[test]
    fn watch_rejects_unknown_filters_up_front() {
        let store = store();
        let options = WatchOptions {
            filters: FieldFilter::new().with("spec.size", "3"),
            ..WatchOptions::default()
        };
        assert!(Watcher::watch(&store, None, options).is_err());
    }
}
