mod common;

use common::{names, test_store, versions, widget, widgets_table};
use proptest::prelude::*;
use rvstore::StoreError;
use rvstore::model::{FieldFilter, ListOptions};
use rvstore::storage::SqliteStore;

fn all_versions_after(store: &SqliteStore, after: u64) -> Vec<u64> {
    let mut stmt = store
        .connection()
        .prepare("SELECT resource_version FROM widgets WHERE resource_version > ?1 ORDER BY 1")
        .expect("prepare");
    stmt.query_map([i64::try_from(after).unwrap()], |row| row.get::<_, i64>(0))
        .expect("query")
        .map(|v| u64::try_from(v.expect("row")).unwrap())
        .collect()
}

fn include_deleted() -> ListOptions {
    ListOptions {
        include_deleted: true,
        ..ListOptions::default()
    }
}

#[test]
fn widgets_end_to_end() {
    let mut store = test_store(&widgets_table());

    let a = store.create(&widget("", "a", Some("red"))).unwrap();
    assert_eq!(a.resource_version, 1);
    let b = store.create(&widget("", "b", Some("blue"))).unwrap();
    assert_eq!(b.resource_version, 2);

    let after = store.list_after(None, 1, &ListOptions::default()).unwrap();
    assert_eq!(names(&after.rows), vec!["b"]);

    let red = ListOptions::default().with_filters(FieldFilter::new().with("spec.color", "red"));
    assert_eq!(names(&store.list(None, &red).unwrap().rows), vec!["a"]);

    let deleted = store.delete("", "a", None).unwrap();
    assert_eq!(deleted.resource_version, 3);
    assert_eq!(deleted.deleted, Some(3));

    assert!(store.advance_watermark(3).unwrap());
    let stats = store.compact().unwrap();
    assert_eq!(stats.removed, 1);

    let remaining = store.list(None, &include_deleted()).unwrap();
    assert_eq!(names(&remaining.rows), vec!["b"]);
    assert_eq!(remaining.rows[0].resource_version, 2);
    assert_eq!(remaining.rows[0].value["spec"]["color"], "blue");
}

#[test]
fn limit_returns_page_and_token_then_rest() {
    let mut store = test_store(&widgets_table());
    let limit = 4;
    for i in 0..limit + 5 {
        store.create(&widget("", &format!("w{i}"), Some("red"))).unwrap();
    }

    let first = store
        .list(None, &ListOptions::default().with_limit(limit))
        .unwrap();
    assert_eq!(first.rows.len(), 4);
    assert_eq!(versions(&first.rows), vec![1, 2, 3, 4]);
    let token = first.continue_token.clone().expect("more rows exist");

    let rest = store
        .list(None, &ListOptions::default().with_continue(Some(token)))
        .unwrap();
    assert_eq!(versions(&rest.rows), vec![5, 6, 7, 8, 9]);
    assert!(rest.continue_token.is_none());
    assert_eq!(rest.resource_version, first.resource_version);
}

#[test]
fn paging_visits_every_row_once() {
    let mut store = test_store(&widgets_table());
    for i in 0..10 {
        store.create(&widget("", &format!("w{i}"), None)).unwrap();
    }

    let mut seen = Vec::new();
    let mut token = None;
    loop {
        let page = store
            .list(None, &ListOptions::default().with_limit(3).with_continue(token))
            .unwrap();
        assert!(page.rows.len() <= 3);
        seen.extend(versions(&page.rows));
        token = page.continue_token;
        if token.is_none() {
            break;
        }
    }
    assert_eq!(seen, (1..=10).collect::<Vec<_>>());
}

#[test]
fn exact_fit_page_has_no_token() {
    let mut store = test_store(&widgets_table());
    for i in 0..3 {
        store.create(&widget("", &format!("w{i}"), None)).unwrap();
    }
    let page = store.list(None, &ListOptions::default().with_limit(3)).unwrap();
    assert_eq!(page.rows.len(), 3);
    assert!(page.continue_token.is_none());
}

#[test]
fn list_after_includes_tombstones_and_updates() {
    let mut store = test_store(&widgets_table());
    store.create(&widget("", "a", Some("red"))).unwrap(); // 1
    store.create(&widget("", "b", Some("red"))).unwrap(); // 2
    store.update(&widget("", "a", Some("blue")), None).unwrap(); // 3
    store.delete("", "b", None).unwrap(); // 4

    let rows = store.list_after(None, 0, &ListOptions::default()).unwrap().rows;
    assert_eq!(versions(&rows), vec![3, 4]);
    assert!(!rows[0].is_deleted());
    assert!(rows[1].is_deleted());

    assert!(store.list_after(None, 4, &ListOptions::default()).unwrap().rows.is_empty());
}

#[test]
fn list_after_below_watermark_is_compacted() {
    let mut store = test_store(&widgets_table());
    for name in ["a", "b", "c"] {
        store.create(&widget("", name, None)).unwrap();
    }
    store.advance_watermark(2).unwrap();

    let err = store.list_after(None, 1, &ListOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Compacted {
            requested: 1,
            watermark: 2
        }
    ));
    assert_eq!(err.code().as_str(), "GONE");

    let rows = store.list_after(None, 2, &ListOptions::default()).unwrap().rows;
    assert_eq!(names(&rows), vec!["c"]);
}

#[test]
fn namespaces_are_isolated() {
    let mut store = test_store(&widgets_table());
    store.create(&widget("team-a", "x", None)).unwrap();
    store.create(&widget("team-b", "x", None)).unwrap();

    assert_eq!(store.list(Some("team-a"), &ListOptions::default()).unwrap().rows.len(), 1);
    assert_eq!(store.list(None, &ListOptions::default()).unwrap().rows.len(), 2);
    store.delete("team-a", "x", None).unwrap();
    assert!(store.get("team-b", "x").is_ok());
}

#[test]
fn duplicate_create_reports_already_exists_every_time() {
    let mut store = test_store(&widgets_table());
    store.create(&widget("", "a", None)).unwrap();
    for _ in 0..5 {
        let err = store.create(&widget("", "a", None)).unwrap_err();
        assert_eq!(err.code().as_str(), "ALREADY_EXISTS");
    }
}

proptest! {
    #[test]
    fn filter_matches_value_or_null(
        colors in prop::collection::vec(
            prop::option::of(prop::sample::select(vec!["red", "blue", "green"])),
            0..16,
        ),
        wanted in prop::option::of(prop::sample::select(vec!["red", "blue", "green"])),
    ) {
        let mut store = test_store(&widgets_table());
        for (i, color) in colors.iter().enumerate() {
            store.create(&widget("", &format!("w{i}"), *color)).unwrap();
        }

        let filters = wanted.map_or_else(FieldFilter::new, |c| FieldFilter::new().with("spec.color", c));
        let got = names(&store.list(None, &ListOptions::default().with_filters(filters)).unwrap().rows);

        let expected: Vec<String> = colors
            .iter()
            .enumerate()
            .filter(|(_, color)| match (wanted, color) {
                (None, _) | (_, None) => true,
                (Some(w), Some(c)) => w == *c,
            })
            .map(|(i, _)| format!("w{i}"))
            .collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn list_after_returns_exactly_newer_rows(
        ops in prop::collection::vec(0u8..3, 1..24),
        after_pick in 0usize..32,
    ) {
        let mut store = test_store(&widgets_table());
        let mut live: Vec<String> = Vec::new();
        for (i, op) in ops.iter().enumerate() {
            match (op, live.first().cloned()) {
                (1, Some(name)) => {
                    store.update(&widget("", &name, Some("blue")), None).unwrap();
                }
                (2, Some(name)) => {
                    store.delete("", &name, None).unwrap();
                    live.remove(0);
                }
                _ => {
                    let name = format!("w{i}");
                    store.create(&widget("", &name, Some("red"))).unwrap();
                    live.push(name);
                }
            }
        }

        let latest = store.table_meta().unwrap().latest_version;
        let after = u64::try_from(after_pick).unwrap() % (latest + 1);
        let rows = store.list_after(None, after, &ListOptions::default()).unwrap().rows;
        let got = versions(&rows);
        prop_assert!(got.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(got.iter().all(|v| *v > after));
        prop_assert_eq!(got, all_versions_after(&store, after));
    }

    #[test]
    fn compaction_keeps_live_and_recent_rows(
        deletes in prop::collection::vec(any::<bool>(), 1..16),
        watermark_pick in 0usize..64,
    ) {
        let mut store = test_store(&widgets_table());
        for i in 0..deletes.len() {
            store.create(&widget("", &format!("w{i}"), None)).unwrap();
        }
        for (i, delete) in deletes.iter().enumerate() {
            if *delete {
                store.delete("", &format!("w{i}"), None).unwrap();
            }
        }

        let before = store.list(None, &include_deleted()).unwrap().rows;
        let latest = store.table_meta().unwrap().latest_version;
        let watermark = u64::try_from(watermark_pick).unwrap() % (latest + 1);
        store.advance_watermark(watermark).unwrap();
        store.compact().unwrap();
        let after = store.list(None, &include_deleted()).unwrap().rows;

        for row in &before {
            let kept = after.iter().any(|r| r.resource_version == row.resource_version);
            if !row.is_deleted() || row.resource_version > watermark {
                prop_assert!(kept, "row {} removed", row.resource_version);
            } else {
                prop_assert!(!kept, "tombstone {} survived", row.resource_version);
            }
        }
    }
}
