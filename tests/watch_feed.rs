mod common;

use common::{test_store_with_dir, widget, widgets_table};
use rvstore::StoreError;
use rvstore::config::Config;
use rvstore::model::FieldFilter;
use rvstore::watch::{self, ChangeFeed, WatchEvent, WatchHandle, WatchOptions};
use std::path::Path;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

fn config_for(path: &Path) -> Config {
    let mut config = Config::default();
    config.database = path.to_path_buf();
    config.watch.poll_interval_ms = 10;
    config
}

fn next(handle: &WatchHandle) -> WatchEvent {
    handle
        .events()
        .recv_timeout(TIMEOUT)
        .expect("event before timeout")
        .expect("feed error")
}

fn resume(since: u64) -> WatchOptions {
    WatchOptions {
        resource_version: Some(since),
        ..WatchOptions::default()
    }
}

#[test]
fn resumed_watch_sees_writes_in_commit_order() {
    let table = widgets_table();
    let (mut store, _dir, path) = test_store_with_dir(&table);
    store.create(&widget("", "old", None)).unwrap(); // 1

    let handle = watch::spawn(&config_for(&path), &table, None, resume(1)).unwrap();
    store.create(&widget("", "a", Some("red"))).unwrap(); // 2
    store.update(&widget("", "old", Some("blue")), None).unwrap(); // 3
    store.delete("", "a", None).unwrap(); // 4

    let mut seen = Vec::new();
    while seen.len() < 2 {
        seen.push(next(&handle));
    }
    // Rows changed again before the poll collapse into their latest state.
    let last = seen.last().unwrap().resource_version();
    if last < 4 {
        seen.push(next(&handle));
    }
    let versions: Vec<u64> = seen.iter().map(WatchEvent::resource_version).collect();
    assert!(versions.windows(2).all(|w| w[0] < w[1]), "{versions:?}");
    assert_eq!(*versions.last().unwrap(), 4);
    assert!(matches!(seen.last(), Some(WatchEvent::Deleted(row)) if row.name == "a"));
    handle.cancel();
}

#[test]
fn snapshot_then_live_changes() {
    let table = widgets_table();
    let (mut store, _dir, path) = test_store_with_dir(&table);
    store.create(&widget("", "a", Some("red"))).unwrap();
    store.create(&widget("", "b", Some("red"))).unwrap();

    let handle = watch::spawn(&config_for(&path), &table, None, WatchOptions::default()).unwrap();
    assert_eq!(next(&handle).kind(), "ADDED");
    assert_eq!(next(&handle).kind(), "ADDED");

    store.create(&widget("", "c", Some("red"))).unwrap();
    let event = next(&handle);
    assert_eq!(event.kind(), "ADDED");
    assert_eq!(event.resource_version(), 3);
}

#[test]
fn watch_from_compacted_version_fails() {
    let table = widgets_table();
    let (mut store, _dir, path) = test_store_with_dir(&table);
    for name in ["a", "b", "c"] {
        store.create(&widget("", name, None)).unwrap();
    }
    store.compact_to(3).unwrap();

    let handle = watch::spawn(&config_for(&path), &table, None, resume(1)).unwrap();
    let err = handle
        .events()
        .recv_timeout(TIMEOUT)
        .expect("error before timeout")
        .unwrap_err();
    assert!(matches!(err, StoreError::Compacted { watermark: 3, .. }));
    assert!(handle.events().recv_timeout(TIMEOUT).is_err(), "feed stops");
}

#[test]
fn namespaced_and_filtered_watch() {
    let table = widgets_table();
    let (mut store, _dir, path) = test_store_with_dir(&table);
    let options = WatchOptions {
        resource_version: Some(0),
        filters: FieldFilter::new().with("spec.color", "red"),
        ..WatchOptions::default()
    };
    let handle = watch::spawn(&config_for(&path), &table, Some("team"), options).unwrap();

    store.create(&widget("other", "x", Some("red"))).unwrap();
    store.create(&widget("team", "blue", Some("blue"))).unwrap();
    store.create(&widget("team", "red", Some("red"))).unwrap();

    match next(&handle) {
        WatchEvent::Added(row) => {
            assert_eq!(row.namespace, "team");
            assert_eq!(row.name, "red");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn bookmarks_carry_the_cursor() {
    let table = widgets_table();
    let (mut store, _dir, path) = test_store_with_dir(&table);
    store.create(&widget("", "a", None)).unwrap();
    let options = WatchOptions {
        resource_version: Some(1),
        allow_bookmarks: true,
        bookmark_every: 2,
        ..WatchOptions::default()
    };
    let handle = watch::spawn(&config_for(&path), &table, None, options).unwrap();
    assert_eq!(next(&handle), WatchEvent::Bookmark { resource_version: 1 });
}

#[test]
fn feed_can_be_driven_without_a_thread() {
    let table = widgets_table();
    let (mut store, _dir, _path) = test_store_with_dir(&table);
    let mut feed = ChangeFeed::new(Some(String::new()), resume(0));
    store.create(&widget("", "a", None)).unwrap();
    store.create(&widget("elsewhere", "b", None)).unwrap();

    let events = feed.poll(&store).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(feed.cursor(), Some(2));
}
