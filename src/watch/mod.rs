//! Change feeds over a versioned table.
//!
//! A [`ChangeFeed`] holds a cursor (the last resource version delivered) and
//! turns `list_after` pages into [`WatchEvent`]s. [`spawn`] drives a feed on
//! its own thread and connection, polling every `watch.poll_interval_ms`, so
//! a committed write becomes visible within one poll interval plus one
//! `list_after` round trip.
//!
//! Feeds never skip history: resuming below the compaction watermark fails
//! with [`StoreError::Compacted`] and the feed stops.

use crate::config::{Config, DEFAULT_BOOKMARK_EVERY, TableConfig};
use crate::error::{Result, StoreError};
use crate::model::{FieldFilter, ListOptions, Row};
use crate::storage::capability::{Lister, Watcher};
use crate::storage::SqliteStore;
use crossbeam::channel::{self, Receiver, Sender};
use serde::Serialize;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Rows fetched per `list_after` page.
pub const DEFAULT_PAGE_SIZE: i64 = 500;

/// Options for starting a change feed.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Resume strictly after this version. `None` starts with a snapshot of
    /// the live rows.
    pub resource_version: Option<u64>,
    pub filters: FieldFilter,
    pub allow_bookmarks: bool,
    /// Idle polls between bookmarks.
    pub bookmark_every: u32,
    pub page_size: i64,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            resource_version: None,
            filters: FieldFilter::default(),
            allow_bookmarks: false,
            bookmark_every: DEFAULT_BOOKMARK_EVERY,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One change delivered to a watcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "object", rename_all = "UPPERCASE")]
pub enum WatchEvent {
    Added(Row),
    Modified(Row),
    Deleted(Row),
    /// Progress marker: nothing matching changed up to this version.
    Bookmark { resource_version: u64 },
}

impl WatchEvent {
    fn from_row(row: Row) -> Self {
        if row.is_deleted() {
            Self::Deleted(row)
        } else if row.created {
            Self::Added(row)
        } else {
            Self::Modified(row)
        }
    }

    #[must_use]
    pub const fn resource_version(&self) -> u64 {
        match self {
            Self::Added(row) | Self::Modified(row) | Self::Deleted(row) => row.resource_version,
            Self::Bookmark { resource_version } => *resource_version,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "ADDED",
            Self::Modified(_) => "MODIFIED",
            Self::Deleted(_) => "DELETED",
            Self::Bookmark { .. } => "BOOKMARK",
        }
    }
}

/// Cursor-driven change feed.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    namespace: Option<String>,
    options: WatchOptions,
    cursor: Option<u64>,
    idle_polls: u32,
}

impl ChangeFeed {
    #[must_use]
    pub fn new(namespace: Option<String>, options: WatchOptions) -> Self {
        let cursor = options.resource_version;
        Self {
            namespace,
            options,
            cursor,
            idle_polls: 0,
        }
    }

    /// Last version delivered, or `None` before the initial snapshot.
    #[must_use]
    pub const fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    /// Fetch everything past the cursor and advance it.
    ///
    /// # Errors
    ///
    /// Returns `Compacted` if the cursor fell below the watermark; the feed
    /// must not be polled again after that.
    pub fn poll<S: Lister + ?Sized>(&mut self, source: &S) -> Result<Vec<WatchEvent>> {
        let namespace = self.namespace.as_deref();

        let Some(mut cursor) = self.cursor else {
            let options = ListOptions::default().with_filters(self.options.filters.clone());
            let snapshot = source.list(namespace, &options)?;
            self.cursor = Some(snapshot.resource_version);
            debug!(
                resource_version = snapshot.resource_version,
                rows = snapshot.rows.len(),
                "watch snapshot"
            );
            return Ok(snapshot.rows.into_iter().map(WatchEvent::Added).collect());
        };

        let options = ListOptions::default()
            .with_filters(self.options.filters.clone())
            .with_limit(self.options.page_size);
        let mut events = Vec::new();
        loop {
            let page = source.list_after(namespace, cursor, &options)?;
            let truncated = page.continue_token.is_some();
            cursor = match (truncated, page.rows.last()) {
                (true, Some(last)) => last.resource_version,
                _ => cursor.max(page.resource_version),
            };
            events.extend(page.rows.into_iter().map(WatchEvent::from_row));
            if !truncated {
                break;
            }
        }
        self.cursor = Some(cursor);

        if events.is_empty() {
            self.idle_polls += 1;
            if self.options.allow_bookmarks
                && self.options.bookmark_every > 0
                && self.idle_polls >= self.options.bookmark_every
            {
                self.idle_polls = 0;
                events.push(WatchEvent::Bookmark {
                    resource_version: cursor,
                });
            }
        } else {
            self.idle_polls = 0;
            trace!(count = events.len(), cursor, "watch events");
        }
        Ok(events)
    }
}

/// Handle to a feed running on its own thread.
///
/// Dropping the handle cancels the feed.
#[derive(Debug)]
pub struct WatchHandle {
    events: Receiver<Result<WatchEvent>>,
    cancel: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Events in commit order. An `Err` is the last item before the channel
    /// closes.
    #[must_use]
    pub const fn events(&self) -> &Receiver<Result<WatchEvent>> {
        &self.events
    }

    /// Stop polling and wait for the thread to exit.
    pub fn cancel(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.try_send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("watch thread panicked");
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start a change feed for `table` on a background thread.
///
/// The thread opens its own connection to `config.database`.
///
/// # Errors
///
/// Returns an error if the database cannot be opened, a filter is invalid,
/// or the thread cannot be started.
pub fn spawn(
    config: &Config,
    table: &TableConfig,
    namespace: Option<&str>,
    options: WatchOptions,
) -> Result<WatchHandle> {
    let store = SqliteStore::open(&config.database, table, config.busy_timeout())?;
    let mut feed = store.watch(namespace, options)?;
    let interval = config.watch.poll_interval();

    let (events_tx, events_rx) = channel::unbounded();
    let (cancel_tx, cancel_rx) = channel::bounded(1);

    let thread = thread::Builder::new()
        .name(format!("watch-{}", table.name))
        .spawn(move || run(&store, &mut feed, interval, &events_tx, &cancel_rx))?;

    debug!(table = %table.name, ?interval, "watch started");
    Ok(WatchHandle {
        events: events_rx,
        cancel: Some(cancel_tx),
        thread: Some(thread),
    })
}

/// Poll `feed` until cancelled, the receiver goes away, or an error occurs.
pub fn run<S: Lister + ?Sized>(
    source: &S,
    feed: &mut ChangeFeed,
    interval: Duration,
    events: &Sender<Result<WatchEvent>>,
    cancel: &Receiver<()>,
) {
    loop {
        match feed.poll(source) {
            Ok(batch) => {
                for event in batch {
                    if events.send(Ok(event)).is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                if matches!(err, StoreError::Compacted { .. }) {
                    warn!(error = %err, "watch cursor compacted");
                } else {
                    warn!(error = %err, "watch poll failed");
                }
                let _ = events.send(Err(err));
                return;
            }
        }

        crossbeam::select! {
            recv(cancel) -> _ => {
                debug!("watch cancelled");
                return;
            }
            default(interval) => {}
        }
    }
}
