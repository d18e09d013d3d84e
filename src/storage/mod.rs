//! `SQLite` storage layer for `rvstore`.
//!
//! This module provides the versioned persistence layer with:
//! - Identifier sanitization for generated SQL
//! - A per-table statement factory with fixed parameter positions
//! - Transaction discipline for gap-free resource version allocation
//! - Cursor pagination and NULL-or-match field filters
//! - Watermark-bounded compaction of tombstones
//!
//! # Submodules
//!
//! - [`ident`] - Identifier sanitizer
//! - [`statements`] - Statement factory
//! - [`schema`] - Table creation and additive schema changes
//! - [`sqlite`] - Write path and read path
//! - [`compaction`] - Watermark and tombstone removal
//! - [`capability`] - Per-capability traits

pub mod capability;
pub mod compaction;
pub mod ident;
pub mod schema;
pub mod sqlite;
pub mod statements;

pub use capability::{CompleteCrud, Creator, Deleter, Getter, Lister, Updater, Watcher};
pub use compaction::CompactionStats;
pub use sqlite::SqliteStore;
pub use statements::{StatementName, Statements};
