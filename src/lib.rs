//! `rvstore` - Versioned SQL storage and watch engine
//!
//! This crate stores JSON resource objects in `SQLite` tables, one table per
//! resource type, and gives every write a table-wide, gap-free resource
//! version. The versions drive optimistic concurrency, cursor pagination and
//! change feeds. The `rvs` binary is a thin operator CLI over the library.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface using clap
//! - [`config`] - Layered configuration (YAML, environment, flags)
//! - [`error`] - Error types and codes
//! - [`logging`] - tracing subscriber setup
//! - [`model`] - Objects, rows, list options and continue tokens
//! - [`storage`] - Sanitizer, statement factory, schema, read/write path, compaction
//! - [`watch`] - Change feeds over `list_after`

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod storage;
pub mod watch;

pub use error::{ErrorCode, Result, StoreError};
