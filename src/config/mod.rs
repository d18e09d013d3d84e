//! Configuration management for `rvstore`.
//!
//! Configuration sources and precedence (highest wins):
//! 1. CLI overrides
//! 2. Environment variables (`RVSTORE_*`)
//! 3. Config file (`rvstore.yaml`, or `--config`)
//! 4. Defaults

use crate::error::{Result, StoreError};
use crate::storage::statements::Statements;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default database filename used when none is configured.
const DEFAULT_DB_FILENAME: &str = "rvstore.db";
/// Default config filename looked up in the working directory.
pub const DEFAULT_CONFIG_FILENAME: &str = "rvstore.yaml";

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;
pub const DEFAULT_BOOKMARK_EVERY: u32 = 20;
const DEFAULT_GENERATE_NAME_RETRY_LIMIT: u32 = 5;

/// Declared shape of one resource table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TableSpec {
    /// Extra field paths projected into their own columns, in order.
    pub fields: Vec<String>,
    /// Serialize writers through the per-table lock row.
    pub lock: bool,
    /// Maintain a composite index over the extra field columns.
    pub index_fields: bool,
}

/// A table spec bound to its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableConfig {
    pub name: String,
    pub fields: Vec<String>,
    pub lock: bool,
    pub index_fields: bool,
}

impl TableConfig {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            lock: false,
            index_fields: false,
        }
    }

    #[must_use]
    pub fn with_fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub const fn with_lock(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    #[must_use]
    pub const fn with_index_fields(mut self, index_fields: bool) -> Self {
        self.index_fields = index_fields;
        self
    }

    /// Build the statement set for this table.
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentifier` for an unsafe table name or field path.
    pub fn statements(&self) -> Result<Statements> {
        Statements::new(&self.name, &self.fields, self.lock)
    }
}

/// Change feed tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    /// Delay between `list-after` polls; bounds event visibility latency.
    pub poll_interval_ms: u64,
    /// Idle polls between bookmark events.
    pub bookmark_every: u32,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            bookmark_every: DEFAULT_BOOKMARK_EVERY,
        }
    }
}

impl WatchConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub database: PathBuf,
    pub busy_timeout_ms: u64,
    /// Attempts a caller makes when a generated name collides. Read by the
    /// API layer; the store itself never retries.
    pub generate_name_retry_limit: u32,
    /// Default lock flag for tables that are not declared below.
    pub default_lock: bool,
    pub watch: WatchConfig,
    pub tables: BTreeMap<String, TableSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from(DEFAULT_DB_FILENAME),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            generate_name_retry_limit: DEFAULT_GENERATE_NAME_RETRY_LIMIT,
            default_lock: false,
            watch: WatchConfig::default(),
            tables: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration with the documented precedence.
    ///
    /// When `path` is `None`, `rvstore.yaml` in the working directory is used
    /// if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed, an override has an
    /// invalid value, or a declared table is invalid.
    pub fn load(path: Option<&Path>, cli: &CliOverrides) -> Result<Self> {
        let file = path.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME), Path::to_path_buf);
        let mut config = Self::from_yaml(&file)?;
        config.apply_layer(&ConfigLayer::from_env())?;
        config.apply_layer(&cli.as_layer())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML config file. Missing files yield defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn from_yaml(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let mut config: Self = serde_yaml::from_str(&contents)?;

        // Relative database paths are relative to the config file.
        if config.database.is_relative() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                config.database = parent.join(&config.database);
            }
        }
        Ok(config)
    }

    /// Apply a layer of string overrides on top of this config.
    ///
    /// # Errors
    ///
    /// Returns `Config` if a value cannot be parsed for its key.
    pub fn apply_layer(&mut self, layer: &ConfigLayer) -> Result<()> {
        for (key, value) in &layer.values {
            match key.as_str() {
                "db" => self.database = PathBuf::from(value),
                "busy-timeout-ms" => self.busy_timeout_ms = parse_number(key, value)?,
                "generate-name-retry-limit" => {
                    self.generate_name_retry_limit = parse_number(key, value)?;
                }
                "watch-poll-interval-ms" => self.watch.poll_interval_ms = parse_number(key, value)?,
                "watch-bookmark-every" => self.watch.bookmark_every = parse_number(key, value)?,
                "table-lock" => {
                    let lock = parse_bool(value).ok_or_else(|| {
                        StoreError::Config(format!("{key}: expected a boolean, got {value:?}"))
                    })?;
                    self.default_lock = lock;
                    for spec in self.tables.values_mut() {
                        spec.lock = lock;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Check every declared table builds a valid statement set.
    ///
    /// # Errors
    ///
    /// Returns the first `InvalidIdentifier` or `Config` problem found.
    pub fn validate(&self) -> Result<()> {
        if self.watch.poll_interval_ms == 0 {
            return Err(StoreError::Config(
                "watch.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        for name in self.tables.keys() {
            self.table(name).statements()?;
        }
        Ok(())
    }

    /// The config for `name`; undeclared tables get no extra fields.
    #[must_use]
    pub fn table(&self, name: &str) -> TableConfig {
        self.tables.get(name).map_or_else(
            || TableConfig::new(name).with_lock(self.default_lock),
            |spec| TableConfig {
                name: name.to_string(),
                fields: spec.fields.clone(),
                lock: spec.lock,
                index_fields: spec.index_fields,
            },
        )
    }

    /// All declared tables.
    #[must_use]
    pub fn declared_tables(&self) -> Vec<TableConfig> {
        self.tables.keys().map(|name| self.table(name)).collect()
    }

    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// A layer of string-valued overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigLayer {
    pub values: HashMap<String, String>,
}

impl ConfigLayer {
    /// Build a layer from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(env::vars())
    }

    /// Build a layer from `RVSTORE_*` variables.
    ///
    /// `RVSTORE_BUSY_TIMEOUT_MS` becomes `busy-timeout-ms`, and so on.
    #[must_use]
    pub fn from_vars<I>(vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut layer = Self::default();
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix("RVSTORE_") {
                if value.trim().is_empty() {
                    continue;
                }
                let normalized = stripped.to_lowercase().replace('_', "-");
                layer.values.insert(normalized, value);
            }
        }
        layer
    }
}

/// CLI overrides for config loading.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub db: Option<PathBuf>,
    pub busy_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

impl CliOverrides {
    #[must_use]
    pub fn as_layer(&self) -> ConfigLayer {
        let mut layer = ConfigLayer::default();
        if let Some(path) = &self.db {
            layer
                .values
                .insert("db".to_string(), path.to_string_lossy().to_string());
        }
        if let Some(ms) = self.busy_timeout_ms {
            layer
                .values
                .insert("busy-timeout-ms".to_string(), ms.to_string());
        }
        if let Some(ms) = self.poll_interval_ms {
            layer
                .values
                .insert("watch-poll-interval-ms".to_string(), ms.to_string());
        }
        layer
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| StoreError::Config(format!("{key}: expected a number, got {value:?}")))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
