//! Configuration module for the indexing core.
//!
//! Layered configuration:
//! - Default values
//! - TOML configuration file (`<project_root>/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables are prefixed with `CCDB_` and use double
//! underscores to separate nested levels:
//! - `CCDB_INDEXING__PARALLEL_THREADS=8` sets `indexing.parallel_threads`
//! - `CCDB_INDEXING__SYNC_INTERVAL=25` sets `indexing.sync_interval`
//! - `CCDB_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory holding the databases and saved PCH units
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,

    /// Indexing configuration
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexingConfig {
    /// Number of worker threads executing indexer and dirty jobs
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: usize,

    /// Job completions between eager syncer flushes
    #[serde(default = "default_sync_interval")]
    pub sync_interval: u32,

    /// Syncer wakeup timeout while idle, in seconds
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,

    /// Path prefixes treated as system headers and excluded from the index
    #[serde(default = "default_system_header_prefixes")]
    pub system_header_prefixes: Vec<String>,

    /// Prefixes exempted from the system-header filter
    #[serde(default = "default_system_header_exemptions")]
    pub system_header_exemptions: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_project_root() -> PathBuf {
    PathBuf::from(".ccdb")
}
fn default_parallel_threads() -> usize {
    num_cpus::get()
}
fn default_sync_interval() -> u32 {
    10
}
fn default_sync_timeout_secs() -> u64 {
    10
}
fn default_system_header_prefixes() -> Vec<String> {
    vec!["/usr/".to_string()]
}
fn default_system_header_exemptions() -> Vec<String> {
    vec!["/usr/home/".to_string()]
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            project_root: default_project_root(),
            indexing: IndexingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            parallel_threads: default_parallel_threads(),
            sync_interval: default_sync_interval(),
            sync_timeout_secs: default_sync_timeout_secs(),
            system_header_prefixes: default_system_header_prefixes(),
            system_header_exemptions: default_system_header_exemptions(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = default_project_root().join("settings.toml");
        Self::load_from(config_path)
    }

    /// Load configuration layering defaults, the given TOML file and
    /// `CCDB_`-prefixed environment variables.
    pub fn load_from(config_path: PathBuf) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("CCDB_").map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".")
                    .into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Settings rooted at `project_root`, defaults elsewhere. Used by tests.
    pub fn with_project_root(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            ..Self::default()
        }
    }

    /// Whether `path` falls under the system-header filter.
    pub fn is_system_header(&self, path: &str) -> bool {
        let excluded = self
            .indexing
            .system_header_prefixes
            .iter()
            .any(|p| path.starts_with(p.as_str()));
        if !excluded {
            return false;
        }
        !self
            .indexing
            .system_header_exemptions
            .iter()
            .any(|p| path.starts_with(p.as_str()))
    }
}
