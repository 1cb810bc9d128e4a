//! Configuration loading.
//!
//! The config file is JSON and shared with the snapshot consumer, which is why
//! the raw `archipelago` section is kept next to the resolved values: it is
//! copied verbatim into every snapshot.
//!
//! ```json
//! {
//!   "archipelago": { "host": "localhost", "port": 38281, "game": "...", "slot_name": "Player" },
//!   "paths": { "state_file": "data/state.json", "fetcher_log": "logs/fetcher.log" },
//!   "fetcher": { "flush_interval": 2 }
//! }
//! ```

use fs_err as fs;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FetcherError, Result};

/// Searched in order when no explicit path is given; the second entry covers
/// running from a build directory one level down.
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["config/config.json", "../config/config.json"];
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArchipelagoConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_game")]
    pub game: String,
    #[serde(default = "default_slot_name")]
    pub slot_name: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_items_handling")]
    pub items_handling: u32,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ArchipelagoConfig {
    pub fn from_section(section: &Value) -> std::result::Result<Self, serde_json::Error> {
        Self::deserialize(section)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ArchipelagoConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            game: default_game(),
            slot_name: default_slot_name(),
            password: String::new(),
            items_handling: default_items_handling(),
            tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PathsConfig {
    /// Omitting this disables file logging.
    #[serde(default)]
    pub fetcher_log: Option<PathBuf>,
    /// Omitting this disables persistence.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
    #[serde(default = "default_uuid_file")]
    pub uuid_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            fetcher_log: None,
            state_file: None,
            uuid_file: default_uuid_file(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub archipelago: ArchipelagoConfig,
    /// The `archipelago` section exactly as written in the file.
    pub archipelago_raw: Value,
    pub paths: PathsConfig,
    pub flush_interval: Duration,
}

impl FetcherConfig {
    /// Resolves a parsed config document. `path` is only used for error context.
    pub fn from_json(root: &Value, path: &Path) -> Result<Self> {
        let archipelago_raw = root
            .get("archipelago")
            .cloned()
            .ok_or(FetcherError::MissingSection("archipelago"))?;
        let archipelago = ArchipelagoConfig::from_section(&archipelago_raw).map_err(|err| {
            FetcherError::ConfigMalformed {
                path: path.to_path_buf(),
                details: format!("archipelago: {}", err),
            }
        })?;

        let paths = match root.get("paths") {
            Some(section) => {
                PathsConfig::deserialize(section).map_err(|err| FetcherError::ConfigMalformed {
                    path: path.to_path_buf(),
                    details: format!("paths: {}", err),
                })?
            }
            None => PathsConfig::default(),
        };

        Ok(Self {
            archipelago,
            archipelago_raw,
            paths,
            flush_interval: flush_interval(root),
        })
    }
}

pub fn load_config(path: Option<&Path>) -> Result<FetcherConfig> {
    let candidates: Vec<PathBuf> = match path {
        Some(path) => vec![path.to_path_buf()],
        None => DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from).collect(),
    };

    let Some(found) = candidates.iter().find(|candidate| candidate.is_file()) else {
        return Err(FetcherError::ConfigNotFound {
            searched: candidates,
        });
    };

    let content = fs::read_to_string(found).map_err(|source| FetcherError::Io {
        context: format!("Failed to read config {}", found.display()),
        source,
    })?;
    let root: Value =
        serde_json::from_str(&content).map_err(|err| FetcherError::ConfigMalformed {
            path: found.clone(),
            details: err.to_string(),
        })?;

    FetcherConfig::from_json(&root, found)
}

// Invalid values fall back to the default rather than failing startup.
fn flush_interval(root: &Value) -> Duration {
    root.pointer("/fetcher/flush_interval")
        .and_then(Value::as_f64)
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or(DEFAULT_FLUSH_INTERVAL)
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    38281
}

fn default_game() -> String {
    "Unknown Game".to_string()
}

fn default_slot_name() -> String {
    "Player".to_string()
}

fn default_items_handling() -> u32 {
    ap_protocol::ITEMS_HANDLING_ALL
}

fn default_uuid_file() -> PathBuf {
    PathBuf::from("data/ap_uuid.txt")
}
