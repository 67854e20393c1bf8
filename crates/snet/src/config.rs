//! Configuration
//!
//! Layered with figment: built-in defaults, then `snet.toml`, then
//! `SNET_`-prefixed environment variables (`SNET_HOST__WORKERS=8`).
//!
//! ```toml
//! addresses = "addresses.toml"
//! scripts_dir = "scripts"
//!
//! [host]
//! library_dir = "./plugins"
//! config_dir = "./plugins/config"
//! workers = 5
//!
//! [engine]
//! poll_interval_ms = 1000
//! ```
//!
//! Relative `addresses` and `scripts_dir` paths resolve against the directory
//! of the config file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use snet_mq::HostOptions;
use snet_types::AddressDetails;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Configuration error: {0}")]
    Figment(#[from] figment::Error),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// ─────────────────────────────────────────────────────────────────────────────
// Snet Config
// ─────────────────────────────────────────────────────────────────────────────

/// Virtual address sampling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How often the runner samples virtual addresses through dispatch
    pub poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnetConfig {
    pub host: HostOptions,
    pub engine: EngineConfig,
    /// Address table (`[[address]]` entries)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addresses: Option<PathBuf>,
    /// Root for relative script paths
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scripts_dir: Option<PathBuf>,
}

impl SnetConfig {
    /// Load defaults, then `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(SnetConfig::default()));
        if let Some(path) = path {
            if !path.is_file() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            figment = figment.merge(Toml::file(path));
        }

        let mut config: SnetConfig = figment
            .merge(Env::prefixed("SNET_").split("__"))
            .extract()?;

        if let Some(base) = path.and_then(Path::parent) {
            config.resolve_relative_to(base);
        }
        config.validate()?;
        Ok(config)
    }

    /// Check values that would stall the runtime
    pub fn validate(&self) -> ConfigResult<()> {
        if self.engine.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("engine.poll_interval_ms must be > 0".into()));
        }
        if self.host.workers == 0 {
            return Err(ConfigError::Invalid("host.workers must be > 0".into()));
        }
        if self.host.queue_capacity == 0 {
            return Err(ConfigError::Invalid("host.queue_capacity must be > 0".into()));
        }
        if self.host.retry_interval_ms == 0 {
            return Err(ConfigError::Invalid("host.retry_interval_ms must be > 0".into()));
        }
        Ok(())
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        for path in [&mut self.addresses, &mut self.scripts_dir].into_iter().flatten() {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Address Table
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AddressTable {
    #[serde(default, rename = "address")]
    addresses: Vec<AddressDetails>,
}

/// Load an address table
///
/// ```toml
/// [[address]]
/// name = "Saw{1000,1,0^10}"
/// data_type = "Int32"
/// virtual = true
/// publish = { topic = "plant/saw" }
/// ```
pub fn load_addresses(path: &Path) -> ConfigResult<Vec<AddressDetails>> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let table: AddressTable = toml::from_str(&text).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut seen = HashSet::new();
    for details in &table.addresses {
        if details.name.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{}: address with an empty name",
                path.display()
            )));
        }
        if !seen.insert(details.name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "{}: duplicate address '{}'",
                path.display(),
                details.name
            )));
        }
    }
    Ok(table.addresses)
}
