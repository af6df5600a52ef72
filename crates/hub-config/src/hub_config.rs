//! Hub configuration
//!
//! Parsed from `configuration.yaml`:
//!
//! ```yaml
//! hub:
//!   name: Home
//! storage:
//!   database: hub.db
//! queue:
//!   backend: sqlite
//!   poll_interval_ms: 500
//!   max_deliveries: 5
//! api:
//!   bind: 127.0.0.1:8000
//! ```
//!
//! Every section and field is optional.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;
use crate::CONFIG_FILE;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub hub: HubSection,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub api: ApiConfig,
}

/// The `hub:` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSection {
    /// Display name of this installation
    pub name: String,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            name: "Home".to_string(),
        }
    }
}

/// The `storage:` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database holding the queue and consequences
    pub database: PathBuf,

    /// Directory containing `.storage/` (rules); defaults to the config dir
    pub storage_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("hub.db"),
            storage_dir: None,
        }
    }
}

/// Queue backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// In-process, lost on restart
    Memory,
    /// Durable, in the storage database
    #[default]
    Sqlite,
}

/// The `queue:` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,

    /// How often an idle consumer re-checks the SQLite queue
    pub poll_interval_ms: u64,

    /// Deliveries of one event before it is dropped
    pub max_deliveries: u32,

    /// Pause before a failed event is redelivered
    pub retry_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Sqlite,
            poll_interval_ms: 500,
            max_deliveries: 5,
            retry_delay_ms: 1000,
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// The `api:` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Listen address for the REST API
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

impl HubConfig {
    /// Load `configuration.yaml` from a config directory.
    ///
    /// A missing file yields the defaults.
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref();
        if !config_dir.join(CONFIG_FILE).exists() {
            info!("No {} in {:?}, using defaults", CONFIG_FILE, config_dir);
            return Ok(Self::default());
        }

        let yaml = load_yaml(config_dir, CONFIG_FILE)?;
        Self::from_yaml(&yaml)
    }

    /// Parse configuration from an already loaded YAML value
    pub fn from_yaml(yaml: &Value) -> ConfigResult<Self> {
        if yaml.is_null() {
            return Ok(Self::default());
        }
        if !yaml.is_mapping() {
            return Err(ConfigError::InvalidValue {
                key: "root".to_string(),
                reason: "configuration must be a mapping".to_string(),
            });
        }

        let config: HubConfig =
            serde_yaml::from_value(yaml.clone()).map_err(|e| ConfigError::InvalidValue {
                key: "configuration".to_string(),
                reason: e.to_string(),
            })?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.queue.max_deliveries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "queue.max_deliveries".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.queue.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "queue.poll_interval_ms".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Database path, relative paths resolved against `config_dir`
    pub fn database_path(&self, config_dir: &Path) -> PathBuf {
        config_dir.join(&self.storage.database)
    }

    /// Directory holding `.storage/`, relative paths resolved against `config_dir`
    pub fn storage_dir(&self, config_dir: &Path) -> PathBuf {
        match &self.storage.storage_dir {
            Some(dir) => config_dir.join(dir),
            None => config_dir.to_path_buf(),
        }
    }
}
